//! Shared dispatch tables.
//!
//! Every generic primitive instantiated for an element type `T` references
//! one process-wide, read-only [`DispatchTable`] describing `T`. The tables
//! exist to give all instances of one instantiated type an identical,
//! uniformly invocable entry-point surface without per-instance allocation:
//!
//! - any two calls to [`table_of`] for the same `T` return pointer-identical
//!   references;
//! - invoking an entry point through the table (for example
//!   [`DispatchTable::drop_raw`]) behaves exactly like the direct equivalent.
//!
//! The primitives' own operations (`send`, `resume`, ...) are ordinary
//! monomorphized methods; the table carries only the type-erased surface.

use parking_lot::RwLock;
use std::alloc::Layout;
use std::any::{type_name, TypeId};
use std::collections::BTreeMap;
use std::fmt;

/// Read-only entry-point table for one instantiated element type.
///
/// Obtained via [`table_of`]; tables live for the rest of the process.
pub struct DispatchTable {
    type_id: TypeId,
    type_name: &'static str,
    layout: Layout,
    drop_fn: unsafe fn(*mut u8),
}

impl DispatchTable {
    /// `TypeId` of the element type this table describes.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Diagnostic name of the element type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Memory layout of one element.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Drop the element behind `slot` in place.
    ///
    /// Behaviorally identical to `std::ptr::drop_in_place` on a correctly
    /// typed pointer.
    ///
    /// # Safety
    ///
    /// `slot` must point to a valid, initialized element of this table's
    /// type, and the element must not be used afterwards.
    pub unsafe fn drop_raw(&self, slot: *mut u8) {
        unsafe { (self.drop_fn)(slot) }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("type_name", &self.type_name)
            .field("layout", &self.layout)
            .finish()
    }
}

unsafe fn drop_erased<T>(slot: *mut u8) {
    unsafe { std::ptr::drop_in_place(slot.cast::<T>()) }
}

/// Registry of instantiated tables, keyed by element `TypeId`.
static TABLES: RwLock<BTreeMap<TypeId, &'static DispatchTable>> = RwLock::new(BTreeMap::new());

/// Look up (or instantiate) the dispatch table for `T`.
///
/// The first call for a given `T` allocates the table and leaks it; every
/// later call returns the same `&'static` reference, so table references
/// compare pointer-equal across all instances of one instantiated type.
#[must_use]
pub fn table_of<T: 'static>() -> &'static DispatchTable {
    let id = TypeId::of::<T>();
    if let Some(table) = TABLES.read().get(&id).copied() {
        return table;
    }

    let mut tables = TABLES.write();
    *tables.entry(id).or_insert_with(|| {
        let table: &'static DispatchTable = Box::leak(Box::new(DispatchTable {
            type_id: id,
            type_name: type_name::<T>(),
            layout: Layout::new::<T>(),
            drop_fn: drop_erased::<T>,
        }));
        table
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::ManuallyDrop;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_type_is_pointer_identical() {
        let a = table_of::<u64>();
        let b = table_of::<u64>();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn distinct_types_get_distinct_tables() {
        let ints = table_of::<u64>();
        let strings = table_of::<String>();
        assert!(!std::ptr::eq(ints, strings));
        assert_ne!(ints.type_id(), strings.type_id());
    }

    #[test]
    fn table_describes_element_layout() {
        let table = table_of::<[u32; 4]>();
        assert_eq!(table.layout(), Layout::new::<[u32; 4]>());
        assert!(table.type_name().contains("u32"));
    }

    #[test]
    fn drop_raw_matches_direct_drop() {
        struct Probe(Arc<AtomicUsize>);

        impl Drop for Probe {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut slot = ManuallyDrop::new(Probe(Arc::clone(&drops)));
        let table = table_of::<Probe>();

        let ptr: *mut Probe = &mut *slot;
        unsafe { table.drop_raw(ptr.cast()) };
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
