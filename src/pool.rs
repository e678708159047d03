//! Fixed-capacity pools of analysis resources (cutting and clipping planes).
//!
//! Slots live in an arena and are addressed through [`PoolHandle`]s. A handle
//! is not `Clone`: releasing it consumes it, and every slot carries a
//! generation counter so a handle that outlived its slot is rejected instead
//! of silently touching the next owner's state.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

use crate::geom::Plane;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("slot {index} is out of range for a pool of {capacity} slots")]
    OutOfRange { index: usize, capacity: usize },
    #[error("handle for slot {index} (generation {generation}) was already released")]
    StaleHandle { index: usize, generation: u32 },
}

/// Exclusive claim on one pool slot.
pub struct PoolHandle<T> {
    index: usize,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PoolHandle<T> {
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl<T> fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Flag view of one slot, in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotState {
    pub allocated: bool,
    pub active: bool,
}

#[derive(Debug)]
struct Slot<T> {
    allocated: bool,
    active: bool,
    generation: u32,
    value: T,
}

#[derive(Debug)]
pub struct ResourcePool<T> {
    slots: Vec<Slot<T>>,
}

impl<T: Default> ResourcePool<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                allocated: false,
                active: false,
                generation: 0,
                value: T::default(),
            })
            .collect();
        Self { slots }
    }

    /// Claims the first free slot in scan order. A full pool is not an error.
    pub fn allocate(&mut self) -> Option<PoolHandle<T>> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.allocated)?;
        slot.allocated = true;
        slot.active = false;
        Some(PoolHandle {
            index,
            generation: slot.generation,
            _marker: PhantomData,
        })
    }

    /// Returns the slot to the free set; the slot's value is reset.
    pub fn release(&mut self, handle: PoolHandle<T>) -> Result<(), PoolError> {
        let slot = self.slot_mut(&handle)?;
        slot.allocated = false;
        slot.active = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.value = T::default();
        Ok(())
    }
}

impl<T> ResourcePool<T> {
    fn slot(&self, handle: &PoolHandle<T>) -> Result<&Slot<T>, PoolError> {
        let capacity = self.slots.len();
        let slot = self.slots.get(handle.index).ok_or(PoolError::OutOfRange {
            index: handle.index,
            capacity,
        })?;
        if slot.allocated && slot.generation == handle.generation {
            Ok(slot)
        } else {
            Err(PoolError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            })
        }
    }

    fn slot_mut(&mut self, handle: &PoolHandle<T>) -> Result<&mut Slot<T>, PoolError> {
        self.slot(handle)?;
        Ok(&mut self.slots[handle.index])
    }

    pub fn set_active(&mut self, handle: &PoolHandle<T>, active: bool) -> Result<(), PoolError> {
        self.slot_mut(handle)?.active = active;
        Ok(())
    }

    pub fn is_active(&self, handle: &PoolHandle<T>) -> Result<bool, PoolError> {
        Ok(self.slot(handle)?.active)
    }

    pub fn get(&self, handle: &PoolHandle<T>) -> Result<&T, PoolError> {
        Ok(&self.slot(handle)?.value)
    }

    pub fn get_mut(&mut self, handle: &PoolHandle<T>) -> Result<&mut T, PoolError> {
        Ok(&mut self.slot_mut(handle)?.value)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.allocated).count()
    }

    pub fn states(&self) -> impl Iterator<Item = SlotState> + '_ {
        self.slots.iter().map(|slot| SlotState {
            allocated: slot.allocated,
            active: slot.active,
        })
    }

    /// Values of active slots in scan order.
    pub fn active(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.active)
            .map(|slot| &slot.value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CuttingPlane {
    pub plane: Plane,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClippingPlane {
    pub plane: Plane,
}

pub type CuttingPlanePool = ResourcePool<CuttingPlane>;
pub type ClippingPlanePool = ResourcePool<ClippingPlane>;
pub type CuttingPlaneHandle = PoolHandle<CuttingPlane>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_active_implies_allocated<T>(pool: &ResourcePool<T>) {
        for state in pool.states() {
            assert!(!state.active || state.allocated, "active slot without allocation");
        }
    }

    #[test]
    fn allocates_in_scan_order_until_full() {
        let mut pool = CuttingPlanePool::with_capacity(3);
        let handles: Vec<_> = (0..3).map(|_| pool.allocate().expect("free slot")).collect();
        assert_eq!(
            handles.iter().map(PoolHandle::index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(pool.allocate().is_none());
        assert_eq!(pool.allocated_count(), 3);
    }

    #[test]
    fn release_returns_slot_to_free_set() {
        let mut pool = CuttingPlanePool::with_capacity(2);
        let first = pool.allocate().expect("slot 0");
        let _second = pool.allocate().expect("slot 1");
        pool.release(first).expect("release");
        let again = pool.allocate().expect("slot 0 again");
        assert_eq!(again.index(), 0);
    }

    #[test]
    fn release_clears_active_flag() {
        let mut pool = ClippingPlanePool::with_capacity(1);
        let handle = pool.allocate().expect("slot");
        pool.set_active(&handle, true).expect("active");
        assert_eq!(pool.active().count(), 1);
        pool.release(handle).expect("release");
        assert_eq!(pool.active().count(), 0);
        assert_active_implies_allocated(&pool);
    }

    #[test]
    fn deactivating_inactive_slot_is_a_no_op() {
        let mut pool = CuttingPlanePool::with_capacity(2);
        let handle = pool.allocate().expect("slot");
        let before: Vec<_> = pool.states().collect();
        pool.set_active(&handle, false).expect("set inactive");
        let after: Vec<_> = pool.states().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn forged_handle_from_previous_generation_is_rejected() {
        let mut pool = CuttingPlanePool::with_capacity(1);
        let handle = pool.allocate().expect("slot");
        let stale = PoolHandle::<CuttingPlane> {
            index: handle.index,
            generation: handle.generation,
            _marker: PhantomData,
        };
        pool.release(handle).expect("release");
        let _owner = pool.allocate().expect("reallocated");
        match pool.set_active(&stale, true) {
            Err(PoolError::StaleHandle { index: 0, generation: 0 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert_active_implies_allocated(&pool);
    }

    #[test]
    fn allocation_count_never_exceeds_capacity() {
        let mut pool = CuttingPlanePool::with_capacity(4);
        let mut held = Vec::new();
        for step in 0..40 {
            if step % 3 == 2 {
                if let Some(handle) = held.pop() {
                    pool.release(handle).expect("release");
                }
            } else if let Some(handle) = pool.allocate() {
                pool.set_active(&handle, step % 2 == 0).expect("toggle");
                held.push(handle);
            }
            assert!(pool.allocated_count() <= pool.capacity());
            assert_eq!(pool.allocated_count(), held.len());
            assert_active_implies_allocated(&pool);
        }
    }
}
