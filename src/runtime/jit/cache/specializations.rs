use ahash::AHashMap;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::runtime::async_value::{AllAvailable, AsyncState, AsyncValue, AsyncValueRef};
use crate::runtime::jit::specialization::SpecializationKey;

/// Result of [`Specializations::allocate`].
#[derive(Debug)]
pub struct Entry<T> {
    pub value: AsyncValueRef<T>,
    /// True only for the caller that created the slot and is responsible for
    /// settling it.
    pub allocated: bool,
    /// Allocation order of the slot, starting at zero.
    pub ordinal: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub failed: usize,
}

struct Slots<T> {
    by_key: AHashMap<SpecializationKey, (usize, AsyncValueRef<T>)>,
    /// Slots in allocation order, used to snapshot for `all_available`.
    ordered: Vec<AsyncValueRef<T>>,
}

/// Concurrent map from specialization key to a write-once executable slot.
///
/// A key is allocated at most once; concurrent allocations of the same key
/// all observe the slot created by the winner. Entries are never removed.
pub struct Specializations<T> {
    slots: RwLock<Slots<T>>,
}

impl<T> Default for Specializations<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Specializations<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                by_key: AHashMap::new(),
                ordered: Vec::new(),
            }),
        }
    }

    /// Get an existing slot
    pub fn find(&self, key: SpecializationKey) -> Option<AsyncValueRef<T>> {
        self.slots
            .read()
            .by_key
            .get(&key)
            .map(|(_, value)| AsyncValueRef::clone(value))
    }

    /// Get the slot for `key`, creating a pending one if none exists.
    pub fn allocate(&self, key: SpecializationKey) -> Entry<T> {
        let slots = self.slots.upgradable_read();
        if let Some((ordinal, value)) = slots.by_key.get(&key) {
            return Entry {
                value: AsyncValueRef::clone(value),
                allocated: false,
                ordinal: *ordinal,
            };
        }

        let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
        let ordinal = slots.ordered.len();
        let value = AsyncValue::pending();
        slots
            .by_key
            .insert(key, (ordinal, AsyncValueRef::clone(&value)));
        slots.ordered.push(AsyncValueRef::clone(&value));

        tracing::debug!(%key, ordinal, "allocated specialization slot");
        Entry {
            value,
            allocated: true,
            ordinal,
        }
    }

    /// Future resolving once every slot allocated so far is settled. Slots
    /// allocated after this call are not waited on.
    pub fn all_available(&self) -> AllAvailable<T> {
        AllAvailable::new(self.slots.read().ordered.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let slots = self.slots.read();
        let mut stats = CacheStats {
            total: slots.ordered.len(),
            ..CacheStats::default()
        };
        for value in &slots.ordered {
            match value.state() {
                AsyncState::Pending => stats.pending += 1,
                AsyncState::Ready => stats.ready += 1,
                AsyncState::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
