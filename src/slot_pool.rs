use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::backend::{BufferId, BufferKind, RenderBackend};
use crate::error::PoolError;
use crate::label::Bitmap;
use crate::utils::InstanceRecord;

/// Generation stamp of an unoccupied slot. Real generations never take
/// this value: [`crate::pool_set::PoolSet::advance_generation`] skips it
/// when the counter wraps.
pub const GENERATION_EMPTY: u32 = u32::MAX;

/// Age of `stamped` as seen from `current`, under wrapping arithmetic.
///
/// Generations are a wrapping u32 counter. Ages are meaningful as long
/// as no live slot is more than `u32::MAX / 2` generations behind the
/// current one, which at interactive frame rates is years of uptime.
pub fn generation_age(current: u32, stamped: u32) -> u32 {
    current.wrapping_sub(stamped)
}

/// Whether `stamped` is strictly older than `threshold`, as seen from
/// `current`, modulo wraparound.
pub fn older_than(current: u32, stamped: u32, threshold: u32) -> bool {
    generation_age(current, stamped) > generation_age(current, threshold)
}

struct Slot {
    tag: Option<Uuid>,
    payload: Option<Bitmap>,
    generation: u32,
    occupied: bool,
    record: InstanceRecord,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            tag: None,
            payload: None,
            generation: GENERATION_EMPTY,
            occupied: false,
            record: InstanceRecord::SENTINEL,
        }
    }
}

/// A fixed-capacity pool of generation-stamped slots backed by one GPU
/// instance buffer.
///
/// Slot indices are load-bearing: they are baked into draw bindings and
/// handed out to callers, so removal tombstones in place (the backing
/// record is overwritten with the sentinel the renderer culls) and the
/// index is recycled by a later add. Capacity policy lives in
/// [`crate::pool_set::PoolSet`]; this type only refuses when full.
pub struct SlotPool {
    slots: Vec<Slot>,
    capacity: usize,
    deleted_count: usize,
    buffer: BufferId,
    disposed: bool,
}

impl SlotPool {
    pub fn new<B: RenderBackend>(backend: &mut B, capacity: usize) -> Self {
        let buffer = backend.allocate_buffer(BufferKind::Instance, capacity);
        SlotPool {
            slots: Vec::new(),
            capacity,
            deleted_count: 0,
            buffer,
            disposed: false,
        }
    }

    /// Inserts an item, reusing the lowest tombstoned slot if one exists
    /// and appending otherwise. The slot's own index is stamped into the
    /// record before it is written so GPU picking can self-reference.
    pub fn add<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        tag: Option<Uuid>,
        payload: Option<Bitmap>,
        mut record: InstanceRecord,
        generation: u32,
    ) -> Result<usize, PoolError> {
        debug_assert!(!self.disposed, "add on a disposed pool");

        let index = if self.deleted_count > 0 {
            let index = self
                .slots
                .iter()
                .position(|slot| !slot.occupied)
                .expect("deleted_count > 0 but no tombstone found");
            self.deleted_count -= 1;
            index
        } else if self.slots.len() < self.capacity {
            self.slots.push(Slot::empty());
            self.slots.len() - 1
        } else {
            return Err(PoolError::GroupFull {
                capacity: self.capacity,
            });
        };

        record.slot_self = index as u32;

        let slot = &mut self.slots[index];
        slot.tag = tag;
        slot.payload = payload;
        slot.generation = generation;
        slot.occupied = true;
        slot.record = record;

        backend.write_record(self.buffer, index, &record);
        Ok(index)
    }

    /// Tombstones the slot at `index`. False for out-of-range or already
    /// empty slots; both are expected under duplicate event delivery.
    pub fn remove_at<B: RenderBackend>(&mut self, backend: &mut B, index: usize) -> bool {
        debug_assert!(!self.disposed, "remove_at on a disposed pool");

        match self.slots.get_mut(index) {
            Some(slot) if slot.occupied => {
                slot.payload = None;
                slot.tag = None;
                slot.generation = GENERATION_EMPTY;
                slot.occupied = false;
                slot.record = InstanceRecord::SENTINEL;
                self.deleted_count += 1;

                backend.write_record(self.buffer, index, &InstanceRecord::SENTINEL);
                true
            }
            _ => false,
        }
    }

    /// Replaces the tag on an occupied slot. The caller owns any reverse
    /// index pointing at this slot.
    pub fn relabel(&mut self, index: usize, new_tag: Option<Uuid>) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.occupied => {
                slot.tag = new_tag;
                true
            }
            _ => false,
        }
    }

    /// Updates only the control word of an occupied slot.
    pub fn set_aux<B: RenderBackend>(&mut self, backend: &mut B, index: usize, value: u32) -> bool {
        debug_assert!(!self.disposed, "set_aux on a disposed pool");

        match self.slots.get_mut(index) {
            Some(slot) if slot.occupied => {
                slot.record.control = value;
                backend.write_aux(self.buffer, index, value);
                true
            }
            _ => false,
        }
    }

    /// The record at `index`, or the sentinel for out-of-range or empty
    /// slots. Callers treat the sentinel as "no item".
    pub fn get_record(&self, index: usize) -> InstanceRecord {
        match self.slots.get(index) {
            Some(slot) if slot.occupied => slot.record,
            _ => InstanceRecord::SENTINEL,
        }
    }

    pub fn tag_at(&self, index: usize) -> Option<Uuid> {
        self.slots.get(index).and_then(|slot| slot.tag)
    }

    pub fn generation_at(&self, index: usize) -> u32 {
        self.slots
            .get(index)
            .map(|slot| slot.generation)
            .unwrap_or(GENERATION_EMPTY)
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map(|slot| slot.occupied)
            .unwrap_or(false)
    }

    /// Removes every occupied slot strictly older than `threshold`,
    /// except slots whose tag is in `keep`, which are refreshed to
    /// `current` instead. Tags of evicted slots are removed from
    /// `tag_index`, but only when the entry still points at this
    /// `(group, slot)` — a duplicate-tagged newer item keeps its entry.
    /// Returns the maximum age among surviving slots that were not
    /// refreshed.
    pub fn evict_below<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        group: usize,
        threshold: u32,
        current: u32,
        tag_index: &mut HashMap<Uuid, (usize, usize)>,
        keep: &HashSet<Uuid>,
    ) -> u32 {
        debug_assert!(!self.disposed, "evict_below on a disposed pool");

        let mut oldest = 0u32;
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if !slot.occupied {
                continue;
            }

            if let Some(tag) = slot.tag {
                if keep.contains(&tag) {
                    slot.generation = current;
                    continue;
                }
            }

            if older_than(current, slot.generation, threshold) {
                if let Some(tag) = slot.tag.take() {
                    if tag_index.get(&tag) == Some(&(group, index)) {
                        tag_index.remove(&tag);
                    }
                }
                slot.payload = None;
                slot.generation = GENERATION_EMPTY;
                slot.occupied = false;
                slot.record = InstanceRecord::SENTINEL;
                self.deleted_count += 1;
                backend.write_record(self.buffer, index, &InstanceRecord::SENTINEL);
            } else {
                oldest = oldest.max(generation_age(current, slot.generation));
            }
        }

        oldest
    }

    /// Releases every payload and tombstones every slot in place.
    pub fn clear<B: RenderBackend>(&mut self, backend: &mut B) {
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if slot.occupied {
                backend.write_record(self.buffer, index, &InstanceRecord::SENTINEL);
            }
            *slot = Slot::empty();
        }
        self.deleted_count = self.slots.len();
    }

    /// Releases payloads and the backing buffer. Safe to call twice.
    pub fn dispose<B: RenderBackend>(&mut self, backend: &mut B) {
        if self.disposed {
            return;
        }
        for slot in &mut self.slots {
            slot.payload = None;
        }
        backend.release_buffer(self.buffer);
        self.disposed = true;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Occupied slots.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.deleted_count
    }

    /// Slots still insertable into, via tombstone reuse or append.
    pub fn free_count(&self) -> usize {
        self.capacity - self.live_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }
}
