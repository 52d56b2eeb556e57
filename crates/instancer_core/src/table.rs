//! # Entity Table
//!
//! Scene-owned storage for instanced entities with generational handles.

use crate::entity::{EntityId, InstancedEntity};

/// One storage slot. The generation is bumped every time the slot is freed,
/// invalidating every [`EntityId`] handed out for the previous occupant.
#[derive(Debug)]
struct Slot {
    generation: u32,
    value: Option<InstancedEntity>,
}

/// Generational storage for instanced entities.
///
/// Batches never own entities; they keep [`EntityId`]s and resolve them
/// through this table every frame. A handle whose entity was despawned
/// resolves to `None` even after its slot is reused.
///
/// # Thread Safety
///
/// This table is NOT thread-safe. The scene mutates it between frames and
/// batches only read from it while collecting transforms.
///
/// # Example
///
/// ```rust
/// use instancer_core::{EntityTable, InstancedEntity};
///
/// let mut table = EntityTable::new();
/// let first = table.spawn(InstancedEntity::default());
/// table.despawn(first);
///
/// // Slot reused, old handle stays dead
/// let second = table.spawn(InstancedEntity::default());
/// assert_eq!(first.index(), second.index());
/// assert!(table.get(first).is_none());
/// ```
#[derive(Debug, Default)]
pub struct EntityTable {
    /// The storage array.
    slots: Vec<Slot>,
    /// Free list - indices of available slots.
    free_list: Vec<u32>,
    /// Number of live entities.
    len: usize,
}

impl EntityTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with room for `capacity` entities.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Returns the number of live entities.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no entity is alive.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores an entity and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots would be needed.
    pub fn spawn(&mut self, entity: InstancedEntity) -> EntityId {
        self.len += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(entity);
            return EntityId::new(index, slot.generation);
        }

        assert!(
            self.slots.len() < u32::MAX as usize,
            "entity table exhausted the u32 index space"
        );
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(entity),
        });
        EntityId::new(index, 0)
    }

    /// Removes an entity.
    ///
    /// Callers should detach the entity from its batch first; batches treat
    /// the dead handle as an empty slot until then.
    ///
    /// # Returns
    ///
    /// The removed entity, or None if the handle was stale.
    pub fn despawn(&mut self, id: EntityId) -> Option<InstancedEntity> {
        let slot = self.slot_mut(id)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        self.free_list.push(id.index());
        self.len -= 1;
        Some(value)
    }

    /// Returns true if the handle refers to a live entity.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Gets a reference to a live entity.
    #[inline]
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&InstancedEntity> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    /// Gets a mutable reference to a live entity.
    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut InstancedEntity> {
        self.slot_mut(id)?.value.as_mut()
    }

    /// Iterates over all live entities.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &InstancedEntity)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|entity| (EntityId::new(index as u32, slot.generation), entity))
        })
    }

    /// Iterates mutably over all live entities.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut InstancedEntity)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|entity| (EntityId::new(index as u32, generation), entity))
        })
    }

    fn slot_mut(&mut self, id: EntityId) -> Option<&mut Slot> {
        if id.is_null() {
            return None;
        }
        let slot = self.slots.get_mut(id.index() as usize)?;
        (slot.generation == id.generation()).then_some(slot)
    }
}
