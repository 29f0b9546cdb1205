//! Stable slot IDs over sub-page storage.
//!
//! The slot table is an indirection vector: callers store a value and get
//! back a dense ID whose entry remembers where the serialized bytes live
//! and how long they are. Removed entries stay in the vector, unoccupied,
//! and are reused by the next `set`.

use std::fs;
use std::path::{Path, PathBuf};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{Position, StoreError, StoreResult, sidecar_path};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Pager;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Dense index into a slot table.
pub type SlotId = usize;

/// One entry of the indirection vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Byte position of the payload's first chunk.
    pub pos: Position,
    /// Serialized payload length in bytes.
    pub size: u64,
    /// Whether the entry currently names a live payload.
    pub occupied: bool,
}

/// Indirection vector mapping slot IDs to byte regions in slots pages.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
    identifier: PathBuf,
}

impl SlotTable {
    pub fn new(identifier: impl Into<PathBuf>) -> Self {
        Self {
            slots: Vec::new(),
            identifier: identifier.into(),
        }
    }

    pub fn identifier(&self) -> &Path {
        &self.identifier
    }

    /// Number of entries, occupied or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store a value and return its slot ID, reusing the first unoccupied
    /// entry if one exists.
    pub fn set<V: Serialize>(&mut self, pager: &mut Pager, value: &V) -> StoreResult<SlotId> {
        let bytes = encode_to_vec(value, bincode_config())
            .map_err(|e| StoreError::Write(format!("encode slot value: {e}")))?;
        let pos = pager.alloc_inner(bytes.len())?;
        pager.place_inner(pos, &bytes)?;

        let slot = Slot {
            pos,
            size: bytes.len() as u64,
            occupied: true,
        };
        match self.slots.iter().position(|s| !s.occupied) {
            Some(id) => {
                self.slots[id] = slot;
                Ok(id)
            }
            None => {
                self.slots.push(slot);
                Ok(self.slots.len() - 1)
            }
        }
    }

    /// Fetch and deserialize the value behind a slot ID.
    pub fn get<V: DeserializeOwned>(&self, pager: &mut Pager, id: SlotId) -> StoreResult<V> {
        let slot = self.occupied_slot(id)?;
        let bytes = pager.get_inner(slot.pos, slot.size as usize)?;
        let (value, _) = decode_from_slice(&bytes, bincode_config())
            .map_err(|e| StoreError::Read(format!("decode slot {id}: {e}")))?;
        Ok(value)
    }

    /// Write a new value under an existing slot ID, releasing the old
    /// region after the new one is in place.
    pub fn replace<V: Serialize>(
        &mut self,
        pager: &mut Pager,
        id: SlotId,
        value: &V,
    ) -> StoreResult<()> {
        let old = self.occupied_slot(id)?;
        let bytes = encode_to_vec(value, bincode_config())
            .map_err(|e| StoreError::Write(format!("encode slot value: {e}")))?;
        let pos = pager.alloc_inner(bytes.len())?;
        pager.place_inner(pos, &bytes)?;
        pager.free_inner(old.pos, old.size as usize)?;
        self.slots[id] = Slot {
            pos,
            size: bytes.len() as u64,
            occupied: true,
        };
        Ok(())
    }

    /// Release a slot's region and mark the entry reusable. Removing an
    /// already-unoccupied slot is a no-op.
    pub fn remove(&mut self, pager: &mut Pager, id: SlotId) -> StoreResult<()> {
        let slot = match self.slots.get(id) {
            Some(slot) => *slot,
            None => return Err(StoreError::Read(format!("slot {id} out of bounds"))),
        };
        if !slot.occupied {
            return Ok(());
        }
        pager.free_inner(slot.pos, slot.size as usize)?;
        self.slots[id].occupied = false;
        Ok(())
    }

    /// Persist the slot vector to the `<id>-slots` sidecar, then save the
    /// underlying pager.
    pub fn save(&self, pager: &mut Pager) -> StoreResult<()> {
        let bytes = encode_to_vec(&self.slots, bincode_config())
            .map_err(|e| StoreError::Write(format!("encode slot table: {e}")))?;
        fs::write(self.slots_path(), bytes)?;
        pager.save()
    }

    /// Restore the slot vector from its sidecar, then load the pager.
    pub fn load(&mut self, pager: &mut Pager) -> StoreResult<()> {
        let bytes = fs::read(self.slots_path())?;
        let (slots, _) = decode_from_slice(&bytes, bincode_config())
            .map_err(|e| StoreError::Read(format!("decode slot table: {e}")))?;
        self.slots = slots;
        pager.load()
    }

    fn slots_path(&self) -> PathBuf {
        sidecar_path(&self.identifier, "slots")
    }

    fn occupied_slot(&self, id: SlotId) -> StoreResult<Slot> {
        match self.slots.get(id) {
            Some(slot) if slot.occupied => Ok(*slot),
            Some(_) => Err(StoreError::Read(format!("slot {id} is unoccupied"))),
            None => Err(StoreError::Read(format!("slot {id} out of bounds"))),
        }
    }
}
