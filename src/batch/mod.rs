//! Batch descriptors exchanged with the compute engine.
//!
//! A descriptor reserves a fixed number of request slots. Each occupied slot
//! names the owning request and the tokens it covers this step. The three
//! phases carry structurally different payloads, so they are separate types
//! joined by the [`BatchDescriptor`] variant.

mod decode;
mod expand;
mod result;
mod verify;

pub use decode::{DecodeBatch, DecodeSlot};
pub use expand::{ExpandBatch, ExpandInput, ExpandSlot, FrontierToken};
pub use result::{BeamResult, DecodeResult, VerifyResult};
pub use verify::{CommittedToken, VerifyBatch, VerifySlot};

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Globally unique request identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestGuid(pub u64);

impl fmt::Display for RequestGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute phase a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Decode,
    Expand,
    Verify,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Expand => "expand",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-slot payload common to every phase.
pub trait SlotEntry {
    fn guid(&self) -> RequestGuid;
    /// Tokens the compute engine processes for this slot.
    fn num_tokens(&self) -> usize;
}

/// Fixed-capacity slot array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slots<S> {
    slots: Vec<Option<S>>,
}

impl<S: SlotEntry> Slots<S> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> Option<&S> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut S> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Place `entry` in `slot`, returning the previous occupant.
    ///
    /// # Panics
    /// Panics if `slot` is beyond capacity; callers index with slots they
    /// obtained from the same scheduler.
    pub fn insert(&mut self, slot: usize, entry: S) -> Option<S> {
        self.slots[slot].replace(entry)
    }

    /// Iterate over `(slot, entry)` for occupied slots, in slot order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &S)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|entry| (i, entry)))
    }

    pub fn num_occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.num_occupied() == 0
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.get(slot).is_some()
    }

    pub fn guids(&self) -> Vec<RequestGuid> {
        self.occupied().map(|(_, s)| s.guid()).collect()
    }

    pub fn num_tokens(&self) -> usize {
        self.occupied().map(|(_, s)| s.num_tokens()).sum()
    }

    /// True when no two slots name the same request.
    pub fn is_injective(&self) -> bool {
        let mut seen = HashSet::new();
        self.occupied().all(|(_, s)| seen.insert(s.guid()))
    }
}

/// Tagged descriptor for whichever phase runs next.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchDescriptor {
    Decode(DecodeBatch),
    Expand(ExpandBatch),
    Verify(VerifyBatch),
}

impl BatchDescriptor {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Decode(_) => Phase::Decode,
            Self::Expand(_) => Phase::Expand,
            Self::Verify(_) => Phase::Verify,
        }
    }

    pub fn num_tokens(&self) -> usize {
        match self {
            Self::Decode(b) => b.slots.num_tokens(),
            Self::Expand(b) => b.slots.num_tokens(),
            Self::Verify(b) => b.slots.num_tokens(),
        }
    }

    pub fn num_occupied(&self) -> usize {
        match self {
            Self::Decode(b) => b.slots.num_occupied(),
            Self::Expand(b) => b.slots.num_occupied(),
            Self::Verify(b) => b.slots.num_occupied(),
        }
    }

    pub fn guids(&self) -> Vec<RequestGuid> {
        match self {
            Self::Decode(b) => b.slots.guids(),
            Self::Expand(b) => b.slots.guids(),
            Self::Verify(b) => b.slots.guids(),
        }
    }

    pub fn is_injective(&self) -> bool {
        match self {
            Self::Decode(b) => b.slots.is_injective(),
            Self::Expand(b) => b.slots.is_injective(),
            Self::Verify(b) => b.slots.is_injective(),
        }
    }
}

impl From<DecodeBatch> for BatchDescriptor {
    fn from(batch: DecodeBatch) -> Self {
        Self::Decode(batch)
    }
}

impl From<ExpandBatch> for BatchDescriptor {
    fn from(batch: ExpandBatch) -> Self {
        Self::Expand(batch)
    }
}

impl From<VerifyBatch> for BatchDescriptor {
    fn from(batch: VerifyBatch) -> Self {
        Self::Verify(batch)
    }
}
