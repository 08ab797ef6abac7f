//! Parameter arena: a growable scratch buffer that internalises one BIND's
//! raw value bytes so the entry no longer depends on the (volatile, reused)
//! network receive buffer.
//!
//! A per-entry doubling buffer rather than a pooled one: arena contents
//! must survive across BIND and every later EXECUTE of that portal, not
//! just one response cycle, so ordinary `Vec` growth fits better than a
//! release-on-drop pool.

use bytes::BytesMut;

use crate::wire::messages::RawValue;

/// A byte range inside the arena's backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSlot {
    start: usize,
    len: usize,
}

/// Scratch memory mirroring the last BIND's raw value block, scoped to one
/// `PipelineEntry`. Reset (not shrunk) between BINDs so repeated executions
/// of the same size class don't reallocate.
pub struct ParameterArena {
    buf: BytesMut,
}

impl ParameterArena {
    pub fn new() -> Self {
        ParameterArena {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Copy every non-NULL value from `values` into the arena, growing by
    /// doubling as needed, and return one slot per value (`None` for NULL).
    /// Overwrites whatever the arena held from a previous BIND.
    pub fn ingest(&mut self, values: &[RawValue<'_>]) -> Vec<Option<ArenaSlot>> {
        self.buf.clear();
        let needed: usize = values.iter().flatten().map(|v| v.len()).sum();
        self.reserve(needed);

        let mut slots = Vec::with_capacity(values.len());
        for value in values {
            match value {
                None => slots.push(None),
                Some(bytes) => {
                    let start = self.buf.len();
                    self.buf.extend_from_slice(bytes);
                    slots.push(Some(ArenaSlot {
                        start,
                        len: bytes.len(),
                    }));
                }
            }
        }
        slots
    }

    fn reserve(&mut self, additional: usize) {
        if self.buf.capacity() - self.buf.len() < additional {
            let mut new_cap = self.buf.capacity().max(256);
            while new_cap - self.buf.len() < additional {
                new_cap *= 2;
            }
            let mut grown = BytesMut::with_capacity(new_cap);
            grown.extend_from_slice(&self.buf);
            self.buf = grown;
        }
    }

    pub fn get(&self, slot: ArenaSlot) -> &[u8] {
        &self.buf[slot.start..slot.start + slot.len]
    }
}

impl Default for ParameterArena {
    fn default() -> Self {
        ParameterArena::new()
    }
}
