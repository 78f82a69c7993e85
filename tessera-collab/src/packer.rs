//! Delta packing: collapse a burst of cell edits to one write per cell.
//!
//! A brush stroke can touch the same cell many times before the editor
//! flushes. Only the last value per index matters, and survivors keep the
//! position of their last occurrence, so replaying the packed list gives
//! the same result as replaying the burst.

use std::collections::HashSet;
use std::hash::Hash;

use crate::protocol::Delta;

/// Keep only the last value per key, in order of last occurrence.
pub fn pack<K, V>(edits: &[(K, V)]) -> Vec<(K, V)>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    let mut seen = HashSet::with_capacity(edits.len());
    let mut packed: Vec<(K, V)> = edits
        .iter()
        .rev()
        .filter(|(key, _)| seen.insert(*key))
        .cloned()
        .collect();
    packed.reverse();
    packed
}

/// [`pack`] over cell deltas.
pub fn pack_deltas(deltas: &[Delta]) -> Vec<Delta> {
    let pairs: Vec<(u32, u16)> = deltas.iter().map(|&d| d.into()).collect();
    pack(&pairs).into_iter().map(Delta::from).collect()
}

/// Pending local edits waiting to be flushed as one `draw`.
///
/// Edits survive while the editor is offline. Once the buffer grows past
/// its threshold it is packed in place. The threshold starts at
/// `compact_at` and is raised to twice the packed length after each pass,
/// so a burst of distinct cells costs amortized O(1) per push.
#[derive(Debug, Clone)]
pub struct EditBuffer {
    edits: Vec<Delta>,
    compact_at: usize,
    next_compaction: usize,
    compactions: u64,
}

impl EditBuffer {
    pub const DEFAULT_COMPACT_AT: usize = 4096;

    pub fn new() -> Self {
        Self::with_compaction(Self::DEFAULT_COMPACT_AT)
    }

    pub fn with_compaction(compact_at: usize) -> Self {
        let compact_at = compact_at.max(1);
        Self {
            edits: Vec::new(),
            compact_at,
            next_compaction: compact_at,
            compactions: 0,
        }
    }

    pub fn push(&mut self, delta: Delta) {
        self.edits.push(delta);
        if self.edits.len() > self.next_compaction {
            self.edits = pack_deltas(&self.edits);
            self.next_compaction = self.compact_at.max(self.edits.len() * 2);
            self.compactions += 1;
            log::trace!(
                "Compacted edit buffer to {} cells, next pass past {}",
                self.edits.len(),
                self.next_compaction
            );
        }
    }

    /// Number of in-place packing passes so far.
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn as_slice(&self) -> &[Delta] {
        &self.edits
    }

    /// Indices with a pending write.
    pub fn pending_indices(&self) -> HashSet<u32> {
        self.edits.iter().map(|d| d.index).collect()
    }

    /// Drain the buffer, returning the packed edits.
    pub fn take_packed(&mut self) -> Vec<Delta> {
        self.next_compaction = self.compact_at;
        pack_deltas(&std::mem::take(&mut self.edits))
    }

    /// Put edits back at the front after a failed send.
    ///
    /// Anything pushed since the take was made stays newer.
    pub fn restore(&mut self, mut deltas: Vec<Delta>) {
        deltas.append(&mut self.edits);
        self.edits = deltas;
    }

    pub fn clear(&mut self) {
        self.edits.clear();
        self.next_compaction = self.compact_at;
    }
}

impl Default for EditBuffer {
    fn default() -> Self {
        Self::new()
    }
}
