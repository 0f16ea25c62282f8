//! Sequence multiplexing over the runtime's KV cache.
//!
//! The editor keeps a compact set of active sequence ids. The token buffer
//! itself stays a single linear array for the primary sequence; per-sequence
//! divergence lives entirely in the KV cache and is manipulated through the
//! runtime's copy/remove primitives. Callers must treat the `seq_id` on
//! mutations as authoritative and not assume tokens are shared across
//! sequences at the buffer level.

use crate::error::{EditorError, EditorResult};
use crate::types::SeqId;

use super::TokenEditor;

/// Hard cap on concurrently active sequences.
pub const MAX_SEQUENCES: usize = 16;

impl TokenEditor {
    /// The currently active sequence ids.
    pub fn sequences(&self) -> &[SeqId] {
        &self.sequences
    }

    /// Allocate the next sequence id (`max(active) + 1`).
    pub fn create_sequence(&mut self) -> EditorResult<SeqId> {
        if self.sequences.len() >= MAX_SEQUENCES {
            return Err(EditorError::AllocationFailed(format!(
                "sequence table full ({MAX_SEQUENCES} active)"
            )));
        }
        let id = self
            .sequences
            .iter()
            .copied()
            .max()
            .map_or(0, |max| max + 1);
        self.sequences.push(id);
        Ok(id)
    }

    /// Deactivate a sequence and drop its KV entries.
    pub fn delete_sequence(&mut self, seq_id: SeqId) -> EditorResult<()> {
        let idx = self
            .sequences
            .iter()
            .position(|&s| s == seq_id)
            .ok_or(EditorError::SequenceNotFound(seq_id))?;
        self.sequences.remove(idx);
        self.session.kv_remove(seq_id, None, None);
        Ok(())
    }

    /// Duplicate KV content from `src` onto `dst`.
    pub fn copy_sequence(&mut self, src: SeqId, dst: SeqId) -> EditorResult<()> {
        if !self.sequences.contains(&src) {
            return Err(EditorError::SequenceNotFound(src));
        }
        self.session.kv_copy(src, dst);
        Ok(())
    }

    /// Create a sequence and copy `src` onto it, rolling the new id back if
    /// the copy fails.
    pub fn fork_sequence(&mut self, src: SeqId) -> EditorResult<SeqId> {
        let dst = self.create_sequence()?;
        if let Err(err) = self.copy_sequence(src, dst) {
            let _ = self.delete_sequence(dst);
            return Err(err);
        }
        Ok(dst)
    }
}
