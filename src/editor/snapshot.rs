//! Snapshot and restore of the full editor state.
//!
//! A snapshot deep-copies the token buffer, its metadata and the runtime's
//! opaque state blob. It is not aliased to the editor, so it safely outlives
//! any later mutations.

use crate::error::EditorResult;
use crate::types::{TokenId, TokenInfo};

use super::TokenEditor;

/// Owned copy of an editor's buffer, metadata and runtime state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    tokens: Vec<TokenId>,
    info: Vec<TokenInfo>,
    kv_state: Option<Vec<u8>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn has_kv_state(&self) -> bool {
        self.kv_state.is_some()
    }
}

impl TokenEditor {
    /// Capture the current buffer, metadata and runtime state.
    pub fn create_snapshot(&self) -> Snapshot {
        let blob = self.session_state();
        Snapshot {
            tokens: self.tokens.clone(),
            info: self.info.clone(),
            kv_state: if blob.is_empty() { None } else { Some(blob) },
        }
    }

    /// Overwrite the editor with a snapshot's contents. With a KV blob the
    /// editor comes back clean and logits-valid; without one the cache is
    /// marked dirty for the next lazy sync. Not recorded in the undo log.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> EditorResult<()> {
        self.tokens.clone_from(&snapshot.tokens);
        self.info.clone_from(&snapshot.info);

        match &snapshot.kv_state {
            Some(blob) => {
                self.restore_session_state(blob)?;
                self.kv_dirty = false;
                self.logits_valid = true;
            }
            None => {
                self.kv_dirty = true;
                self.logits_valid = false;
            }
        }
        Ok(())
    }
}
