//! Reversible edit log — ordered undo log plus a LIFO redo stack.
//!
//! Every recorded [`Edit`] is self-sufficient: it carries the tokens needed
//! to invert it, so replay never consults external state. Replay mutations
//! run with [`HistoryMode::Replay`], which skips recording — the public API
//! never sees the mode.

use std::collections::VecDeque;

use crate::error::EditorResult;
use crate::types::{Pos, Range, SeqId, TokenFlags, TokenId};

use super::TokenEditor;

/// Undo-log entries kept by default before the oldest is evicted.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Whether a mutation should be recorded in the undo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HistoryMode {
    /// Normal mutation: push an inverse entry, clear the redo stack.
    Record,
    /// Undo/redo replay: apply without recording.
    Replay,
}

/// A reversible operation over the token buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Tokens were inserted at `at`; undo deletes them.
    Insert {
        at: Pos,
        seq_id: SeqId,
        tokens: Vec<TokenId>,
    },
    /// Tokens were deleted from `at`; undo re-inserts them.
    Delete {
        at: Pos,
        seq_id: SeqId,
        tokens: Vec<TokenId>,
    },
    /// `old` at `at` was replaced by `new`. Both runs are kept so the
    /// inversion is exact even when the lengths differ.
    Replace {
        at: Pos,
        seq_id: SeqId,
        old: Vec<TokenId>,
        new: Vec<TokenId>,
    },
}

#[derive(Default)]
pub(crate) struct History {
    undo: VecDeque<Edit>,
    redo: Vec<Edit>,
    limit: usize,
}

impl History {
    pub(crate) fn new() -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Record a fresh mutation. Clears the redo stack and evicts the oldest
    /// entries past the limit.
    pub(crate) fn record(&mut self, edit: Edit) {
        self.undo.push_back(edit);
        self.redo.clear();
        self.evict();
    }

    /// Put an entry back on the undo log without touching the redo stack
    /// (redo path, and rollback after a failed replay).
    pub(crate) fn restore_undone(&mut self, edit: Edit) {
        self.undo.push_back(edit);
        self.evict();
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Edit> {
        self.undo.pop_back()
    }

    pub(crate) fn push_redo(&mut self, edit: Edit) {
        self.redo.push(edit);
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Edit> {
        self.redo.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.undo.len()
    }

    pub(crate) fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub(crate) fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub(crate) fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.evict();
    }

    fn evict(&mut self) {
        if self.limit > 0 {
            while self.undo.len() > self.limit {
                self.undo.pop_front();
            }
        }
    }
}

impl TokenEditor {
    /// Undo the most recent recorded mutation. Returns `false` when the undo
    /// log is empty.
    pub fn undo(&mut self) -> EditorResult<bool> {
        self.check_writable()?;
        let Some(edit) = self.history.pop_undo() else {
            return Ok(false);
        };
        match self.apply_inverse(&edit) {
            Ok(()) => {
                self.history.push_redo(edit);
                Ok(true)
            }
            Err(err) => {
                self.history.restore_undone(edit);
                Err(err)
            }
        }
    }

    /// Re-apply the most recently undone mutation. Returns `false` when the
    /// redo stack is empty.
    pub fn redo(&mut self) -> EditorResult<bool> {
        self.check_writable()?;
        let Some(edit) = self.history.pop_redo() else {
            return Ok(false);
        };
        match self.apply_forward(&edit) {
            Ok(()) => {
                self.history.restore_undone(edit);
                Ok(true)
            }
            Err(err) => {
                self.history.push_redo(edit);
                Err(err)
            }
        }
    }

    /// Entries currently in the undo log.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Entries currently on the redo stack.
    pub fn redo_len(&self) -> usize {
        self.history.redo_len()
    }

    /// Drop both the undo log and the redo stack.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Bound the undo log; 0 means unlimited.
    pub fn set_history_limit(&mut self, limit: usize) {
        self.history.set_limit(limit);
    }

    fn apply_inverse(&mut self, edit: &Edit) -> EditorResult<()> {
        match edit {
            Edit::Insert { at, seq_id, tokens } => {
                self.splice(*at as usize, tokens.len(), &[], TokenFlags::empty(), *seq_id, HistoryMode::Replay)?;
                self.notify_range(Range::new(*at, *at + tokens.len() as Pos).with_seq(*seq_id));
            }
            Edit::Delete { at, seq_id, tokens } => {
                self.splice(*at as usize, 0, tokens, TokenFlags::USER_DATA, *seq_id, HistoryMode::Replay)?;
                self.notify_range(Range::new(*at, *at + tokens.len() as Pos).with_seq(*seq_id));
            }
            Edit::Replace { at, seq_id, old, new } => {
                self.splice(*at as usize, new.len(), old, TokenFlags::USER_DATA, *seq_id, HistoryMode::Replay)?;
                self.notify_range(Range::new(*at, *at + old.len() as Pos).with_seq(*seq_id));
            }
        }
        Ok(())
    }

    fn apply_forward(&mut self, edit: &Edit) -> EditorResult<()> {
        match edit {
            Edit::Insert { at, seq_id, tokens } => {
                self.splice(*at as usize, 0, tokens, TokenFlags::USER_DATA, *seq_id, HistoryMode::Replay)?;
                self.notify_range(Range::new(*at, *at + tokens.len() as Pos).with_seq(*seq_id));
            }
            Edit::Delete { at, seq_id, tokens } => {
                self.splice(*at as usize, tokens.len(), &[], TokenFlags::empty(), *seq_id, HistoryMode::Replay)?;
                self.notify_range(Range::new(*at, *at + tokens.len() as Pos).with_seq(*seq_id));
            }
            Edit::Replace { at, seq_id, old, new } => {
                self.splice(*at as usize, old.len(), new, TokenFlags::USER_DATA, *seq_id, HistoryMode::Replay)?;
                self.notify_range(Range::new(*at, *at + new.len() as Pos).with_seq(*seq_id));
            }
        }
        Ok(())
    }
}
