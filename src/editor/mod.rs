//! Token editor — direct manipulation of one inference context's token
//! stream and its coupled KV cache.
//!
//! The editor owns a linear token buffer with parallel per-slot metadata and
//! delegates decoding, tokenization and KV primitives to the runtime. Every
//! mutation marks the KV cache dirty and invalidates logits; the editor
//! re-synchronises lazily before any query that needs them.
//!
//! | Concern | Where |
//! |---------|-------|
//! | buffer, mutations, KV coupling, logits, search | this file |
//! | undo/redo log | [`history`] |
//! | snapshots | [`snapshot`] |
//! | sequence multiplexing | [`sequence`] |
//! | binary/JSON export | [`export`] |

pub mod export;
pub mod history;
pub mod sequence;
pub mod snapshot;

pub use history::Edit;
pub use snapshot::Snapshot;

use std::sync::Arc;

use crate::error::{EditorError, EditorResult};
use crate::observer::EditorObserver;
use crate::runtime::{DecodeBatch, InferenceSession, Model};
use crate::types::{Pos, Range, SeqId, TokenFlags, TokenId, TokenInfo, PRIMARY_SEQUENCE};

use history::{History, HistoryMode};

/// Initial capacity of the token buffer.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Editable token buffer bound to one runtime session.
pub struct TokenEditor {
    model: Arc<dyn Model>,
    session: Box<dyn InferenceSession>,
    tokens: Vec<TokenId>,
    info: Vec<TokenInfo>,
    history: History,
    sequences: Vec<SeqId>,
    readonly: bool,
    kv_dirty: bool,
    logits_valid: bool,
    observers: Vec<Arc<dyn EditorObserver>>,
}

impl TokenEditor {
    pub fn new(model: Arc<dyn Model>, session: Box<dyn InferenceSession>) -> Self {
        Self {
            model,
            session,
            tokens: Vec::with_capacity(DEFAULT_CAPACITY),
            info: Vec::with_capacity(DEFAULT_CAPACITY),
            history: History::new(),
            sequences: vec![PRIMARY_SEQUENCE],
            readonly: false,
            kv_dirty: false,
            logits_valid: false,
            observers: Vec::new(),
        }
    }

    // ─── Inspection ─────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token at `pos`, or `None` out of range.
    pub fn token(&self, pos: Pos) -> Option<TokenId> {
        if pos < 0 {
            return None;
        }
        self.tokens.get(pos as usize).copied()
    }

    /// Metadata for the slot at `pos`, refreshed against the vocabulary.
    /// Provenance bits (`USER_DATA`/`GENERATED`) are preserved from the slot.
    pub fn token_info(&self, pos: Pos, seq_id: SeqId) -> EditorResult<TokenInfo> {
        let idx = self.check_pos(pos)?;
        let mut info = self.info[idx];
        info.id = self.tokens[idx];
        info.pos = pos;
        info.seq_id = if seq_id >= 0 { seq_id } else { PRIMARY_SEQUENCE };
        let provenance = info.flags & (TokenFlags::USER_DATA | TokenFlags::GENERATED);
        info.flags = self.vocab_flags(info.id) | provenance;
        Ok(info)
    }

    /// Copy of the tokens in `range`, clamped to the buffer.
    pub fn tokens_in(&self, range: Range) -> Vec<TokenId> {
        let (start, end) = range.clamp(self.tokens.len());
        self.tokens[start..end].to_vec()
    }

    /// The whole buffer as a slice.
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
    }

    pub fn kv_dirty(&self) -> bool {
        self.kv_dirty
    }

    pub fn logits_valid(&self) -> bool {
        self.logits_valid
    }

    pub fn add_observer(&mut self, observer: Arc<dyn EditorObserver>) {
        self.observers.push(observer);
    }

    // ─── Text conversion ────────────────────────────────────────────────────

    /// Tokenize without touching the buffer.
    pub fn tokenize(&self, text: &str, add_bos: bool) -> EditorResult<Vec<TokenId>> {
        Ok(self.model.tokenize(text, add_bos)?)
    }

    /// Accumulate the pieces of `tokens` into a string.
    pub fn detokenize(&self, tokens: &[TokenId]) -> EditorResult<String> {
        let mut bytes = Vec::new();
        for &token in tokens {
            bytes.extend(self.model.token_piece(token)?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Byte rendering of one token, as a (lossy) string.
    pub fn token_piece(&self, token: TokenId) -> EditorResult<String> {
        let bytes = self.model.token_piece(token)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Detokenization of the whole buffer.
    pub fn text(&self) -> EditorResult<String> {
        self.detokenize(&self.tokens)
    }

    // ─── Mutation ───────────────────────────────────────────────────────────

    /// Overwrite the token at `pos`.
    pub fn set_token(&mut self, pos: Pos, seq_id: SeqId, token: TokenId) -> EditorResult<()> {
        self.check_writable()?;
        let idx = self.check_pos(pos)?;
        self.check_token_id(token)?;

        let old = self.tokens[idx];
        self.splice(idx, 1, &[token], TokenFlags::empty(), seq_id, HistoryMode::Record)?;
        for obs in &self.observers {
            obs.on_token_change(pos, old, token);
        }
        Ok(())
    }

    /// Insert `tokens` before `pos` (`pos == len` appends), stamped USER_DATA.
    pub fn insert_tokens(&mut self, pos: Pos, seq_id: SeqId, tokens: &[TokenId]) -> EditorResult<()> {
        self.check_writable()?;
        let idx = self.check_insert_pos(pos)?;
        if tokens.is_empty() {
            return Ok(());
        }
        self.check_token_ids(tokens)?;

        self.splice(idx, 0, tokens, TokenFlags::USER_DATA, seq_id, HistoryMode::Record)?;
        self.notify_range(Range::new(pos, pos + tokens.len() as Pos).with_seq(seq_id));
        Ok(())
    }

    /// Delete the tokens in `range` (clamped to the buffer).
    pub fn delete_range(&mut self, range: Range) -> EditorResult<()> {
        self.check_writable()?;
        let (start, end) = range.clamp(self.tokens.len());
        if start >= end {
            return Ok(());
        }
        self.splice(start, end - start, &[], TokenFlags::empty(), range.seq_id, HistoryMode::Record)?;
        self.notify_range(range);
        Ok(())
    }

    /// Replace the tokens in `range` (clamped) with `tokens`, stamped USER_DATA.
    pub fn replace_range(&mut self, range: Range, tokens: &[TokenId]) -> EditorResult<()> {
        self.check_writable()?;
        self.check_token_ids(tokens)?;
        let (start, end) = range.clamp(self.tokens.len());
        self.splice(start, end - start, tokens, TokenFlags::USER_DATA, range.seq_id, HistoryMode::Record)?;
        self.notify_range(
            Range::new(start as Pos, (start + tokens.len()) as Pos).with_seq(range.seq_id),
        );
        Ok(())
    }

    /// Tokenize `text` (no BOS) and replace `range` with the result.
    pub fn replace_text(&mut self, range: Range, text: &str) -> EditorResult<()> {
        let tokens = self.tokenize(text, false)?;
        self.replace_range(range, &tokens)
    }

    /// Delete every token. Undoable like any other mutation.
    pub fn clear(&mut self, seq_id: SeqId) -> EditorResult<()> {
        self.check_writable()?;
        let len = self.tokens.len();
        if len > 0 {
            self.splice(0, len, &[], TokenFlags::empty(), seq_id, HistoryMode::Record)?;
        } else {
            self.kv_dirty = true;
            self.logits_valid = false;
        }
        Ok(())
    }

    /// Append one loop-generated token, stamped GENERATED. Recorded in the
    /// undo log like a user edit.
    pub fn push_generated(&mut self, token: TokenId) -> EditorResult<()> {
        self.check_writable()?;
        self.check_token_id(token)?;
        let at = self.tokens.len();
        self.splice(at, 0, &[token], TokenFlags::GENERATED, PRIMARY_SEQUENCE, HistoryMode::Record)?;
        self.notify_range(Range::new(at as Pos, at as Pos + 1));
        Ok(())
    }

    // ─── KV cache coupling ──────────────────────────────────────────────────

    /// Rebuild the primary sequence's KV entries from the buffer. A no-op
    /// when the cache is already in sync.
    pub fn sync_kv_cache(&mut self) -> EditorResult<()> {
        if !self.kv_dirty {
            return Ok(());
        }
        self.session.kv_remove(PRIMARY_SEQUENCE, None, None);
        if !self.tokens.is_empty() {
            let batch = DecodeBatch::rebuild(&self.tokens, PRIMARY_SEQUENCE);
            if let Err(err) = self.session.decode(&batch) {
                self.logits_valid = false;
                return Err(err.into());
            }
            self.logits_valid = true;
        }
        self.kv_dirty = false;
        Ok(())
    }

    /// Drop the runtime's KV entries for a sub-range and mark the cache dirty.
    pub fn invalidate_kv_range(&mut self, range: Range) {
        self.session
            .kv_remove(range.seq_id, Some(range.start), Some(range.end));
        self.kv_dirty = true;
        self.logits_valid = false;
    }

    /// Drop the KV entries of one sequence, or all of them for
    /// [`ALL_SEQUENCES`](crate::types::ALL_SEQUENCES).
    pub fn clear_kv_cache(&mut self, seq_id: SeqId) {
        if seq_id < 0 {
            self.session.kv_clear();
        } else {
            self.session.kv_remove(seq_id, None, None);
        }
        self.kv_dirty = true;
        self.logits_valid = false;
    }

    /// Apply a positional delta to a sequence's KV entries (sliding window).
    /// Does not mark the cache dirty.
    pub fn shift_kv_cache(&mut self, seq_id: SeqId, delta: Pos) {
        self.session.kv_shift(seq_id, delta);
    }

    /// Decode only the final token at its position. Valid only when the rest
    /// of the buffer was already decoded — the completion loop's fast path.
    pub fn decode_appended(&mut self) -> EditorResult<()> {
        let Some(&token) = self.tokens.last() else {
            return Err(EditorError::InvalidPosition { pos: 0, len: 0 });
        };
        let pos = (self.tokens.len() - 1) as Pos;
        let batch = DecodeBatch::single(token, pos, PRIMARY_SEQUENCE);
        if let Err(err) = self.session.decode(&batch) {
            self.logits_valid = false;
            return Err(err.into());
        }
        self.kv_dirty = false;
        self.logits_valid = true;
        Ok(())
    }

    /// Opaque runtime state blob for the editor's session.
    pub fn session_state(&self) -> Vec<u8> {
        self.session.state_blob()
    }

    /// Restore a previously captured state blob into the session. Leaves the
    /// editor's dirty flags untouched; callers decide what the blob implies.
    pub fn restore_session_state(&mut self, blob: &[u8]) -> EditorResult<()> {
        self.session.restore_state(blob)?;
        Ok(())
    }

    // ─── Logits ─────────────────────────────────────────────────────────────

    /// Ensure the KV cache and final-position logits are current.
    pub fn compute_logits(&mut self) -> EditorResult<()> {
        if self.kv_dirty {
            self.sync_kv_cache()?;
        }
        Ok(())
    }

    /// Logits for the final position. Requires a successful decode since the
    /// last mutation.
    pub fn final_logits(&self) -> EditorResult<&[f32]> {
        if !self.logits_valid {
            return Err(EditorError::InvalidContext(
                "logits not valid; sync the KV cache first".into(),
            ));
        }
        Ok(self.session.logits())
    }

    /// The `k` highest-logit tokens at `pos`, ties broken by the lower id.
    ///
    /// The underlying runtime exposes logits for the final decoded position,
    /// so the returned scores reflect that position regardless of `pos`.
    pub fn top_k(&mut self, pos: Pos, seq_id: SeqId, k: usize) -> EditorResult<Vec<TokenInfo>> {
        self.check_pos(pos)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        self.compute_logits()?;

        let logits = self.session.logits().to_vec();
        let mut ids: Vec<TokenId> = (0..logits.len() as TokenId).collect();
        let k = k.min(ids.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let rank = |a: TokenId, b: TokenId| {
            logits[b as usize]
                .total_cmp(&logits[a as usize])
                .then(a.cmp(&b))
        };
        if k < ids.len() {
            ids.select_nth_unstable_by(k - 1, |&a, &b| rank(a, b));
            ids.truncate(k);
        }
        ids.sort_unstable_by(|&a, &b| rank(a, b));

        let seq = if seq_id >= 0 { seq_id } else { PRIMARY_SEQUENCE };
        Ok(ids
            .into_iter()
            .map(|id| {
                let mut info = TokenInfo::new(id, pos, seq, self.vocab_flags(id));
                info.logit = logits[id as usize];
                info.has_logit = true;
                info
            })
            .collect())
    }

    /// Raw logit of `token` at the final position.
    pub fn token_logit(&mut self, pos: Pos, _seq_id: SeqId, token: TokenId) -> EditorResult<f32> {
        self.check_pos(pos)?;
        self.check_token_id(token)?;
        self.compute_logits()?;
        self.session
            .logits()
            .get(token as usize)
            .copied()
            .ok_or(EditorError::InvalidToken(token))
    }

    // ─── Search ─────────────────────────────────────────────────────────────

    /// Positions holding exactly `token`, in ascending order.
    pub fn find_token(&self, token: TokenId) -> Vec<Pos> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, &t)| t == token)
            .map(|(i, _)| i as Pos)
            .collect()
    }

    /// Positions where `text`, tokenized in isolation, occurs as a token
    /// subsequence. Text whose bytes tokenize differently in context is not
    /// found; this is a documented limitation of token-level search.
    pub fn find_text(&self, text: &str) -> EditorResult<Vec<Pos>> {
        let needle = self.tokenize(text, false)?;
        if needle.is_empty() || needle.len() > self.tokens.len() {
            return Ok(Vec::new());
        }
        Ok(self
            .tokens
            .windows(needle.len())
            .enumerate()
            .filter(|(_, window)| *window == needle.as_slice())
            .map(|(i, _)| i as Pos)
            .collect())
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn check_writable(&self) -> EditorResult<()> {
        if self.readonly {
            Err(EditorError::Readonly)
        } else {
            Ok(())
        }
    }

    fn check_pos(&self, pos: Pos) -> EditorResult<usize> {
        if pos < 0 || pos as usize >= self.tokens.len() {
            Err(EditorError::InvalidPosition {
                pos,
                len: self.tokens.len(),
            })
        } else {
            Ok(pos as usize)
        }
    }

    fn check_insert_pos(&self, pos: Pos) -> EditorResult<usize> {
        if pos < 0 || pos as usize > self.tokens.len() {
            Err(EditorError::InvalidPosition {
                pos,
                len: self.tokens.len(),
            })
        } else {
            Ok(pos as usize)
        }
    }

    fn check_token_id(&self, token: TokenId) -> EditorResult<()> {
        if token < 0 || token as usize >= self.model.vocab_size() {
            Err(EditorError::InvalidToken(token))
        } else {
            Ok(())
        }
    }

    fn check_token_ids(&self, tokens: &[TokenId]) -> EditorResult<()> {
        for &token in tokens {
            self.check_token_id(token)?;
        }
        Ok(())
    }

    fn vocab_flags(&self, token: TokenId) -> TokenFlags {
        let mut flags = TokenFlags::empty();
        if self.model.is_end_of_generation(token) {
            flags |= TokenFlags::EOS;
        }
        if token == self.model.bos_token() {
            flags |= TokenFlags::BOS;
        }
        let attrs = self.model.token_attrs(token);
        if attrs.control {
            flags |= TokenFlags::CONTROL;
        }
        if attrs.special {
            flags |= TokenFlags::SPECIAL;
        }
        flags
    }

    fn notify_range(&self, range: Range) {
        for obs in &self.observers {
            obs.on_range_change(range);
        }
    }

    /// The one mutation primitive: replace `remove` slots at `start` with
    /// `insert`, stamping inserted metadata with vocabulary flags plus
    /// `provenance`. Bounds are the caller's responsibility.
    fn splice(
        &mut self,
        start: usize,
        remove: usize,
        insert: &[TokenId],
        provenance: TokenFlags,
        seq_id: SeqId,
        mode: HistoryMode,
    ) -> EditorResult<()> {
        let grow = insert.len().saturating_sub(remove);
        if grow > 0 {
            self.tokens
                .try_reserve(grow)
                .map_err(|e| EditorError::AllocationFailed(e.to_string()))?;
            self.info
                .try_reserve(grow)
                .map_err(|e| EditorError::AllocationFailed(e.to_string()))?;
        }

        let seq = if seq_id >= 0 { seq_id } else { PRIMARY_SEQUENCE };
        let new_info: Vec<TokenInfo> = insert
            .iter()
            .enumerate()
            .map(|(i, &token)| {
                TokenInfo::new(
                    token,
                    (start + i) as Pos,
                    seq,
                    self.vocab_flags(token) | provenance,
                )
            })
            .collect();

        let removed: Vec<TokenId> = self
            .tokens
            .splice(start..start + remove, insert.iter().copied())
            .collect();
        self.info.splice(start..start + remove, new_info);

        self.kv_dirty = true;
        self.logits_valid = false;

        if mode == HistoryMode::Record {
            let edit = if remove == 0 && !insert.is_empty() {
                Some(Edit::Insert {
                    at: start as Pos,
                    seq_id: seq,
                    tokens: insert.to_vec(),
                })
            } else if remove > 0 && insert.is_empty() {
                Some(Edit::Delete {
                    at: start as Pos,
                    seq_id: seq,
                    tokens: removed,
                })
            } else if remove > 0 {
                Some(Edit::Replace {
                    at: start as Pos,
                    seq_id: seq,
                    old: removed,
                    new: insert.to_vec(),
                })
            } else {
                None
            };
            if let Some(edit) = edit {
                self.history.record(edit);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use crate::runtime::mock::{MockModel, BYTE_BASE};
    use crate::runtime::{Model, SessionParams};
    use crate::types::TokenId;

    use super::TokenEditor;

    pub(crate) fn editor() -> TokenEditor {
        let model = Arc::new(MockModel::new());
        let session = model.create_session(&SessionParams::default()).unwrap();
        TokenEditor::new(model, session)
    }

    /// Byte-level token ids of `text`, mirroring the mock tokenizer.
    pub(crate) fn toks(text: &str) -> Vec<TokenId> {
        text.bytes().map(|b| BYTE_BASE + b as TokenId).collect()
    }
}
