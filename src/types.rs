use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ─── Identifiers ────────────────────────────────────────────────────────────

/// A token identifier from the runtime's vocabulary.
pub type TokenId = i32;

/// A position index inside a token buffer.
pub type Pos = i32;

/// A sequence identifier on KV-cache entries.
pub type SeqId = i32;

/// Identifier of a context in the recursive environment.
pub type CtxId = u32;

/// Sentinel meaning "no token here".
pub const NO_TOKEN: TokenId = -1;

/// Sentinel sequence id meaning "all sequences".
pub const ALL_SEQUENCES: SeqId = -1;

/// The primary sequence every editor starts with.
pub const PRIMARY_SEQUENCE: SeqId = 0;

bitflags! {
    /// Per-token classification bits.
    ///
    /// `BOS`/`EOS`/`SPECIAL`/`CONTROL` are derived from the model vocabulary;
    /// `USER_DATA` marks tokens injected through an edit operation and
    /// `GENERATED` marks tokens appended by the completion loop.
    /// Serde impls come from the bitflags `serde` feature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TokenFlags: u32 {
        const BOS       = 1 << 0;
        const EOS       = 1 << 1;
        const SPECIAL   = 1 << 2;
        const CONTROL   = 1 << 3;
        const USER_DATA = 1 << 4;
        const GENERATED = 1 << 5;
    }
}

// ─── Token metadata ─────────────────────────────────────────────────────────

/// Per-slot metadata kept parallel to the token buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: TokenId,
    pub pos: Pos,
    pub seq_id: SeqId,
    /// Raw logit at the last decode that covered this slot, if any.
    pub logit: f32,
    /// Normalized probability; callers apply softmax themselves, so this
    /// stays zero unless they fill it in.
    pub prob: f32,
    pub has_logit: bool,
    pub flags: TokenFlags,
}

impl TokenInfo {
    pub fn new(id: TokenId, pos: Pos, seq_id: SeqId, flags: TokenFlags) -> Self {
        Self {
            id,
            pos,
            seq_id,
            logit: 0.0,
            prob: 0.0,
            has_logit: false,
            flags,
        }
    }
}

impl Default for TokenInfo {
    fn default() -> Self {
        Self::new(NO_TOKEN, 0, PRIMARY_SEQUENCE, TokenFlags::empty())
    }
}

// ─── Ranges ─────────────────────────────────────────────────────────────────

/// A half-open `[start, end)` position interval with an associated sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Pos,
    pub end: Pos,
    pub seq_id: SeqId,
}

impl Range {
    /// Range on the primary sequence.
    pub fn new(start: Pos, end: Pos) -> Self {
        Self {
            start,
            end,
            seq_id: PRIMARY_SEQUENCE,
        }
    }

    pub fn with_seq(mut self, seq_id: SeqId) -> Self {
        self.seq_id = seq_id;
        self
    }

    /// Range covering `[0, len)` on all sequences.
    pub fn whole(len: usize) -> Self {
        Self {
            start: 0,
            end: len as Pos,
            seq_id: ALL_SEQUENCES,
        }
    }

    pub fn len(&self) -> usize {
        if self.end > self.start {
            (self.end - self.start) as usize
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clamp to a buffer of `len` tokens, returning usize bounds.
    pub(crate) fn clamp(&self, len: usize) -> (usize, usize) {
        let start = self.start.max(0) as usize;
        let end = (self.end.max(0) as usize).min(len);
        (start.min(end), end)
    }
}
