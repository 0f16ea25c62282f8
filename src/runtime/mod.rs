//! Inference runtime collaborator interface.
//!
//! The editor and environment never talk to a model backend directly; they go
//! through these traits. A production build plugs in llama.cpp-style bindings,
//! the test suite plugs in [`mock::MockModel`].
//!
//! Ownership follows the runtime's own split: a [`Model`] is shared read-only
//! by every context in an environment, while each context owns one
//! [`InferenceSession`] whose KV cache is private to it.

pub mod mock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Pos, SeqId, TokenId};

/// Errors reported by a runtime backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("decode rejected: {0}")]
    Decode(String),

    #[error("tokenizer failed: {0}")]
    Tokenize(String),

    #[error("unknown token id {0}")]
    UnknownToken(TokenId),

    #[error("state blob rejected: {0}")]
    BadState(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Vocabulary attributes of a single token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenAttrs {
    pub control: bool,
    pub special: bool,
}

/// Sampling knobs handed to the runtime when building a sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
        }
    }
}

/// Configuration for a fresh inference session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_batch: 512,
            n_threads: 4,
        }
    }
}

/// One slot of a decode batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeSlot {
    pub token: TokenId,
    pub pos: Pos,
    pub seqs: Vec<SeqId>,
    /// Request the logits vector at this slot.
    pub logits: bool,
}

/// A batch of slots submitted to the runtime in one decode call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeBatch {
    pub slots: Vec<DecodeSlot>,
}

impl DecodeBatch {
    /// Batch covering a whole buffer with ascending positions on one
    /// sequence, logits requested only at the final slot.
    pub fn rebuild(tokens: &[TokenId], seq: SeqId) -> Self {
        let last = tokens.len().saturating_sub(1);
        let slots = tokens
            .iter()
            .enumerate()
            .map(|(i, &token)| DecodeSlot {
                token,
                pos: i as Pos,
                seqs: vec![seq],
                logits: i == last,
            })
            .collect();
        Self { slots }
    }

    /// Single-slot batch with logits requested.
    pub fn single(token: TokenId, pos: Pos, seq: SeqId) -> Self {
        Self {
            slots: vec![DecodeSlot {
                token,
                pos,
                seqs: vec![seq],
                logits: true,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A loaded model, shared read-only across contexts.
pub trait Model: Send + Sync {
    fn vocab_size(&self) -> usize;

    fn bos_token(&self) -> TokenId;

    /// Does this token end generation (EOS or an equivalent)?
    fn is_end_of_generation(&self, token: TokenId) -> bool;

    fn token_attrs(&self, token: TokenId) -> TokenAttrs;

    fn tokenize(&self, text: &str, add_bos: bool) -> RuntimeResult<Vec<TokenId>>;

    /// Byte rendering of one token id.
    fn token_piece(&self, token: TokenId) -> RuntimeResult<Vec<u8>>;

    fn sampler(&self, params: &SamplingParams) -> Box<dyn Sampler>;

    fn create_session(&self, params: &SessionParams) -> RuntimeResult<Box<dyn InferenceSession>>;
}

/// One inference context with a private KV cache.
pub trait InferenceSession: Send {
    fn decode(&mut self, batch: &DecodeBatch) -> RuntimeResult<()>;

    /// Logits vector for the last slot that requested them.
    fn logits(&self) -> &[f32];

    fn kv_clear(&mut self);

    /// Drop KV entries for `seq` in `[start, end)`; `None` bounds are open.
    fn kv_remove(&mut self, seq: SeqId, start: Option<Pos>, end: Option<Pos>);

    fn kv_copy(&mut self, src: SeqId, dst: SeqId);

    fn kv_shift(&mut self, seq: SeqId, delta: Pos);

    /// Serialise the opaque runtime state (KV cache and friends).
    fn state_blob(&self) -> Vec<u8>;

    fn restore_state(&mut self, blob: &[u8]) -> RuntimeResult<()>;
}

/// Sampling state configured from [`SamplingParams`].
pub trait Sampler: Send {
    fn sample(&mut self, logits: &[f32]) -> TokenId;

    /// Record an accepted token for penalty bookkeeping.
    fn accept(&mut self, token: TokenId);
}
