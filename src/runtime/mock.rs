//! Deterministic in-memory runtime for tests and experiments.
//!
//! The tokenizer maps one byte to one token (`256 + byte`), so every
//! tokenize/detokenize round-trip is exact. Ids below 256 are reserved for
//! specials: 1 is BOS, 2 is EOS, and specials render as empty pieces. After
//! a decode that requests logits, the logits vector peaks at the decoded
//! token and falls off linearly with vocabulary distance, which makes top-k
//! ordering and tie-breaks predictable in tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::types::{Pos, SeqId, TokenId};

use super::{
    DecodeBatch, InferenceSession, Model, RuntimeError, RuntimeResult, Sampler, SamplingParams,
    SessionParams, TokenAttrs,
};

/// First byte-token id; everything below is a special.
pub const BYTE_BASE: TokenId = 256;

/// Mock vocabulary size: 256 specials + 256 byte tokens.
pub const VOCAB_SIZE: usize = 512;

pub const BOS: TokenId = 1;
pub const EOS: TokenId = 2;

/// Shared scripted model. Clone-cheap via `Arc` internals.
pub struct MockModel {
    script: Arc<Mutex<VecDeque<TokenId>>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue tokens for samplers to emit before falling back to greedy
    /// selection. An exhausted script samples EOS once logits run dry.
    pub fn push_script(&self, tokens: &[TokenId]) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.extend(tokens.iter().copied());
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for MockModel {
    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn bos_token(&self) -> TokenId {
        BOS
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == EOS
    }

    fn token_attrs(&self, token: TokenId) -> TokenAttrs {
        let special = (0..BYTE_BASE).contains(&token);
        TokenAttrs {
            control: special,
            special,
        }
    }

    fn tokenize(&self, text: &str, add_bos: bool) -> RuntimeResult<Vec<TokenId>> {
        let mut out = Vec::with_capacity(text.len() + usize::from(add_bos));
        if add_bos {
            out.push(BOS);
        }
        out.extend(text.bytes().map(|b| BYTE_BASE + b as TokenId));
        Ok(out)
    }

    fn token_piece(&self, token: TokenId) -> RuntimeResult<Vec<u8>> {
        if (BYTE_BASE..BYTE_BASE + 256).contains(&token) {
            Ok(vec![(token - BYTE_BASE) as u8])
        } else if (0..BYTE_BASE).contains(&token) {
            // Specials render as nothing, like skipped control pieces.
            Ok(Vec::new())
        } else {
            Err(RuntimeError::UnknownToken(token))
        }
    }

    fn sampler(&self, params: &SamplingParams) -> Box<dyn Sampler> {
        Box::new(MockSampler {
            script: self.script.clone(),
            repeat_penalty: params.repeat_penalty,
            accepted: Vec::new(),
        })
    }

    fn create_session(&self, params: &SessionParams) -> RuntimeResult<Box<dyn InferenceSession>> {
        Ok(Box::new(MockSession {
            n_ctx: params.n_ctx as usize,
            // The logits buffer exists from the start, like a real runtime's
            // pre-allocated vocab-sized array.
            state: MockState {
                cells: Vec::new(),
                logits: vec![0.0; VOCAB_SIZE],
            },
        }))
    }
}

/// Scripted-then-greedy sampler.
pub struct MockSampler {
    script: Arc<Mutex<VecDeque<TokenId>>>,
    repeat_penalty: f32,
    accepted: Vec<TokenId>,
}

impl Sampler for MockSampler {
    fn sample(&mut self, logits: &[f32]) -> TokenId {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = script.pop_front() {
            return token;
        }
        drop(script);

        // Greedy over penalised logits, ties to the lower id.
        let mut best = EOS;
        let mut best_score = f32::NEG_INFINITY;
        for (id, &logit) in logits.iter().enumerate() {
            let id = id as TokenId;
            let score = if self.accepted.contains(&id) {
                logit - self.repeat_penalty
            } else {
                logit
            };
            if score > best_score {
                best_score = score;
                best = id;
            }
        }
        best
    }

    fn accept(&mut self, token: TokenId) {
        self.accepted.push(token);
    }
}

/// One KV cell: (sequence, position, token).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KvCell {
    pub seq: SeqId,
    pub pos: Pos,
    pub token: TokenId,
}

/// Serialisable session state; doubles as the opaque state blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockState {
    pub cells: Vec<KvCell>,
    pub logits: Vec<f32>,
}

/// In-memory session. The KV "cache" is a flat cell list, which is enough to
/// observe clears, range removals, copies and shifts from the outside.
pub struct MockSession {
    n_ctx: usize,
    state: MockState,
}

impl MockSession {
    fn score_from(&mut self, token: TokenId) {
        self.state.logits = (0..VOCAB_SIZE as TokenId)
            .map(|v| -((v - token).abs() as f32))
            .collect();
    }
}

impl InferenceSession for MockSession {
    fn decode(&mut self, batch: &DecodeBatch) -> RuntimeResult<()> {
        if self.state.cells.len() + batch.len() > self.n_ctx {
            return Err(RuntimeError::Decode(format!(
                "kv cache full: {} cells + {} new > {}",
                self.state.cells.len(),
                batch.len(),
                self.n_ctx
            )));
        }
        for slot in &batch.slots {
            if slot.token < 0 || slot.token >= VOCAB_SIZE as TokenId {
                return Err(RuntimeError::UnknownToken(slot.token));
            }
            for &seq in &slot.seqs {
                self.state.cells.push(KvCell {
                    seq,
                    pos: slot.pos,
                    token: slot.token,
                });
            }
            if slot.logits {
                self.score_from(slot.token);
            }
        }
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.state.logits
    }

    fn kv_clear(&mut self) {
        self.state.cells.clear();
    }

    fn kv_remove(&mut self, seq: SeqId, start: Option<Pos>, end: Option<Pos>) {
        self.state.cells.retain(|cell| {
            if seq >= 0 && cell.seq != seq {
                return true;
            }
            let after_start = start.map_or(true, |s| cell.pos >= s);
            let before_end = end.map_or(true, |e| cell.pos < e);
            !(after_start && before_end)
        });
    }

    fn kv_copy(&mut self, src: SeqId, dst: SeqId) {
        let copies: Vec<KvCell> = self
            .state
            .cells
            .iter()
            .filter(|cell| cell.seq == src)
            .map(|cell| KvCell { seq: dst, ..*cell })
            .collect();
        self.state.cells.extend(copies);
    }

    fn kv_shift(&mut self, seq: SeqId, delta: Pos) {
        for cell in &mut self.state.cells {
            if cell.seq == seq {
                cell.pos += delta;
            }
        }
    }

    fn state_blob(&self) -> Vec<u8> {
        serde_json::to_vec(&self.state).unwrap_or_default()
    }

    fn restore_state(&mut self, blob: &[u8]) -> RuntimeResult<()> {
        self.state = serde_json::from_slice(blob)
            .map_err(|e| RuntimeError::BadState(e.to_string()))?;
        Ok(())
    }
}
