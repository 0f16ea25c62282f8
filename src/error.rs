use thiserror::Error;

use crate::runtime::RuntimeError;
use crate::types::{CtxId, Pos, SeqId, TokenId};

/// Errors surfaced by the token editor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    #[error("invalid inference context: {0}")]
    InvalidContext(String),

    #[error("position {pos} out of range for buffer of {len} tokens")]
    InvalidPosition { pos: Pos, len: usize },

    #[error("invalid token id {0}")]
    InvalidToken(TokenId),

    #[error("buffer too small: {0}")]
    BufferTooSmall(String),

    #[error("KV cache full: {0}")]
    KvCacheFull(String),

    #[error("sequence {0} not found")]
    SequenceNotFound(SeqId),

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("editor is readonly")]
    Readonly,
}

impl From<RuntimeError> for EditorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Decode(msg) => EditorError::KvCacheFull(msg),
            RuntimeError::Tokenize(msg) => EditorError::BufferTooSmall(msg),
            RuntimeError::UnknownToken(token) => EditorError::InvalidToken(token),
            RuntimeError::BadState(msg) => EditorError::InvalidContext(msg),
        }
    }
}

pub type EditorResult<T> = Result<T, EditorError>;

/// Errors surfaced by the recursive environment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvError {
    #[error("max depth {0} reached")]
    MaxDepth(u32),

    #[error("max contexts {0} reached")]
    MaxContexts(usize),

    #[error("unknown context {0}")]
    InvalidContext(CtxId),

    #[error("operation requires a parent context")]
    InvalidParent,

    #[error("context {0} is busy")]
    ContextBusy(CtxId),

    #[error("recursion limit reached")]
    RecursionLimit,

    #[error("out of memory or message queue full")]
    Memory,

    #[error("model decode failed")]
    Model,

    #[error("deadlock detected")]
    Deadlock,

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("editor error: {0}")]
    Editor(#[from] EditorError),
}

pub type EnvResult<T> = Result<T, EnvError>;
