//! Environment, context and completion configuration.

use serde::{Deserialize, Serialize};

use crate::runtime::{SamplingParams, SessionParams};

/// How a spawned context shares state with its parent.
///
/// The read-through modes are reserved; until a backend supports them they
/// are accepted and behave as their COPY counterpart, with the substitution
/// logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMode {
    #[default]
    None,
    KvRead,
    KvCopy,
    TokensRead,
    TokensCopy,
    Full,
}

impl ShareMode {
    /// The mode actually applied after read-through substitution.
    pub fn effective(self) -> ShareMode {
        match self {
            ShareMode::KvRead => ShareMode::KvCopy,
            ShareMode::TokensRead => ShareMode::TokensCopy,
            other => other,
        }
    }

    pub fn is_read_through(self) -> bool {
        matches!(self, ShareMode::KvRead | ShareMode::TokensRead)
    }

    pub(crate) fn copies_kv(self) -> bool {
        matches!(self.effective(), ShareMode::KvCopy | ShareMode::Full)
    }

    pub(crate) fn copies_tokens(self) -> bool {
        matches!(self.effective(), ShareMode::TokensCopy | ShareMode::Full)
    }
}

/// Parameters for one completion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    /// Maximum tokens to generate.
    pub n_predict: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
    /// Reserved; per-token observers fire regardless of this flag.
    pub stream: bool,
    /// Abort after this many milliseconds; 0 means no timeout.
    pub timeout_ms: u64,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            n_predict: 256,
            temperature: 0.8,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
            stream: false,
            timeout_ms: 0,
        }
    }
}

impl CompletionParams {
    pub(crate) fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repeat_penalty: self.repeat_penalty,
        }
    }
}

/// Per-context configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Context window size; 0 falls back to the creator's value.
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: u32,
    pub share_mode: ShareMode,
    pub completion: CompletionParams,
    /// Copy the parent's token buffer on spawn even when the share mode
    /// would not.
    pub inherit_prompt: bool,
    /// Reserved: samplers carry no clonable state across the trait boundary.
    pub inherit_sampling: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_batch: 512,
            n_threads: 4,
            share_mode: ShareMode::None,
            completion: CompletionParams::default(),
            inherit_prompt: false,
            inherit_sampling: false,
        }
    }
}

impl ContextConfig {
    /// Session parameters with zero fields filled from `fallback`.
    pub(crate) fn session_params(&self, fallback: &SessionParams) -> SessionParams {
        SessionParams {
            n_ctx: if self.n_ctx > 0 { self.n_ctx } else { fallback.n_ctx },
            n_batch: if self.n_batch > 0 {
                self.n_batch
            } else {
                fallback.n_batch
            },
            n_threads: if self.n_threads > 0 {
                self.n_threads
            } else {
                fallback.n_threads
            },
        }
    }
}

/// Environment-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    pub max_depth: u32,
    pub max_contexts: usize,
    pub default_n_ctx: u32,
    pub default_n_batch: u32,
    pub default_n_threads: u32,
    /// Total memory budget across contexts; `None` means unlimited.
    pub memory_limit: Option<usize>,
    pub enable_logging: bool,
    pub enable_metrics: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_contexts: 64,
            default_n_ctx: 2048,
            default_n_batch: 512,
            default_n_threads: 4,
            memory_limit: None,
            enable_logging: false,
            enable_metrics: true,
        }
    }
}

impl EnvConfig {
    pub(crate) fn session_defaults(&self) -> SessionParams {
        SessionParams {
            n_ctx: self.default_n_ctx,
            n_batch: self.default_n_batch,
            n_threads: self.default_n_threads,
        }
    }
}
