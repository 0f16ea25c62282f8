//! # splice-core
//!
//! Token-stream editor and recursive context environment for transformer
//! inference runtimes — treat the usually-opaque prompt as a mutable,
//! random-access token sequence, then arrange such sequences into a tree of
//! contexts that spawn, fork, and exchange messages.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use splice_core::env::{ContextConfig, EnvConfig, Environment};
//! use splice_core::runtime::mock::MockModel;
//!
//! let model = Arc::new(MockModel::new());
//! let env = Environment::new(model, EnvConfig::default());
//!
//! // Build a context and edit its prompt surgically.
//! let root = env.create_root(ContextConfig::default()).unwrap();
//! let ctx = env.context(root).unwrap();
//! ctx.set_prompt("Hello, world!").unwrap();
//!
//! let hits = ctx.editor().find_text("world").unwrap();
//! assert_eq!(hits.len(), 1);
//!
//! // Undo is always one call away.
//! ctx.editor().clear(0).unwrap();
//! ctx.editor().undo().unwrap();
//! assert_eq!(ctx.text().unwrap(), "Hello, world!");
//! ```
//!
//! ## Architecture
//!
//! Two layers, leaves first:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Token ids, flags, per-slot metadata, ranges |
//! | [`runtime`] | Runtime collaborator traits plus a deterministic mock |
//! | [`editor`] | Editable token buffer with undo/redo, snapshots, sequences, KV coupling, top-k, export |
//! | [`env`] | Forest of editor-backed contexts: spawn/fork/peer, completion loop, recursive patterns, messaging |
//! | [`observer`] | Trait-object listeners for editor, context and environment events |
//! | [`error`] | thiserror taxonomies: `EditorError`, `EnvError` |
//!
//! The editor owns one context's token buffer and keeps it coupled to the
//! runtime's KV cache through a two-flag state machine (`kv_dirty`,
//! `logits_valid`): every mutation dirties the cache, and queries that need
//! logits re-synchronise lazily. The environment owns the forest, caps its
//! depth and size, and drives generation through the same editable buffer —
//! so a generated completion is just more tokens you can inspect, edit,
//! undo, or snapshot.

pub mod editor;
pub mod env;
pub mod error;
pub mod observer;
pub mod runtime;
pub mod types;

pub use editor::{Snapshot, TokenEditor};
pub use env::{Environment, EnvStats};
pub use error::{EditorError, EditorResult, EnvError, EnvResult};
pub use types::*;
