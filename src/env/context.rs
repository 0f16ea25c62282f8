//! One node of the context forest: identity, relations, state, and the
//! owned token editor.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::editor::TokenEditor;
use crate::error::EnvResult;
use crate::observer::ContextObserver;
use crate::types::{CtxId, PRIMARY_SEQUENCE};

use super::config::ContextConfig;
use super::message::{MessageQueue, DEFAULT_QUEUE_CAPACITY};

/// Kind of link from a context to its creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Root,
    Child,
    Fork,
    Peer,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Root => write!(f, "root"),
            Relation::Child => write!(f, "child"),
            Relation::Fork => write!(f, "fork"),
            Relation::Peer => write!(f, "peer"),
        }
    }
}

/// Execution state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    Idle,
    Running,
    Waiting,
    Complete,
    Error,
    Suspended,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Idle => write!(f, "idle"),
            ContextState::Running => write!(f, "running"),
            ContextState::Waiting => write!(f, "waiting"),
            ContextState::Complete => write!(f, "complete"),
            ContextState::Error => write!(f, "error"),
            ContextState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Point-in-time snapshot of a context, handed to tree visitors.
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub id: CtxId,
    pub relation: Relation,
    pub state: ContextState,
    pub depth: u32,
    pub parent: Option<CtxId>,
    pub n_children: usize,
    pub n_tokens: usize,
    pub tokens_generated: u32,
}

pub(crate) struct ContextBody {
    pub(crate) relation: Relation,
    pub(crate) state: ContextState,
    pub(crate) parent: Option<CtxId>,
    pub(crate) children: Vec<CtxId>,
    pub(crate) depth: u32,
    pub(crate) config: ContextConfig,
    pub(crate) editor: TokenEditor,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) tokens_generated: u32,
    pub(crate) observers: Vec<Arc<dyn ContextObserver>>,
}

/// A context in the recursive environment. Owned by the environment's index
/// and handed out as `Arc<Context>`; the body lock serialises access for the
/// single owner, the message queue has its own synchronisation.
pub struct Context {
    id: CtxId,
    pub(crate) queue: MessageQueue,
    pub(crate) body: Mutex<ContextBody>,
}

impl Context {
    pub(crate) fn new(
        id: CtxId,
        relation: Relation,
        parent: Option<CtxId>,
        depth: u32,
        config: ContextConfig,
        editor: TokenEditor,
    ) -> Self {
        Self {
            id,
            queue: MessageQueue::with_capacity(DEFAULT_QUEUE_CAPACITY),
            body: Mutex::new(ContextBody {
                relation,
                state: ContextState::Idle,
                parent,
                children: Vec::new(),
                depth,
                config,
                editor,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                tokens_generated: 0,
                observers: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> CtxId {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextBody> {
        self.body.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn relation(&self) -> Relation {
        self.lock().relation
    }

    pub fn state(&self) -> ContextState {
        self.lock().state
    }

    pub fn depth(&self) -> u32 {
        self.lock().depth
    }

    pub fn parent(&self) -> Option<CtxId> {
        self.lock().parent
    }

    pub fn children(&self) -> Vec<CtxId> {
        self.lock().children.clone()
    }

    pub fn config(&self) -> ContextConfig {
        self.lock().config.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.lock().created_at
    }

    /// When the most recent completion run started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    /// When the most recent completion run finished normally.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    /// Tokens generated by the most recent completion run.
    pub fn tokens_generated(&self) -> u32 {
        self.lock().tokens_generated
    }

    pub fn has_messages(&self) -> bool {
        self.queue.has_messages()
    }

    pub fn add_observer(&self, observer: Arc<dyn ContextObserver>) {
        self.lock().observers.push(observer);
    }

    /// Exclusive access to the owned token editor.
    pub fn editor(&self) -> EditorGuard<'_> {
        EditorGuard(self.lock())
    }

    /// Replace the buffer with `text`, tokenized with BOS.
    pub fn set_prompt(&self, text: &str) -> EnvResult<()> {
        let mut body = self.lock();
        body.editor.clear(PRIMARY_SEQUENCE)?;
        let tokens = body.editor.tokenize(text, true)?;
        body.editor.insert_tokens(0, PRIMARY_SEQUENCE, &tokens)?;
        Ok(())
    }

    /// Append `text` (no BOS) to the end of the buffer.
    pub fn append_prompt(&self, text: &str) -> EnvResult<()> {
        let mut body = self.lock();
        let tokens = body.editor.tokenize(text, false)?;
        let end = body.editor.len() as i32;
        body.editor.insert_tokens(end, PRIMARY_SEQUENCE, &tokens)?;
        Ok(())
    }

    /// Detokenization of the whole buffer.
    pub fn text(&self) -> EnvResult<String> {
        Ok(self.lock().editor.text()?)
    }

    /// Snapshot the fields tree visitors care about.
    pub fn info(&self) -> ContextInfo {
        let body = self.lock();
        ContextInfo {
            id: self.id,
            relation: body.relation,
            state: body.state,
            depth: body.depth,
            parent: body.parent,
            n_children: body.children.len(),
            n_tokens: body.editor.len(),
            tokens_generated: body.tokens_generated,
        }
    }
}

/// RAII handle dereferencing to the context's [`TokenEditor`].
pub struct EditorGuard<'a>(MutexGuard<'a, ContextBody>);

impl Deref for EditorGuard<'_> {
    type Target = TokenEditor;

    fn deref(&self) -> &TokenEditor {
        &self.0.editor
    }
}

impl DerefMut for EditorGuard<'_> {
    fn deref_mut(&mut self) -> &mut TokenEditor {
        &mut self.0.editor
    }
}
