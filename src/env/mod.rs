//! Recursive context environment — a forest of token-editor-backed contexts.
//!
//! The environment owns every context through its index; children are id
//! lists and parent links are checked ids, so the forest has unique child
//! ownership with no reference cycles. One mutex guards the index and tree
//! topology. Each context's body has its own lock, so a blocking completion
//! on one context never stalls topology operations on others.

pub mod completion;
pub mod config;
pub mod context;
pub mod message;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

use crate::editor::TokenEditor;
use crate::error::{EnvError, EnvResult};
use crate::observer::EnvObserver;
use crate::runtime::{Model, SessionParams};
use crate::types::{CtxId, TokenId, PRIMARY_SEQUENCE};

pub use config::{CompletionParams, ContextConfig, EnvConfig, ShareMode};
pub use context::{Context, ContextInfo, ContextState, EditorGuard, Relation};
pub use message::{Message, MessageKind, MessagePayload, DEFAULT_QUEUE_CAPACITY};

/// Running totals kept by the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnvStats {
    pub total_tokens_processed: u64,
    pub total_contexts_created: u64,
    pub total_recursions: u64,
    pub peak_depth: u64,
}

struct Forest {
    contexts: HashMap<CtxId, Arc<Context>>,
    roots: Vec<CtxId>,
    next_id: CtxId,
    stats: EnvStats,
}

/// The recursive environment. Shares one model across all contexts.
pub struct Environment {
    model: Arc<dyn Model>,
    config: EnvConfig,
    forest: Mutex<Forest>,
    observers: Mutex<Vec<Arc<dyn EnvObserver>>>,
    trace: AtomicBool,
}

impl Environment {
    pub fn new(model: Arc<dyn Model>, config: EnvConfig) -> Self {
        let trace = AtomicBool::new(config.enable_logging);
        Self {
            model,
            config,
            forest: Mutex::new(Forest {
                contexts: HashMap::new(),
                roots: Vec::new(),
                next_id: 0,
                stats: EnvStats::default(),
            }),
            observers: Mutex::new(Vec::new()),
            trace,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Toggle environment event logging at runtime.
    pub fn set_trace(&self, enable: bool) {
        self.trace.store(enable, Ordering::Relaxed);
    }

    pub fn add_observer(&self, observer: Arc<dyn EnvObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    // ─── Creation ───────────────────────────────────────────────────────────

    /// Create a root context.
    pub fn create_root(&self, config: ContextConfig) -> EnvResult<CtxId> {
        let fallback = self.config.session_defaults();
        let id = self.create_context(Relation::Root, config, None, fallback)?;
        self.fire_create(id, None);
        if self.trace_on() {
            debug!(ctx = id, "created root context");
        }
        Ok(id)
    }

    /// Spawn a child under `parent`, applying the config's share mode.
    pub fn spawn_child(&self, parent: CtxId, config: ContextConfig) -> EnvResult<CtxId> {
        let parent_config = self.require(parent)?.config();
        let fallback = parent_config.session_params(&self.config.session_defaults());
        let id = self.create_context(Relation::Child, config, Some(parent), fallback)?;
        self.fire_create(id, Some(parent));
        if self.trace_on() {
            debug!(ctx = id, parent, "spawned child context");
        }
        Ok(id)
    }

    /// Spawn a full-sharing copy under the source's parent.
    ///
    /// Forking a root is rejected with [`EnvError::InvalidParent`]: the fork
    /// would be parentless without being a registered root.
    pub fn fork(&self, source: CtxId) -> EnvResult<CtxId> {
        let src = self.require(source)?;
        let (mut config, parent) = {
            let body = src.lock();
            (body.config.clone(), body.parent)
        };
        let Some(parent) = parent else {
            return Err(EnvError::InvalidParent);
        };
        config.share_mode = ShareMode::Full;

        let fallback = config.session_params(&self.config.session_defaults());
        let id = self.create_context(Relation::Fork, config, Some(parent), fallback)?;
        self.fire_create(id, Some(parent));
        if self.trace_on() {
            debug!(ctx = id, source, "forked context");
        }
        Ok(id)
    }

    /// Create an independent sibling at the reference context's depth. A
    /// peer of a root becomes a root of its own tree.
    pub fn create_peer(&self, peer: CtxId, config: ContextConfig) -> EnvResult<CtxId> {
        let reference = self.require(peer)?;
        let parent = reference.parent();
        let fallback = reference
            .config()
            .session_params(&self.config.session_defaults());
        let id = self.create_context(Relation::Peer, config, parent, fallback)?;
        self.fire_create(id, None);
        if self.trace_on() {
            debug!(ctx = id, peer, "created peer context");
        }
        Ok(id)
    }

    /// Destroy a context and its whole subtree (post-order).
    pub fn destroy(&self, id: CtxId) -> EnvResult<()> {
        let removed = {
            let mut forest = self.lock_forest();
            let ctx = forest
                .contexts
                .get(&id)
                .cloned()
                .ok_or(EnvError::InvalidContext(id))?;

            if let Some(parent_id) = ctx.parent() {
                if let Some(parent) = forest.contexts.get(&parent_id) {
                    parent.lock().children.retain(|&c| c != id);
                }
                ctx.lock().parent = None;
            }
            forest.roots.retain(|&r| r != id);

            let mut order = Vec::new();
            collect_subtree(&forest, id, &mut order);
            for ctx_id in &order {
                forest.contexts.remove(ctx_id);
            }
            order.len()
        };

        for obs in self.listeners() {
            obs.on_context_destroy(id);
        }
        if self.trace_on() {
            debug!(ctx = id, removed, "destroyed context subtree");
        }
        Ok(())
    }

    // ─── Lookup and traversal ───────────────────────────────────────────────

    /// Look up a context by id.
    pub fn context(&self, id: CtxId) -> Option<Arc<Context>> {
        self.lock_forest().contexts.get(&id).cloned()
    }

    /// Root ids of the forest.
    pub fn roots(&self) -> Vec<CtxId> {
        self.lock_forest().roots.clone()
    }

    /// Number of live contexts.
    pub fn context_count(&self) -> usize {
        self.lock_forest().contexts.len()
    }

    /// Walk up the parent chain to the tree's root.
    pub fn root_of(&self, id: CtxId) -> Option<CtxId> {
        let mut current = self.context(id)?;
        loop {
            match current.parent() {
                Some(parent) => current = self.context(parent)?,
                None => return Some(current.id()),
            }
        }
    }

    /// Depth-first preorder walk from `root`.
    pub fn walk_tree(&self, root: CtxId, mut visit: impl FnMut(&ContextInfo, u32)) {
        self.walk_inner(root, &mut visit);
    }

    fn walk_inner(&self, id: CtxId, visit: &mut dyn FnMut(&ContextInfo, u32)) {
        let Some(ctx) = self.context(id) else {
            return;
        };
        let info = ctx.info();
        let depth = info.depth;
        visit(&info, depth);
        for child in ctx.children() {
            self.walk_inner(child, visit);
        }
    }

    /// Preorder search for the first context matching `predicate`.
    pub fn find_context(
        &self,
        root: CtxId,
        predicate: impl Fn(&ContextInfo) -> bool,
    ) -> Option<CtxId> {
        let mut found = None;
        self.walk_tree(root, |info, _| {
            if found.is_none() && predicate(info) {
                found = Some(info.id);
            }
        });
        found
    }

    /// Size of the subtree under `id`, excluding `id` itself.
    pub fn count_descendants(&self, id: CtxId) -> usize {
        let mut count = 0usize;
        self.walk_tree(id, |_, _| count += 1);
        count.saturating_sub(1)
    }

    /// Printable rendering of the tree under `root`.
    pub fn format_tree(&self, root: CtxId) -> String {
        use std::fmt::Write;

        let mut out = String::from("=== Context Tree ===\n");
        self.walk_tree(root, |info, depth| {
            for _ in 0..depth {
                out.push_str("  ");
            }
            let shape = if info.n_children > 0 {
                "has children"
            } else {
                "leaf"
            };
            let _ = writeln!(
                out,
                "[{}] {} ({shape}) - {} tokens, state: {}",
                info.id, info.relation, info.n_tokens, info.state
            );
        });
        out.push_str("====================\n");
        out
    }

    /// Copy of the running totals.
    pub fn stats(&self) -> EnvStats {
        self.lock_forest().stats
    }

    // ─── Messaging ──────────────────────────────────────────────────────────

    /// Deliver a payload to `to`'s queue. Fails with [`EnvError::Memory`]
    /// when the receiver's queue is full.
    pub fn send_message(&self, from: CtxId, to: CtxId, payload: MessagePayload) -> EnvResult<()> {
        let _sender = self.require(from)?;
        let receiver = self.require(to)?;

        let msg = Message {
            sender: from,
            receiver: to,
            seq_num: 0,
            payload,
        };
        let listeners = { receiver.lock().observers.clone() };
        let observer_copy = if listeners.is_empty() {
            None
        } else {
            Some(msg.clone())
        };

        match receiver.queue.send(msg) {
            Ok(seq) => {
                if let Some(mut copy) = observer_copy {
                    copy.seq_num = seq;
                    for obs in &listeners {
                        obs.on_message(to, &copy);
                    }
                }
                Ok(())
            }
            Err(_) => Err(EnvError::Memory),
        }
    }

    /// Send a token array.
    pub fn send_tokens(&self, from: CtxId, to: CtxId, tokens: &[TokenId]) -> EnvResult<()> {
        self.send_message(
            from,
            to,
            MessagePayload::Tokens {
                tokens: tokens.to_vec(),
            },
        )
    }

    /// Send a text string.
    pub fn send_text(&self, from: CtxId, to: CtxId, text: &str) -> EnvResult<()> {
        self.send_message(from, to, MessagePayload::Text { text: text.into() })
    }

    /// Block until a message arrives for `id` or `timeout_ms` elapses
    /// (0 blocks indefinitely). The caller owns the returned payload.
    pub fn recv_message(&self, id: CtxId, timeout_ms: u64) -> EnvResult<Message> {
        let ctx = self.require(id)?;
        ctx.queue
            .recv(timeout_ms)
            .ok_or(EnvError::Timeout(timeout_ms))
    }

    /// Does `id` have queued messages?
    pub fn has_messages(&self, id: CtxId) -> bool {
        self.context(id).is_some_and(|ctx| ctx.queue.has_messages())
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn lock_forest(&self) -> MutexGuard<'_, Forest> {
        self.forest.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn require(&self, id: CtxId) -> EnvResult<Arc<Context>> {
        self.context(id).ok_or(EnvError::InvalidContext(id))
    }

    pub(crate) fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub(crate) fn trace_on(&self) -> bool {
        self.trace.load(Ordering::Relaxed)
    }

    pub(crate) fn metrics_on(&self) -> bool {
        self.config.enable_metrics
    }

    pub(crate) fn add_tokens_processed(&self, tokens: u64) {
        if self.metrics_on() {
            self.lock_forest().stats.total_tokens_processed += tokens;
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn EnvObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn fire_create(&self, id: CtxId, recursion_parent: Option<CtxId>) {
        for obs in self.listeners() {
            obs.on_context_create(id);
            if let Some(parent) = recursion_parent {
                obs.on_recursion(parent, id);
            }
        }
    }

    fn create_context(
        &self,
        relation: Relation,
        config: ContextConfig,
        attach_to: Option<CtxId>,
        fallback: SessionParams,
    ) -> EnvResult<CtxId> {
        let mut forest = self.lock_forest();

        if forest.contexts.len() >= self.config.max_contexts {
            return Err(EnvError::MaxContexts(self.config.max_contexts));
        }

        let parent = match attach_to {
            Some(parent_id) => Some(
                forest
                    .contexts
                    .get(&parent_id)
                    .cloned()
                    .ok_or(EnvError::InvalidContext(parent_id))?,
            ),
            None => None,
        };
        let depth = match &parent {
            Some(p) => {
                let depth = p.depth() + 1;
                if depth >= self.config.max_depth {
                    return Err(EnvError::MaxDepth(self.config.max_depth));
                }
                depth
            }
            None => 0,
        };

        let session = self
            .model
            .create_session(&config.session_params(&fallback))
            .map_err(|_| EnvError::Model)?;
        let editor = TokenEditor::new(self.model.clone(), session);

        let id = forest.next_id;
        forest.next_id += 1;
        let ctx = Arc::new(Context::new(
            id,
            relation,
            parent.as_ref().map(|p| p.id()),
            depth,
            config.clone(),
            editor,
        ));

        if let Some(parent) = &parent {
            if config.share_mode.is_read_through() {
                warn!(
                    requested = ?config.share_mode,
                    applied = ?config.share_mode.effective(),
                    "read-through sharing not supported; substituting copy"
                );
            }
            let mut parent_body = parent.lock();
            let mut child_body = ctx.lock();
            if config.share_mode.copies_kv() {
                let blob = parent_body.editor.session_state();
                child_body.editor.restore_session_state(&blob)?;
            }
            if config.share_mode.copies_tokens() || config.inherit_prompt {
                let tokens = parent_body.editor.tokens().to_vec();
                if !tokens.is_empty() {
                    child_body
                        .editor
                        .insert_tokens(0, PRIMARY_SEQUENCE, &tokens)?;
                }
            }
            drop(child_body);
            parent_body.children.push(id);
        } else {
            forest.roots.push(id);
        }

        forest.contexts.insert(id, ctx);

        if self.metrics_on() {
            forest.stats.total_contexts_created += 1;
            if matches!(relation, Relation::Child | Relation::Fork) {
                forest.stats.total_recursions += 1;
            }
            if depth as u64 > forest.stats.peak_depth {
                forest.stats.peak_depth = depth as u64;
            }
        }

        Ok(id)
    }
}

fn collect_subtree(forest: &Forest, root: CtxId, out: &mut Vec<CtxId>) {
    if let Some(ctx) = forest.contexts.get(&root) {
        for child in ctx.children() {
            collect_subtree(forest, child, out);
        }
    }
    out.push(root);
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::observer::EnvObserver;
    use crate::types::Range;

    use super::testutil::{env, env_with};
    use super::*;

    #[test]
    fn scenario_tree_spawn_and_destroy() {
        let (_, environment) = env_with(EnvConfig {
            max_depth: 4,
            ..Default::default()
        });

        let root = environment.create_root(ContextConfig::default()).unwrap();
        let c1 = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let c2 = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let grandchild = environment
            .spawn_child(c1, ContextConfig::default())
            .unwrap();

        assert_eq!(environment.count_descendants(root), 3);
        assert_eq!(environment.context(grandchild).unwrap().depth(), 2);
        assert_eq!(environment.root_of(grandchild), Some(root));

        environment.destroy(c1).unwrap();
        assert_eq!(environment.count_descendants(root), 1);
        assert!(environment.context(c1).is_none());
        assert!(environment.context(grandchild).is_none());
        assert!(environment.context(c2).is_some());
    }

    #[test]
    fn scenario_depth_cap() {
        let (_, environment) = env_with(EnvConfig {
            max_depth: 2,
            ..Default::default()
        });

        let root = environment.create_root(ContextConfig::default()).unwrap();
        let child = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        assert_eq!(environment.context(child).unwrap().depth(), 1);

        let before = environment.context_count();
        let err = environment
            .spawn_child(child, ContextConfig::default())
            .unwrap_err();
        assert_eq!(err, EnvError::MaxDepth(2));
        assert_eq!(environment.context_count(), before);
    }

    #[test]
    fn context_cap_is_enforced() {
        let (_, environment) = env_with(EnvConfig {
            max_contexts: 2,
            ..Default::default()
        });

        let root = environment.create_root(ContextConfig::default()).unwrap();
        environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let err = environment
            .create_root(ContextConfig::default())
            .unwrap_err();
        assert_eq!(err, EnvError::MaxContexts(2));
        assert_eq!(environment.context_count(), 2);
    }

    #[test]
    fn tree_invariants_hold_after_mixed_operations() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let child = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let fork = environment.fork(child).unwrap();
        let peer = environment
            .create_peer(child, ContextConfig::default())
            .unwrap();
        environment.destroy(fork).unwrap();

        let mut seen = 0;
        environment.walk_tree(root, |info, _| {
            seen += 1;
            if let Some(parent_id) = info.parent {
                let parent = environment.context(parent_id).unwrap();
                let occurrences = parent
                    .children()
                    .iter()
                    .filter(|&&c| c == info.id)
                    .count();
                assert_eq!(occurrences, 1, "child appears exactly once");
                assert_eq!(info.depth, parent.depth() + 1);
            } else {
                assert_eq!(info.depth, 0);
            }
        });
        assert_eq!(seen, 3);
        assert_eq!(environment.context(peer).unwrap().depth(), 1);
    }

    #[test]
    fn fork_copies_parent_state_and_rewrites_relation() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        environment
            .context(root)
            .unwrap()
            .set_prompt("shared prefix")
            .unwrap();
        environment.context(root).unwrap().editor().sync_kv_cache().unwrap();

        let child = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let fork = environment.fork(child).unwrap();

        let forked = environment.context(fork).unwrap();
        assert_eq!(forked.relation(), Relation::Fork);
        assert_eq!(forked.parent(), Some(root));
        assert_eq!(forked.depth(), 1);
        // FULL sharing copies the parent's buffer into the fork.
        assert_eq!(forked.text().unwrap(), "shared prefix");
    }

    #[test]
    fn forking_a_root_is_rejected() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        assert_eq!(environment.fork(root), Err(EnvError::InvalidParent));
        assert_eq!(environment.context_count(), 1);
    }

    #[test]
    fn peer_of_root_becomes_a_root() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let peer = environment
            .create_peer(root, ContextConfig::default())
            .unwrap();

        let peer_ctx = environment.context(peer).unwrap();
        assert_eq!(peer_ctx.relation(), Relation::Peer);
        assert_eq!(peer_ctx.depth(), 0);
        assert!(peer_ctx.parent().is_none());
        assert!(environment.roots().contains(&peer));
    }

    #[test]
    fn share_modes_control_spawn_copies() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        environment
            .context(root)
            .unwrap()
            .set_prompt("parent data")
            .unwrap();

        let none = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        assert_eq!(environment.context(none).unwrap().editor().len(), 0);

        let tokens_copy = environment
            .spawn_child(
                root,
                ContextConfig {
                    share_mode: ShareMode::TokensCopy,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            environment.context(tokens_copy).unwrap().text().unwrap(),
            "parent data"
        );

        // Read-through substitutes to its copy counterpart.
        let tokens_read = environment
            .spawn_child(
                root,
                ContextConfig {
                    share_mode: ShareMode::TokensRead,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            environment.context(tokens_read).unwrap().text().unwrap(),
            "parent data"
        );
    }

    #[test]
    fn kv_copy_transfers_session_state() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let root_ctx = environment.context(root).unwrap();
        root_ctx.set_prompt("warm cache").unwrap();
        root_ctx.editor().sync_kv_cache().unwrap();
        let parent_state = root_ctx.editor().session_state();

        let child = environment
            .spawn_child(
                root,
                ContextConfig {
                    share_mode: ShareMode::KvCopy,
                    ..Default::default()
                },
            )
            .unwrap();
        let child_ctx = environment.context(child).unwrap();
        assert_eq!(child_ctx.editor().session_state(), parent_state);
        // KV_COPY alone does not copy the token buffer.
        assert_eq!(child_ctx.editor().len(), 0);
    }

    #[test]
    fn inherit_prompt_copies_tokens_without_share_mode() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        environment
            .context(root)
            .unwrap()
            .set_prompt("inherited")
            .unwrap();

        let child = environment
            .spawn_child(
                root,
                ContextConfig {
                    inherit_prompt: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            environment.context(child).unwrap().text().unwrap(),
            "inherited"
        );
    }

    #[test]
    fn spawn_under_unknown_parent_fails() {
        let (_, environment) = env();
        assert_eq!(
            environment.spawn_child(42, ContextConfig::default()),
            Err(EnvError::InvalidContext(42))
        );
    }

    #[test]
    fn destroying_unknown_context_fails() {
        let (_, environment) = env();
        assert_eq!(environment.destroy(9), Err(EnvError::InvalidContext(9)));
    }

    #[test]
    fn find_context_is_preorder_first_match() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let c1 = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let _c2 = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let g = environment.spawn_child(c1, ContextConfig::default()).unwrap();

        let found = environment.find_context(root, |info| info.depth == 2);
        assert_eq!(found, Some(g));
        let found = environment.find_context(root, |info| info.depth == 1);
        assert_eq!(found, Some(c1));
        assert!(environment.find_context(root, |info| info.depth == 9).is_none());
    }

    #[test]
    fn format_tree_renders_every_node() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let child = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        environment.context(child).unwrap().set_prompt("ab").unwrap();

        let rendered = environment.format_tree(root);
        assert!(rendered.contains("=== Context Tree ==="));
        assert!(rendered.contains(&format!("[{root}] root (has children) - 0 tokens")));
        assert!(rendered.contains(&format!("  [{child}] child (leaf) - 3 tokens")));
    }

    #[test]
    fn stats_track_creations_and_depth() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let child = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        environment.spawn_child(child, ContextConfig::default()).unwrap();
        environment
            .create_peer(child, ContextConfig::default())
            .unwrap();

        let stats = environment.stats();
        assert_eq!(stats.total_contexts_created, 4);
        // Peers do not count as recursions.
        assert_eq!(stats.total_recursions, 2);
        assert_eq!(stats.peak_depth, 2);
    }

    #[test]
    fn metrics_toggle_disables_stats() {
        let (_, environment) = env_with(EnvConfig {
            enable_metrics: false,
            ..Default::default()
        });
        let root = environment.create_root(ContextConfig::default()).unwrap();
        environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        assert_eq!(environment.stats(), EnvStats::default());
    }

    #[test]
    fn env_observers_see_topology_events() {
        #[derive(Default)]
        struct Recorder {
            creates: AtomicUsize,
            destroys: AtomicUsize,
            recursions: AtomicUsize,
        }
        impl EnvObserver for Recorder {
            fn on_context_create(&self, _ctx: CtxId) {
                self.creates.fetch_add(1, Ordering::SeqCst);
            }
            fn on_context_destroy(&self, _ctx: CtxId) {
                self.destroys.fetch_add(1, Ordering::SeqCst);
            }
            fn on_recursion(&self, _parent: CtxId, _child: CtxId) {
                self.recursions.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (_, environment) = env();
        let rec = Arc::new(Recorder::default());
        environment.add_observer(rec.clone());

        let root = environment.create_root(ContextConfig::default()).unwrap();
        let child = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        environment.destroy(child).unwrap();

        assert_eq!(rec.creates.load(Ordering::SeqCst), 2);
        assert_eq!(rec.recursions.load(Ordering::SeqCst), 1);
        assert_eq!(rec.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scenario_messaging_fifo_and_full_queue() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let a = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();
        let b = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();

        environment.send_text(a, b, "one").unwrap();
        environment.send_text(a, b, "two").unwrap();
        assert!(environment.has_messages(b));

        let first = environment.recv_message(b, 1_000).unwrap();
        assert_eq!(first.sender, a);
        assert_eq!(first.receiver, b);
        assert_eq!(first.payload, MessagePayload::Text { text: "one".into() });

        let second = environment.recv_message(b, 1_000).unwrap();
        assert_eq!(second.payload, MessagePayload::Text { text: "two".into() });
        assert!(second.seq_num > first.seq_num);
        assert!(!environment.has_messages(b));

        // Fill to capacity (one slot is reserved).
        for n in 0..DEFAULT_QUEUE_CAPACITY - 1 {
            environment.send_text(a, b, &format!("fill {n}")).unwrap();
        }
        assert_eq!(
            environment.send_text(a, b, "overflow"),
            Err(EnvError::Memory)
        );
    }

    #[test]
    fn send_tokens_round_trip() {
        let (_, environment) = env();
        let a = environment.create_root(ContextConfig::default()).unwrap();
        let b = environment.create_root(ContextConfig::default()).unwrap();

        environment.send_tokens(a, b, &[300, 301]).unwrap();
        let msg = environment.recv_message(b, 100).unwrap();
        assert_eq!(msg.payload, MessagePayload::Tokens { tokens: vec![300, 301] });
        assert_eq!(msg.payload.kind(), MessageKind::Tokens);
    }

    #[test]
    fn recv_times_out_and_messaging_checks_endpoints() {
        let (_, environment) = env();
        let a = environment.create_root(ContextConfig::default()).unwrap();

        assert_eq!(
            environment.recv_message(a, 20),
            Err(EnvError::Timeout(20))
        );
        assert_eq!(
            environment.send_text(a, 99, "x"),
            Err(EnvError::InvalidContext(99))
        );
        assert_eq!(
            environment.send_text(99, a, "x"),
            Err(EnvError::InvalidContext(99))
        );
        assert!(!environment.has_messages(99));
    }

    #[test]
    fn destroyed_subtree_editor_edits_do_not_resurrect() {
        let (_, environment) = env();
        let root = environment.create_root(ContextConfig::default()).unwrap();
        let child = environment
            .spawn_child(root, ContextConfig::default())
            .unwrap();

        let held = environment.context(child).unwrap();
        environment.destroy(child).unwrap();

        // A held handle still works, but the environment no longer knows it.
        held.set_prompt("ghost").unwrap();
        held.editor().delete_range(Range::new(0, 1)).unwrap();
        assert!(environment.context(child).is_none());
        assert_eq!(environment.count_descendants(root), 0);
    }
}
