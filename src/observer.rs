//! Observer capability — trait-object listeners replacing raw callback pairs.
//!
//! Every method has a no-op default, so implementations override only what
//! they care about. Components keep a list of `Arc<dyn ...Observer>` and fan
//! out to every listener in registration order.

use crate::env::{ContextState, Message};
use crate::types::{CtxId, Pos, Range, TokenId};

/// Listener for token-buffer mutations inside one editor.
pub trait EditorObserver: Send + Sync {
    /// A single slot changed value (point update).
    fn on_token_change(&self, _pos: Pos, _old: TokenId, _new: TokenId) {}

    /// A run of slots changed (insert, delete, replace).
    fn on_range_change(&self, _range: Range) {}
}

/// Listener for events on one recursive context.
pub trait ContextObserver: Send + Sync {
    /// A token was appended by the completion loop.
    fn on_token(&self, _ctx: CtxId, _token: TokenId) {}

    /// The completion loop finished.
    fn on_complete(&self, _ctx: CtxId, _final_state: ContextState) {}

    /// A message was delivered to this context's queue.
    fn on_message(&self, _ctx: CtxId, _msg: &Message) {}
}

/// Listener for environment-wide topology events.
pub trait EnvObserver: Send + Sync {
    fn on_context_create(&self, _ctx: CtxId) {}

    fn on_context_destroy(&self, _ctx: CtxId) {}

    /// A child was spawned under a parent.
    fn on_recursion(&self, _parent: CtxId, _child: CtxId) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct Counter {
        token_changes: AtomicUsize,
        range_changes: AtomicUsize,
    }

    impl EditorObserver for Counter {
        fn on_token_change(&self, _pos: Pos, _old: TokenId, _new: TokenId) {
            self.token_changes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_range_change(&self, _range: Range) {
            self.range_changes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Silent;
    impl EditorObserver for Silent {}
    impl ContextObserver for Silent {}
    impl EnvObserver for Silent {}

    #[test]
    fn defaults_are_noops() {
        let s = Silent;
        s.on_token_change(0, 1, 2);
        s.on_range_change(Range::new(0, 3));
        ContextObserver::on_token(&s, 0, 7);
        s.on_context_create(1);
        s.on_recursion(1, 2);
    }

    #[test]
    fn fan_out_reaches_every_listener() {
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let listeners: Vec<Arc<dyn EditorObserver>> = vec![a.clone(), b.clone()];

        for obs in &listeners {
            obs.on_token_change(0, 1, 2);
            obs.on_range_change(Range::new(0, 1));
        }

        assert_eq!(a.token_changes.load(Ordering::SeqCst), 1);
        assert_eq!(b.range_changes.load(Ordering::SeqCst), 1);
    }
}
