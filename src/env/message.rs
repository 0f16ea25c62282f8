//! Inter-context messaging — bounded FIFO ring per receiver.
//!
//! One slot is sacrificed to distinguish full from empty: `head == tail` is
//! empty and `(tail + 1) % capacity == head` is full. Payloads are owned by
//! the queue slot after enqueue and move out to the receiver on delivery.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::{CtxId, TokenId};

/// Slots per context queue (one reserved).
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Message discriminator, mirroring [`MessagePayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Tokens,
    Text,
    Completion,
    Embedding,
    Control,
    Query,
    Response,
}

/// Owned message payload, parameterised by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Tokens { tokens: Vec<TokenId> },
    Text { text: String },
    Completion { text: String },
    Embedding { values: Vec<f32> },
    Control { bytes: Vec<u8> },
    Query { text: String },
    Response { text: String },
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessagePayload::Tokens { .. } => MessageKind::Tokens,
            MessagePayload::Text { .. } => MessageKind::Text,
            MessagePayload::Completion { .. } => MessageKind::Completion,
            MessagePayload::Embedding { .. } => MessageKind::Embedding,
            MessagePayload::Control { .. } => MessageKind::Control,
            MessagePayload::Query { .. } => MessageKind::Query,
            MessagePayload::Response { .. } => MessageKind::Response,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            MessagePayload::Tokens { tokens } => tokens.len() * std::mem::size_of::<TokenId>(),
            MessagePayload::Text { text }
            | MessagePayload::Completion { text }
            | MessagePayload::Query { text }
            | MessagePayload::Response { text } => text.len(),
            MessagePayload::Embedding { values } => values.len() * std::mem::size_of::<f32>(),
            MessagePayload::Control { bytes } => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A delivered inter-context message. The receiver owns the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: CtxId,
    pub receiver: CtxId,
    /// Per-receiver sequence number stamped at enqueue.
    pub seq_num: u32,
    pub payload: MessagePayload,
}

struct Ring {
    slots: Vec<Option<Message>>,
    head: usize,
    tail: usize,
    next_seq: u32,
}

impl Ring {
    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn is_full(&self) -> bool {
        (self.tail + 1) % self.slots.len() == self.head
    }

    fn push(&mut self, mut msg: Message) -> Result<u32, Message> {
        if self.is_full() {
            return Err(msg);
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        msg.seq_num = seq;
        self.slots[self.tail] = Some(msg);
        self.tail = (self.tail + 1) % self.slots.len();
        Ok(seq)
    }

    fn pop(&mut self) -> Option<Message> {
        if self.is_empty() {
            return None;
        }
        let msg = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        msg
    }

    fn occupancy(&self) -> usize {
        (self.tail + self.slots.len() - self.head) % self.slots.len()
    }
}

/// Condvar-backed bounded queue owned by one receiving context.
pub(crate) struct MessageQueue {
    ring: Mutex<Ring>,
    ready: Condvar,
}

impl MessageQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity.max(2)).map(|_| None).collect(),
                head: 0,
                tail: 0,
                next_seq: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue a message, returning its stamped sequence number, or the
    /// message back when the queue is full.
    pub(crate) fn send(&self, msg: Message) -> Result<u32, Message> {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let seq = ring.push(msg)?;
        self.ready.notify_one();
        Ok(seq)
    }

    /// Block until a message arrives or `timeout_ms` elapses; 0 blocks
    /// indefinitely.
    pub(crate) fn recv(&self, timeout_ms: u64) -> Option<Message> {
        let deadline = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms))
        } else {
            None
        };

        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(msg) = ring.pop() {
                return Some(msg);
            }
            match deadline {
                None => {
                    ring = self.ready.wait(ring).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self
                        .ready
                        .wait_timeout(ring, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    ring = guard;
                }
            }
        }
    }

    pub(crate) fn has_messages(&self) -> bool {
        !self
            .ring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .occupancy()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn text_msg(n: u32) -> Message {
        Message {
            sender: 0,
            receiver: 1,
            seq_num: 0,
            payload: MessagePayload::Text {
                text: format!("msg {n}"),
            },
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = MessageQueue::with_capacity(8);
        for n in 0..5 {
            queue.send(text_msg(n)).unwrap();
        }
        for n in 0..5 {
            let msg = queue.recv(100).unwrap();
            assert_eq!(msg.payload, MessagePayload::Text { text: format!("msg {n}") });
            assert_eq!(msg.seq_num, n);
        }
        assert!(!queue.has_messages());
    }

    #[test]
    fn full_queue_rejects_send() {
        let queue = MessageQueue::with_capacity(4);
        // One slot is reserved, so capacity 4 holds 3 messages.
        for n in 0..3 {
            queue.send(text_msg(n)).unwrap();
        }
        assert_eq!(queue.pending(), 3);
        assert!(queue.send(text_msg(99)).is_err());

        // Draining one frees one slot.
        queue.recv(100).unwrap();
        queue.send(text_msg(3)).unwrap();
    }

    #[test]
    fn recv_times_out_on_empty_queue() {
        let queue = MessageQueue::with_capacity(4);
        let start = Instant::now();
        assert!(queue.recv(30).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn recv_wakes_on_cross_thread_send() {
        let queue = Arc::new(MessageQueue::with_capacity(4));
        let sender = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.send(text_msg(7)).unwrap();
        });

        let msg = queue.recv(1_000).expect("message should arrive");
        assert_eq!(msg.payload, MessagePayload::Text { text: "msg 7".into() });
        handle.join().unwrap();
    }

    #[test]
    fn payload_kind_and_len() {
        let p = MessagePayload::Tokens { tokens: vec![1, 2, 3] };
        assert_eq!(p.kind(), MessageKind::Tokens);
        assert_eq!(p.len(), 12);

        let p = MessagePayload::Text { text: "abc".into() };
        assert_eq!(p.kind(), MessageKind::Text);
        assert_eq!(p.len(), 3);
        assert!(!p.is_empty());

        let p = MessagePayload::Control { bytes: vec![] };
        assert!(p.is_empty());
    }
}
