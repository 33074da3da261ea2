//! The bounded per-session send queue.
//!
//! Transports drain the queue in order; the gateway pushes into it. When
//! the queue is full, the oldest non-ack frame is dropped to make room and
//! its packet ID is reported so the gateway can fail the waiting sender.
//! Acks are never dropped: losing an ack makes the peer retry an entire
//! exchange, losing a request only fails one sender.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::{Result, SessionError};

/// One wire frame queued for sending.
#[derive(Debug)]
pub struct QueuedFrame {
    /// The serialized signed packet.
    pub bytes: Vec<u8>,
    /// The packet ID, for overflow reporting.
    pub packet_id: String,
    /// Whether the frame is an `Ack`/`Fail` (undroppable).
    pub is_response: bool,
}

/// Outcome of a push.
#[derive(Debug, PartialEq, Eq)]
pub enum Pushed {
    /// Queued without dropping anything.
    Queued,
    /// Queued after dropping the oldest non-ack frame with this packet ID.
    DroppedOldest(String),
}

/// A bounded FIFO of frames with overflow eviction.
pub struct SendQueue {
    capacity: usize,
    inner: Mutex<VecDeque<QueuedFrame>>,
    notify: Notify,
    closed: AtomicBool,
}

impl SendQueue {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a frame, evicting the oldest non-ack frame when full.
    ///
    /// Fails with [`SessionError::QueueOverflow`] when the queue is full
    /// and nothing can be evicted (everything queued is a response, and so
    /// is the incoming frame — or the incoming frame is the only droppable
    /// one).
    pub fn push(&self, frame: QueuedFrame) -> Result<Pushed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::ConnectionClosed("queue closed".to_string()));
        }
        let mut inner = lock(&self.inner);
        let result = if inner.len() < self.capacity {
            inner.push_back(frame);
            Pushed::Queued
        } else {
            let victim = inner.iter().position(|f| !f.is_response);
            match victim {
                Some(idx) => {
                    let dropped = inner
                        .remove(idx)
                        .map(|f| f.packet_id)
                        .unwrap_or_default();
                    inner.push_back(frame);
                    Pushed::DroppedOldest(dropped)
                }
                None if frame.is_response => {
                    // A full queue of responses plus one more response:
                    // grow past capacity rather than lose an ack.
                    inner.push_back(frame);
                    Pushed::Queued
                }
                None => return Err(SessionError::QueueOverflow),
            }
        };
        drop(inner);
        self.notify.notify_one();
        Ok(result)
    }

    /// Take the next frame, waiting until one arrives or the queue closes.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<QueuedFrame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = lock(&self.inner).pop_front() {
                // Wake any sibling waiter for remaining frames.
                self.notify.notify_one();
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue; pending frames drain, new pushes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, is_response: bool) -> QueuedFrame {
        QueuedFrame {
            bytes: id.as_bytes().to_vec(),
            packet_id: id.to_string(),
            is_response,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let q = SendQueue::new(8);
        q.push(frame("a", false)).expect("push");
        q.push(frame("b", false)).expect("push");
        assert_eq!(q.pop().await.expect("pop").packet_id, "a");
        assert_eq!(q.pop().await.expect("pop").packet_id, "b");
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_non_ack() {
        let q = SendQueue::new(2);
        q.push(frame("ack-1", true)).expect("push");
        q.push(frame("req-1", false)).expect("push");
        let pushed = q.push(frame("req-2", false)).expect("push");
        assert_eq!(pushed, Pushed::DroppedOldest("req-1".to_string()));

        assert_eq!(q.pop().await.expect("pop").packet_id, "ack-1");
        assert_eq!(q.pop().await.expect("pop").packet_id, "req-2");
    }

    #[tokio::test]
    async fn test_overflow_of_all_acks_rejects_request() {
        let q = SendQueue::new(2);
        q.push(frame("ack-1", true)).expect("push");
        q.push(frame("ack-2", true)).expect("push");
        assert!(matches!(
            q.push(frame("req-1", false)),
            Err(SessionError::QueueOverflow)
        ));
    }

    #[tokio::test]
    async fn test_acks_grow_past_capacity() {
        let q = SendQueue::new(1);
        q.push(frame("ack-1", true)).expect("push");
        q.push(frame("ack-2", true)).expect("push");
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let q = std::sync::Arc::new(SendQueue::new(4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop().await });
        tokio::task::yield_now().await;
        q.push(frame("late", false)).expect("push");
        let got = waiter.await.expect("join").expect("frame");
        assert_eq!(got.packet_id, "late");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let q = SendQueue::new(4);
        q.push(frame("a", false)).expect("push");
        q.close();
        assert!(q.push(frame("b", false)).is_err());
        assert_eq!(q.pop().await.expect("drain").packet_id, "a");
        assert!(q.pop().await.is_none());
    }
}
