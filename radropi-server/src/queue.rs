//! Bounded frame queue that sheds the oldest entry when full

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

/// Single-consumer queue between acquisition and processing.
///
/// `push` never waits: when the queue is at capacity the oldest unconsumed
/// item is evicted and handed back to the caller. After `close`, `pop`
/// drains what is left and then returns `None`.
pub struct DropOldestQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue `item`, returning the evicted oldest item if the queue was full.
    /// Items pushed after `close` are handed straight back.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return Some(item);
            }
            let evicted = if state.items.len() >= self.capacity {
                state.dropped += 1;
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Next item, waiting if empty; `None` once closed and drained
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        // a consumer between its check and its wait picks this permit up
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted so far
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
