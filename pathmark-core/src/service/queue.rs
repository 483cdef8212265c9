//! Priority message queue shared between callers and the worker
//!
//! Items are ordered by rank (lower first) and by arrival within a rank.
//! This is the only structure the worker shares with other threads.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Entry<T> {
    rank: u8,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // BinaryHeap pops the greatest entry; the lowest (rank, seq) must win
    fn cmp(&self, other: &Self) -> Ordering {
        (other.rank, other.seq).cmp(&(self.rank, self.seq))
    }
}

struct QueueState<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
    closed: bool,
}

/// Blocking priority queue.
pub struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    // The state stays consistent across a panicking holder, so poisoning is ignored
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an item. Hands it back if the queue has been closed.
    pub fn push(&self, rank: u8, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry { rank, seq, item });
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Non-blocking dequeue
    pub fn try_pop(&self) -> Option<T> {
        self.lock().heap.pop().map(|entry| entry.item)
    }

    /// Block until an item is available. `None` once closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(entry) = state.heap.pop() {
                return Some(entry.item);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(entry) = state.heap.pop() {
                return Some(entry.item);
            }
            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Refuse further pushes and hand back whatever is still queued, in order
    pub fn close(&self) -> Vec<T> {
        let mut state = self.lock();
        state.closed = true;
        let mut drained = Vec::with_capacity(state.heap.len());
        while let Some(entry) = state.heap.pop() {
            drained.push(entry.item);
        }
        drop(state);
        self.ready.notify_all();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rank_then_arrival_order() {
        let queue = MessageQueue::new();
        queue.push(2, "quit").unwrap();
        queue.push(1, "read-a").unwrap();
        queue.push(0, "write-a").unwrap();
        queue.push(1, "read-b").unwrap();
        queue.push(0, "write-b").unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(order, vec!["write-a", "write-b", "read-a", "read-b", "quit"]);
    }

    #[test]
    fn test_closed_queue_rejects_and_drains() {
        let queue = MessageQueue::new();
        queue.push(1, 10).unwrap();
        queue.push(0, 20).unwrap();

        assert_eq!(queue.close(), vec![20, 10]);
        assert!(queue.is_closed());
        assert_eq!(queue.push(0, 30), Err(30));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_timeout_expires() {
        let queue: MessageQueue<u32> = MessageQueue::new();
        let started = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocking_pop_wakes_on_push() {
        let queue = Arc::new(MessageQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(0, 7u32).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(7));
        assert!(queue.is_empty());
    }
}
