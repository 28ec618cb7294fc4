use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bounded thread-safe FIFO with a selectable overflow policy.
///
/// Blocking queues make producers wait for space. Non-blocking queues evict
/// the oldest item instead, so a push never waits. After [`destruct`]
/// every waiter wakes and all further pushes and pops fail.
///
/// [`destruct`]: LockingQueue::destruct
pub struct LockingQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    max_size: usize,
    blocking: bool,
    destructed: bool,
}

impl<T> LockingQueue<T> {
    pub fn new(max_size: usize, blocking: bool) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                max_size: max_size.max(1),
                blocking,
                destructed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_max_size(&self, max_size: usize) {
        let mut state = self.lock();
        state.max_size = max_size.max(1);
        if !state.blocking {
            let max = state.max_size;
            while state.items.len() > max {
                state.items.pop_front();
            }
        }
        self.not_full.notify_all();
    }

    pub fn max_size(&self) -> usize {
        self.lock().max_size
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.lock().blocking = blocking;
        self.not_full.notify_all();
    }

    pub fn is_blocking(&self) -> bool {
        self.lock().blocking
    }

    /// Add an item, waiting for space if the queue blocks.
    ///
    /// Returns `false` if the queue was destructed.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.lock();
        while state.blocking && state.items.len() >= state.max_size && !state.destructed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.admit(state, item)
    }

    /// Add an item without waiting.
    ///
    /// Returns `false` if a blocking queue is full or the queue was destructed.
    pub fn try_push(&self, item: T) -> bool {
        let state = self.lock();
        if state.blocking && state.items.len() >= state.max_size {
            return false;
        }
        self.admit(state, item)
    }

    fn admit(&self, mut state: MutexGuard<'_, State<T>>, item: T) -> bool {
        if state.destructed {
            return false;
        }
        while state.items.len() >= state.max_size {
            state.items.pop_front();
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Take the oldest item, waiting for one. `None` once destructed.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if state.destructed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        if state.destructed {
            return None;
        }
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Take the oldest item, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.destructed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Take everything currently queued.
    pub fn try_pop_all(&self) -> Vec<T> {
        let mut state = self.lock();
        if state.destructed {
            return Vec::new();
        }
        let items: Vec<T> = state.items.drain(..).collect();
        if !items.is_empty() {
            self.not_full.notify_all();
        }
        items
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Tear the queue down and wake every waiter.
    pub fn destruct(&self) {
        let mut state = self.lock();
        state.destructed = true;
        state.items.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_destructed(&self) -> bool {
        self.lock().destructed
    }
}

impl<T: Clone> LockingQueue<T> {
    /// Copy of the oldest item, leaving it queued.
    pub fn front(&self) -> Option<T> {
        let state = self.lock();
        if state.destructed {
            return None;
        }
        state.items.front().cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn overwrite_policy_keeps_newest() {
        let queue = LockingQueue::new(3, false);
        for i in 0..5 {
            assert!(queue.push(i));
        }
        assert_eq!(queue.try_pop_all(), [2, 3, 4]);
    }

    #[test]
    fn blocking_push_waits_for_space() {
        let queue = Arc::new(LockingQueue::new(1, true));
        assert!(queue.push(1));
        assert!(!queue.try_push(2));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn destruct_wakes_waiters() {
        let full = Arc::new(LockingQueue::new(1, true));
        full.push(7u32);
        let empty = Arc::new(LockingQueue::<u32>::new(1, true));

        let producer = {
            let full = Arc::clone(&full);
            thread::spawn(move || full.push(8))
        };
        let consumer = {
            let empty = Arc::clone(&empty);
            thread::spawn(move || empty.pop())
        };
        thread::sleep(Duration::from_millis(30));
        full.destruct();
        empty.destruct();

        assert!(!producer.join().unwrap());
        assert_eq!(consumer.join().unwrap(), None);
        assert!(!full.push(10));
        assert_eq!(full.pop(), None);
        assert_eq!(full.front(), None);
        assert!(full.is_destructed());
    }

    #[test]
    fn pop_timeout_expires() {
        let queue = LockingQueue::<u8>::new(4, true);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(40)), None);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn shrinking_non_blocking_queue_evicts() {
        let queue = LockingQueue::new(5, false);
        for i in 0..5 {
            queue.push(i);
        }
        queue.set_max_size(2);
        assert_eq!(queue.front(), Some(3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn switching_to_non_blocking_releases_producer() {
        let queue = Arc::new(LockingQueue::new(1, true));
        queue.push(1);
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(30));
        queue.set_blocking(false);
        assert!(producer.join().unwrap());
        assert_eq!(queue.try_pop_all(), [2]);
    }

    proptest! {
        #[test]
        fn non_blocking_holds_last_max_size(
            max_size in 1usize..16,
            items in proptest::collection::vec(any::<u16>(), 0..64),
        ) {
            let queue = LockingQueue::new(max_size, false);
            for item in &items {
                prop_assert!(queue.try_push(*item));
            }
            let keep = items.len().min(max_size);
            prop_assert_eq!(queue.try_pop_all(), items[items.len() - keep..].to_vec());
        }
    }
}
