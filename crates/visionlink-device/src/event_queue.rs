use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Capacity of a session's event queue.
pub const EVENT_QUEUE_MAXIMUM_SIZE: usize = 2048;

/// Arrival notifications for named output streams.
///
/// Holds stream names only, never data. When full, the oldest names are
/// dropped so the newest arrivals are always kept.
pub struct EventQueue {
    events: Mutex<VecDeque<String>>,
    arrived: Condvar,
    capacity: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::with_capacity(EVENT_QUEUE_MAXIMUM_SIZE)
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            arrived: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record an arrival on `name`. Never blocks or fails.
    pub fn push(&self, name: &str) {
        let mut events = self.lock();
        if events.len() >= self.capacity {
            let excess = events.len() - self.capacity + 1;
            events.drain(..excess);
        }
        events.push_back(name.to_string());
        self.arrived.notify_all();
    }

    /// Remove and return up to `max_count` events whose name is in `names`,
    /// oldest first.
    ///
    /// Blocks until at least one matches, or until `timeout` passes
    /// (`None` waits forever). An empty result means the wait timed out.
    pub fn wait_for<S: AsRef<str>>(
        &self,
        names: &[S],
        max_count: usize,
        timeout: Option<Duration>,
    ) -> Vec<String> {
        if names.is_empty() || max_count == 0 {
            return Vec::new();
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut events = self.lock();
        loop {
            let matched = take_matching(&mut events, names, max_count);
            if !matched.is_empty() {
                return matched;
            }

            events = match deadline {
                None => self
                    .arrived
                    .wait(events)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Vec::new();
                    }
                    self.arrived
                        .wait_timeout(events, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Copy of the queued names, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }
}

fn take_matching<S: AsRef<str>>(
    events: &mut VecDeque<String>,
    names: &[S],
    max_count: usize,
) -> Vec<String> {
    let mut matched = Vec::new();
    let mut index = 0;
    while index < events.len() && matched.len() < max_count {
        if names.iter().any(|n| n.as_ref() == events[index]) {
            if let Some(name) = events.remove(index) {
                matched.push(name);
            }
        } else {
            index += 1;
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn collects_only_requested_names() {
        let queue = EventQueue::new();
        for name in ["rgb", "depth", "rgb", "imu", "depth"] {
            queue.push(name);
        }

        let got = queue.wait_for(&["rgb", "imu"], 10, Some(Duration::ZERO));
        assert_eq!(got, ["rgb", "rgb", "imu"]);
        assert_eq!(queue.snapshot(), ["depth", "depth"]);
    }

    #[test]
    fn max_count_stops_scan() {
        let queue = EventQueue::new();
        for _ in 0..5 {
            queue.push("rgb");
        }
        assert_eq!(queue.wait_for(&["rgb"], 2, Some(Duration::ZERO)).len(), 2);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn empty_interest_returns_immediately() {
        let queue = EventQueue::new();
        queue.push("rgb");
        let none: [&str; 0] = [];
        assert!(queue.wait_for(&none, 10, None).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn duplicate_interest_names_do_not_double_count() {
        let queue = EventQueue::new();
        queue.push("rgb");
        assert_eq!(queue.wait_for(&["rgb", "rgb"], 10, Some(Duration::ZERO)), ["rgb"]);
    }

    #[test]
    fn timeout_bounds_the_wait() {
        let queue = EventQueue::new();
        queue.push("other");
        let start = Instant::now();
        assert!(queue
            .wait_for(&["rgb"], 1, Some(Duration::from_millis(50)))
            .is_empty());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn wait_forever_wakes_on_push() {
        let queue = Arc::new(EventQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_for(&["late"], 1, None))
        };
        thread::sleep(Duration::from_millis(30));
        queue.push("noise");
        queue.push("late");
        assert_eq!(waiter.join().unwrap(), ["late"]);
        assert_eq!(queue.snapshot(), ["noise"]);
    }

    proptest! {
        #[test]
        fn overflow_keeps_most_recent(
            capacity in 1usize..32,
            pushes in proptest::collection::vec(0u8..6, 0..128),
        ) {
            let queue = EventQueue::with_capacity(capacity);
            let names: Vec<String> = pushes.iter().map(|n| format!("s{n}")).collect();
            for name in &names {
                queue.push(name);
            }

            let keep = names.len().min(capacity);
            let expected = &names[names.len() - keep..];
            prop_assert_eq!(queue.snapshot(), expected.to_vec());
        }

        #[test]
        fn wait_result_is_bounded_and_filtered(
            pushes in proptest::collection::vec(0u8..6, 0..64),
            wanted in proptest::collection::vec(0u8..6, 1..4),
            max_count in 1usize..8,
        ) {
            let queue = EventQueue::new();
            for n in &pushes {
                queue.push(&format!("s{n}"));
            }
            let wanted: Vec<String> = wanted.iter().map(|n| format!("s{n}")).collect();
            let got = queue.wait_for(&wanted, max_count, Some(Duration::ZERO));
            prop_assert!(got.len() <= max_count);
            prop_assert!(got.iter().all(|g| wanted.contains(g)));
        }
    }
}
