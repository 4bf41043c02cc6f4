// crates/sve2-core/src/channel.rs
//
// Ring-buffer-backed MPMC bounded channel with deadline-aware send/recv.
//
// crossbeam_channel's bounded channel is the obvious first reach for a
// producer/consumer queue, but it only supports try/blocking/timeout
// variants relative to *now* — it has no notion of an absolute deadline, and
// no "grow on demand" mode. Both are required here (the demuxer's
// held-packet backoff drives the deadline from wall-clock arithmetic, and a
// handful of callers want an unbounded-but-rate-visible queue). So this is a
// small hand-rolled mutex+condvar ring, the same shape as the reference
// implementation's own channel primitive.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::time::Deadline;

/// Growth policy for a [`Channel`]. Negative grow factor means strictly
/// bounded: `send` blocks (up to the deadline) rather than growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowPolicy {
    Strict,
    GrowBy(usize),
}

struct Inner<T> {
    queue: VecDeque<T>,
    cap: usize,
    closed: bool,
}

/// A bounded MPMC channel. Cloning a `Channel` shares the same queue (it is
/// internally an `Arc`-free handle meant to be wrapped in `Arc` by the
/// caller, matching the reference's `mpmc_t` being embedded by value inside
/// owning structs and handed out by pointer).
pub struct Channel<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    grow: GrowPolicy,
}

/// Outcome of a `recv` against a channel that has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Ok,
    Timeout,
    Closed,
}

impl<T> Channel<T> {
    pub fn new(capacity: usize, grow: GrowPolicy) -> Self {
        Channel {
            inner: Mutex::new(Inner { queue: VecDeque::with_capacity(capacity), cap: capacity, closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            grow,
        }
    }

    /// Pushes `msg`, waiting up to `deadline` for room. Returns `false` on
    /// timeout or if the channel is closed.
    pub fn send(&self, msg: T, deadline: Deadline) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };

        loop {
            if guard.closed {
                return false;
            }

            if guard.queue.len() < guard.cap {
                guard.queue.push_back(msg);
                self.not_empty.notify_one();
                return true;
            }

            match self.grow {
                GrowPolicy::GrowBy(by) => {
                    // Ring reallocates and rotates the existing window: since we
                    // back the ring with a VecDeque, growing is simply raising cap.
                    guard.cap += by.max(1);
                    guard.queue.push_back(msg);
                    self.not_empty.notify_one();
                    return true;
                }
                GrowPolicy::Strict => {}
            }

            if deadline.has_elapsed() {
                return false;
            }

            let wait = deadline.remaining().unwrap_or(std::time::Duration::ZERO);
            let (g, timeout) = match self.not_full.wait_timeout(guard, wait) {
                Ok(r) => r,
                Err(_) => return false,
            };
            guard = g;
            if timeout.timed_out() && guard.queue.len() >= guard.cap {
                if deadline.has_elapsed() {
                    return false;
                }
            }
        }
    }

    /// Pops the oldest message, waiting up to `deadline`.
    pub fn recv(&self, deadline: Deadline) -> RecvOutcome
    where
        T: Sized,
    {
        let mut out = None;
        let outcome = self.recv_into(&mut out, deadline);
        debug_assert!(outcome != RecvOutcome::Ok || out.is_some());
        outcome
    }

    /// Pops the oldest message into `out`, waiting up to `deadline`.
    pub fn recv_into(&self, out: &mut Option<T>, deadline: Deadline) -> RecvOutcome {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => return RecvOutcome::Closed,
        };

        loop {
            if let Some(msg) = guard.queue.pop_front() {
                *out = Some(msg);
                self.not_full.notify_one();
                return RecvOutcome::Ok;
            }

            if guard.closed {
                return RecvOutcome::Closed;
            }

            if deadline.has_elapsed() {
                return RecvOutcome::Timeout;
            }

            let wait = deadline.remaining().unwrap_or(std::time::Duration::ZERO);
            guard = match self.not_empty.wait_timeout(guard, wait) {
                Ok((g, _)) => g,
                Err(_) => return RecvOutcome::Closed,
            };
        }
    }

    /// Current element count, snapshot under the mutex.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().map(|g| g.cap).unwrap_or(0)
    }

    /// Marks the channel closed: pending recvs drain remaining items then
    /// report `Closed`; no further sends are accepted.
    pub fn close(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn fifo_ordering_is_preserved() {
        let ch: Channel<i32> = Channel::new(8, GrowPolicy::Strict);
        for i in 0..8 {
            assert!(ch.send(i, Deadline::Now));
        }
        for i in 0..8 {
            let mut out = None;
            assert_eq!(ch.recv_into(&mut out, Deadline::Now), RecvOutcome::Ok);
            assert_eq!(out, Some(i));
        }
    }

    #[test]
    fn strict_capacity_is_never_exceeded() {
        let ch: Channel<i32> = Channel::new(4, GrowPolicy::Strict);
        for i in 0..4 {
            assert!(ch.send(i, Deadline::Now));
        }
        assert_eq!(ch.len(), 4);
        assert!(!ch.send(99, Deadline::Now));
        assert_eq!(ch.len(), 4);
    }

    #[test]
    fn send_blocks_roughly_until_deadline_when_full() {
        // Scenario S3: capacity 4, strict, no consumer, deadline now+10ms.
        let ch: Channel<i32> = Channel::new(4, GrowPolicy::Strict);
        for i in 0..4 {
            assert!(ch.send(i, Deadline::Now));
        }

        let start = Instant::now();
        let ok = ch.send(99, Deadline::after(Duration::from_millis(10)));
        let elapsed = start.elapsed();

        assert!(!ok);
        assert!(elapsed >= Duration::from_millis(9));
        assert!(elapsed < Duration::from_millis(50));
    }

    #[test]
    fn grow_policy_never_blocks_on_capacity() {
        let ch: Channel<i32> = Channel::new(2, GrowPolicy::GrowBy(2));
        for i in 0..10 {
            assert!(ch.send(i, Deadline::Now));
        }
        assert_eq!(ch.len(), 10);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let ch: Channel<i32> = Channel::new(4, GrowPolicy::Strict);
        ch.send(1, Deadline::Now);
        ch.close();

        let mut out = None;
        assert_eq!(ch.recv_into(&mut out, Deadline::Now), RecvOutcome::Ok);
        assert_eq!(out, Some(1));

        let mut out2 = None;
        assert_eq!(ch.recv_into(&mut out2, Deadline::Now), RecvOutcome::Closed);

        assert!(!ch.send(2, Deadline::Now));
    }

    #[test]
    fn cross_thread_send_recv_round_trips() {
        let ch = Arc::new(Channel::<i32>::new(4, GrowPolicy::Strict));
        let ch2 = ch.clone();
        let producer = std::thread::spawn(move || {
            for i in 0..20 {
                assert!(ch2.send(i, Deadline::Infinite));
            }
        });

        let mut received = Vec::new();
        while received.len() < 20 {
            let mut out = None;
            if ch.recv_into(&mut out, Deadline::after(Duration::from_millis(500))) == RecvOutcome::Ok {
                received.push(out.unwrap());
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }
}
