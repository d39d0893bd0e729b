//! Cancellation token shared between the supervisors and their worker threads
//!
//! The token is written once and read by many. Worker threads park on it with
//! [`CancelToken::wait_timeout`] instead of sleeping, so a cancel request is
//! observed within one wait period.
//!
//! Nothing is ever sent on the channel: cancelling drops the only sender, and
//! every receiver sees the disconnect.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Cooperative cancellation flag with a timed wait
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter
    pub fn cancel(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block for at most `timeout`, returning early on cancellation.
    ///
    /// Returns `true` if the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) | Ok(()) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_cancel_is_seen_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.wait_timeout(Duration::from_secs(10)));
    }

    #[test]
    fn test_cancel_twice_is_harmless() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_waiter_early() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wakes_many_waiters() {
        let token = CancelToken::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let waiter = token.clone();
                thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }
}
