//! Request/reply correlation by serial number.
//!
//! Request-class packets carry a u32 serial; reply-class packets echo it.
//! The correlator allocates serials, parks a oneshot sender for each
//! in-flight request, and routes the eventual reply (or a timeout or
//! connection-close verdict) back to the caller.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::protocol::packets::messages::Message;

/// Default time an in-flight request may wait for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal outcome of an in-flight request.
#[derive(Debug, PartialEq)]
pub enum ReplyOutcome {
    /// The peer answered `Success` with this reason code.
    Success { reason: u16 },
    /// The peer answered `Failed` with this reason code.
    Failed { reason: u16 },
    /// The peer answered `InvalidRequest` with this reason code.
    Invalid { reason: u16 },
    /// The peer answered with a typed reply packet (`NewCharacterOptions`,
    /// `MapCrc`, `MapReply`).
    Reply(Message),
    /// No reply arrived within the deadline.
    TimedOut,
    /// The connection closed before a reply arrived.
    ConnectionClosed,
}

struct Pending {
    reply_to: oneshot::Sender<ReplyOutcome>,
    deadline: Instant,
}

/// Tracks in-flight requests for one connection.
pub struct Correlator {
    next_serial: u32,
    pending: HashMap<u32, Pending>,
    timeout: Duration,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Correlator {
            next_serial: 1,
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Number of requests still waiting for replies.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Registers a new request and returns its serial.
    ///
    /// Serials wrap around; a serial still attached to a live request is
    /// skipped so two in-flight requests can never collide.
    pub fn register(&mut self, reply_to: oneshot::Sender<ReplyOutcome>) -> u32 {
        self.register_with_deadline(reply_to, None)
    }

    /// Like [`Correlator::register`], with a per-request reply deadline
    /// overriding the correlator-wide default.
    pub fn register_with_deadline(
        &mut self,
        reply_to: oneshot::Sender<ReplyOutcome>,
        timeout: Option<Duration>,
    ) -> u32 {
        let serial = loop {
            let candidate = self.next_serial;
            self.next_serial = self.next_serial.wrapping_add(1);
            if !self.pending.contains_key(&candidate) {
                break candidate;
            }
        };
        self.pending.insert(
            serial,
            Pending {
                reply_to,
                deadline: Instant::now() + timeout.unwrap_or(self.timeout),
            },
        );
        serial
    }

    /// Routes an inbound reply packet to its waiting request.
    ///
    /// Returns false when the serial matches nothing, which covers replies
    /// that arrive after their request already timed out.
    pub fn resolve(&mut self, reply: Message) -> bool {
        let Some(serial) = reply.reply_serial() else {
            return false;
        };
        let Some(pending) = self.pending.remove(&serial) else {
            debug!(serial, packet = reply.name(), "reply for unknown serial");
            return false;
        };
        let outcome = match reply {
            Message::Success { reason, .. } => ReplyOutcome::Success { reason },
            Message::Failed { reason, .. } => ReplyOutcome::Failed { reason },
            Message::InvalidRequest { reason, .. } => ReplyOutcome::Invalid { reason },
            other => ReplyOutcome::Reply(other),
        };
        if pending.reply_to.send(outcome).is_err() {
            debug!(serial, "request abandoned before reply arrived");
        }
        true
    }

    /// Fails every request whose deadline has passed.
    pub fn expire(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(serial, _)| *serial)
            .collect();
        for serial in expired {
            if let Some(pending) = self.pending.remove(&serial) {
                warn!(serial, "request timed out");
                let _ = pending.reply_to.send(ReplyOutcome::TimedOut);
            }
        }
    }

    /// Fails every in-flight request; called when the connection dies.
    pub fn cancel_all(&mut self) {
        for (serial, pending) in self.pending.drain() {
            debug!(serial, "cancelling in-flight request");
            let _ = pending.reply_to.send(ReplyOutcome::ConnectionClosed);
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Correlator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serials_are_unique_across_in_flight_requests() {
        let mut correlator = Correlator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let (tx, _rx) = oneshot::channel();
            assert!(seen.insert(correlator.register(tx)));
        }
        assert_eq!(correlator.in_flight(), 100);
    }

    #[test]
    fn wrapping_allocation_skips_live_serials() {
        let mut correlator = Correlator::new();
        correlator.next_serial = u32::MAX;
        let (tx, _rx) = oneshot::channel();
        let near_wrap = correlator.register(tx);
        assert_eq!(near_wrap, u32::MAX);
        // Force the counter to land on the live serial again.
        correlator.next_serial = u32::MAX;
        let (tx, _rx) = oneshot::channel();
        let next = correlator.register(tx);
        assert_ne!(next, near_wrap);
    }

    #[tokio::test]
    async fn success_reply_reaches_the_waiter() {
        let mut correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        let serial = correlator.register(tx);
        assert!(correlator.resolve(Message::Success { serial, reason: 0 }));
        assert_eq!(rx.await.unwrap(), ReplyOutcome::Success { reason: 0 });
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn typed_reply_is_passed_through() {
        let mut correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        let serial = correlator.register(tx);
        correlator.resolve(Message::MapCrc {
            serial,
            checksum: 0xDEADBEEF,
        });
        match rx.await.unwrap() {
            ReplyOutcome::Reply(Message::MapCrc { checksum, .. }) => {
                assert_eq!(checksum, 0xDEADBEEF)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn unknown_serial_is_ignored() {
        let mut correlator = Correlator::new();
        assert!(!correlator.resolve(Message::Success {
            serial: 999,
            reason: 0,
        }));
    }

    #[test]
    fn non_reply_packets_are_not_consumed() {
        let mut correlator = Correlator::new();
        assert!(!correlator.resolve(Message::KeepAlive));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_time_out_and_late_replies_are_dropped() {
        let mut correlator = Correlator::with_timeout(Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();
        let serial = correlator.register(tx);

        tokio::time::advance(Duration::from_secs(6)).await;
        correlator.expire(Instant::now());
        assert_eq!(rx.await.unwrap(), ReplyOutcome::TimedOut);

        // The reply arriving after expiry has nowhere to go.
        assert!(!correlator.resolve(Message::Success { serial, reason: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn per_request_deadline_overrides_the_default() {
        let mut correlator = Correlator::with_timeout(Duration::from_secs(30));
        let (quick_tx, quick_rx) = oneshot::channel();
        correlator.register_with_deadline(quick_tx, Some(Duration::from_secs(2)));
        let (slow_tx, mut slow_rx) = oneshot::channel();
        correlator.register(slow_tx);

        tokio::time::advance(Duration::from_secs(3)).await;
        correlator.expire(Instant::now());
        assert_eq!(quick_rx.await.unwrap(), ReplyOutcome::TimedOut);
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(correlator.in_flight(), 1);
    }

    #[tokio::test]
    async fn cancel_all_fails_every_waiter() {
        let mut correlator = Correlator::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        correlator.register(tx1);
        correlator.register(tx2);
        correlator.cancel_all();
        assert_eq!(rx1.await.unwrap(), ReplyOutcome::ConnectionClosed);
        assert_eq!(rx2.await.unwrap(), ReplyOutcome::ConnectionClosed);
    }
}
