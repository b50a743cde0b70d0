//! Outstanding request tracking.
//!
//! Each request sent to the peer is parked here with the channel that
//! will receive its response and an optional deadline.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::message::Command;
use crate::packet::Packet;

// ── TrackedRequest ────────────────────────────────────────────────

/// A pending request that may expire after a deadline.
#[derive(Debug)]
pub struct TrackedRequest {
    /// The command that was sent.
    pub command: Command,
    /// When the request was submitted.
    pub sent_at: Instant,
    /// Optional deadline; `None` means no timeout.
    pub deadline: Option<Duration>,
    reply: oneshot::Sender<Packet>,
}

impl TrackedRequest {
    /// Returns `true` if this request has exceeded its deadline.
    pub fn is_expired(&self) -> bool {
        match self.deadline {
            Some(d) => self.sent_at.elapsed() > d,
            None => false,
        }
    }

    /// How long this request has been in-flight.
    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

// ── RequestTracker ───────────────────────────────────────────────

/// Allocates request ids and routes responses back to their callers.
#[derive(Debug)]
pub struct RequestTracker {
    requests: HashMap<u64, TrackedRequest>,
    default_timeout: Option<Duration>,
    /// Monotonically increasing request ID counter. 0 is reserved for
    /// keepalives.
    next_id: u64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            default_timeout: None,
            next_id: 1,
        }
    }

    /// Set the default timeout applied to all new requests.
    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = Some(timeout);
    }

    /// Allocate the next request id.
    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Track a request with the default timeout. Returns the receiver
    /// that resolves when the matching response arrives.
    pub fn track(&mut self, request_id: u64, command: Command) -> oneshot::Receiver<Packet> {
        self.track_with_deadline(request_id, command, self.default_timeout)
    }

    /// Track a request with an explicit timeout.
    pub fn track_with_deadline(
        &mut self,
        request_id: u64,
        command: Command,
        deadline: Option<Duration>,
    ) -> oneshot::Receiver<Packet> {
        let (reply, rx) = oneshot::channel();
        self.requests.insert(
            request_id,
            TrackedRequest {
                command,
                sent_at: Instant::now(),
                deadline,
                reply,
            },
        );
        rx
    }

    /// Route a response to its waiting caller.
    ///
    /// Returns `false` if no request with that id was pending (late or
    /// unsolicited response).
    pub fn resolve(&mut self, response: Packet) -> bool {
        match self.requests.remove(&response.request_id()) {
            Some(req) => {
                // The caller may have given up already.
                let _ = req.reply.send(response);
                true
            }
            None => false,
        }
    }

    /// Forget a request without answering it.
    pub fn cancel(&mut self, request_id: u64) -> bool {
        self.requests.remove(&request_id).is_some()
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    /// Check if a specific request is pending.
    pub fn is_request_pending(&self, request_id: u64) -> bool {
        self.requests.contains_key(&request_id)
    }

    /// Returns all request IDs whose deadlines have expired.
    pub fn check_timeouts(&self) -> Vec<u64> {
        self.requests
            .iter()
            .filter(|(_, req)| req.is_expired())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Remove and return all expired requests. Dropping them closes the
    /// reply channel, which wakes any caller still waiting.
    pub fn drain_expired(&mut self) -> Vec<(u64, TrackedRequest)> {
        self.check_timeouts()
            .into_iter()
            .filter_map(|id| self.requests.remove(&id).map(|r| (id, r)))
            .collect()
    }

    /// Drop every pending request (connection lost).
    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: u64) -> Packet {
        Packet::new_response(id, Command::ScheduleFetch, vec![1]).unwrap()
    }

    #[tokio::test]
    async fn track_and_resolve() {
        let mut tracker = RequestTracker::new();
        let id = tracker.next_request_id();
        let rx = tracker.track(id, Command::ScheduleFetch);
        assert!(tracker.is_request_pending(id));

        assert!(tracker.resolve(response(id)));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(rx.await.unwrap().request_id(), id);
    }

    #[test]
    fn unsolicited_response_is_ignored() {
        let mut tracker = RequestTracker::new();
        assert!(!tracker.resolve(response(999)));
    }

    #[test]
    fn ids_start_at_one() {
        let mut tracker = RequestTracker::new();
        assert_eq!(tracker.next_request_id(), 1);
        assert_eq!(tracker.next_request_id(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_expired_removes_entries_and_closes_channel() {
        let mut tracker = RequestTracker::new();
        let rx = tracker.track_with_deadline(1, Command::MediaResolve, Some(Duration::from_secs(1)));
        let _keep = tracker.track_with_deadline(2, Command::MediaResolve, None);

        tokio::time::advance(Duration::from_secs(2)).await;

        let drained = tracker.drain_expired();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, 1);
        drop(drained);
        assert!(rx.await.is_err());
        assert_eq!(tracker.pending_count(), 1);
    }
}
