//! Supervised suspend requests for a paced link.
//!
//! Open question (resolved): rather than modeling a per-reason timer, a
//! link holds at most one pending suspend request — the first reason wins
//! and later requests while one is pending are coalesced (logged at debug,
//! not queued). The main thread drains pending requests once per poll
//! iteration and actually tears down the link; nothing here touches the
//! socket directly.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// `EAGAIN` persisted past the write deadline for more than 5s.
    WriteTimeout,
    /// Any send error other than `EAGAIN`/`ECONNRESET`.
    SendError,
    /// Peer reset the connection.
    ConnectionReset,
}

#[derive(Default)]
pub struct SuspendSupervisor {
    pending: Option<SuspendReason>,
}

impl SuspendSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, reason: SuspendReason) {
        if self.pending.is_some() {
            debug!(?reason, "suspend already pending, coalescing");
            return;
        }
        self.pending = Some(reason);
    }

    pub fn take_pending(&mut self) -> Option<SuspendReason> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Cancels a pending suspend — used on a successful write after a
    /// transient EAGAIN streak, per §4.3's "underrun additionally cancels
    /// any pending suspend" note for paced devices.
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_wins_and_later_ones_coalesce() {
        let mut s = SuspendSupervisor::new();
        s.request(SuspendReason::WriteTimeout);
        s.request(SuspendReason::SendError);
        assert_eq!(s.take_pending(), Some(SuspendReason::WriteTimeout));
        assert_eq!(s.take_pending(), None);
    }

    #[test]
    fn cancel_clears_pending_request() {
        let mut s = SuspendSupervisor::new();
        s.request(SuspendReason::WriteTimeout);
        s.cancel();
        assert!(!s.is_pending());
    }
}
