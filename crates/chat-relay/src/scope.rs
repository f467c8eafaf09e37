//! The two cancellation scopes of one relayed request.
//!
//! `RequestScope` follows the inbound connection: it carries an optional
//! deadline and a departure signal. `UpstreamScope` is derived from it with
//! the same deadline but without the departure signal, so the upstream drain
//! survives the consumer leaving.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Handle held by the transport layer to report that the consumer left.
#[derive(Clone)]
pub struct DepartureHandle {
    tx: watch::Sender<bool>,
}

impl DepartureHandle {
    /// Marks the consumer as gone. Idempotent.
    pub fn depart(&self) {
        let _ = self.tx.send(true);
    }
}

/// Consumer-facing scope.
#[derive(Clone, Debug)]
pub struct RequestScope {
    deadline: Option<Instant>,
    departed: watch::Receiver<bool>,
}

impl RequestScope {
    /// Creates a scope without deadline plus the handle that ends it.
    pub fn new() -> (Self, DepartureHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                departed: rx,
            },
            DepartureHandle { tx },
        )
    }

    /// Sets an absolute deadline shared with the derived upstream scope.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline to `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the consumer departs. Never resolves if the handle is
    /// dropped without departing.
    pub async fn departed(&mut self) {
        if self.departed.wait_for(|gone| *gone).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Upstream scope with the same deadline, detached from departure.
    pub fn detach(&self) -> UpstreamScope {
        UpstreamScope {
            deadline: self.deadline,
        }
    }
}

/// Upstream-facing scope: only a deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpstreamScope {
    deadline: Option<Instant>,
}

impl UpstreamScope {
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Narrows the deadline to at most `timeout` from now.
    pub fn tighten(self, timeout: Option<Duration>) -> Self {
        let Some(timeout) = timeout else {
            return self;
        };
        let candidate = Instant::now() + timeout;
        Self {
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(candidate),
                None => candidate,
            }),
        }
    }
}
