use std::time::{Duration, Instant};

/// An optional absolute deadline carried into every device operation.
///
/// Operations sample the deadline once at entry and translate it into
/// endpoint-level read/write timeouts. An absent deadline substitutes the
/// codec-specific default the operation passes to [`Deadline::or_default`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; operations fall back to their codec default.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline at an absolute instant.
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    /// Resolve to an absolute instant, substituting `default` from now
    /// when no deadline was supplied.
    pub fn or_default(&self, default: Duration) -> Instant {
        self.0.unwrap_or_else(|| Instant::now() + default)
    }
}

/// Time remaining until `deadline`, or `None` once it has passed.
///
/// Endpoint timeouts are per-call relative durations, so every wire
/// operation recomputes its remaining budget from the absolute deadline.
pub fn remaining(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}
