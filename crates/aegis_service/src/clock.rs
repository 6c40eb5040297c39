//! A narrow clock interface, so the orchestrator and learning handlers never
//! read wall-clock time ad hoc (§9 design note: "ad-hoc environment reads ->
//! a typed Config record", applied here to the one other piece of ambient
//! state a request handler reaches for). Styled after the teacher's thin
//! OS-facing wrappers (`DaemonManager`'s pid/state file accessors).

use chrono::{DateTime, Utc};

/// Narrow interface over wall-clock time, so tests can supply a fixed clock
/// instead of depending on `Utc::now()` directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
