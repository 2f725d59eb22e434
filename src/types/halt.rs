//! Halt reason and kind types.
//!
//! Halting is a quiet completion, not an error: a halted frame runs all of
//! its cleanup and settles without a failure cause. These types record
//! *why* a teardown started, for diagnostics and tracing.

use core::fmt;

/// The kind of halt request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HaltKind {
    /// Explicit halt requested through a task handle.
    Requested,
    /// The frame lost a race (another branch completed first).
    RaceLost,
    /// A sibling frame in the same scope failed.
    SiblingFailed,
    /// The enclosing scope completed or was torn down.
    ParentEnded,
    /// A deadline elapsed.
    Timeout,
    /// The runtime is shutting down.
    Shutdown,
}

impl HaltKind {
    /// Returns the severity of this halt kind.
    ///
    /// More severe reasons take precedence when strengthening.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Requested => 0,
            Self::RaceLost => 1,
            Self::Timeout => 2,
            Self::SiblingFailed => 3,
            Self::ParentEnded => 4,
            Self::Shutdown => 5,
        }
    }
}

impl fmt::Display for HaltKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::RaceLost => write!(f, "race lost"),
            Self::SiblingFailed => write!(f, "sibling failed"),
            Self::ParentEnded => write!(f, "parent ended"),
            Self::Timeout => write!(f, "timeout"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The reason for a halt, including kind and optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltReason {
    /// The kind of halt.
    pub kind: HaltKind,
    /// Optional human-readable message (static for determinism).
    pub message: Option<&'static str>,
}

impl HaltReason {
    /// Creates a new halt reason with the given kind.
    #[must_use]
    pub const fn new(kind: HaltKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a requested halt reason with a message.
    #[must_use]
    pub const fn requested(message: &'static str) -> Self {
        Self {
            kind: HaltKind::Requested,
            message: Some(message),
        }
    }

    /// Creates a sibling-failed halt reason.
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(HaltKind::SiblingFailed)
    }

    /// Creates a race-lost halt reason.
    #[must_use]
    pub const fn race_lost() -> Self {
        Self::new(HaltKind::RaceLost)
    }

    /// Creates a parent-ended halt reason.
    #[must_use]
    pub const fn parent_ended() -> Self {
        Self::new(HaltKind::ParentEnded)
    }

    /// Creates a timeout halt reason.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(HaltKind::Timeout)
    }

    /// Creates a shutdown halt reason.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(HaltKind::Shutdown)
    }

    /// Strengthens this reason with another, keeping the more severe one.
    ///
    /// Returns `true` if the reason was changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind.severity() > self.kind.severity() {
            self.kind = other.kind;
            self.message = other.message;
            return true;
        }

        if other.kind.severity() < self.kind.severity() {
            return false;
        }

        match (self.message, other.message) {
            (None, Some(msg)) => {
                self.message = Some(msg);
                true
            }
            (Some(current), Some(candidate)) if candidate < current => {
                self.message = Some(candidate);
                true
            }
            _ => false,
        }
    }

    /// Returns true if this reason indicates runtime shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, HaltKind::Shutdown)
    }
}

impl Default for HaltReason {
    fn default() -> Self {
        Self::new(HaltKind::Requested)
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(HaltKind::Requested.severity() < HaltKind::RaceLost.severity());
        assert!(HaltKind::RaceLost.severity() < HaltKind::Timeout.severity());
        assert!(HaltKind::Timeout.severity() < HaltKind::SiblingFailed.severity());
        assert!(HaltKind::SiblingFailed.severity() < HaltKind::ParentEnded.severity());
        assert!(HaltKind::ParentEnded.severity() < HaltKind::Shutdown.severity());
    }

    #[test]
    fn strengthen_takes_more_severe() {
        let mut reason = HaltReason::new(HaltKind::Requested);
        assert!(reason.strengthen(&HaltReason::race_lost()));
        assert_eq!(reason.kind, HaltKind::RaceLost);

        assert!(reason.strengthen(&HaltReason::shutdown()));
        assert_eq!(reason.kind, HaltKind::Shutdown);

        // Less severe should not change.
        assert!(!reason.strengthen(&HaltReason::timeout()));
        assert_eq!(reason.kind, HaltKind::Shutdown);
    }

    #[test]
    fn strengthen_is_idempotent() {
        let mut reason = HaltReason::timeout();
        assert!(!reason.strengthen(&HaltReason::timeout()));
        assert_eq!(reason.kind, HaltKind::Timeout);
    }

    #[test]
    fn strengthen_same_kind_picks_deterministic_message() {
        let mut reason = HaltReason::requested("b");
        assert!(reason.strengthen(&HaltReason::requested("a")));
        assert_eq!(reason.message, Some("a"));
    }

    #[test]
    fn strengthen_resets_message_when_kind_increases() {
        let mut reason = HaltReason::requested("please stop");
        assert!(reason.strengthen(&HaltReason::shutdown()));
        assert_eq!(reason.kind, HaltKind::Shutdown);
        assert_eq!(reason.message, None);
    }
}
