#![forbid(unsafe_code)]

//! Error taxonomy for notification dispatch.
//!
//! A failure from a single observer's `refresh()` is absorbed by the
//! dispatching subject so the remaining observers in the snapshot still get
//! notified; only an aggregated [`NotifyError`] crosses the `notify_all` /
//! `enable_updates` boundary. There is no retry at any layer.

use std::fmt;

/// Failure raised by a single observer's `refresh()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// A domain failure carrying a message worth surfacing.
    Domain(String),
    /// A failure without further structure.
    Unspecified,
}

impl RefreshError {
    /// Build a domain failure from any message.
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(message) => f.write_str(message),
            Self::Unspecified => f.write_str("unspecified failure"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Aggregated outcome of a dispatch pass in which at least one observer
/// could not be notified.
///
/// Carries the failure count and the message of the last messaged failure
/// seen during the pass. Earlier messages are discarded; consumers are
/// expected to check for any failure, not enumerate them all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError {
    failed: usize,
    last_message: Option<String>,
}

impl NotifyError {
    /// Number of observers that failed during the pass.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Message of the last [`RefreshError::Domain`] failure seen, if any
    /// failure in the pass carried one.
    #[must_use]
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last_message {
            Some(message) => {
                write!(f, "could not notify one or more observers: {message}")
            }
            None => f.write_str("could not notify one or more observers"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Running tally of a dispatch pass: an explicit fold over each observer's
/// `refresh()` result, converted to `Result<(), NotifyError>` once the full
/// snapshot has been walked.
#[derive(Debug, Default)]
pub(crate) struct DispatchOutcome {
    notified: usize,
    failed: usize,
    last_message: Option<String>,
}

impl DispatchOutcome {
    pub(crate) fn record(&mut self, result: Result<(), RefreshError>) {
        match result {
            Ok(()) => self.notified += 1,
            Err(RefreshError::Domain(message)) => {
                self.failed += 1;
                self.last_message = Some(message);
            }
            // An unstructured failure marks the pass failed but keeps any
            // previously captured message.
            Err(RefreshError::Unspecified) => self.failed += 1,
        }
    }

    /// Fold another subject's pass into this one (used by the replay pass,
    /// which walks every pending subject before reporting).
    pub(crate) fn merge(&mut self, other: DispatchOutcome) {
        self.notified += other.notified;
        self.failed += other.failed;
        if other.last_message.is_some() {
            self.last_message = other.last_message;
        }
    }

    pub(crate) fn notified(&self) -> usize {
        self.notified
    }

    pub(crate) fn failed(&self) -> usize {
        self.failed
    }

    pub(crate) fn into_result(self) -> Result<(), NotifyError> {
        if self.failed == 0 {
            Ok(())
        } else {
            Err(NotifyError {
                failed: self.failed,
                last_message: self.last_message,
            })
        }
    }
}
