#![forbid(unsafe_code)]

//! Thread-safe observer fixtures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pulse_core::RefreshError;
use pulse_core::sync::Observer;

/// Counts successful `refresh()` deliveries. Safe to share across threads.
#[derive(Default)]
pub struct CountingObserver {
    refreshed: AtomicUsize,
}

impl CountingObserver {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `refresh()` calls received so far.
    #[must_use]
    pub fn refreshed(&self) -> usize {
        self.refreshed.load(Ordering::SeqCst)
    }
}

impl Observer for CountingObserver {
    fn refresh(&self) -> Result<(), RefreshError> {
        self.refreshed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every `refresh()` call, still counting the attempts.
pub struct FailingObserver {
    message: Option<String>,
    attempts: AtomicUsize,
}

impl FailingObserver {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: Some(message.into()),
            attempts: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn unspecified() -> Arc<Self> {
        Arc::new(Self {
            message: None,
            attempts: AtomicUsize::new(0),
        })
    }

    /// Number of `refresh()` calls attempted (all of which failed).
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Observer for FailingObserver {
    fn refresh(&self) -> Result<(), RefreshError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match &self.message {
            Some(message) => Err(RefreshError::domain(message.clone())),
            None => Err(RefreshError::Unspecified),
        }
    }
}

/// Appends a label to a shared log on every `refresh()`.
pub struct RecordingObserver {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
        Arc::new(Self {
            label,
            log: Arc::clone(log),
        })
    }
}

impl Observer for RecordingObserver {
    fn refresh(&self) -> Result<(), RefreshError> {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(self.label);
        Ok(())
    }
}
