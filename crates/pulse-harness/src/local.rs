#![forbid(unsafe_code)]

//! Single-threaded observer fixtures.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pulse_core::RefreshError;
use pulse_core::local::Observer;

/// Counts successful `refresh()` deliveries.
#[derive(Default)]
pub struct CountingObserver {
    refreshed: Cell<usize>,
}

impl CountingObserver {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of `refresh()` calls received so far.
    #[must_use]
    pub fn refreshed(&self) -> usize {
        self.refreshed.get()
    }
}

impl Observer for CountingObserver {
    fn refresh(&self) -> Result<(), RefreshError> {
        self.refreshed.set(self.refreshed.get() + 1);
        Ok(())
    }
}

/// Fails every `refresh()` call, still counting the attempts.
///
/// With a message the failure is [`RefreshError::Domain`]; without one it is
/// [`RefreshError::Unspecified`] (a failure with no structure to report).
pub struct FailingObserver {
    message: Option<String>,
    attempts: Cell<usize>,
}

impl FailingObserver {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            message: Some(message.into()),
            attempts: Cell::new(0),
        })
    }

    #[must_use]
    pub fn unspecified() -> Rc<Self> {
        Rc::new(Self {
            message: None,
            attempts: Cell::new(0),
        })
    }

    /// Number of `refresh()` calls attempted (all of which failed).
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.get()
    }
}

impl Observer for FailingObserver {
    fn refresh(&self) -> Result<(), RefreshError> {
        self.attempts.set(self.attempts.get() + 1);
        match &self.message {
            Some(message) => Err(RefreshError::domain(message.clone())),
            None => Err(RefreshError::Unspecified),
        }
    }
}

/// Appends a label to a shared log on every `refresh()`, for asserting which
/// observers a pass reached.
pub struct RecordingObserver {
    label: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new(label: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Self> {
        Rc::new(Self {
            label,
            log: Rc::clone(log),
        })
    }
}

impl Observer for RecordingObserver {
    fn refresh(&self) -> Result<(), RefreshError> {
        self.log.borrow_mut().push(self.label);
        Ok(())
    }
}
