#![forbid(unsafe_code)]

//! Single-threaded configuration: no internal locking.
//!
//! Sharing is `Rc`/`Weak`, interior mutability is `Cell`/`RefCell`. The only
//! concurrency-like concern is re-entrancy: an observer's `refresh()` may
//! attach, detach, or notify on the same subject. Dispatch therefore copies
//! the observer set first and holds no borrow across any `refresh()` call,
//! so an in-flight pass sees the pre-mutation set and later passes see the
//! mutation.
//!
//! # Invariants
//!
//! 1. An observer is stored at most once per subject (identity comparison).
//! 2. No `RefCell` borrow is held while an observer's `refresh()` runs.
//! 3. A subject that notifies k times while deferral is active is replayed
//!    exactly once on re-enable.
//! 4. Dead observer handles are skipped as "already gone" and pruned during
//!    the next snapshot.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::error::{DispatchOutcome, NotifyError, RefreshError};

/// Capability to be told that something changed.
///
/// `refresh()` resynchronizes the implementor with the subject's new state.
/// It is expected to be idempotent and may fail; the failure is recorded by
/// the dispatching subject and never re-raised individually.
pub trait Observer {
    fn refresh(&self) -> Result<(), RefreshError>;
}

/// Shared state behind an [`Observable`] handle.
struct Subject {
    /// Observers stored as weak handles, unique by allocation identity.
    observers: RefCell<Vec<Weak<dyn Observer>>>,
    control: Rc<UpdateControl>,
}

impl Subject {
    /// Snapshot live observers (pruning dead handles), release the borrow,
    /// then walk the full snapshot regardless of per-observer failures.
    fn dispatch(&self) -> DispatchOutcome {
        let snapshot: Vec<Rc<dyn Observer>> = {
            let mut observers = self.observers.borrow_mut();
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        let mut outcome = DispatchOutcome::default();
        for observer in &snapshot {
            outcome.record(observer.refresh());
        }
        outcome
    }
}

/// A subject holding a set of observers and broadcasting change
/// notifications to them.
///
/// Cloning yields another handle to the **same** subject: both handles share
/// the observer set and the bound [`UpdateControl`].
#[derive(Clone)]
pub struct Observable {
    subject: Rc<Subject>,
}

impl Observable {
    /// Create an empty subject bound to `control`.
    #[must_use]
    pub fn new(control: Rc<UpdateControl>) -> Self {
        Self {
            subject: Rc::new(Subject {
                observers: RefCell::new(Vec::new()),
                control,
            }),
        }
    }

    /// Register an observer. No-op if this exact observer is already
    /// attached; the subject holds only a weak handle and never keeps the
    /// observer alive.
    pub fn attach<O: Observer + 'static>(&self, observer: &Rc<O>) {
        let weak: Weak<dyn Observer> = Rc::<O>::downgrade(observer);
        let mut observers = self.subject.observers.borrow_mut();
        if !observers.iter().any(|entry| Weak::ptr_eq(entry, &weak)) {
            observers.push(weak);
        }
    }

    /// Remove an observer. No-op if it was never attached.
    pub fn detach<O: Observer + 'static>(&self, observer: &Rc<O>) {
        let weak: Weak<dyn Observer> = Rc::<O>::downgrade(observer);
        self.subject
            .observers
            .borrow_mut()
            .retain(|entry| !Weak::ptr_eq(entry, &weak));
    }

    /// Number of stored observer handles, dead ones included until the next
    /// dispatch prunes them.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.subject.observers.borrow().len()
    }

    /// Notify every attached observer, or queue this subject for a single
    /// coalesced replay if updates are deferred.
    ///
    /// One observer's failure does not stop the pass; after the full
    /// snapshot has been walked, a single [`NotifyError`] reports that one
    /// or more observers could not be notified. Disabled without deferral
    /// means the notification is dropped entirely.
    pub fn notify_all(&self) -> Result<(), NotifyError> {
        let control = &self.subject.control;
        if !control.updates_enabled() {
            if control.updates_deferred() {
                control.register_deferred(&self.subject);
            }
            return Ok(());
        }
        self.subject.dispatch().into_result()
    }
}

impl std::fmt::Debug for Observable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

/// Enable/defer state shared by every subject built on it.
///
/// Semantically one control per process: application code creates a single
/// instance and passes it to every [`Observable`]; tests create isolated
/// instances. Defaults to enabled, not deferred.
pub struct UpdateControl {
    enabled: Cell<bool>,
    deferred: Cell<bool>,
    /// Subjects that notified while deferral was active, unique by identity.
    pending: RefCell<Vec<Weak<Subject>>>,
}

impl Default for UpdateControl {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: Cell::new(true),
            deferred: Cell::new(false),
            pending: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn updates_enabled(&self) -> bool {
        self.enabled.get()
    }

    #[must_use]
    pub fn updates_deferred(&self) -> bool {
        self.deferred.get()
    }

    /// Stop delivering notifications. With `deferred`, subjects that notify
    /// while disabled are queued and replayed once by
    /// [`enable_updates`](Self::enable_updates); without it their
    /// notifications are dropped.
    pub fn disable_updates(&self, deferred: bool) {
        self.enabled.set(false);
        self.deferred.set(deferred);
    }

    /// Re-enable notifications, then replay exactly one pass per subject
    /// that notified while deferral was active, over each subject's
    /// *current* observer set.
    ///
    /// The pending set is drained unconditionally, so a failing subject
    /// cannot block future replays. Failures across replayed subjects are
    /// merged into a single [`NotifyError`].
    pub fn enable_updates(&self) -> Result<(), NotifyError> {
        self.enabled.set(true);
        self.deferred.set(false);

        let pending = self.pending.take();
        if pending.is_empty() {
            return Ok(());
        }

        debug!(subjects = pending.len(), "replaying deferred notifications");
        let mut outcome = DispatchOutcome::default();
        for subject in pending.iter().filter_map(Weak::upgrade) {
            outcome.merge(subject.dispatch());
        }
        debug!(
            notified = outcome.notified(),
            failed = outcome.failed(),
            "deferred replay complete"
        );
        outcome.into_result()
    }

    /// Open a scoped deferral window. See [`DeferGuard`].
    pub fn defer_scope(&self) -> DeferGuard<'_> {
        self.disable_updates(true);
        DeferGuard {
            control: self,
            finished: false,
        }
    }

    fn register_deferred(&self, subject: &Rc<Subject>) {
        let mut pending = self.pending.borrow_mut();
        // Coalescing: a subject that notifies five times while deferred is
        // replayed once, not five times.
        if !pending
            .iter()
            .any(|entry| entry.as_ptr() == Rc::as_ptr(subject))
        {
            pending.push(Rc::downgrade(subject));
            debug!(pending = pending.len(), "subject queued for deferred replay");
        }
    }
}

impl std::fmt::Debug for UpdateControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateControl")
            .field("enabled", &self.enabled.get())
            .field("deferred", &self.deferred.get())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

/// RAII guard for a scoped deferral window.
///
/// Constructing the guard (via [`UpdateControl::defer_scope`]) disables
/// updates with deferral. [`finish`](DeferGuard::finish) ends the window and
/// surfaces the replay outcome; dropping an unfinished guard ends it
/// best-effort, so an early return or panic inside a bulk update cannot
/// leave the process wedged in deferred mode.
#[must_use = "dropping the guard immediately ends the deferral window"]
pub struct DeferGuard<'c> {
    control: &'c UpdateControl,
    finished: bool,
}

impl DeferGuard<'_> {
    /// End the deferral window, replaying queued notifications.
    pub fn finish(mut self) -> Result<(), NotifyError> {
        self.finished = true;
        self.control.enable_updates()
    }
}

impl Drop for DeferGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.control.enable_updates() {
                warn!(%err, "deferred replay failed during guard drop");
            }
        }
    }
}

impl std::fmt::Debug for DeferGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferGuard")
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        refreshed: Cell<usize>,
    }

    impl Counting {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                refreshed: Cell::new(0),
            })
        }
    }

    impl Observer for Counting {
        fn refresh(&self) -> Result<(), RefreshError> {
            self.refreshed.set(self.refreshed.get() + 1);
            Ok(())
        }
    }

    struct Failing {
        message: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl Observer for Failing {
        fn refresh(&self) -> Result<(), RefreshError> {
            self.calls.set(self.calls.get() + 1);
            match self.message {
                Some(message) => Err(RefreshError::domain(message)),
                None => Err(RefreshError::Unspecified),
            }
        }
    }

    fn fixture() -> (Rc<UpdateControl>, Observable) {
        let control = Rc::new(UpdateControl::new());
        let subject = Observable::new(Rc::clone(&control));
        (control, subject)
    }

    #[test]
    fn notifies_every_observer_once() {
        let (_control, subject) = fixture();
        let a = Counting::new();
        let b = Counting::new();
        subject.attach(&a);
        subject.attach(&b);

        subject.notify_all().unwrap();
        assert_eq!(a.refreshed.get(), 1);
        assert_eq!(b.refreshed.get(), 1);
    }

    #[test]
    fn attach_is_idempotent() {
        let (_control, subject) = fixture();
        let a = Counting::new();
        subject.attach(&a);
        subject.attach(&a);
        assert_eq!(subject.observer_count(), 1);

        subject.notify_all().unwrap();
        assert_eq!(a.refreshed.get(), 1);
    }

    #[test]
    fn detach_absent_observer_is_noop() {
        let (_control, subject) = fixture();
        let a = Counting::new();
        let stranger = Counting::new();
        subject.attach(&a);
        subject.detach(&stranger);
        assert_eq!(subject.observer_count(), 1);
    }

    #[test]
    fn detached_observer_not_notified() {
        let (_control, subject) = fixture();
        let a = Counting::new();
        subject.attach(&a);
        subject.detach(&a);
        subject.notify_all().unwrap();
        assert_eq!(a.refreshed.get(), 0);
    }

    #[test]
    fn dropped_observer_skipped_and_pruned() {
        let (_control, subject) = fixture();
        let a = Counting::new();
        let b = Counting::new();
        subject.attach(&a);
        subject.attach(&b);
        drop(b);

        subject.notify_all().unwrap();
        assert_eq!(a.refreshed.get(), 1);
        assert_eq!(subject.observer_count(), 1);
    }

    #[test]
    fn failure_does_not_starve_later_observers() {
        let (_control, subject) = fixture();
        let a = Counting::new();
        let bad = Rc::new(Failing {
            message: Some("stale handle"),
            calls: Cell::new(0),
        });
        let c = Counting::new();
        subject.attach(&a);
        subject.attach(&bad);
        subject.attach(&c);

        let err = subject.notify_all().unwrap_err();
        assert_eq!(a.refreshed.get(), 1);
        assert_eq!(bad.calls.get(), 1);
        assert_eq!(c.refreshed.get(), 1);
        assert_eq!(err.failed(), 1);
        assert_eq!(err.last_message(), Some("stale handle"));
    }

    #[test]
    fn deferral_coalesces_repeated_notifications() {
        let (control, subject) = fixture();
        let a = Counting::new();
        subject.attach(&a);

        control.disable_updates(true);
        for _ in 0..5 {
            subject.notify_all().unwrap();
        }
        assert_eq!(a.refreshed.get(), 0);

        control.enable_updates().unwrap();
        assert_eq!(a.refreshed.get(), 1);
    }

    #[test]
    fn replay_uses_current_membership() {
        let (control, subject) = fixture();
        let early = Counting::new();
        subject.attach(&early);

        control.disable_updates(true);
        subject.notify_all().unwrap();

        // Membership changes between defer time and replay time.
        subject.detach(&early);
        let late = Counting::new();
        subject.attach(&late);

        control.enable_updates().unwrap();
        assert_eq!(early.refreshed.get(), 0);
        assert_eq!(late.refreshed.get(), 1);
    }

    #[test]
    fn disabled_without_deferral_drops_notifications() {
        let (control, subject) = fixture();
        let a = Counting::new();
        subject.attach(&a);

        control.disable_updates(false);
        subject.notify_all().unwrap();
        assert_eq!(a.refreshed.get(), 0);

        // Nothing was queued: re-enabling replays nothing.
        control.enable_updates().unwrap();
        assert_eq!(a.refreshed.get(), 0);
    }

    #[test]
    fn replay_failure_still_clears_pending() {
        let (control, subject) = fixture();
        let bad = Rc::new(Failing {
            message: Some("no market data"),
            calls: Cell::new(0),
        });
        subject.attach(&bad);

        control.disable_updates(true);
        subject.notify_all().unwrap();
        let err = control.enable_updates().unwrap_err();
        assert_eq!(err.last_message(), Some("no market data"));
        assert_eq!(bad.calls.get(), 1);

        // A stuck subject must not block future replays.
        control.disable_updates(true);
        control.enable_updates().unwrap();
        assert_eq!(bad.calls.get(), 1);
    }

    #[test]
    fn subject_dropped_mid_deferral_not_replayed() {
        let control = Rc::new(UpdateControl::new());
        let a = Counting::new();
        {
            let subject = Observable::new(Rc::clone(&control));
            subject.attach(&a);
            control.disable_updates(true);
            subject.notify_all().unwrap();
        }
        control.enable_updates().unwrap();
        assert_eq!(a.refreshed.get(), 0);
    }

    #[test]
    fn observer_on_two_subjects_replayed_once_per_subject() {
        let control = Rc::new(UpdateControl::new());
        let left = Observable::new(Rc::clone(&control));
        let right = Observable::new(Rc::clone(&control));
        let a = Counting::new();
        left.attach(&a);
        right.attach(&a);

        control.disable_updates(true);
        left.notify_all().unwrap();
        left.notify_all().unwrap();
        right.notify_all().unwrap();

        control.enable_updates().unwrap();
        assert_eq!(a.refreshed.get(), 2);
    }

    #[test]
    fn defer_guard_replays_on_finish() {
        let (control, subject) = fixture();
        let a = Counting::new();
        subject.attach(&a);

        let guard = control.defer_scope();
        subject.notify_all().unwrap();
        assert_eq!(a.refreshed.get(), 0);
        guard.finish().unwrap();
        assert_eq!(a.refreshed.get(), 1);
        assert!(control.updates_enabled());
    }

    #[test]
    fn defer_guard_drop_reenables() {
        let (control, subject) = fixture();
        let a = Counting::new();
        subject.attach(&a);

        {
            let _guard = control.defer_scope();
            subject.notify_all().unwrap();
            // Early exit path: guard dropped without finish().
        }
        assert!(control.updates_enabled());
        assert!(!control.updates_deferred());
        assert_eq!(a.refreshed.get(), 1);
    }

    // Observer that detaches itself from inside refresh(): the in-flight
    // pass still reaches it, later passes do not.
    struct SelfDetaching {
        subject: Observable,
        this: RefCell<Weak<SelfDetaching>>,
        refreshed: Cell<usize>,
    }

    impl Observer for SelfDetaching {
        fn refresh(&self) -> Result<(), RefreshError> {
            self.refreshed.set(self.refreshed.get() + 1);
            if let Some(me) = self.this.borrow().upgrade() {
                self.subject.detach(&me);
            }
            Ok(())
        }
    }

    #[test]
    fn self_detach_sees_inflight_pass_only() {
        let (_control, subject) = fixture();
        let observer = Rc::new(SelfDetaching {
            subject: subject.clone(),
            this: RefCell::new(Weak::new()),
            refreshed: Cell::new(0),
        });
        *observer.this.borrow_mut() = Rc::downgrade(&observer);
        subject.attach(&observer);

        subject.notify_all().unwrap();
        assert_eq!(observer.refreshed.get(), 1);

        subject.notify_all().unwrap();
        assert_eq!(observer.refreshed.get(), 1);
    }

    // Observer that re-notifies the same subject from inside refresh(),
    // bounded by a countdown so the recursion terminates.
    struct Renotifying {
        subject: Observable,
        remaining: Cell<usize>,
        refreshed: Cell<usize>,
    }

    impl Observer for Renotifying {
        fn refresh(&self) -> Result<(), RefreshError> {
            self.refreshed.set(self.refreshed.get() + 1);
            if self.remaining.get() > 0 {
                self.remaining.set(self.remaining.get() - 1);
                self.subject
                    .notify_all()
                    .map_err(|err| RefreshError::domain(err.to_string()))?;
            }
            Ok(())
        }
    }

    #[test]
    fn reentrant_notify_is_safe() {
        let (_control, subject) = fixture();
        let observer = Rc::new(Renotifying {
            subject: subject.clone(),
            remaining: Cell::new(2),
            refreshed: Cell::new(0),
        });
        subject.attach(&observer);

        subject.notify_all().unwrap();
        assert_eq!(observer.refreshed.get(), 3);
    }
}
