#![forbid(unsafe_code)]

//! Thread-safe configuration: subjects may be attached, detached, and
//! notified concurrently from multiple threads, and the shared
//! [`UpdateControl`] may be flipped while notifications are in flight.
//!
//! # Locking discipline
//!
//! - Each subject guards its observer set with its own `Mutex`. The lock is
//!   released before any `refresh()` is invoked: dispatch operates on a
//!   pre-copied snapshot, so an observer that detaches itself from inside
//!   `refresh()` reacquires a free lock rather than deadlocking.
//! - The control keeps `enabled` in an `AtomicBool` for a lock-free fast
//!   path and guards `deferred`/`pending` with its own `Mutex`.
//!   [`Observable::notify_all`] double-checks: it reads `enabled` without
//!   the control lock and only takes the lock, re-checking, when the fast
//!   read suggests disablement. The common (enabled) case never touches the
//!   global lock.
//! - No lock is ever held across a `refresh()` call, including during the
//!   replay pass in [`UpdateControl::enable_updates`].
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Observer refresh fails | Recorded, pass continues, aggregated error |
//! | Observer dropped concurrently | Skipped as "already gone", pruned |
//! | Subject dropped mid-deferral | Purged from the pending set on drop |
//! | Poisoned lock | Recovered; the guarded sets stay usable |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::error::{DispatchOutcome, NotifyError, RefreshError};

/// Capability to be told that something changed, from any thread.
pub trait Observer: Send + Sync {
    fn refresh(&self) -> Result<(), RefreshError>;
}

/// Lock, recovering from poison. No invariant of the guarded sets can be
/// broken by a panicking thread: observer `refresh()` never runs under a
/// lock, so a poisoned guard only ever wraps a fully mutated set.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state behind an [`Observable`] handle.
struct Subject {
    observers: Mutex<Vec<Weak<dyn Observer>>>,
    control: Arc<UpdateControl>,
}

impl Subject {
    /// Snapshot live observers under the subject lock, drop the lock, then
    /// walk the full snapshot regardless of per-observer failures.
    fn dispatch(&self) -> DispatchOutcome {
        let snapshot: Vec<Arc<dyn Observer>> = {
            let mut observers = lock(&self.observers);
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

impl Drop for Subject {
    fn drop(&mut self) {
        // A subject destroyed while a deferral is outstanding must not
        // linger in the pending set.
        if self.control.updates_deferred() {
            self.control.unregister_deferred(self);
        }
    }
}

/// A subject holding a set of observers and broadcasting change
/// notifications to them. Safe to share across threads.
///
/// Cloning yields another handle to the **same** subject.
#[derive(Clone)]
pub struct Observable {
    subject: Arc<Subject>,
}

impl Observable {
    /// Create an empty subject bound to `control`.
    #[must_use]
    pub fn new(control: Arc<UpdateControl>) -> Self {
        Self {
            subject: Arc::new(Subject {
                observers: Mutex::new(Vec::new()),
                control,
            }),
        }
    }

    /// Register an observer. No-op if this exact observer is already
    /// attached; the subject holds only a weak handle and never keeps the
    /// observer alive.
    pub fn attach<O: Observer + 'static>(&self, observer: &Arc<O>) {
        let weak: Weak<dyn Observer> = Arc::<O>::downgrade(observer);
        let mut observers = lock(&self.subject.observers);
        if !observers.iter().any(|entry| Weak::ptr_eq(entry, &weak)) {
            observers.push(weak);
        }
    }

    /// Remove an observer. No-op if it was never attached. Safe to call
    /// while a notification is in flight; the in-flight snapshot still
    /// reaches the observer, subsequent passes do not. Deferred-replay
    /// bookkeeping is keyed by subject and replay walks the then-current
    /// observer set, so a detach during a deferral window also excludes the
    /// observer from the replay.
    pub fn detach<O: Observer + 'static>(&self, observer: &Arc<O>) {
        let weak: Weak<dyn Observer> = Arc::<O>::downgrade(observer);
        lock(&self.subject.observers).retain(|entry| !Weak::ptr_eq(entry, &weak));
    }

    /// Number of stored observer handles, dead ones included until the next
    /// dispatch prunes them.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        lock(&self.subject.observers).len()
    }

    /// Notify every attached observer, or queue this subject for a single
    /// coalesced replay if updates are deferred.
    ///
    /// Fast path: while updates are enabled the control lock is never
    /// taken. When the lock-free read suggests disablement, the decision to
    /// defer is re-checked under the control lock, so a racing
    /// `enable_updates` cannot strand a notification in the pending set.
    pub fn notify_all(&self) -> Result<(), NotifyError> {
        let control = &self.subject.control;
        if control.enabled.load(Ordering::Acquire) {
            return self.subject.dispatch().into_result();
        }

        {
            let mut state = lock(&control.state);
            if !control.enabled.load(Ordering::Acquire) {
                if state.deferred {
                    state.register(&self.subject);
                }
                // Disabled without deferral: dropped entirely.
                return Ok(());
            }
        }
        // Re-enabled between the fast check and the lock: deliver now.
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

/// State guarded by the control lock.
#[derive(Default)]
struct ControlState {
    deferred: bool,
    /// Subjects that notified while deferral was active, unique by identity.
    pending: Vec<Weak<Subject>>,
}

impl ControlState {
    fn register(&mut self, subject: &Arc<Subject>) {
        // Coalescing: repeated notifications from one subject replay once.
        if !self
            .pending
            .iter()
            .any(|entry| entry.as_ptr() == Arc::as_ptr(subject))
        {
            self.pending.push(Arc::downgrade(subject));
            debug!(pending = self.pending.len(), "subject queued for deferred replay");
        }
    }
}

/// Enable/defer state shared by every subject built on it.
///
/// Semantically one control per process: application code creates a single
/// instance and passes it to every [`Observable`]; tests create isolated
/// instances. Defaults to enabled, not deferred.
pub struct UpdateControl {
    /// Mirrors the enabled flag for the lock-free fast path in
    /// [`Observable::notify_all`]; mutated only under `state`'s lock.
    enabled: AtomicBool,
    state: Mutex<ControlState>,
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
            enabled: AtomicBool::new(true),
            state: Mutex::new(ControlState::default()),
        }
    }

    #[must_use]
    pub fn updates_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn updates_deferred(&self) -> bool {
        lock(&self.state).deferred
    }

    /// Stop delivering notifications process-wide. With `deferred`,
    /// subjects that notify while disabled are queued and replayed once by
    /// [`enable_updates`](Self::enable_updates); without it their
    /// notifications are dropped.
    pub fn disable_updates(&self, deferred: bool) {
        let mut state = lock(&self.state);
        self.enabled.store(false, Ordering::Release);
        state.deferred = deferred;
    }

    /// Re-enable notifications, then replay exactly one pass per subject
    /// that notified while deferral was active, over each subject's
    /// *current* observer set.
    ///
    /// The pending set is drained under the control lock and replayed after
    /// releasing it, so no observer `refresh()` ever runs under the lock
    /// and a failing subject cannot block future replays. Failures across
    /// replayed subjects are merged into a single [`NotifyError`].
    pub fn enable_updates(&self) -> Result<(), NotifyError> {
        let pending = {
            let mut state = lock(&self.state);
            self.enabled.store(true, Ordering::Release);
            state.deferred = false;
            std::mem::take(&mut state.pending)
        };
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

    fn unregister_deferred(&self, subject: &Subject) {
        lock(&self.state)
            .pending
            .retain(|entry| !std::ptr::eq(entry.as_ptr(), subject));
    }
}

impl std::fmt::Debug for UpdateControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("UpdateControl")
            .field("enabled", &self.enabled.load(Ordering::Acquire))
            .field("deferred", &state.deferred)
            .field("pending", &state.pending.len())
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
