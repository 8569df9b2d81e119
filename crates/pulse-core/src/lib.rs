#![forbid(unsafe_code)]

//! Observer fabric with deferred, coalesced change notification.
//!
//! Many independent subjects ([`Observable`]s) each hold a set of interested
//! parties ([`Observer`]s) and broadcast a contentless "something changed"
//! signal to them. A shared [`UpdateControl`] switches the whole fabric
//! between two modes: notifications delivered immediately as they occur, or
//! globally deferred and coalesced until updates are explicitly re-enabled.
//!
//! Two configurations are provided as sibling modules:
//!
//! - [`local`]: single-threaded, no internal locking (`Rc`/`RefCell`).
//! - [`sync`]: thread-safe, subjects may be mutated and queried concurrently
//!   from multiple threads (`Arc`/`Mutex`, lock-free enabled check).
//!
//! # Invariants
//!
//! 1. An observer is attached at most once per subject; attach and detach
//!    are idempotent.
//! 2. Dispatch operates on a snapshot of the observer set, so an observer
//!    that attaches or detaches from within its own `refresh()` affects only
//!    subsequent passes, never the one in flight.
//! 3. One observer's failure never prevents the remaining observers in the
//!    snapshot from being notified; a single aggregated [`NotifyError`]
//!    reports the pass outcome.
//! 4. A subject that notifies k times while deferral is active is replayed
//!    exactly once when updates are re-enabled.
//! 5. No lock (or `RefCell` borrow) is held while an observer's `refresh()`
//!    runs.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Observer refresh fails | Domain error in a subscriber | Recorded, pass continues, aggregated [`NotifyError`] |
//! | Observer already dropped | Subscriber outlived by its handle | Skipped as "already gone", pruned lazily |
//! | Subject dropped mid-deferral | Bulk update outlives a subject | Removed from the pending set, never replayed |
//! | Notify while disabled, not deferred | Explicit configuration | Dropped silently, nothing queued |
//!
//! [`Observable`]: local::Observable
//! [`Observer`]: local::Observer
//! [`UpdateControl`]: local::UpdateControl

pub mod error;
pub mod local;
pub mod sync;

pub use error::{NotifyError, RefreshError};
