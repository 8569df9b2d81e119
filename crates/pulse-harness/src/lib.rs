#![forbid(unsafe_code)]

//! Reference observer fixtures for exercising the Pulse notification
//! fabric, one submodule per configuration:
//!
//! - [`local`]: `Rc`/`Cell` fixtures for the single-threaded configuration.
//! - [`sync`]: `Arc`/atomic fixtures for the thread-safe configuration.
//!
//! The fixtures count, record, or deliberately fail their `refresh()` calls
//! so tests can assert delivery counts, ordering-independent membership,
//! and failure aggregation without writing bespoke observers each time.

pub mod local;
pub mod sync;
