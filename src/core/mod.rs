//! Core types shared across the updater.
//!
//! This module hosts the error taxonomy used by the update state machine and
//! the HTTP surface. Every failure a run can produce maps onto one
//! [`UpdateError`] variant, which in turn determines whether the run aborts
//! cleanly or triggers a rollback.

pub mod error;

pub use error::UpdateError;
