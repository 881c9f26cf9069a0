//! Application-level job orchestration.
//!
//! This module owns the job lifecycle: the controller serializes submissions
//! and cancellation, and the poller drives one submit-and-poll run to its
//! terminal outcome. UI/CLI layers talk to it over channels and decide what
//! to do with the result (e.g. append to history).

mod controller;
mod poller;

pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use poller::{run_job, JobConfig};
