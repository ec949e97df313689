//! Job execution engine.
//!
//! [`runner::JobRunner`] schedules jobs onto a bounded number of encode
//! slots, [`pipeline`] performs the download / join / render steps, and
//! [`downloader`] fetches remote inputs.

pub mod downloader;
pub mod pipeline;
pub mod runner;

pub use pipeline::JobInputs;
pub use runner::JobRunner;
