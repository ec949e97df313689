//! Domain types and media helpers for the vidgen service.
//!
//! Everything in this crate is free of HTTP concerns so the API crate and
//! tests can share the job model, input-source rules, and the ffmpeg
//! command builders.

pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod source;
pub mod types;
