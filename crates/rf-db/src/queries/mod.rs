//! Database query modules.

pub mod cache;
pub mod jobs;
