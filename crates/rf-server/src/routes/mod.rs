//! Route handlers for the HTTP API.

pub mod generations;
pub mod health;
pub mod media;
