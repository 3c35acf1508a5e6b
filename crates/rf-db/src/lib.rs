//! rf-db: persistence for generation jobs and the result cache.
//!
//! This crate provides SQLite-backed storage with connection pooling,
//! embedded migrations, typed models, and the query modules behind the job
//! store and the cache store.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
