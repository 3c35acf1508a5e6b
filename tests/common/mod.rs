//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires a [`GenerationService`] over stubbed
//! external services, an in-memory database, and a temporary object store,
//! plus the [`AppContext`] and router built on top of it.

#![allow(dead_code)]

use std::sync::Arc;

use rf_core::config::Config;
use rf_core::JobId;
use rf_db::models::GenerationJob;
use rf_db::pool::{get_conn, init_memory_pool, DbPool, PooledConnection};
use rf_pipeline::testing::{fast_policy, stub_service, test_store, Stubs};
use rf_pipeline::{GenerationContext, GenerationRequest, GenerationService, PollPolicy};
use rf_server::context::AppContext;

pub const NFT_ID: &str = "nft-1";
pub const WALLET: &str = "Wallet1";
pub const PROMPT: &str = "infiltrate the tower";

/// Test harness over stubbed services and an in-memory database.
pub struct TestHarness {
    pub stubs: Stubs,
    pub service: GenerationService,
    pub db: DbPool,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Everything succeeds and the video finishes on the first poll.
    pub fn new() -> Self {
        Self::with_stubs(Stubs::happy(NFT_ID, WALLET))
    }

    pub fn with_stubs(stubs: Stubs) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        Self::with_db(stubs, db, fast_policy())
    }

    /// A harness sharing `db` with another one, e.g. to reuse its cache.
    pub fn with_db(stubs: Stubs, db: DbPool, policy: PollPolicy) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let service = stub_service(&stubs, dir.path(), db.clone(), policy);
        Self {
            stubs,
            service,
            db,
            dir,
        }
    }

    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get connection")
    }

    pub fn job(&self, id: JobId) -> GenerationJob {
        rf_db::queries::jobs::require_job(&self.conn(), id).expect("job should exist")
    }

    /// Server context over this harness's service and store.
    pub fn app_context(&self) -> AppContext {
        let media = Arc::new(test_store(self.dir.path()));
        AppContext::new(Config::default(), self.service.clone(), media)
    }

    pub fn router(&self) -> axum::Router {
        rf_server::router::build_router(self.app_context())
    }
}

/// The canonical request used across scenarios.
pub fn request() -> GenerationRequest {
    request_with(serde_json::Value::Null)
}

pub fn request_with(options: serde_json::Value) -> GenerationRequest {
    GenerationRequest {
        nft_id: NFT_ID.into(),
        user_prompt: PROMPT.into(),
        wallet_address: WALLET.into(),
        options,
    }
}

/// Initial pipeline context for a fresh job id.
pub fn context_for(req: &GenerationRequest) -> GenerationContext {
    GenerationContext::from_request(Some(JobId::new()), req).expect("valid request")
}
