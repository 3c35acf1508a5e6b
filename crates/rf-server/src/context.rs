//! Application context shared by all request handlers.

use std::sync::Arc;

use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_db::pool::DbPool;
use rf_media::LocalObjectStore;
use rf_pipeline::GenerationService;

/// Application context shared by all request handlers (via Axum state).
///
/// This is cheaply cloneable because it only holds `Arc`s and pool handles.
#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Broadcast event bus shared with the generation service.
    pub event_bus: Arc<EventBus>,
    /// Job creation, execution, and URL refresh.
    pub service: GenerationService,
    /// Backing store for `/media`, holding the signer that verifies links.
    pub media: Arc<LocalObjectStore>,
}

impl AppContext {
    pub fn new(config: Config, service: GenerationService, media: Arc<LocalObjectStore>) -> Self {
        Self {
            db: service.db().clone(),
            event_bus: service.events().clone(),
            config: Arc::new(config),
            service,
            media,
        }
    }

    /// Build the full production context from configuration.
    pub fn from_config(config: Config, db: DbPool) -> rf_core::Result<Self> {
        let event_bus = Arc::new(EventBus::default());
        let service = GenerationService::from_config(&config, db, event_bus)?;
        let media = Arc::new(LocalObjectStore::from_config(&config.storage));
        Ok(Self::new(config, service, media))
    }
}
