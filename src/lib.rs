// src/lib.rs

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod escalation;
pub mod feed;
pub mod links;
pub mod logging;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod ratelimit;
pub mod service;
pub mod sink;
pub mod store;

pub use crate::coordinator::{Decision, EnforcementCoordinator, Evaluation};
pub use crate::error::{EngineError, EngineResult};
pub use crate::matcher::{find_match, KeywordSet, MatchResult, MessageText};
pub use crate::model::{GroupConfig, GroupId, IncomingMessage, Keyword, UserId};
pub use crate::service::{AdminAction, GuardService, ServiceConfig};

use anyhow::Result;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

use config::Settings;
use sink::JsonLinesSink;
use store::{Backend, MemoryStore};

/// Service wired the way the binary runs it: stores picked at startup,
/// decisions written to stdout as JSON lines.
pub type AppService = GuardService<Backend, Backend, JsonLinesSink<tokio::io::Stdout>>;

/// Globalny kontekst aplikacji: konfiguracja + gotowy serwis.
pub struct AppContext {
    pub settings: Settings,
    pub service: Arc<AppService>,
}

impl AppContext {
    /// Bootstrap:
    /// - logi
    /// - magazyn słów kluczowych (Postgres albo plik seed / pusty)
    /// - serwis z koordynatorem
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) store
        let backend = match &settings.database.url {
            Some(url) => {
                let max = settings.database.max_connections;
                info!(max_connections = ?max, "using postgres keyword store");
                Backend::Postgres(db::PgStore::connect(url, max).await?)
            }
            None => match &settings.store.seed_file {
                Some(path) => {
                    info!(seed = %path, "using seeded in-memory keyword store");
                    Backend::Memory(MemoryStore::from_json_file(path)?)
                }
                None => {
                    info!("no database and no seed file, starting with an empty store");
                    Backend::Memory(MemoryStore::new())
                }
            },
        };

        // 3) serwis
        let service = GuardService::new(
            backend.clone(),
            backend,
            JsonLinesSink::new(tokio::io::stdout()),
            ServiceConfig::from(&settings),
        )?;

        info!(app = %settings.app.name, env = %settings.env, "bootstrap done");
        Ok(Arc::new(Self { settings, service }))
    }
}

/// Czyta zdarzenia ze stdin aż do EOF.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    let stats = feed::run(ctx.service.clone(), input).await?;
    if stats.failed > 0 {
        tracing::warn!(failed = stats.failed, "some messages could not be evaluated");
    }
    Ok(())
}
