use anyhow::Result;
use serde::{Deserialize, Serialize};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::cache::CacheConfig;
use crate::escalation::BanPolicy;
use crate::matcher::DEFAULT_INDEX_THRESHOLD;
use crate::model::GroupConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub database: Database,
    pub store: StoreConfig,
    pub logging: Logging,
    /// Thresholds for groups without a stored policy.
    pub antispam: GroupConfig,
    pub bans: BanPolicy,
    pub matcher: MatcherConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Database {
    /// No URL → keywords come from `store.seed_file` (or nowhere).
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    /// JSON seed for the in-memory store (see `store::SeedFile`).
    pub seed_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatcherConfig {
    /// Keyword sets larger than this get a trigram index.
    pub index_threshold: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            index_threshold: DEFAULT_INDEX_THRESHOLD,
        }
    }
}

impl Settings {
    /// Built-in defaults for environment `env`.
    pub fn defaults(env: &str) -> Self {
        Self {
            env: env.to_string(),
            app: App {
                name: "Keyword Sentinel".into(),
            },
            database: Database {
                url: None,
                max_connections: Some(10),
            },
            store: StoreConfig::default(),
            logging: Logging {
                level: Some("info".into()),
            },
            antispam: GroupConfig::default(),
            bans: BanPolicy::default(),
            matcher: MatcherConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Layers: defaults -> config/<env>.toml -> KWS_* env vars.
    /// Nested keys use `__`: KWS_DATABASE__URL => database.url,
    /// KWS_BANS__BASE_SECS => bans.base_secs.
    pub fn figment(env: &str) -> Figment {
        Figment::from(Serialized::defaults(Self::defaults(env)))
            .merge(Toml::file(format!("config/{}.toml", env)))
            .merge(Env::prefixed("KWS_").ignore(&["ENV"]).split("__"))
    }

    pub fn from_figment(figment: Figment, env: &str) -> Result<Self> {
        let mut s: Settings = figment.extract()?;
        s.env = env.to_string();
        s.bans.validate()?;
        Ok(s)
    }

    pub fn load() -> Result<Self> {
        // Które środowisko?
        let env = std::env::var("KWS_ENV").unwrap_or_else(|_| "development".to_string());

        // Załaduj .env.<env> i .env (jeśli są)
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        Self::from_figment(Self::figment(&env), &env)
    }
}
