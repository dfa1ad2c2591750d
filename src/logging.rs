use crate::config::Settings;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Inicjalizacja logowania.
/// RUST_LOG ma pierwszeństwo przed `logging.level`. Logi idą na stderr,
/// bo stdout jest zarezerwowany na strumień decyzji.
pub fn init(settings: &Settings) {
    let level = settings
        .logging
        .level
        .clone()
        .unwrap_or_else(|| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer().with_writer(std::io::stderr);

    // try_init: drugi bootstrap (np. w testach) nie panikuje
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
