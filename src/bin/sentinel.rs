use anyhow::Result;
use keyword_sentinel::{config::Settings, run, AppContext};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings).await?;
    run(ctx).await
}
