use std::sync::Arc;

use webhook_replay::{
    api,
    config::AppConfig,
    db::{memory::MemoryStore, pg::PgStore, ReplayStore},
    replay::{clock::SystemClock, executor::AttemptExecutor, runner::ReplayRunner},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_replay=info".into()),
        )
        .init();

    let config = AppConfig::from_env().map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;

    let store: Arc<dyn ReplayStore> = match &config.database_url {
        Some(database_url) => {
            let store = PgStore::connect(database_url).await?;
            store.run_migrations().await?;
            tracing::info!("using postgres storage");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, captured events will not survive a restart");
            Arc::new(MemoryStore::default())
        }
    };

    let executor = AttemptExecutor::new(reqwest::Client::builder().build()?, config.replay_timeout);
    let runner = ReplayRunner::new(
        Arc::clone(&store),
        executor,
        Arc::new(SystemClock),
        config.backoff,
        config.max_concurrent_runs,
    );

    let app = api::router(
        api::AppState {
            store,
            runner,
            public_api_base: config.public_api_base.clone(),
            auto_run: config.auto_run,
        },
        config.max_webhook_size_bytes,
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        addr = %config.bind_addr,
        public_api_base = %config.public_api_base,
        backoff = config.backoff.as_str(),
        "server listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
