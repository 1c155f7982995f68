use clap::Parser;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

use labwatch::config::Config;
use labwatch::dedup::Deduplicator;
use labwatch::matching::{MatchEngine, PgMatchRepository};
use labwatch::parser::SlotParser;
use labwatch::scheduler::Scheduler;
use labwatch::services::manager::ServiceManager;
use labwatch::services::pipeline::PipelineService;
use labwatch::signals::handle_shutdown_signals;
use labwatch::sink::{self, LoggingSink};
use labwatch::slots::SlotFetcher;
use labwatch::sources::SourceRegistry;
use labwatch::{cli::Args, http, logging};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config: Config = Figment::new()
        .merge(Env::raw().map(|k| {
            if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                "SHUTDOWN_TIMEOUT".into()
            } else {
                k.into()
            }
        }))
        .extract()
        .expect("Failed to load config");

    logging::setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting labwatch"
    );

    let is_private = config.database_url.contains("railway.internal");
    let slow_threshold = std::time::Duration::from_millis(if is_private { 200 } else { 500 });

    let db_pool = PgPoolOptions::new()
        .min_connections(0)
        .max_connections(config.database_max_connections)
        .acquire_slow_threshold(slow_threshold)
        .acquire_timeout(std::time::Duration::from_secs(4))
        .idle_timeout(std::time::Duration::from_secs(60 * 2))
        .max_lifetime(std::time::Duration::from_secs(60 * 30))
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    info!(
        is_private,
        slow_threshold = format!("{:.2?}", slow_threshold),
        "database pool established"
    );

    info!("running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");
    info!("database migrations completed");

    let redis_client = redis::Client::open(config.redis_url.clone())
        .expect("invalid redis url");
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .expect("failed to connect to redis");

    let client = http::build_client(&config.http).expect("failed to build http client");

    let registry = Arc::new(SourceRegistry::new(
        client.clone(),
        config.sources.sources_ids_provider.clone(),
    ));
    let fetcher = Arc::new(SlotFetcher::new(client, config.sources.slots_source.clone()));
    let parser = Arc::new(SlotParser::new(&config.parser).expect("invalid parser config"));

    let match_repository = Arc::new(PgMatchRepository::new(db_pool.clone()));
    let match_engine = Arc::new(MatchEngine::new(match_repository));

    let deduplicator = Arc::new(tokio::sync::Mutex::new(Deduplicator::new(
        redis_conn,
        config.deduplicator.clone(),
    )));

    let sink: Arc<dyn sink::NotificationSink> = Arc::new(LoggingSink);

    let scheduler = Arc::new(Scheduler::new(
        registry,
        fetcher,
        parser,
        match_engine,
        deduplicator,
        sink,
        config.sources.max_concurrency,
        config.scheduler.clone(),
    ));

    let pipeline_service = Box::new(PipelineService::new(scheduler));

    let mut service_manager = ServiceManager::new();
    service_manager.register_service("pipeline", pipeline_service);
    service_manager.spawn_all();

    handle_shutdown_signals(service_manager, config.shutdown_timeout).await
}
