use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use common_kvstore::MemoryKvClient;
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use billing_cache::cache::EntityCache;
use billing_cache::config::Config;
use billing_cache::sync::spawn_consumer;
use billing_cache::types::{
    BillableMetric, BillableMetricFilter, Charge, ChargeFilter, ChargeFilterValue, Subscription,
};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "billing cache service"
}

fn start_liveness_server(config: &Config) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index));
    let bind = format!("{}:{}", config.host, config.port);

    tokio::task::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .expect("failed to bind liveness server");
        axum::serve(listener, router)
            .await
            .expect("failed to serve liveness router");
    })
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await.expect("failed to listen for ctrl-c");
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("starting billing cache service");

    let config = Config::init_from_env()
        .context("failed to load configuration from the environment")?;

    let cache = Arc::new(EntityCache::new(Arc::new(MemoryKvClient::new())));

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;

    // The cache must be complete before traffic is served, so a failed
    // snapshot load aborts startup.
    let (metrics, metric_filters, charges, charge_filters, charge_filter_values, subscriptions) =
        tokio::try_join!(
            cache.load_billable_metrics_snapshot(&pool),
            cache.load_billable_metric_filters_snapshot(&pool),
            cache.load_charges_snapshot(&pool),
            cache.load_charge_filters_snapshot(&pool),
            cache.load_charge_filter_values_snapshot(&pool),
            cache.load_subscriptions_snapshot(&pool),
        )
        .context("initial snapshot load failed")?;
    info!(
        billable_metrics = metrics.fetched,
        billable_metric_filters = metric_filters.fetched,
        charges = charges.fetched,
        charge_filters = charge_filters.fetched,
        charge_filter_values = charge_filter_values.fetched,
        subscriptions = subscriptions.fetched,
        "initial snapshot loaded"
    );

    start_liveness_server(&config);

    let shutdown = CancellationToken::new();
    let consumers = [
        spawn_consumer::<BillableMetric>(
            cache.clone(),
            &config.kafka,
            &config.cdc_topic_prefix,
            &config.consumer_group_prefix,
            shutdown.clone(),
        )?,
        spawn_consumer::<BillableMetricFilter>(
            cache.clone(),
            &config.kafka,
            &config.cdc_topic_prefix,
            &config.consumer_group_prefix,
            shutdown.clone(),
        )?,
        spawn_consumer::<Charge>(
            cache.clone(),
            &config.kafka,
            &config.cdc_topic_prefix,
            &config.consumer_group_prefix,
            shutdown.clone(),
        )?,
        spawn_consumer::<ChargeFilter>(
            cache.clone(),
            &config.kafka,
            &config.cdc_topic_prefix,
            &config.consumer_group_prefix,
            shutdown.clone(),
        )?,
        spawn_consumer::<ChargeFilterValue>(
            cache.clone(),
            &config.kafka,
            &config.cdc_topic_prefix,
            &config.consumer_group_prefix,
            shutdown.clone(),
        )?,
        spawn_consumer::<Subscription>(
            cache.clone(),
            &config.kafka,
            &config.cdc_topic_prefix,
            &config.consumer_group_prefix,
            shutdown.clone(),
        )?,
    ];

    wait_for_shutdown_signal().await;
    info!("received shutdown signal, stopping consumers");
    shutdown.cancel();

    for consumer in consumers {
        if let Err(e) = consumer.await {
            warn!(error = %e, "consumer task did not shut down cleanly");
        }
    }

    Ok(())
}
