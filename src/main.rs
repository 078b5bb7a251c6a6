//! Process bootstrap.
//!
//! Starts one feed controller per configured product, serves the metrics
//! and health HTTP routes, and periodically logs a demo quote per product
//! so operators can eyeball liquidity from the logs.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedbook::{Config, FeedController, MetricsSink, PrometheusSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("starting feedbook");

    let config = Arc::new(Config::load()?);
    info!(products = ?config.products, endpoint = %config.ws_endpoint, "configuration loaded");

    let registry = Arc::new(Registry::new());
    let metrics: Arc<dyn MetricsSink> = Arc::new(PrometheusSink::new(&registry)?);

    let mut controllers = Vec::new();
    for product in &config.products {
        let controller = Arc::new(FeedController::new(
            product.clone(),
            &config,
            metrics.clone(),
        ));
        controller.start()?;
        info!(product = %product, uuid = %controller.id(), "controller started");
        controllers.push(controller);
    }

    let quote_controllers = controllers.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.reset();
        loop {
            ticker.tick().await;
            for controller in &quote_controllers {
                match controller.buy_base(50.0) {
                    Ok(quote) => info!(
                        product = %controller.product(),
                        base_amount = 50.0,
                        quote_amount = quote.amount,
                        "buy base"
                    ),
                    Err(err) => warn!(
                        product = %controller.product(),
                        err = %err,
                        "error performing trade"
                    ),
                }
            }
        }
    });

    let http = tokio::spawn(serve_http(config.metrics_addr.clone(), registry));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    for controller in &controllers {
        controller.stop();
    }
    http.abort();
    Ok(())
}

/// Serve Prometheus exposition and a health probe.
async fn serve_http(addr: String, registry: Arc<Registry>) {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(registry);

    info!(addr = %addr, "starting metrics server");
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            if let Err(err) = axum::serve(listener, app).await {
                error!(err = %err, "metrics server error");
            }
        }
        Err(err) => error!(err = %err, addr = %addr, "failed to bind metrics server"),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "feedbook",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_text(State(registry): State<Arc<Registry>>) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(err = %err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
