use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqs_local::metrics;
use sqs_local::server;
use sqs_local::state::SqsState;

#[derive(Parser)]
#[command(name = "sqs-local", about = "Local Amazon SQS-compatible queueing service")]
struct Args {
    #[arg(long, default_value = "9324", env = "SQS_LOCAL_PORT")]
    port: u16,
    #[arg(long, default_value = "0.0.0.0", env = "SQS_LOCAL_HOST")]
    host: String,
    #[arg(long, default_value = "us-east-1", env = "SQS_LOCAL_REGION")]
    region: String,
    #[arg(long, default_value = "000000000000", env = "SQS_LOCAL_ACCOUNT_ID")]
    account_id: String,
    /// Seconds between metric snapshot log lines
    #[arg(long, default_value = "60", env = "SQS_LOCAL_METRICS_INTERVAL")]
    metrics_interval: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sqs_local=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(SqsState::new(args.account_id, args.region, args.port));
    tokio::spawn(metrics::run_reporter(
        state.clone(),
        Duration::from_secs(args.metrics_interval),
    ));

    let app = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", args.host, args.port))
        .await
        .expect("failed to bind listener");
    info!(port = args.port, "sqs-local listening");
    axum::serve(listener, app).await.expect("server error");
}
