//! kuredhorn
//!
//! Watches for nodes kured is about to reboot, moves Longhorn replicas off
//! them first, and hands them back to Longhorn once the reboot is over.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kuredhorn::{
    ConnectionMode, Context, Error, FailurePolicy, KubeCluster, ReconcileMetrics, Reconciler,
    ReconcilerConfig, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// kuredhorn - evict Longhorn replicas from nodes kured is rebooting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace Longhorn is installed into
    #[arg(long, env = "LONGHORN_NAMESPACE", default_value = kuredhorn::DEFAULT_LONGHORN_NAMESPACE)]
    longhorn_namespace: String,

    /// Seconds to sleep between passes
    #[arg(long, env = "SLEEP_DURATION", default_value = "60")]
    sleep_duration: u64,

    /// Run a single pass and exit
    #[arg(long, env = "TESTING", value_parser = env_flag)]
    testing: bool,

    /// Use the local kubeconfig instead of the pod's service account
    #[arg(long, env = "NOT_IN_CLUSTER", value_parser = env_flag)]
    not_in_cluster: bool,

    /// Log planned actions without changing anything
    #[arg(long, env = "DRY_RUN", value_parser = env_flag)]
    dry_run: bool,

    /// Keep going when a single patch or delete fails
    #[arg(long, env = "CONTINUE_ON_RESOURCE_ERROR", value_parser = env_flag)]
    continue_on_resource_error: bool,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", value_parser = env_flag)]
    log_json: bool,
}

/// Boolean environment flags are on only for a case-insensitive `true`;
/// every other value, including `1` or `yes`, leaves them off.
fn env_flag(value: &str) -> std::result::Result<bool, std::convert::Infallible> {
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

impl Args {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            namespace: self.longhorn_namespace.clone(),
            poll_interval: Duration::from_secs(self.sleep_duration),
            run_once: self.testing,
            dry_run: self.dry_run,
            failure_policy: if self.continue_on_resource_error {
                FailurePolicy::SkipFailedResource
            } else {
                FailurePolicy::FailFast
            },
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = args.reconciler_config();

    info!("Starting kuredhorn");
    info!("  Version: {}", kuredhorn::VERSION);
    info!("  Longhorn namespace: {}", config.namespace);
    info!("  Poll interval: {}s", config.poll_interval.as_secs());
    info!("  testing: {}", config.run_once);
    info!("  Dry run: {}", config.dry_run);
    info!("  Failure policy: {:?}", config.failure_policy);

    let cluster = KubeCluster::connect(
        ConnectionMode::from_flag(args.not_in_cluster),
        config.namespace.clone(),
    )
    .await
    .map_err(|e| {
        error!("An error occurred while loading the Kubernetes configuration: {}", e);
        e
    })?;

    let metrics = ReconcileMetrics::new()?;

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let served = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, served).await {
            error!("Metrics server error: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        trigger.cancel();
    });

    let reconciler = Reconciler::new(Context::new(Arc::new(cluster), config, metrics));
    reconciler.run(shutdown).await?;

    info!("kuredhorn shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Shutdown
// =============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn respond(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
                _ => respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: ReconcileMetrics) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok(buffer) => {
                                let mut response = respond(StatusCode::OK, buffer);
                                response.headers_mut().insert(
                                    CONTENT_TYPE,
                                    HeaderValue::from_static(prometheus::TEXT_FORMAT),
                                );
                                response
                            }
                            Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                        },
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
