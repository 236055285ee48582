use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use routeserver_service::config::Config;
use routeserver_service::events::LoggingEventSink;
use routeserver_service::metric;
use routeserver_service::services::SharedServices;

use crate::endpoints;

/// Starts the background task pool and the HTTP server based on loaded config.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let task_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("routeserver-tasks")
        .worker_threads(config.tasks.worker_threads)
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("routeserver-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let socket = config.bind.parse::<SocketAddr>()?;
    let services = SharedServices::new(
        config,
        task_pool.handle().to_owned(),
        Arc::new(LoggingEventSink),
    )
    .context("failed to create services")?;

    let server = axum_server::bind(socket).serve(endpoints::create_app(services).into_make_service());
    tracing::info!("Starting HTTP server on {}", socket);

    web_pool.block_on(server)?;
    tracing::info!("System shutdown complete");

    Ok(())
}
