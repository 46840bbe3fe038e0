use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
    routing::any,
};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use junction::{
    GracefulShutdown, HttpClientAdapter, HttpHandler, PostgresRepository, RedisChangeStream,
    RedisStore, ReloadCoordinator, Watcher,
    config::{ConfigValidator, loader::load_config},
    core::{plugin::builtin::register_builtins, plugin::registry::Registry, snapshot},
    ports::{http_client::HttpClient, ratelimit_store::RateLimitStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Config file path comes from the environment; CLI parsing is the
    // control plane's department.
    let config_path = std::env::var("JUNCTION_CONFIG").ok();
    let config = load_config(config_path.as_deref()).wrap_err("failed to load configuration")?;
    ConfigValidator::validate(&config)?;

    junction::tracing_setup::init_tracing(&config.log_level, config.log_format == "json")
        .map_err(|e| eyre!("failed to initialize tracing: {e}"))?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        change_channel = %config.change_channel,
        "junction gateway starting"
    );

    // Stores.
    let repo = Arc::new(
        PostgresRepository::connect(&config.database_url, 25)
            .await
            .wrap_err("failed to connect to the configuration store")?,
    );
    let ratelimit_store: Arc<dyn RateLimitStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .wrap_err("failed to connect to the rate-limit store")?,
    );

    // Plugin registry with the built-ins bound to the shared store.
    let mut registry = Registry::new();
    register_builtins(&mut registry, ratelimit_store.clone());
    let registry = Arc::new(registry);

    // Initial snapshot; the gateway refuses to start blind.
    let holder = snapshot::empty_holder();
    let coordinator = Arc::new(ReloadCoordinator::new(
        repo.clone(),
        registry.clone(),
        holder.clone(),
    ));
    let stats = coordinator
        .reload()
        .await
        .wrap_err("initial configuration load failed")?;
    tracing::info!(
        routes = stats.routes,
        services = stats.services,
        plugins = stats.plugins,
        "initial snapshot loaded"
    );

    // Watcher task: pub/sub notifications drive full reloads.
    let change_stream = Arc::new(
        RedisChangeStream::new(&config.redis_url, config.change_channel.clone())
            .wrap_err("failed to create change stream")?,
    );
    let watcher = Watcher::new(change_stream, coordinator.clone());
    tokio::spawn(async move {
        if let Err(e) = watcher.run().await {
            tracing::error!(error = %e, "configuration watcher stopped");
        }
    });

    // Dispatcher over the shared upstream pool.
    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(&config.transport)
            .wrap_err("failed to create upstream HTTP client")?,
    );
    let handler = Arc::new(HttpHandler::new(
        holder,
        http_client,
        repo.clone(),
        ratelimit_store,
    ));

    // Signal handling.
    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_shutdown.run_signal_handler().await {
            tracing::error!(error = %e, "signal handler error");
        }
    });

    let make_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    Ok::<Response<Body>, std::convert::Infallible>(
                        handler.handle(req, Some(client_addr)).await,
                    )
                }
            },
        )
    };

    let app = Router::new()
        .route("/{*path}", make_route(handler.clone()))
        .route("/", make_route(handler.clone()));

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .wrap_err("failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err("failed to bind listen address")?;

    tracing::info!(%addr, "junction gateway listening");

    // Stop accepting on the first signal; in-flight requests get the
    // configured drain period before the process exits anyway.
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = graceful_shutdown.clone();
        async move {
            shutdown.wait().await;
        }
    });

    let drain_deadline = async {
        graceful_shutdown.wait().await;
        tokio::time::sleep(config.shutdown_timeout()).await;
    };

    tokio::select! {
        result = serve => result.wrap_err("server error")?,
        _ = drain_deadline => {
            tracing::warn!("drain period elapsed with requests still in flight, exiting");
        }
    }

    tracing::info!("junction gateway stopped");
    Ok(())
}
