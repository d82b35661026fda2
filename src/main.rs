use std::{process, sync::Arc};

use precache::{
    application::error::AppError,
    cache::{
        CacheConfig, CacheStorage, DiskStorage, Fetcher, MemoryStorage, Registration,
        ResourceCacheManager,
    },
    config::{self, StorageKind},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        origin::OriginFetcher,
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Install(args) => run_install(settings, args).await,
        config::Command::Buckets(_) => run_buckets(settings).await,
    }
}

fn build_storage(settings: &config::CacheSettings) -> Arc<dyn CacheStorage> {
    match settings.storage {
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
        StorageKind::Disk => Arc::new(DiskStorage::new(settings.directory.clone())),
    }
}

fn build_fetcher(settings: &config::OriginSettings) -> Result<Arc<dyn Fetcher>, AppError> {
    let user_agent = settings
        .user_agent
        .as_deref()
        .unwrap_or(OriginFetcher::default_user_agent());
    Ok(Arc::new(OriginFetcher::new(user_agent)?))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let storage = build_storage(&settings.cache);
    let fetcher = build_fetcher(&settings.origin)?;
    let registration = Arc::new(Registration::new());

    let manager = ResourceCacheManager::new(
        CacheConfig::from(&settings),
        storage.clone(),
        fetcher.clone(),
    );

    match registration.register(manager).await {
        Ok(report) => info!(
            target = "precache::serve",
            bucket = %report.install.bucket,
            entries = report.install.entries,
            evicted = report.activation.evicted.len(),
            "cache controlling"
        ),
        // Without a controller every request is forwarded to the origin.
        Err(err) => warn!(
            target = "precache::serve",
            error = %err,
            "cache registration failed; serving without a cache"
        ),
    }

    let state = HttpState {
        registration,
        storage,
        fetcher,
        origin: settings.origin.url.clone(),
        max_body_bytes: settings.server.max_body_bytes.get(),
    };
    serve_http(&settings, state).await
}

async fn run_install(
    settings: config::Settings,
    args: config::InstallArgs,
) -> Result<(), AppError> {
    let storage = build_storage(&settings.cache);
    let fetcher = build_fetcher(&settings.origin)?;
    let manager = ResourceCacheManager::new(CacheConfig::from(&settings), storage, fetcher);

    let report = manager.install().await?;
    info!(
        target = "precache::install",
        bucket = %report.bucket,
        entries = report.entries,
        "bucket installed"
    );

    if args.activate {
        let activation = manager.activate().await?;
        info!(
            target = "precache::install",
            bucket = %activation.bucket,
            evicted = ?activation.evicted,
            failed = ?activation.failed,
            "bucket activated"
        );
        if !activation.failed.is_empty() {
            warn!(
                target = "precache::install",
                failed = activation.failed.len(),
                "some stale buckets could not be evicted"
            );
        }
    }

    Ok(())
}

async fn run_buckets(settings: config::Settings) -> Result<(), AppError> {
    let storage = build_storage(&settings.cache);
    let current = CacheConfig::from(&settings).bucket_name();

    let names = storage.bucket_names().await?;
    if names.is_empty() {
        info!(target = "precache::buckets", "no buckets in storage");
    }
    for name in names {
        info!(
            target = "precache::buckets",
            bucket = %name,
            current = name == current,
            "bucket"
        );
    }
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "precache::serve",
        addr = %settings.server.addr,
        origin = %settings.origin.url,
        "listening"
    );

    let shutdown = Arc::new(Notify::new());
    let trigger = Arc::clone(&shutdown);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            wait_for_signal().await;
            trigger.notify_one();
        },
    );

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        shutdown.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| InfraError::server(err.to_string()))?;
        }
        () = deadline => {
            warn!(
                target = "precache::serve",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(target = "precache::serve", "shutdown requested"),
        Err(err) => {
            warn!(
                target = "precache::serve",
                error = %err,
                "failed to listen for shutdown signal"
            );
            std::future::pending::<()>().await;
        }
    }
}
