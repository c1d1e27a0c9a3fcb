//! Process lifecycle: logging, options, daemonization, registration and the
//! dispatch loop.

use std::path::Path;
use std::sync::Arc;

use copytool_config::Options;
use copytool_core::{Coordinator, ObjectStore};
use copytool_engine::{CounterSnapshot, Dispatcher};
use copytool_events::EventBus;
use copytool_local::{LocalCoordinator, LocalObjectStore};
use copytool_telemetry::{GlobalContextGuard, LoggingConfig, init_logging, level_for_verbosity};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::Cli;
use crate::error::{AppError, AppResult};
use crate::pidfile::write_pid_file;
use crate::signals::spawn_termination_handler;

/// Coordinator, object store and event bus a copytool instance serves with.
pub struct Collaborators {
    /// HSM coordinator.
    pub coordinator: Arc<dyn Coordinator>,
    /// Backend object store.
    pub store: Arc<dyn ObjectStore>,
    /// Bus shared by the engine and the event sink.
    pub events: EventBus,
}

impl Collaborators {
    /// Local collaborators: the coordinator serves the mount from `feed`, the
    /// store lives under `store_root`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Local`] when either collaborator cannot be opened.
    pub async fn local(options: &Options, store_root: &Path, feed: &Path) -> AppResult<Self> {
        let events = EventBus::new();
        let coordinator = LocalCoordinator::open(&options.mount, feed, events.clone())
            .await
            .map_err(|source| AppError::local("coordinator.open", source))?;
        let store = LocalObjectStore::open(store_root)
            .await
            .map_err(|source| AppError::local("store.open", source))?;
        debug!(store_root = %store.root().display(), "local object store opened");
        Ok(Self {
            coordinator: Arc::new(coordinator),
            store: Arc::new(store),
            events,
        })
    }
}

/// Final state of a serving run.
#[derive(Debug)]
pub struct RunSummary {
    /// Error counts accumulated by the engine.
    pub counters: CounterSnapshot,
    /// How serving ended.
    pub result: AppResult<()>,
}

impl RunSummary {
    /// Positive errno of the failure that ended the run, zero on success.
    #[must_use]
    pub fn rc(&self) -> i32 {
        self.result.as_ref().map_or_else(AppError::exit_code, |()| 0)
    }

    fn log(&self) {
        let rc = self.rc();
        let reason = self
            .result
            .as_ref()
            .err()
            .map(ToString::to_string)
            .unwrap_or_default();
        info!(
            major = self.counters.major,
            minor = self.counters.minor,
            rc,
            reason,
            "process finished"
        );
    }
}

/// Parse-independent entry point of the binary; returns the exit status.
#[must_use]
pub fn run(cli: &Cli) -> i32 {
    let logging = LoggingConfig {
        level: level_for_verbosity(cli.verbosity().level()),
        format: cli.log_format,
        ..LoggingConfig::default()
    };
    if let Err(source) = init_logging(&logging) {
        let err = AppError::Telemetry {
            operation: "telemetry.init",
            source,
        };
        eprintln!("hsm-copytool: {err}");
        return err.exit_code();
    }

    match start(cli) {
        Ok(summary) => {
            summary.log();
            summary.rc()
        }
        Err(err) => {
            error!(error = %err, detail = ?err, "copytool failed to start");
            err.exit_code()
        }
    }
}

fn start(cli: &Cli) -> AppResult<RunSummary> {
    let options = cli
        .options()
        .map_err(|source| AppError::config("options.build", source))?;
    if options.daemonize {
        nix::unistd::daemon(true, true).map_err(|source| AppError::Daemonize { source })?;
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|source| AppError::io("runtime.build", None, source))?;
    runtime.block_on(async {
        let collaborators = Collaborators::local(&options, &cli.store_root, &cli.feed).await?;
        Ok(serve(options, collaborators, CancellationToken::new()).await)
    })
}

/// Register with the coordinator and dispatch batches until shutdown,
/// cancellation or abort.
pub async fn serve(
    options: Arc<Options>,
    collaborators: Collaborators,
    cancel: CancellationToken,
) -> RunSummary {
    let Collaborators {
        coordinator,
        store,
        events,
    } = collaborators;
    let _context = GlobalContextGuard::new(
        &options.mount.display().to_string(),
        coordinator.filesystem_name(),
    );
    info!(fuid_xattr = %options.fuid_xattr, "copytool starting");

    let dispatcher = Dispatcher::new(
        Arc::clone(&coordinator),
        store,
        Arc::clone(&options),
        events,
        cancel.clone(),
    );
    let result = serve_registered(&options, coordinator.as_ref(), &dispatcher, &cancel).await;
    RunSummary {
        counters: dispatcher.counters().snapshot(),
        result,
    }
}

async fn serve_registered(
    options: &Options,
    coordinator: &dyn Coordinator,
    dispatcher: &Dispatcher,
    cancel: &CancellationToken,
) -> AppResult<()> {
    if let Some(path) = &options.pid_file
        && let Err(err) = write_pid_file(path)
    {
        warn!(error = %err, path = %path.display(), "cannot write pid file, continuing");
    }

    if let Some(path) = &options.event_fifo {
        coordinator
            .register_event_sink(path)
            .await
            .map_err(|source| AppError::coordinator("register_event_sink", source))?;
    }

    if let Err(source) = coordinator.register(options.archive_ids.as_slice()).await {
        release_event_sink(coordinator, options).await;
        return Err(AppError::coordinator("register", source));
    }

    let signals = spawn_termination_handler(cancel.clone());
    let result = dispatcher
        .run()
        .await
        .map_err(|source| AppError::Dispatch { source });
    signals.abort();

    if let Err(err) = coordinator.unregister().await {
        warn!(error = %err, "cannot unregister copytool");
    }
    release_event_sink(coordinator, options).await;
    result
}

async fn release_event_sink(coordinator: &dyn Coordinator, options: &Options) {
    if let Some(path) = &options.event_fifo
        && let Err(err) = coordinator.unregister_event_sink(path).await
    {
        warn!(error = %err, path = %path.display(), "cannot unregister event sink");
    }
}
