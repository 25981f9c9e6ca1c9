use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use orgmapper_core::config::{ControllerConfig, LogFormat};
use orgmapper_core::paths::tenants_root;
use orgmapper_core::types::{ResourceKey, Tenant, TenantParameters};
use orgmapper_core::FileStore;
use orgmapper_grafana::{Credentials, GrafanaClient};

use crate::engine::TenantEngine;
use crate::error::{io_err, ControllerError, ReconcileError};
use crate::reconciler::{reconcile_tenant, ReconcileOutcome};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Counts for one pass over the tenant set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub tenants: usize,
    pub created: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub finalized: usize,
    /// Records that disappeared from the store without a deletion marker.
    pub vanished: usize,
    pub failed: usize,
    /// Skipped because the tenant is backing off after a failure.
    pub deferred: usize,
    pub duration_ms: u128,
}

impl CycleSummary {
    fn record(&mut self, result: &Result<ReconcileOutcome, ReconcileError>) {
        match result {
            Ok(ReconcileOutcome::Created) => self.created += 1,
            Ok(ReconcileOutcome::Updated) => self.updated += 1,
            Ok(ReconcileOutcome::UpToDate) => self.up_to_date += 1,
            Ok(ReconcileOutcome::Finalized) => self.finalized += 1,
            Ok(ReconcileOutcome::Gone) => {}
            Err(_) => self.failed += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Install the global subscriber on stderr. `RUST_LOG` wins over the `info`
/// default.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
}

/// Build the Grafana client described by `config`, reading credentials from
/// the process environment or the configured file.
pub fn grafana_client(config: &ControllerConfig) -> Result<GrafanaClient, ControllerError> {
    let raw = config.read_credentials(|name| std::env::var(name).ok())?;
    let client = GrafanaClient::new(
        config.grafana_url()?,
        Credentials::parse(&raw),
        config.request_timeout(),
    )?;
    Ok(client)
}

/// Start the controller and block the current thread until it exits.
pub fn start_blocking(home: &Path, config: ControllerConfig) -> Result<(), ControllerError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the controller against the file store under `home` until ctrl-c.
pub async fn run(home: PathBuf, config: ControllerConfig) -> Result<(), ControllerError> {
    let sso = Arc::new(grafana_client(&config)?);
    let store = Arc::new(FileStore::at(&home));
    let engine = Arc::new(TenantEngine::new(store, sso));
    let controller = Arc::new(Controller::new(engine, config.max_concurrent_reconciles()));
    tracing::info!(
        home = %home.display(),
        poll_interval_secs = config.poll_interval().as_secs(),
        max_concurrent = config.max_concurrent_reconciles(),
        "controller starting",
    );
    serve(home, controller, config.poll_interval()).await
}

/// One sequential pass over every tenant. Failures are counted, not returned;
/// only a failure to list the store aborts the pass.
pub fn run_once(engine: &TenantEngine) -> Result<CycleSummary, ReconcileError> {
    let started = std::time::Instant::now();
    let tenants = engine.store().list()?;
    let mut summary = CycleSummary {
        tenants: tenants.len(),
        ..Default::default()
    };
    for tenant in tenants {
        let key = tenant.key();
        let result = reconcile_tenant(engine, &key);
        if let Err(err) = &result {
            tracing::debug!(tenant = %key, error = %err, "tenant failed in single pass");
        }
        summary.record(&result);
    }
    summary.duration_ms = started.elapsed().as_millis();
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    retry_at: Instant,
}

/// Delay before retrying after `failures` consecutive failures.
pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    BACKOFF_BASE.saturating_mul(1 << exponent).min(BACKOFF_MAX)
}

/// The parts of a record that warrant a reconcile when they change.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    kind: String,
    spec: TenantParameters,
    deleting: bool,
}

impl Fingerprint {
    fn of(tenant: &Tenant) -> Self {
        Self {
            kind: tenant.kind.clone(),
            spec: tenant.spec.clone(),
            deleting: tenant.is_deleting(),
        }
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    /// Created tenants as of their last reconcile, for vanish detection.
    last_seen: BTreeMap<ResourceKey, Tenant>,
    fingerprints: HashMap<ResourceKey, Fingerprint>,
    backoff: HashMap<ResourceKey, Backoff>,
}

/// Long-running reconciler: bounded concurrency, per-tenant backoff and
/// cleanup of tenants whose records vanish.
pub struct Controller {
    engine: Arc<TenantEngine>,
    limiter: Arc<Semaphore>,
    state: Mutex<ControllerState>,
}

impl Controller {
    pub fn new(engine: Arc<TenantEngine>, max_concurrent: usize) -> Self {
        Self {
            engine,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            state: Mutex::new(ControllerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reconcile every tenant not backing off, and drop vanished tenants from
    /// the mapping.
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleSummary, ControllerError> {
        let started = Instant::now();
        let engine = Arc::clone(&self.engine);
        let tenants = tokio::task::spawn_blocking(move || engine.store().list())
            .await
            .map_err(|e| task_err("list", e))?
            .map_err(ReconcileError::from)?;

        let mut summary = CycleSummary {
            tenants: tenants.len(),
            ..Default::default()
        };

        let present: HashSet<ResourceKey> = tenants.iter().map(Tenant::key).collect();
        let vanished: Vec<Tenant> = {
            let mut state = self.lock();
            let keys: Vec<ResourceKey> = state
                .last_seen
                .keys()
                .filter(|key| !present.contains(*key))
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| {
                    state.fingerprints.remove(key);
                    state.backoff.remove(key);
                    state.last_seen.remove(key)
                })
                .collect()
        };
        for tenant in vanished {
            match self.delete_vanished(tenant).await {
                Ok(()) => summary.vanished += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(error = %err, "cannot drop vanished tenant");
                }
            }
        }

        let now = Instant::now();
        let mut tasks = JoinSet::new();
        for tenant in tenants {
            if self.backing_off(&tenant.key(), now) {
                summary.deferred += 1;
                continue;
            }
            let this = Arc::clone(self);
            tasks.spawn(async move { this.reconcile_one(tenant).await });
        }
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| task_err("reconcile", e))??;
            summary.record(&result);
        }

        summary.duration_ms = started.elapsed().as_millis();
        Ok(summary)
    }

    /// React to a change of one record. Status-only writes, including the
    /// controller's own, are ignored.
    pub async fn reconcile_key(
        self: &Arc<Self>,
        key: ResourceKey,
    ) -> Result<Option<ReconcileOutcome>, ControllerError> {
        let engine = Arc::clone(&self.engine);
        let lookup = key.clone();
        let current = tokio::task::spawn_blocking(move || engine.store().get(&lookup))
            .await
            .map_err(|e| task_err("get", e))?
            .map_err(ReconcileError::from)?;

        let Some(tenant) = current else {
            let last = {
                let mut state = self.lock();
                state.fingerprints.remove(&key);
                state.backoff.remove(&key);
                state.last_seen.remove(&key)
            };
            if let Some(last) = last {
                self.delete_vanished(last).await?;
            }
            return Ok(Some(ReconcileOutcome::Gone));
        };

        {
            let mut state = self.lock();
            if state.fingerprints.get(&key) == Some(&Fingerprint::of(&tenant)) {
                tracing::debug!(tenant = %key, "status-only change, skipping");
                return Ok(None);
            }
            state.backoff.remove(&key);
        }

        let result = Arc::clone(self).reconcile_one(tenant).await?;
        Ok(result.ok())
    }

    fn backing_off(&self, key: &ResourceKey, now: Instant) -> bool {
        self.lock()
            .backoff
            .get(key)
            .map(|b| now < b.retry_at)
            .unwrap_or(false)
    }

    async fn reconcile_one(
        self: Arc<Self>,
        tenant: Tenant,
    ) -> Result<Result<ReconcileOutcome, ReconcileError>, ControllerError> {
        let permit = Arc::clone(&self.limiter)
            .acquire_owned()
            .await
            .map_err(|_| ControllerError::ChannelClosed("reconcile limiter"))?;
        let engine = Arc::clone(&self.engine);
        let key = tenant.key();
        let (result, snapshot) = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = reconcile_tenant(&engine, &key);
            let snapshot = engine.store().get(&key).ok().flatten();
            (result, snapshot)
        })
        .await
        .map_err(|e| task_err("reconcile", e))?;

        self.settle(&tenant, &result, snapshot);
        Ok(result)
    }

    fn settle(
        &self,
        attempted: &Tenant,
        result: &Result<ReconcileOutcome, ReconcileError>,
        snapshot: Option<Tenant>,
    ) {
        let key = attempted.key();
        let mut state = self.lock();

        match result {
            Ok(ReconcileOutcome::Finalized | ReconcileOutcome::Gone) => {
                state.fingerprints.remove(&key);
                state.backoff.remove(&key);
            }
            Ok(outcome) => {
                state
                    .fingerprints
                    .insert(key.clone(), Fingerprint::of(attempted));
                state.backoff.remove(&key);
                tracing::debug!(tenant = %key, ?outcome, "reconciled");
            }
            Err(err) => {
                state
                    .fingerprints
                    .insert(key.clone(), Fingerprint::of(attempted));
                let failures = state.backoff.get(&key).map(|b| b.failures).unwrap_or(0) + 1;
                let delay = backoff_delay(failures);
                state.backoff.insert(
                    key.clone(),
                    Backoff {
                        failures,
                        retry_at: Instant::now() + delay,
                    },
                );
                tracing::warn!(
                    tenant = %key,
                    failures,
                    retry_in_secs = delay.as_secs(),
                    error = %err,
                    "reconcile failed, backing off",
                );
            }
        }

        match snapshot {
            Some(tenant) if tenant.external_name().is_some() && !tenant.is_deleting() => {
                state.last_seen.insert(key, tenant);
            }
            _ => {
                state.last_seen.remove(&key);
            }
        }
    }

    async fn delete_vanished(&self, tenant: Tenant) -> Result<(), ControllerError> {
        tracing::info!(
            tenant = %tenant.key(),
            tenant_id = %tenant.spec.tenant_id,
            "tenant record vanished, removing it from orgMapping",
        );
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.delete(&tenant))
            .await
            .map_err(|e| task_err("delete", e))??;
        Ok(())
    }
}

fn task_err(task: &'static str, err: tokio::task::JoinError) -> ControllerError {
    ControllerError::Task {
        task,
        reason: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Job {
    Cycle,
    Tenant(ResourceKey),
}

/// Run poller, watcher and processor until ctrl-c or a task fails.
pub async fn serve(
    home: PathBuf,
    controller: Arc<Controller>,
    poll_interval: Duration,
) -> Result<(), ControllerError> {
    let (job_tx, job_rx) = mpsc::channel::<Job>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let poller_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = poller_task(poll_interval, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(home, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = processor_task(controller, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down controller");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(ControllerError::Task {
                            task: "signal_handler",
                            reason: err.to_string(),
                        }),
                    }
                }
            }
        })
    };

    let (poller_result, watcher_result, processor_result, signal_result) =
        tokio::join!(poller_handle, watcher_handle, processor_handle, signal_handle);

    handle_join("poller", poller_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("processor", processor_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn poller_task(
    poll_interval: Duration,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControllerError> {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match job_tx.try_send(Job::Cycle) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("processor busy, skipping poll tick");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        return Err(ControllerError::ChannelClosed("job queue"));
                    }
                }
            }
        }
    }
    Ok(())
}

async fn processor_task(
    controller: Arc<Controller>,
    mut job_rx: mpsc::Receiver<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControllerError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                match job {
                    Job::Cycle => match controller.run_cycle().await {
                        Ok(summary) => tracing::info!(
                            tenants = summary.tenants,
                            created = summary.created,
                            updated = summary.updated,
                            up_to_date = summary.up_to_date,
                            finalized = summary.finalized,
                            vanished = summary.vanished,
                            failed = summary.failed,
                            deferred = summary.deferred,
                            duration_ms = summary.duration_ms,
                            "reconcile cycle completed",
                        ),
                        Err(err) => tracing::error!(error = %err, "reconcile cycle failed"),
                    },
                    Job::Tenant(key) => match controller.reconcile_key(key.clone()).await {
                        Ok(Some(outcome)) => {
                            tracing::info!(tenant = %key, ?outcome, "watcher-triggered reconcile");
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::error!(tenant = %key, error = %err, "watcher-triggered reconcile failed");
                        }
                    },
                }
            }
        }
    }
    Ok(())
}

async fn watcher_task(
    home: PathBuf,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControllerError> {
    let root = tenants_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    // Canonicalize so that FSEvents paths (which arrive as real paths, e.g.
    // /private/var/... on macOS) match the `starts_with` checks below.
    let root = fs::canonicalize(&root).unwrap_or(root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let mut watched_dirs = HashSet::new();
    register_tree(&mut watcher, &mut watched_dirs, &root)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if path.is_dir() && path.starts_with(&root) {
                        register_tree(&mut watcher, &mut watched_dirs, &path)?;
                        continue;
                    }

                    let Some(key) = key_for_path(&path, &root) else {
                        continue;
                    };
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    if job_tx.send(Job::Tenant(key)).await.is_err() {
                        return Err(ControllerError::ChannelClosed("job queue"));
                    }
                }
            }
        }
    }

    Ok(())
}

fn register_tree(
    watcher: &mut RecommendedWatcher,
    watched_dirs: &mut HashSet<PathBuf>,
    root: &Path,
) -> Result<(), ControllerError> {
    for dir in collect_dirs(root)? {
        let canonical = match fs::canonicalize(&dir) {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };
        if watched_dirs.insert(canonical.clone()) {
            watcher.watch(&canonical, RecursiveMode::NonRecursive)?;
            tracing::debug!(path = %canonical.display(), "watching tenant directory");
        }
    }
    Ok(())
}

fn collect_dirs(root: &Path) -> Result<Vec<PathBuf>, ControllerError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut cursor = 0;
    while cursor < dirs.len() {
        let current = dirs[cursor].clone();
        cursor += 1;
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&current, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if ty.is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    Ok(dirs)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// `<root>/<namespace>/<name>.yaml` → key. Temp files and anything at
/// another depth are ignored.
fn key_for_path(path: &Path, root: &Path) -> Option<ResourceKey> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    let [namespace, file] = parts.as_slice() else {
        return None;
    };
    let name = file.strip_suffix(".yaml")?;
    if name.is_empty() {
        return None;
    }
    Some(ResourceKey::new(*namespace, name))
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(task_err(task, err)),
    }
}
