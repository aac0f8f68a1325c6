use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use tandem_core::config::{ensure_root_at, load_with_env_at};
use tandem_sync::{CycleSummary, Orchestrator, Phase};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_STATUS, CMD_STOP, CMD_SYNC};

/// What the daemon reports over `status`.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonState {
    pub started_at_unix: u64,
    pub poll_interval_secs: u64,
    #[serde(flatten)]
    pub phase: Phase,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub last_cycle: Option<CycleSummary>,
    pub last_error: Option<String>,
}

impl DaemonState {
    fn new(poll_interval: Duration) -> Self {
        Self {
            started_at_unix: unix_seconds_now(),
            poll_interval_secs: poll_interval.as_secs(),
            phase: Phase::FirstRun,
            cycles: 0,
            failed_cycles: 0,
            last_cycle: None,
            last_error: None,
        }
    }
}

type SharedState = Arc<RwLock<DaemonState>>;
type SharedOrchestrator = Arc<Mutex<Orchestrator>>;

struct CycleJob {
    source: &'static str,
    respond_to: oneshot::Sender<Result<CycleSummary, String>>,
}

/// Start the daemon runtime and block the current thread until it exits.
///
/// Configuration problems are fatal here, before any task starts.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load config from `home` and run the daemon over the configured stores.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = load_with_env_at(&home)?;
    let orchestrator = Orchestrator::from_config(&config, &home);
    tracing::info!(
        documents = %config.documents.path.display(),
        tracker = %config.tracker.path.display(),
        poll_interval_secs = config.poll_interval_secs,
        "starting tandem daemon",
    );
    run_with(home, orchestrator, config.poll_interval()).await
}

/// Run the daemon around an already-built orchestrator.
pub async fn run_with(
    home: PathBuf,
    orchestrator: Orchestrator,
    poll_interval: Duration,
) -> Result<(), DaemonError> {
    ensure_root_at(&home)?;

    let orchestrator: SharedOrchestrator = Arc::new(Mutex::new(orchestrator));
    let state: SharedState = Arc::new(RwLock::new(DaemonState::new(poll_interval)));

    let (cycle_tx, cycle_rx) = mpsc::channel::<CycleJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let timer_handle = {
        let shutdown = shutdown_tx.clone();
        let cycle_tx = cycle_tx.clone();
        tokio::spawn(async move {
            let result = poll_timer_task(poll_interval, cycle_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                cycle_processor_task(orchestrator, state, cycle_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, state, cycle_tx, shutdown.clone(), shutdown.subscribe())
                    .await;
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
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (timer_result, processor_result, socket_result, signal_result) =
        tokio::join!(timer_handle, processor_handle, socket_handle, signal_handle);

    handle_join("poll_timer", timer_result)?;
    handle_join("cycle_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Enqueue a cycle, wait for it to finish, then sleep `interval`.
///
/// Waiting on the reply keeps timer cycles from piling up behind a slow one.
async fn poll_timer_task(
    interval: Duration,
    cycle_tx: mpsc::Sender<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            outcome = enqueue_cycle(&cycle_tx, "timer") => {
                if let Err(err) = outcome {
                    match err {
                        DaemonError::ChannelClosed(_) => break,
                        err => tracing::warn!(error = %err, "timer-triggered cycle failed"),
                    }
                }
            }
        }
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    Ok(())
}

async fn cycle_processor_task(
    orchestrator: SharedOrchestrator,
    state: SharedState,
    mut cycle_rx: mpsc::Receiver<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = cycle_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let orchestrator = orchestrator.clone();
                let (phase, result) = tokio::task::spawn_blocking(move || {
                    let mut orchestrator = orchestrator
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    let result = orchestrator.run_cycle().map(|report| report.summary());
                    (orchestrator.phase(), result)
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("cycle task join error: {err}")))?;

                let outcome = {
                    let mut state = state.write().await;
                    state.phase = phase;
                    match result {
                        Ok(summary) => {
                            tracing::info!(
                                source = job.source,
                                created = summary.created,
                                updated = summary.updated,
                                deleted = summary.deleted,
                                failed = summary.failed,
                                conflicts = summary.conflicts,
                                anomalies = summary.anomalies,
                                duration_ms = started.elapsed().as_millis() as u64,
                                "cycle completed",
                            );
                            state.cycles += 1;
                            state.last_cycle = Some(summary.clone());
                            state.last_error = None;
                            Ok(summary)
                        }
                        Err(err) => {
                            tracing::error!(source = job.source, error = %err, "cycle aborted");
                            state.failed_cycles += 1;
                            state.last_error = Some(err.to_string());
                            Err(err.to_string())
                        }
                    }
                };

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    state: SharedState,
    cycle_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening for control requests");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let state = state.clone();
                let cycle_tx = cycle_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, home, state, cycle_tx, shutdown_tx).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    state: SharedState,
    cycle_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            CMD_STATUS => DaemonResponse::ok(build_status_payload(&home, &state).await),
            CMD_SYNC => match enqueue_cycle(&cycle_tx, "socket").await {
                Ok(summary) => DaemonResponse::ok(json!(summary)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_STOP => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(home: &Path, state: &SharedState) -> Value {
    let snapshot = state.read().await.clone();
    let mut payload = json!(snapshot);
    if let Value::Object(fields) = &mut payload {
        fields.insert("running".to_string(), json!(true));
        fields.insert(
            "socket".to_string(),
            json!(socket_path(home).display().to_string()),
        );
    }
    payload
}

async fn enqueue_cycle(
    cycle_tx: &mpsc::Sender<CycleJob>,
    source: &'static str,
) -> Result<CycleSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    cycle_tx
        .send(CycleJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the `fmt` subscriber; `RUST_LOG` overrides the `info` default.
///
/// Also bridges `log` records from `tandem-sync` into tracing.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tandem_core::{CanonicalItem, System};
    use tandem_sync::local::{write_store, StoreFile, StoredRecord};
    use tandem_sync::{JsonBaselineStore, LocalStore};
    use tempfile::TempDir;

    fn store_with(path: &Path, records: Vec<StoredRecord>) {
        let store = StoreFile {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ..Default::default()
        };
        write_store(path, &store).expect("write store");
    }

    fn record(id: &str, title: &str) -> StoredRecord {
        StoredRecord {
            id: id.into(),
            link: String::new(),
            title: title.into(),
            status_id: None,
            priority: String::new(),
            body: String::new(),
            label_ids: Vec::new(),
            assignee_id: None,
            due: None,
            edited_at: chrono::Utc::now(),
            archived: false,
        }
    }

    fn orchestrator(home: &Path) -> Orchestrator {
        let documents = home.join("documents.json");
        let tracker = home.join("tracker.json");
        store_with(&documents, vec![record("d1", "Write docs")]);
        store_with(&tracker, Vec::new());
        let ttl = Duration::from_secs(60);
        Orchestrator::new(
            Arc::new(LocalStore::with_ttl(System::Documents, documents, ttl)),
            Arc::new(LocalStore::with_ttl(System::Tracker, tracker, ttl)),
            Box::new(JsonBaselineStore::at(home)),
        )
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn poll_timer_waits_a_full_interval_after_each_cycle() {
        let interval = Duration::from_secs(5);
        let (cycle_tx, mut cycle_rx) = mpsc::channel::<CycleJob>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let timer = tokio::spawn(poll_timer_task(interval, cycle_tx, shutdown_tx.subscribe()));

        let first = cycle_rx.recv().await.expect("first job");
        assert_eq!(first.source, "timer");
        let _ = first.respond_to.send(Ok(CycleSummary::default()));

        let early = tokio::time::timeout(Duration::from_secs(4), cycle_rx.recv()).await;
        assert!(early.is_err(), "next cycle must wait for the interval");

        let second = cycle_rx.recv().await.expect("second job");
        let _ = second.respond_to.send(Err("offline".to_string()));

        shutdown_tx.send(()).expect("shutdown");
        timer.await.expect("join").expect("timer result");
    }

    #[tokio::test]
    async fn processor_runs_cycles_and_records_state() {
        let home = TempDir::new().expect("home");
        let orchestrator = Arc::new(Mutex::new(orchestrator(home.path())));
        let state: SharedState = Arc::new(RwLock::new(DaemonState::new(Duration::from_secs(5))));
        let (cycle_tx, cycle_rx) = mpsc::channel::<CycleJob>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let processor = tokio::spawn(cycle_processor_task(
            orchestrator,
            state.clone(),
            cycle_rx,
            shutdown_tx.subscribe(),
        ));

        let summary = enqueue_cycle(&cycle_tx, "test").await.expect("cycle");
        assert!(summary.first_run);
        assert_eq!(summary.created, 1);

        {
            let state = state.read().await;
            assert_eq!(state.cycles, 1);
            assert!(matches!(state.phase, Phase::Incremental { .. }));
            assert_eq!(state.last_cycle.as_ref().map(|s| s.created), Some(1));
        }

        let payload = build_status_payload(home.path(), &state).await;
        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["phase"], json!("incremental"));
        assert_eq!(payload["cycles"], json!(1));

        drop(cycle_tx);
        processor.await.expect("join").expect("processor result");
    }

    #[tokio::test]
    async fn status_payload_before_first_cycle() {
        let home = TempDir::new().expect("home");
        let state: SharedState = Arc::new(RwLock::new(DaemonState::new(Duration::from_secs(7))));

        let payload = build_status_payload(home.path(), &state).await;

        assert_eq!(payload["phase"], json!("first_run"));
        assert_eq!(payload["poll_interval_secs"], json!(7));
        assert_eq!(payload["last_cycle"], Value::Null);
        assert!(payload["socket"]
            .as_str()
            .expect("socket string")
            .ends_with("daemon.sock"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn socket_status_sync_and_stop_round_trip() {
        let home = TempDir::new().expect("home");
        let orchestrator = orchestrator(home.path());
        let daemon = tokio::spawn(run_with(
            home.path().to_path_buf(),
            orchestrator,
            Duration::from_secs(3600),
        ));

        let home_path = home.path().to_path_buf();
        let (status, synced) = tokio::task::spawn_blocking(move || {
            let status = crate::request_status(&home_path).expect("status");
            let synced = crate::request_sync(&home_path).expect("sync");
            crate::request_stop(&home_path).expect("stop");
            (status, synced)
        })
        .await
        .expect("client join");

        assert_eq!(status["running"], json!(true));
        assert_eq!(synced.failed, 0, "sync returns the cycle summary");
        daemon.await.expect("join").expect("daemon result");
        assert!(!socket_path(home.path()).exists(), "socket removed on shutdown");

        let baseline = JsonBaselineStore::at(home.path());
        let stored = tandem_sync::BaselineStore::load(&baseline)
            .expect("load")
            .expect("baseline");
        let items: Vec<&CanonicalItem> = stored.baseline.items.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(!items[0].secondary_id.is_empty());
    }
}
