use crate::config::Config;
use crate::error::GatewayError;
use crate::probe::{ReadinessPolicy, ReadinessProbe};
use crate::token::GatewayToken;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State directory passed to the gateway
pub const GATEWAY_ENV_STATE_DIR: &str = "OPENCLAW_STATE_DIR";
/// Workspace directory passed to the gateway
pub const GATEWAY_ENV_WORKSPACE_DIR: &str = "OPENCLAW_WORKSPACE_DIR";
/// Loopback port the gateway must listen on
pub const GATEWAY_ENV_PORT: &str = "OPENCLAW_GATEWAY_PORT";
/// Token the gateway validates inbound bearer credentials against
pub const GATEWAY_ENV_TOKEN: &str = "OPENCLAW_GATEWAY_TOKEN";

/// Lifecycle of the supervised gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum GatewayState {
    /// No process is running
    Stopped,
    /// Process spawned, waiting for a health endpoint to answer
    Starting,
    /// Process is running and answered on `endpoint`
    Ready { endpoint: String },
    /// Process exited on its own; not restarted
    Exited { code: Option<i32> },
    /// Readiness never succeeded for this start attempt
    Failed,
}

impl GatewayState {
    pub fn is_ready(&self) -> bool {
        matches!(self, GatewayState::Ready { .. })
    }
}

/// How to launch the gateway
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Applied on top of the inherited environment
    pub env: HashMap<String, String>,
    /// Time between SIGTERM and SIGKILL
    pub shutdown_grace_period: Duration,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            shutdown_grace_period: Duration::from_secs(10),
        }
    }

    /// Set arguments (builder pattern)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add an environment variable (builder pattern)
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the SIGTERM grace period (builder pattern)
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    /// Build the launch from configuration; the gateway contract variables
    /// override anything set in `gateway.env`.
    pub fn from_config(config: &Config, token: &GatewayToken) -> Self {
        let mut env = config.gateway.env.clone();
        env.insert(
            GATEWAY_ENV_STATE_DIR.to_string(),
            config.state.state_dir().to_string_lossy().into_owned(),
        );
        env.insert(
            GATEWAY_ENV_WORKSPACE_DIR.to_string(),
            config.state.workspace_dir().to_string_lossy().into_owned(),
        );
        env.insert(GATEWAY_ENV_PORT.to_string(), config.gateway.port.to_string());
        env.insert(GATEWAY_ENV_TOKEN.to_string(), token.as_str().to_string());

        Self {
            command: config.gateway.command.clone(),
            args: config.gateway.args.clone(),
            working_dir: config.gateway.working_dir.as_ref().map(PathBuf::from),
            env,
            shutdown_grace_period: config.gateway.shutdown_grace_period(),
        }
    }
}

/// Identity of one spawned gateway process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayHandle {
    id: u64,
    pid: Option<u32>,
    started_at: Instant,
}

impl GatewayHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// A gateway that answered its readiness probe
#[derive(Debug, Clone)]
pub struct ReadyGateway {
    pub handle: GatewayHandle,
    pub endpoint: String,
}

type ProcessSlot = Arc<Mutex<Option<RunningProcess>>>;

struct RunningProcess {
    handle: GatewayHandle,
    /// Carries the state the monitor publishes once the child is reaped
    stop_tx: oneshot::Sender<GatewayState>,
    monitor: JoinHandle<()>,
}

impl RunningProcess {
    async fn terminate(self, final_state: GatewayState) {
        // The monitor may already be gone if the process exited on its own
        let _ = self.stop_tx.send(final_state);
        let _ = self.monitor.await;
    }
}

/// Owns the single gateway child process.
///
/// `start` is guarded by a single-flight flag: while a process is alive, any
/// further `start` is rejected without touching the running instance. An exit
/// that was not requested moves the state to [`GatewayState::Exited`] and is
/// not followed by a restart.
pub struct GatewaySupervisor {
    launch: LaunchSpec,
    occupied: Arc<AtomicBool>,
    state_tx: Arc<watch::Sender<GatewayState>>,
    process: ProcessSlot,
    next_id: AtomicU64,
}

impl GatewaySupervisor {
    pub fn new(launch: LaunchSpec) -> Self {
        let (state_tx, _) = watch::channel(GatewayState::Stopped);
        Self {
            launch,
            occupied: Arc::new(AtomicBool::new(false)),
            state_tx: Arc::new(state_tx),
            process: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state_tx.borrow().clone()
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<GatewayState> {
        self.state_tx.subscribe()
    }

    /// Handle of the live process; `None` once it was stopped or exited
    pub fn current(&self) -> Option<GatewayHandle> {
        self.process.lock().as_ref().map(|p| p.handle.clone())
    }

    /// Spawn the gateway. Output streams are inherited, not buffered.
    pub fn start(&self) -> Result<GatewayHandle, GatewayError> {
        if self
            .occupied
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let pid = self.current().and_then(|h| h.pid);
            warn!(?pid, "Rejected start: gateway already running");
            return Err(GatewayError::AlreadyRunning { pid });
        }

        info!(command = %self.launch.command, args = ?self.launch.args, "Starting gateway");

        let mut cmd = Command::new(&self.launch.command);
        cmd.args(&self.launch.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        if let Some(ref working_dir) = self.launch.working_dir {
            cmd.current_dir(working_dir);
        }
        for (key, value) in &self.launch.env {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.occupied.store(false, Ordering::SeqCst);
                self.state_tx.send_replace(GatewayState::Failed);
                let err = GatewayError::Spawn {
                    command: self.launch.command.clone(),
                    source,
                };
                error!(error = %err, "Gateway spawn failed");
                return Err(err);
            }
        };

        let handle = GatewayHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            pid: child.id(),
            started_at: Instant::now(),
        };
        info!(pid = ?handle.pid, "Gateway process spawned");

        self.state_tx.send_replace(GatewayState::Starting);

        let (stop_tx, stop_rx) = oneshot::channel();

        // Held across the spawn so an immediate exit cannot clear the slot
        // before it is filled
        let mut slot = self.process.lock();
        let monitor = tokio::spawn(monitor_process(
            child,
            stop_rx,
            handle.clone(),
            self.launch.shutdown_grace_period,
            Arc::clone(&self.state_tx),
            Arc::clone(&self.occupied),
            Arc::clone(&self.process),
        ));
        *slot = Some(RunningProcess {
            handle: handle.clone(),
            stop_tx,
            monitor,
        });
        drop(slot);

        Ok(handle)
    }

    /// Record that `handle` answered on `endpoint`; ignored unless it is the
    /// current process and still starting
    pub fn mark_ready(&self, handle: &GatewayHandle, endpoint: &str) -> bool {
        if self.current().as_ref() != Some(handle) {
            return false;
        }
        self.state_tx.send_if_modified(|state| {
            if *state == GatewayState::Starting {
                *state = GatewayState::Ready {
                    endpoint: endpoint.to_string(),
                };
                true
            } else {
                false
            }
        })
    }

    /// Stop the process identified by `handle`
    pub async fn stop(&self, handle: &GatewayHandle) -> Result<(), GatewayError> {
        self.stop_as(handle, GatewayState::Stopped).await
    }

    /// Stop `handle` and publish `final_state` in the same transition that
    /// releases the start guard
    async fn stop_as(
        &self,
        handle: &GatewayHandle,
        final_state: GatewayState,
    ) -> Result<(), GatewayError> {
        let running = {
            let mut slot = self.process.lock();
            match slot.as_ref() {
                Some(running) if running.handle == *handle => slot.take(),
                _ => None,
            }
        };

        match running {
            Some(running) => {
                running.terminate(final_state).await;
                Ok(())
            }
            None => Err(GatewayError::NotRunning),
        }
    }

    /// Stop whatever is running
    pub async fn shutdown(&self) {
        let running = self.process.lock().take();
        if let Some(running) = running {
            info!(pid = ?running.handle.pid, "Stopping gateway");
            running.terminate(GatewayState::Stopped).await;
        }
    }

    /// Start the gateway and wait for it to answer a health endpoint.
    ///
    /// Readiness is raced against process exit. On timeout or early exit the
    /// process is stopped and the state becomes [`GatewayState::Failed`].
    pub async fn launch(
        &self,
        probe: &ReadinessProbe,
        policy: &ReadinessPolicy,
    ) -> Result<ReadyGateway, GatewayError> {
        let handle = self.start()?;
        let exit_rx = self.subscribe();

        let outcome = tokio::select! {
            ready = probe.wait_ready_with(policy) => ready,
            code = wait_for_exit(exit_rx) => Err(GatewayError::ExitedDuringStartup { code }),
        };

        match outcome {
            Ok(endpoint) => {
                self.mark_ready(&handle, &endpoint);
                Ok(ReadyGateway { handle, endpoint })
            }
            Err(e) => {
                error!(error = %e, "Gateway failed to start");
                // Never passes through Stopped, which would invite a new launch
                let _ = self.stop_as(&handle, GatewayState::Failed).await;
                self.state_tx.send_if_modified(|state| {
                    if matches!(state, GatewayState::Exited { .. }) {
                        *state = GatewayState::Failed;
                        true
                    } else {
                        false
                    }
                });
                Err(e)
            }
        }
    }
}

/// Resolves once the state shows the process is gone
async fn wait_for_exit(mut rx: watch::Receiver<GatewayState>) -> Option<i32> {
    loop {
        match &*rx.borrow_and_update() {
            GatewayState::Exited { code } => return *code,
            GatewayState::Stopped | GatewayState::Failed => return None,
            _ => {}
        }
        if rx.changed().await.is_err() {
            // Supervisor dropped; leave the decision to the readiness side
            std::future::pending::<()>().await;
        }
    }
}

enum MonitorEvent {
    Exited(std::io::Result<std::process::ExitStatus>),
    StopRequested(GatewayState),
}

/// Owns the child until it exits or a stop is requested
async fn monitor_process(
    mut child: Child,
    mut stop_rx: oneshot::Receiver<GatewayState>,
    handle: GatewayHandle,
    grace_period: Duration,
    state_tx: Arc<watch::Sender<GatewayState>>,
    occupied: Arc<AtomicBool>,
    process: ProcessSlot,
) {
    let pid = handle.pid;
    let event = tokio::select! {
        status = child.wait() => MonitorEvent::Exited(status),
        requested = &mut stop_rx => {
            MonitorEvent::StopRequested(requested.unwrap_or(GatewayState::Stopped))
        }
    };

    match event {
        MonitorEvent::Exited(status) => {
            let code = status.as_ref().ok().and_then(|s| s.code());
            let uptime_ms = handle.started_at.elapsed().as_millis() as u64;
            match status {
                Ok(status) => error!(?pid, %status, uptime_ms, "Gateway process exited unexpectedly"),
                Err(e) => error!(?pid, error = %e, uptime_ms, "Failed to wait for gateway process"),
            }
            {
                let mut slot = process.lock();
                if slot.as_ref().is_some_and(|running| running.handle == handle) {
                    slot.take();
                }
            }
            state_tx.send_replace(GatewayState::Exited { code });
        }
        MonitorEvent::StopRequested(final_state) => {
            terminate_child(&mut child, pid, grace_period).await;
            state_tx.send_replace(final_state);
        }
    }

    occupied.store(false, Ordering::SeqCst);
}

/// SIGTERM, wait out the grace period, then SIGKILL
async fn terminate_child(child: &mut Child, pid: Option<u32>, grace_period: Duration) {
    if let Some(pid) = pid {
        info!(pid, "Sending SIGTERM to gateway");

        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => {
            info!(?pid, %status, "Gateway process exited gracefully");
        }
        Ok(Err(e)) => {
            warn!(?pid, error = %e, "Error waiting for gateway to exit");
        }
        Err(_) => {
            warn!(
                ?pid,
                grace_period_secs = grace_period.as_secs(),
                "Grace period exceeded, sending SIGKILL"
            );
            let _ = child.kill().await;
        }
    }
    debug!(?pid, "Gateway process reaped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyTarget;
    use crate::pool::{ConnectionPool, PoolConfig};
    use crate::probe::ProbeConfig;

    fn sleeper() -> LaunchSpec {
        LaunchSpec::new("sleep")
            .with_args(["60"])
            .with_grace_period(Duration::from_secs(1))
    }

    fn unreachable_probe() -> ReadinessProbe {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        ReadinessProbe::new(
            Arc::new(ConnectionPool::new(PoolConfig::default())),
            ProxyTarget::loopback(port),
            ProbeConfig {
                interval: Duration::from_millis(50),
                request_timeout: Duration::from_millis(100),
            },
        )
    }

    async fn wait_for_state<F>(supervisor: &GatewaySupervisor, pred: F) -> GatewayState
    where
        F: Fn(&GatewayState) -> bool,
    {
        let mut rx = supervisor.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
            .await
            .expect("state transition timed out")
            .expect("supervisor dropped")
            .clone();
        state
    }

    #[test]
    fn test_initial_state_is_stopped() {
        let supervisor = GatewaySupervisor::new(sleeper());
        assert_eq!(supervisor.state(), GatewayState::Stopped);
        assert!(supervisor.current().is_none());
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_string(&GatewayState::Ready {
            endpoint: "/health".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"ready","endpoint":"/health"}"#);
        let json = serde_json::to_string(&GatewayState::Exited { code: Some(3) }).unwrap();
        assert_eq!(json, r#"{"state":"exited","code":3}"#);
    }

    #[test]
    fn test_launch_spec_from_config_passes_contract_env() {
        let mut config = Config::default();
        config.state.state_dir = Some(PathBuf::from("/data/.openclaw"));
        config.gateway.port = 18800;
        config
            .gateway
            .env
            .insert(GATEWAY_ENV_TOKEN.to_string(), "stale".to_string());
        config
            .gateway
            .env
            .insert("NODE_ENV".to_string(), "production".to_string());

        let launch = LaunchSpec::from_config(&config, &GatewayToken::new("authoritative"));

        assert_eq!(launch.command, "openclaw");
        assert_eq!(launch.env.get(GATEWAY_ENV_TOKEN).unwrap(), "authoritative");
        assert_eq!(launch.env.get(GATEWAY_ENV_PORT).unwrap(), "18800");
        assert_eq!(launch.env.get(GATEWAY_ENV_STATE_DIR).unwrap(), "/data/.openclaw");
        assert_eq!(
            launch.env.get(GATEWAY_ENV_WORKSPACE_DIR).unwrap(),
            "/data/.openclaw/workspace"
        );
        assert_eq!(launch.env.get("NODE_ENV").unwrap(), "production");
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let supervisor = GatewaySupervisor::new(sleeper());

        let handle = supervisor.start().unwrap();
        assert!(handle.pid().is_some());
        assert_eq!(supervisor.state(), GatewayState::Starting);

        supervisor.stop(&handle).await.unwrap();
        assert_eq!(supervisor.state(), GatewayState::Stopped);
        assert!(supervisor.current().is_none());

        // Stopping again reports that nothing matches
        assert!(matches!(
            supervisor.stop(&handle).await,
            Err(GatewayError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_without_killing_first() {
        let supervisor = GatewaySupervisor::new(sleeper());
        let handle = supervisor.start().unwrap();

        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyRunning { pid } if pid == handle.pid()));

        // Original instance untouched
        assert_eq!(supervisor.current(), Some(handle.clone()));
        assert_eq!(supervisor.state(), GatewayState::Starting);

        #[cfg(unix)]
        {
            let alive = unsafe { libc::kill(handle.pid().unwrap() as i32, 0) } == 0;
            assert!(alive, "first gateway process should still be running");
        }

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_exactly_one() {
        let supervisor = Arc::new(GatewaySupervisor::new(sleeper()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let supervisor = Arc::clone(&supervisor);
            tasks.push(tokio::spawn(async move { supervisor.start().is_ok() }));
        }

        let mut started = 0;
        for task in tasks {
            if task.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let supervisor = GatewaySupervisor::new(LaunchSpec::new("/nonexistent/gateway-binary"));

        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, GatewayError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/gateway-binary"));
        assert_eq!(supervisor.state(), GatewayState::Failed);

        // The guard is released after a failed spawn
        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, GatewayError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexpected_exit_is_observed_and_not_restarted() {
        let supervisor = GatewaySupervisor::new(
            LaunchSpec::new("sh").with_args(["-c", "exit 7"]),
        );
        supervisor.start().unwrap();

        let state = wait_for_state(&supervisor, |s| matches!(s, GatewayState::Exited { .. })).await;
        assert_eq!(state, GatewayState::Exited { code: Some(7) });
        assert!(supervisor.current().is_none(), "exited process still reported as current");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.state(), GatewayState::Exited { code: Some(7) });
    }

    #[tokio::test]
    async fn test_launch_times_out_and_stops_process() {
        let supervisor = GatewaySupervisor::new(sleeper());
        let probe = unreachable_probe();
        let policy = ReadinessPolicy {
            candidates: vec!["/health".to_string()],
            timeout: Duration::from_millis(300),
        };

        let err = supervisor.launch(&probe, &policy).await.unwrap_err();
        assert!(matches!(err, GatewayError::ReadinessTimeout { .. }));
        assert_eq!(supervisor.state(), GatewayState::Failed);
        assert!(supervisor.current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_launch_does_not_invite_restart() {
        let supervisor = Arc::new(GatewaySupervisor::new(sleeper()));
        let probe = unreachable_probe();
        let policy = ReadinessPolicy {
            candidates: vec!["/health".to_string()],
            timeout: Duration::from_millis(100),
        };

        // Acts like the router: starts the gateway whenever it looks stopped
        let watcher = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move {
                let mut saw_starting = false;
                let mut saw_stopped = false;
                let mut restarts = 0;
                let deadline = Instant::now() + Duration::from_secs(2);
                while Instant::now() < deadline {
                    match supervisor.state() {
                        GatewayState::Starting => saw_starting = true,
                        GatewayState::Stopped if saw_starting => {
                            saw_stopped = true;
                            if supervisor.start().is_ok() {
                                restarts += 1;
                            }
                        }
                        GatewayState::Failed => break,
                        _ => {}
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                (saw_stopped, restarts)
            })
        };

        let err = supervisor.launch(&probe, &policy).await.unwrap_err();
        assert!(matches!(err, GatewayError::ReadinessTimeout { .. }));

        let (saw_stopped, restarts) = watcher.await.unwrap();
        assert!(!saw_stopped, "state passed through Stopped after a failed launch");
        assert_eq!(restarts, 0);
        assert_eq!(supervisor.state(), GatewayState::Failed);
        assert!(supervisor.current().is_none());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_launch_publishes_failed_without_stopped() {
        let supervisor = GatewaySupervisor::new(sleeper());
        let probe = unreachable_probe();
        let policy = ReadinessPolicy {
            candidates: vec!["/health".to_string()],
            timeout: Duration::from_millis(200),
        };

        let mut rx = supervisor.subscribe();
        let recorder = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let done = state == GatewayState::Failed;
                seen.push(state);
                if done {
                    break;
                }
            }
            seen
        });

        supervisor.launch(&probe, &policy).await.unwrap_err();

        let seen = tokio::time::timeout(Duration::from_secs(5), recorder)
            .await
            .unwrap()
            .unwrap();
        assert!(!seen.contains(&GatewayState::Stopped), "{:?}", seen);
        assert_eq!(seen.last(), Some(&GatewayState::Failed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_fails_fast_when_process_exits() {
        let supervisor = GatewaySupervisor::new(
            LaunchSpec::new("sh").with_args(["-c", "exit 2"]),
        );
        let probe = unreachable_probe();
        let policy = ReadinessPolicy {
            candidates: vec!["/health".to_string()],
            timeout: Duration::from_secs(10),
        };

        let start = Instant::now();
        let err = supervisor.launch(&probe, &policy).await.unwrap_err();
        assert!(matches!(err, GatewayError::ExitedDuringStartup { code: Some(2) }));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(supervisor.state(), GatewayState::Failed);
        assert!(supervisor.current().is_none());
    }

    #[tokio::test]
    async fn test_mark_ready_ignores_stale_handle() {
        let supervisor = GatewaySupervisor::new(sleeper());
        let first = supervisor.start().unwrap();
        supervisor.stop(&first).await.unwrap();

        let second = supervisor.start().unwrap();
        assert!(!supervisor.mark_ready(&first, "/health"));
        assert!(supervisor.mark_ready(&second, "/health"));
        assert!(supervisor.state().is_ready());

        supervisor.shutdown().await;
        assert_eq!(supervisor.state(), GatewayState::Stopped);
    }
}
