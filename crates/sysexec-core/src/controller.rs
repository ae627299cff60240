use crate::command::{DisplayCommand, LaunchRequest, Platform};
use crate::config::CommandConfig;
use crate::error::ExecError;
use crate::listener::{ListenerRegistry, SharedListener, StreamKind};
use crate::process::{CommandInput, ProcessHandle, ProcessId, ProcessLauncher, SpawnedProcess};
use crate::pump::{pump_input, pump_lines};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Exit code reported when the exit status itself could not be obtained
const UNKNOWN_EXIT_CODE: i32 = -1;

/// Whether `execute` waits for the process to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Foreground,
    Background,
}

/// Lifecycle stage of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Launching,
    Running,
    Terminated,
}

/// Per-execution state; dropped when the run is retired
struct ActiveRun {
    id: u64,
    pid: Option<ProcessId>,
    abort: CancellationToken,
    exit: watch::Receiver<Option<i32>>,
    done: watch::Receiver<Option<i32>>,
}

enum RunState {
    Idle,
    Launching,
    Running(ActiveRun),
    Terminated { exit_code: i32 },
}

impl RunState {
    fn stage(&self) -> ProcessState {
        match self {
            RunState::Idle => ProcessState::Idle,
            RunState::Launching => ProcessState::Launching,
            RunState::Running(_) => ProcessState::Running,
            RunState::Terminated { .. } => ProcessState::Terminated,
        }
    }
}

type SharedState = Arc<Mutex<RunState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Holds the `Launching` state; puts the previous state back unless committed
struct LaunchClaim {
    state: SharedState,
    previous: Option<RunState>,
}

impl LaunchClaim {
    fn commit(mut self, run: ActiveRun) {
        self.previous = None;
        *lock(&self.state) = RunState::Running(run);
    }
}

impl Drop for LaunchClaim {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *lock(&self.state) = previous;
        }
    }
}

/// Runs one configured command at a time and reports its output to listeners.
///
/// Configuration and listeners outlive individual executions; everything tied
/// to a launched process (handle, pumps, abort signal) lives only until the
/// run is retired. Clones share the same state, so a clone can `abort` a run
/// another clone is waiting on.
pub struct ProcessController<L: ProcessLauncher> {
    config: Arc<CommandConfig>,
    platform: Platform,
    launcher: Arc<L>,
    listeners: ListenerRegistry,
    state: SharedState,
    next_run_id: Arc<AtomicU64>,
}

impl<L: ProcessLauncher> Clone for ProcessController<L> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            platform: self.platform,
            launcher: self.launcher.clone(),
            listeners: self.listeners.clone(),
            state: self.state.clone(),
            next_run_id: self.next_run_id.clone(),
        }
    }
}

impl<L: ProcessLauncher> ProcessController<L> {
    pub fn new(config: CommandConfig, launcher: L) -> Self {
        Self::with_platform(config, launcher, Platform::current())
    }

    /// Use an explicit platform instead of detecting the host
    pub fn with_platform(config: CommandConfig, launcher: L, platform: Platform) -> Self {
        Self {
            config: Arc::new(config),
            platform,
            launcher: Arc::new(launcher),
            listeners: ListenerRegistry::new(),
            state: Arc::new(Mutex::new(RunState::Idle)),
            next_run_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn command(&self) -> &[String] {
        &self.config.command
    }

    pub fn working_directory(&self) -> Option<&Path> {
        self.config.working_directory.as_deref()
    }

    pub fn environment(&self) -> Option<&HashMap<String, String>> {
        self.config.env.as_ref()
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn add_output_listener(&self, listener: SharedListener) {
        self.listeners.add_output_listener(listener);
    }

    pub fn remove_output_listener(&self, listener: &SharedListener) -> bool {
        self.listeners.remove_output_listener(listener)
    }

    pub fn add_error_listener(&self, listener: SharedListener) {
        self.listeners.add_error_listener(listener);
    }

    pub fn remove_error_listener(&self, listener: &SharedListener) -> bool {
        self.listeners.remove_error_listener(listener)
    }

    pub fn state(&self) -> ProcessState {
        lock(&self.state).stage()
    }

    /// Whether a launched process has not exited yet. Never blocks.
    pub fn is_running(&self) -> bool {
        match &*lock(&self.state) {
            RunState::Running(run) => run.exit.borrow().is_none(),
            _ => false,
        }
    }

    /// PID of the running process, if any
    pub fn pid(&self) -> Option<ProcessId> {
        match &*lock(&self.state) {
            RunState::Running(run) if run.exit.borrow().is_none() => run.pid,
            _ => None,
        }
    }

    /// Exit code of the current or last run, once the process has exited
    pub fn exit_code(&self) -> Option<i32> {
        match &*lock(&self.state) {
            RunState::Running(run) => *run.exit.borrow(),
            RunState::Terminated { exit_code } => Some(*exit_code),
            RunState::Idle | RunState::Launching => None,
        }
    }

    /// Request termination of the running process.
    ///
    /// Returns immediately; the process goes away whenever the OS gets to
    /// it. Does nothing when no process is running.
    pub fn abort(&self) {
        match &*lock(&self.state) {
            RunState::Running(run) => {
                info!(pid = ?run.pid, command = %self, "Aborting command");
                run.abort.cancel();
            }
            _ => debug!(command = %self, "Abort requested but command is not running"),
        }
    }

    /// Wait until the current run is retired and return its exit code.
    ///
    /// Returns the last exit code when nothing is running, or `None` if the
    /// controller never completed a run.
    pub async fn wait(&self) -> Option<i32> {
        let mut done = match &*lock(&self.state) {
            RunState::Running(run) => run.done.clone(),
            RunState::Terminated { exit_code } => return Some(*exit_code),
            RunState::Idle | RunState::Launching => return None,
        };
        let finished = done.wait_for(|code| code.is_some()).await;
        finished.ok().and_then(|code| *code)
    }

    /// Run in the foreground without input
    pub async fn run(&self) -> Result<i32, ExecError> {
        self.execute(None, ExecutionMode::Foreground).await
    }

    /// Run in the foreground, feeding `input` to stdin
    pub async fn run_with_input(&self, input: CommandInput) -> Result<i32, ExecError> {
        self.execute(Some(input), ExecutionMode::Foreground).await
    }

    /// Run in the background without input
    pub async fn start(&self) -> Result<i32, ExecError> {
        self.execute(None, ExecutionMode::Background).await
    }

    /// Run in the background, feeding `input` to stdin
    pub async fn start_with_input(&self, input: CommandInput) -> Result<i32, ExecError> {
        self.execute(Some(input), ExecutionMode::Background).await
    }

    /// Launch the command.
    ///
    /// In the foreground this returns once the process exited and its output
    /// was fully delivered, with the real exit code. In the background it
    /// returns right after launch with `0`, unless the process already
    /// exited. A non-zero exit code is a result, not an error.
    pub async fn execute(
        &self,
        input: Option<CommandInput>,
        mode: ExecutionMode,
    ) -> Result<i32, ExecError> {
        let claim = self.claim()?;
        let request = self.launch_request(input.is_some())?;
        debug!(command = %request.command_line(), ?mode, "Executing command");

        let spawned = self
            .launcher
            .launch(&request)
            .await
            .map_err(|source| ExecError::Launch {
                command: self.to_string(),
                source,
            })?;

        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let (run, completed, early_exit) = self.supervise(run_id, spawned, input);
        let done = run.done.clone();
        claim.commit(run);
        let completion = tokio::spawn(complete_run(completed));

        match mode {
            ExecutionMode::Foreground => match completion.await {
                Ok(exit_code) => Ok(exit_code),
                Err(e) => {
                    let code = *done.borrow();
                    code.ok_or_else(|| {
                        ExecError::Other(anyhow::anyhow!("Command supervision failed: {e}"))
                    })
                }
            },
            // The process may already be gone, e.g. when it crashed on start.
            ExecutionMode::Background => Ok(early_exit.unwrap_or(0)),
        }
    }

    fn claim(&self) -> Result<LaunchClaim, ExecError> {
        let mut state = lock(&self.state);
        if matches!(&*state, RunState::Launching | RunState::Running(_)) {
            return Err(ExecError::AlreadyRunning(self.to_string()));
        }
        let previous = std::mem::replace(&mut *state, RunState::Launching);
        Ok(LaunchClaim {
            state: self.state.clone(),
            previous: Some(previous),
        })
    }

    fn launch_request(&self, stdin_piped: bool) -> Result<LaunchRequest, ExecError> {
        self.config
            .pump
            .validate()
            .map_err(|e| ExecError::Configuration(e.to_string()))?;
        let mut request = LaunchRequest::from_command(&self.config.command, self.platform)?;
        request.working_directory = self.config.working_directory.clone();
        request.env = self.config.env.clone();
        request.stdin_piped = stdin_piped;
        Ok(request)
    }

    /// Start the pumps and the exit waiter of a freshly spawned process.
    ///
    /// Also returns the exit code if the process is already gone.
    ///
    /// The returned [`CompletedRun`] must only be spawned once the run record
    /// is stored, or a fast exit could try to retire a run that is not
    /// registered yet.
    fn supervise(
        &self,
        run_id: u64,
        spawned: SpawnedProcess<L::Handle>,
        input: Option<CommandInput>,
    ) -> (ActiveRun, CompletedRun, Option<i32>) {
        let SpawnedProcess {
            mut handle,
            stdin,
            stdout,
            stderr,
        } = spawned;
        let pid = handle.get_pid();
        if let Some(pid) = pid {
            debug!(pid, command = %self, "Command started");
        }
        let early_exit = handle.try_wait().unwrap_or_else(|e| {
            debug!(pid = ?pid, error = %e, "Could not poll process status");
            None
        });

        let abort = CancellationToken::new();
        let drain = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        let (done_tx, done_rx) = watch::channel(None);

        let mut pumps = JoinSet::new();
        match (input, stdin) {
            (Some(input), Some(stdin)) => {
                let drain = drain.clone();
                pumps.spawn(async move {
                    pump_input(input, stdin, drain).await;
                });
            }
            (Some(_), None) => warn!(command = %self, "Input given but the child has no stdin pipe"),
            (None, _) => {}
        }
        for (stream, reader) in [(StreamKind::Output, stdout), (StreamKind::Error, stderr)] {
            let Some(reader) = reader else { continue };
            let listeners = self.listeners.clone();
            let config = self.config.pump.clone();
            let drain = drain.clone();
            pumps.spawn(async move {
                pump_lines(reader, stream, listeners, &config, drain).await;
            });
        }

        let waiter = tokio::spawn(wait_for_exit(handle, abort.clone(), exit_tx));

        let run = ActiveRun {
            id: run_id,
            pid,
            abort,
            exit: exit_rx,
            done: done_rx,
        };

        let completion = CompletedRun {
            state: self.state.clone(),
            run_id,
            command: self.to_string(),
            waiter,
            pumps,
            drain,
            drain_timeout: self.config.pump.drain_timeout(),
            done_tx,
        };
        (run, completion, early_exit)
    }
}

async fn wait_for_exit<H: ProcessHandle>(
    mut handle: H,
    abort: CancellationToken,
    exit_tx: watch::Sender<Option<i32>>,
) -> i32 {
    let pid = handle.get_pid();
    let natural = tokio::select! {
        status = handle.wait() => Some(status),
        _ = abort.cancelled() => None,
    };

    let status = match natural {
        Some(status) => status,
        None => {
            if let Err(e) = handle.start_kill() {
                warn!(pid = ?pid, error = %e, "Failed to kill process");
            }
            handle.wait().await
        }
    };

    let exit_code = status.unwrap_or_else(|e| {
        warn!(pid = ?pid, error = %e, "Could not obtain process exit status");
        UNKNOWN_EXIT_CODE
    });
    exit_tx.send_replace(Some(exit_code));
    exit_code
}

struct CompletedRun {
    state: SharedState,
    run_id: u64,
    command: String,
    waiter: JoinHandle<i32>,
    pumps: JoinSet<()>,
    drain: CancellationToken,
    drain_timeout: Duration,
    done_tx: watch::Sender<Option<i32>>,
}

async fn complete_run(run: CompletedRun) -> i32 {
    let CompletedRun {
        state,
        run_id,
        command,
        waiter,
        mut pumps,
        drain,
        drain_timeout,
        done_tx,
    } = run;

    let exit_code = waiter.await.unwrap_or_else(|e| {
        warn!(command = %command, error = %e, "Exit waiter failed");
        UNKNOWN_EXIT_CODE
    });

    let drained = tokio::time::timeout(drain_timeout, async {
        while pumps.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            command = %command,
            timeout_ms = drain_timeout.as_millis() as u64,
            "Streams still open after process exit, stopping pumps"
        );
        drain.cancel();
        while pumps.join_next().await.is_some() {}
    }

    if exit_code != 0 {
        warn!(command = %command, exit_code, "Command returned with non-zero exit value");
    }

    {
        let mut current = lock(&state);
        if matches!(&*current, RunState::Running(active) if active.id == run_id) {
            *current = RunState::Terminated { exit_code };
        }
    }
    done_tx.send_replace(Some(exit_code));
    exit_code
}

impl<L: ProcessLauncher> fmt::Display for ProcessController<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&DisplayCommand(&self.config.command), f)
    }
}

impl<L: ProcessLauncher> fmt::Debug for ProcessController<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessController")
            .field("command", &self.config.command)
            .field("platform", &self.platform)
            .field("state", &self.state())
            .field("listeners", &self.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::LaunchArg;
    use crate::listener::LineCollector;
    use crate::process::input_from_bytes;
    use async_trait::async_trait;
    use std::future::Future;
    use std::io;
    use std::pin::Pin;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// The child's side of its pipes
    struct FakeChild {
        stdin: DuplexStream,
        stdout: DuplexStream,
        stderr: DuplexStream,
    }

    type Script = Arc<dyn Fn(FakeChild) -> Pin<Box<dyn Future<Output = i32> + Send>> + Send + Sync>;

    fn script<F, Fut>(f: F) -> Script
    where
        F: Fn(FakeChild) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        Arc::new(move |child| Box::pin(f(child)) as Pin<Box<dyn Future<Output = i32> + Send>>)
    }

    struct FakeHandle {
        pid: ProcessId,
        exit: watch::Receiver<Option<i32>>,
        kill: CancellationToken,
    }

    #[async_trait]
    impl ProcessHandle for FakeHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            Some(self.pid)
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            Ok(*self.exit.borrow())
        }

        async fn wait(&mut self) -> io::Result<i32> {
            let code = self
                .exit
                .wait_for(|code| code.is_some())
                .await
                .map_err(io::Error::other)?;
            Ok(code.unwrap_or(UNKNOWN_EXIT_CODE))
        }

        fn start_kill(&mut self) -> io::Result<()> {
            self.kill.cancel();
            Ok(())
        }
    }

    /// Runs an async closure in place of a real executable
    struct FakeLauncher {
        script: Option<Script>,
        exit_at_launch: Option<i32>,
        requests: Mutex<Vec<LaunchRequest>>,
    }

    impl FakeLauncher {
        fn new(script: Script) -> Self {
            Self {
                script: Some(script),
                exit_at_launch: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                script: None,
                exit_at_launch: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// The child is already gone with `code` when `launch` returns
        fn exited(code: i32) -> Self {
            Self {
                exit_at_launch: Some(code),
                ..Self::new(script(|_| async { 0 }))
            }
        }
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        type Handle = FakeHandle;

        async fn launch(&self, request: &LaunchRequest) -> io::Result<SpawnedProcess<FakeHandle>> {
            self.requests.lock().unwrap().push(request.clone());
            let Some(script) = self.script.clone() else {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            };

            let (stdin_parent, stdin_child) = tokio::io::duplex(1024);
            let (stdout_parent, stdout_child) = tokio::io::duplex(1024);
            let (stderr_parent, stderr_child) = tokio::io::duplex(1024);
            let (exit_tx, exit_rx) = watch::channel(None);
            let kill = CancellationToken::new();

            let child = FakeChild {
                stdin: stdin_child,
                stdout: stdout_child,
                stderr: stderr_child,
            };
            if let Some(code) = self.exit_at_launch {
                exit_tx.send_replace(Some(code));
            } else {
                let killed = kill.clone();
                tokio::spawn(async move {
                    let code = tokio::select! {
                        code = script(child) => code,
                        _ = killed.cancelled() => 137,
                    };
                    exit_tx.send_replace(Some(code));
                });
            }

            Ok(SpawnedProcess {
                handle: FakeHandle {
                    pid: 4242,
                    exit: exit_rx,
                    kill,
                },
                stdin: request
                    .stdin_piped
                    .then(|| Box::new(stdin_parent) as crate::process::ChildInput),
                stdout: Some(Box::new(stdout_parent)),
                stderr: Some(Box::new(stderr_parent)),
            })
        }
    }

    fn controller(command: &[&str], launcher: FakeLauncher) -> ProcessController<FakeLauncher> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
        ProcessController::with_platform(CommandConfig::new(command), launcher, Platform::Posix)
    }

    async fn write_lines(stream: &mut DuplexStream, prefix: &str, count: usize) {
        for i in 0..count {
            stream
                .write_all(format!("{prefix} {i}\n").as_bytes())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_foreground_delivers_lines_and_exit_code() {
        let launcher = FakeLauncher::new(script(|mut child| async move {
            write_lines(&mut child.stdout, "out", 5).await;
            write_lines(&mut child.stderr, "err", 3).await;
            7
        }));
        let cmd = controller(&["fake"], launcher);
        let out_a = LineCollector::new();
        let out_b = LineCollector::new();
        let err = LineCollector::new();
        cmd.add_output_listener(out_a.clone());
        cmd.add_output_listener(out_b.clone());
        cmd.add_error_listener(err.clone());

        let code = cmd.run().await.unwrap();

        assert_eq!(code, 7);
        assert!(!cmd.is_running());
        assert_eq!(cmd.state(), ProcessState::Terminated);
        assert_eq!(cmd.exit_code(), Some(7));
        let expected: Vec<String> = (0..5).map(|i| format!("out {i}")).collect();
        assert_eq!(out_a.lines(), expected);
        assert_eq!(out_b.lines(), expected);
        assert_eq!(err.lines(), vec!["err 0", "err 1", "err 2"]);
    }

    #[tokio::test]
    async fn test_empty_command_never_launches() {
        let cmd = controller(&[""], FakeLauncher::new(script(|_| async { 0 })));

        let result = cmd.run().await;

        assert!(matches!(result, Err(ExecError::InvalidCommand(_))));
        assert!(cmd.launcher.requests.lock().unwrap().is_empty());
        assert_eq!(cmd.state(), ProcessState::Idle);
    }

    #[tokio::test]
    async fn test_background_reports_exit_of_already_finished_process() {
        let cmd = controller(&["crash"], FakeLauncher::exited(9));

        assert_eq!(cmd.start().await.unwrap(), 9);
        assert_eq!(cmd.wait().await, Some(9));
        assert_eq!(cmd.state(), ProcessState::Terminated);
    }

    #[tokio::test]
    async fn test_invalid_pump_config_is_rejected_before_launch() {
        let mut config = CommandConfig::new(["echo", "hello"]);
        config.pump.max_line_length = 0;
        let launcher = FakeLauncher::new(script(|_| async { 0 }));
        let cmd = ProcessController::with_platform(config, launcher, Platform::Posix);

        let err = cmd.run().await.unwrap_err();

        assert!(matches!(err, ExecError::Configuration(_)));
        assert!(err.is_permanent());
        assert!(cmd.launcher.requests.lock().unwrap().is_empty());
        assert_eq!(cmd.state(), ProcessState::Idle);
    }

    #[tokio::test]
    async fn test_launch_failure_restores_state() {
        let cmd = controller(&["missing"], FakeLauncher::failing());

        let result = cmd.run().await;

        assert!(matches!(result, Err(ExecError::Launch { .. })));
        assert_eq!(cmd.state(), ProcessState::Idle);
        assert!(!cmd.is_running());
        assert!(matches!(cmd.run().await, Err(ExecError::Launch { .. })));
    }

    #[tokio::test]
    async fn test_launch_request_carries_configuration() {
        let config = CommandConfig::builder()
            .command(["echo", "hello world"])
            .working_directory("/tmp")
            .clear_env()
            .build()
            .unwrap();
        let launcher = FakeLauncher::new(script(|_| async { 0 }));
        let cmd = ProcessController::with_platform(config, launcher, Platform::Posix);

        cmd.run_with_input(input_from_bytes("x")).await.unwrap();

        let requests = cmd.launcher.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.program, "echo");
        assert_eq!(request.args, vec![LaunchArg::Plain("hello world".to_string())]);
        assert_eq!(request.working_directory.as_deref(), Some(Path::new("/tmp")));
        assert_eq!(request.env, Some(HashMap::new()));
        assert!(request.stdin_piped);
    }

    #[tokio::test]
    async fn test_input_reaches_child_stdin() {
        let launcher = FakeLauncher::new(script(|child| async move {
            let FakeChild {
                stdin, mut stdout, ..
            } = child;
            let mut lines = BufReader::new(stdin).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stdout
                    .write_all(format!("echo: {line}\n").as_bytes())
                    .await
                    .unwrap();
            }
            0
        }));
        let cmd = controller(&["cat"], launcher);
        let out = LineCollector::new();
        cmd.add_output_listener(out.clone());

        let code = cmd.run_with_input(input_from_bytes("a\nb\n")).await.unwrap();

        assert_eq!(code, 0);
        assert_eq!(out.lines(), vec!["echo: a", "echo: b"]);
    }

    #[tokio::test]
    async fn test_background_abort_and_reuse() {
        let launcher = FakeLauncher::new(script(|child| async move {
            let _child = child;
            std::future::pending::<i32>().await
        }));
        let cmd = controller(&["sleep", "100"], launcher);

        let code = cmd.start().await.unwrap();
        assert_eq!(code, 0);
        assert!(cmd.is_running());
        assert_eq!(cmd.pid(), Some(4242));

        let second = cmd.start().await;
        assert!(matches!(second, Err(ExecError::AlreadyRunning(_))));
        assert!(cmd.is_running());

        cmd.abort();
        assert_eq!(cmd.wait().await, Some(137));
        assert!(!cmd.is_running());
        assert_eq!(cmd.state(), ProcessState::Terminated);

        // retired, so a new run is accepted
        assert_eq!(cmd.start().await.unwrap(), 0);
        cmd.abort();
        assert_eq!(cmd.wait().await, Some(137));
    }

    #[tokio::test]
    async fn test_abort_from_clone_ends_foreground_run() {
        let launcher = FakeLauncher::new(script(|child| async move {
            let _child = child;
            std::future::pending::<i32>().await
        }));
        let cmd = controller(&["forever"], launcher);
        let other = cmd.clone();

        let running = tokio::spawn(async move { other.run().await });
        while !cmd.is_running() {
            tokio::task::yield_now().await;
        }
        cmd.abort();

        assert_eq!(running.await.unwrap().unwrap(), 137);
        assert!(!cmd.is_running());
    }

    #[tokio::test]
    async fn test_idle_controller() {
        let cmd = controller(&["true"], FakeLauncher::new(script(|_| async { 0 })));
        cmd.abort();
        assert!(!cmd.is_running());
        assert_eq!(cmd.pid(), None);
        assert_eq!(cmd.exit_code(), None);
        assert_eq!(cmd.wait().await, None);
        assert_eq!(cmd.state(), ProcessState::Idle);
    }

    #[tokio::test]
    async fn test_listeners_persist_across_runs() {
        let launcher = FakeLauncher::new(script(|mut child| async move {
            write_lines(&mut child.stdout, "line", 2).await;
            0
        }));
        let cmd = controller(&["twice"], launcher);
        let out = LineCollector::new();
        cmd.add_output_listener(out.clone());

        cmd.run().await.unwrap();
        cmd.run().await.unwrap();

        assert_eq!(out.lines().len(), 4);
    }

    #[tokio::test]
    async fn test_open_pipe_after_exit_is_cut_after_drain_timeout() {
        let launcher = FakeLauncher::new(script(|child| async move {
            let FakeChild { mut stdout, .. } = child;
            stdout.write_all(b"before exit\n").await.unwrap();
            // a grandchild keeping stdout open
            tokio::spawn(async move {
                let _stdout = stdout;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
            3
        }));
        let mut config = CommandConfig::new(["daemonize"]);
        config.pump.drain_timeout_ms = 50;
        let cmd = ProcessController::with_platform(config, launcher, Platform::Posix);
        let out = LineCollector::new();
        cmd.add_output_listener(out.clone());

        let code = tokio::time::timeout(Duration::from_secs(5), cmd.run())
            .await
            .expect("pumps should be stopped by the drain timeout")
            .unwrap();

        assert_eq!(code, 3);
        assert_eq!(out.lines(), vec!["before exit"]);
    }

    #[test]
    fn test_display_joins_tokens() {
        let cmd = controller(&["echo", "a b"], FakeLauncher::failing());
        assert_eq!(cmd.to_string(), "echo a b");
        assert_eq!(cmd.command(), ["echo", "a b"]);
        assert_eq!(cmd.working_directory(), None);
        assert_eq!(cmd.environment(), None);
    }
}
