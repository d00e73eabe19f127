//! Server management - preparing, spawning and stopping the application

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult, ServerContext, SetupStep};
use crate::readiness::ReadinessProbe;

const TAIL_LINES: usize = 200;

const GROUP_POLL: Duration = Duration::from_millis(50);

/// Configuration for preparing and spawning the application
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Application checkout; relative paths resolve against the working directory
    pub app_dir: PathBuf,

    /// URL polled for readiness
    pub base_url: String,

    /// Dependency install, skipped when `install_marker` exists in `app_dir`
    pub install_command: Option<String>,
    pub install_marker: PathBuf,

    pub db_init_command: Option<String>,
    pub migrate_command: Option<String>,
    pub build_command: Option<String>,

    /// Long-running server command
    pub start_command: String,

    /// Extra environment for every command
    pub env: Vec<(String, String)>,

    /// Server output is appended here as well as kept in memory
    pub log_file: Option<PathBuf>,

    /// Upper bound for each setup command
    pub setup_timeout: Duration,

    /// Readiness deadline
    pub startup_timeout: Duration,

    /// Time between SIGTERM and SIGKILL
    pub shutdown_grace: Duration,

    /// Time to wait for exit after SIGKILL
    pub kill_wait: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("."),
            base_url: "http://localhost:3000".to_string(),
            install_command: Some("npm ci".to_string()),
            install_marker: PathBuf::from("node_modules"),
            db_init_command: Some("npm run db:init".to_string()),
            migrate_command: Some("npm run migrate".to_string()),
            build_command: Some("npm run build".to_string()),
            start_command: "npm start".to_string(),
            env: Vec::new(),
            log_file: None,
            setup_timeout: Duration::from_secs(600),
            startup_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            kill_wait: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// `app_dir` made absolute against the current working directory
    pub fn resolved_app_dir(&self) -> E2eResult<PathBuf> {
        if self.app_dir.is_absolute() {
            Ok(self.app_dir.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.app_dir))
        }
    }

    /// Port of `base_url`, used in diagnostics
    pub fn port(&self) -> Option<u16> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.port_or_known_default())
    }

    /// Setup steps in execution order, with the install step dropped when
    /// its marker directory already exists
    pub fn setup_steps(&self, app_dir: &Path) -> Vec<(SetupStep, String)> {
        let mut steps = Vec::new();
        if let Some(cmd) = &self.install_command {
            if app_dir.join(&self.install_marker).is_dir() {
                info!(
                    "Skipping {}: {} exists",
                    SetupStep::Install,
                    self.install_marker.display()
                );
            } else {
                steps.push((SetupStep::Install, cmd.clone()));
            }
        }
        for (step, cmd) in [
            (SetupStep::DbInit, &self.db_init_command),
            (SetupStep::Migrate, &self.migrate_command),
            (SetupStep::Build, &self.build_command),
        ] {
            if let Some(cmd) = cmd {
                steps.push((step, cmd.clone()));
            }
        }
        steps
    }
}

/// Server output shared between the reader tasks and the handle
#[derive(Debug, Default)]
struct LogSink {
    tail: Mutex<VecDeque<String>>,
    file: Option<Mutex<File>>,
    write_failed: AtomicBool,
}

impl LogSink {
    fn new(log_file: Option<&Path>) -> E2eResult<Self> {
        let file = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Mutex::new(file))
            }
            None => None,
        };
        Ok(Self {
            tail: Mutex::new(VecDeque::with_capacity(TAIL_LINES)),
            file,
            write_failed: AtomicBool::new(false),
        })
    }

    fn push(&self, line: String) {
        debug!(target: "app", "{}", line);
        if let Some(file) = &self.file {
            if let Err(e) = writeln!(file.lock(), "{}", line) {
                if !self.write_failed.swap(true, Ordering::Relaxed) {
                    warn!("Writing server output to APP_LOG_FILE failed: {}", e);
                }
            }
        }
        let mut tail = self.tail.lock();
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    fn lines(&self) -> Vec<String> {
        self.tail.lock().iter().cloned().collect()
    }
}

/// Handle to the running application server
pub struct ServerHandle {
    child: Option<Child>,
    pid: Option<u32>,
    app_dir: PathBuf,
    command: String,
    port: Option<u16>,
    shutdown_grace: Duration,
    kill_wait: Duration,
    output: Arc<LogSink>,
    readers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Run the setup commands, then spawn the server. Does not wait for readiness.
    pub async fn start(config: &ServerConfig) -> E2eResult<Self> {
        let app_dir = config.resolved_app_dir()?;
        if !app_dir.is_dir() {
            return Err(E2eError::ServerStartup(format!(
                "application directory {} does not exist",
                app_dir.display()
            )));
        }

        for (step, command) in config.setup_steps(&app_dir) {
            run_setup_command(step, &command, &app_dir, &config.env, config.setup_timeout).await?;
        }

        Self::spawn(config, &app_dir)
    }

    /// Spawn the long-running server in its own process group with merged
    /// output streamed to the log sink
    pub fn spawn(config: &ServerConfig, app_dir: &Path) -> E2eResult<Self> {
        info!("Spawning `{}` in {}", config.start_command, app_dir.display());

        let output = Arc::new(LogSink::new(config.log_file.as_deref())?);

        let mut cmd = shell(&config.start_command);
        cmd.current_dir(app_dir)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!(
                "failed to spawn `{}` in {}: {}",
                config.start_command,
                app_dir.display(),
                e
            ))
        })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, output.clone()));
        }

        let pid = child.id();
        info!("Server started (pid: {:?})", pid);

        Ok(Self {
            child: Some(child),
            pid,
            app_dir: app_dir.to_path_buf(),
            command: config.start_command.clone(),
            port: config.port(),
            shutdown_grace: config.shutdown_grace,
            kill_wait: config.kill_wait,
            output,
            readers,
        })
    }

    /// Poll `url` until the server answers with a ready status
    pub async fn wait_until_ready(&mut self, url: &str, deadline: Duration) -> E2eResult<()> {
        let probe = ReadinessProbe::new(url, deadline).with_context(self.context());
        match probe.wait().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if !self.is_alive() {
                    warn!("Server process exited before becoming ready");
                }
                for line in self.recent_output().iter().rev().take(20).rev() {
                    warn!(target: "app", "{}", line);
                }
                Err(e)
            }
        }
    }

    /// Whether the child process is still running
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Last lines of merged stdout/stderr
    pub fn recent_output(&self) -> Vec<String> {
        self.output.lines()
    }

    fn context(&self) -> ServerContext {
        ServerContext {
            app_dir: self.app_dir.clone(),
            command: self.command.clone(),
            port: self.port,
        }
    }

    /// Stop the server: SIGTERM to the process group, then SIGKILL after the
    /// grace period. The whole group counts, so a worker that outlives the
    /// group leader is still killed. Safe to call repeatedly; failures are
    /// only logged.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        let deadline = Instant::now() + self.shutdown_grace;
        match child.try_wait() {
            Ok(Some(status)) => info!("Server already exited with {}", status),
            _ => {
                info!("Stopping server (pid: {:?})", self.pid);
                self.signal(Signal::SIGTERM, &mut child);

                match timeout(self.shutdown_grace, child.wait()).await {
                    Ok(Ok(status)) => info!("Server exited with {}", status),
                    Ok(Err(e)) => warn!("Failed to wait for server: {}", e),
                    Err(_) => {
                        warn!(
                            "Server did not exit within {}s, killing",
                            self.shutdown_grace.as_secs()
                        );
                        self.signal(Signal::SIGKILL, &mut child);
                        match timeout(self.kill_wait, child.wait()).await {
                            Ok(Ok(status)) => info!("Server killed ({})", status),
                            Ok(Err(e)) => warn!("Failed to wait for killed server: {}", e),
                            Err(_) => {
                                warn!("Server still running after SIGKILL (pid: {:?})", self.pid)
                            }
                        }
                    }
                }
            }
        }

        self.stop_group(deadline).await;
        self.finish_readers();
    }

    /// Processes left in the group after the leader is gone get SIGTERM,
    /// the rest of the grace period, then SIGKILL
    async fn stop_group(&self, deadline: Instant) {
        let Some(pgid) = self.pgid() else {
            return;
        };
        if !group_alive(pgid) {
            return;
        }

        debug!("Process group {} outlived its leader", pgid);
        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            debug!("killpg({}, SIGTERM) failed: {}", pgid, e);
        }
        if wait_for_group_exit(pgid, deadline).await {
            return;
        }

        warn!("Process group {} ignored SIGTERM, killing", pgid);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!("killpg({}, SIGKILL) failed: {}", pgid, e);
        }
        if !wait_for_group_exit(pgid, Instant::now() + self.kill_wait).await {
            warn!("Process group {} still alive after SIGKILL", pgid);
        }
    }

    fn pgid(&self) -> Option<Pid> {
        self.pid.map(|pid| Pid::from_raw(pid as i32))
    }

    fn signal(&self, signal: Signal, child: &mut Child) {
        if let Some(pgid) = self.pgid() {
            match killpg(pgid, signal) {
                Ok(()) => return,
                Err(e) => debug!("killpg({}, {:?}) failed: {}", pgid, signal, e),
            }
        }

        if let Err(e) = child.start_kill() {
            debug!("start_kill failed: {}", e);
        }
    }

    fn finish_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!("Server handle dropped while running, killing (pid: {:?})", self.pid);
            if let Some(pgid) = self.pid.map(|pid| Pid::from_raw(pid as i32)) {
                let _ = killpg(pgid, Signal::SIGKILL);
            }
            let _ = child.start_kill();
        }
        self.finish_readers();
    }
}

/// Whether any process of group `pgid` still exists
fn group_alive(pgid: Pid) -> bool {
    killpg(pgid, None).is_ok()
}

/// Poll until the group is empty or `deadline` passes
async fn wait_for_group_exit(pgid: Pid, deadline: Instant) -> bool {
    loop {
        if !group_alive(pgid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(GROUP_POLL).await;
    }
}

fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

fn forward_lines<R>(stream: R, sink: Arc<LogSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.push(line);
        }
    })
}

/// Run one setup command to completion; a non-zero exit fails with the
/// combined output attached
pub async fn run_setup_command(
    step: SetupStep,
    command: &str,
    app_dir: &Path,
    env: &[(String, String)],
    limit: Duration,
) -> E2eResult<()> {
    info!("Running {}: {}", step, command);

    // One stream, so the captured output keeps stdout/stderr interleaving
    let mut cmd = shell(&format!("exec 2>&1\n{command}"));
    cmd.current_dir(app_dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let output = match timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|e| {
            E2eError::ServerStartup(format!("failed to run `{}`: {}", command, e))
        })?,
        Err(_) => {
            return Err(E2eError::SetupCommandTimeout {
                step,
                command: command.to_string(),
                timeout: limit,
            })
        }
    };

    if output.status.success() {
        debug!("{} finished", step);
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
    }

    Err(E2eError::SetupCommandFailed {
        step,
        command: command.to_string(),
        code: output.status.code(),
        output: combined,
    })
}
