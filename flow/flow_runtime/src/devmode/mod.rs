//! Development-time front-end server management.
//!
//! One [`DevServerHandle`] exists per process. The first request that needs
//! the dev server starts it (or attaches to one left running by an earlier
//! process); everybody else waits for that start to finish. Requests under
//! the configured path prefix are then proxied to it.

pub mod port_file;
pub mod proxy;

pub use proxy::{ProxyRequest, ProxyResponse};

use crate::error::DevModeError;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Replaced by the assigned port in every command argument.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Also exported to the spawned process.
pub const PORT_ENV: &str = "FLOW_DEV_SERVER_PORT";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DevModeConfig {
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub port_file: PathBuf,
    /// Leave a server this process spawned running on shutdown so the next
    /// process can attach to it.
    pub reuse_dev_server: bool,
    pub path_prefix: String,
    pub ready_path: String,
    pub host: String,
    pub start_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl DevModeConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            working_dir: None,
            port_file: std::env::temp_dir().join("flow-dev-server.port"),
            reuse_dev_server: false,
            path_prefix: "/VAADIN/".to_string(),
            ready_path: "/".to_string(),
            host: "127.0.0.1".to_string(),
            start_timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }

    fn base_url(&self, port: u16) -> String {
        format!("http://{}:{port}", self.host)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DevServerStatus {
    NotStarted,
    Starting,
    Running { port: u16, owned: bool },
    Stopped,
    Failed(String),
}

struct RunningServer {
    port: u16,
    /// `None` when attached to a server some other process started.
    child: Option<Child>,
}

enum State {
    NotStarted,
    Starting,
    Running(RunningServer),
    Stopped,
    Failed(String),
}

pub struct DevServerHandle {
    config: DevModeConfig,
    state: Mutex<State>,
    changed: Condvar,
    agent: ureq::Agent,
}

impl DevServerHandle {
    pub fn new(config: DevModeConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .redirects(0)
            .timeout_connect(Duration::from_secs(2))
            .build();
        Self {
            config,
            state: Mutex::new(State::NotStarted),
            changed: Condvar::new(),
            agent,
        }
    }

    pub fn config(&self) -> &DevModeConfig {
        &self.config
    }

    pub fn status(&self) -> DevServerStatus {
        match &*self.lock_state() {
            State::NotStarted => DevServerStatus::NotStarted,
            State::Starting => DevServerStatus::Starting,
            State::Running(server) => DevServerStatus::Running {
                port: server.port,
                owned: server.child.is_some(),
            },
            State::Stopped => DevServerStatus::Stopped,
            State::Failed(reason) => DevServerStatus::Failed(reason.clone()),
        }
    }

    /// Returns the port of a running dev server, starting or attaching to
    /// one if needed. Only one caller performs the start; concurrent callers
    /// block until it succeeds or fails.
    pub fn ensure_started(&self) -> Result<u16, DevModeError> {
        let mut state = self.lock_state();
        loop {
            match &*state {
                State::Running(server) => return Ok(server.port),
                State::Stopped => return Err(DevModeError::Stopped),
                State::Failed(reason) => return Err(DevModeError::StartFailed(reason.clone())),
                State::Starting => {}
                State::NotStarted => break,
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state = State::Starting;
        drop(state);

        let result = self.start();

        let mut state = self.lock_state();
        let outcome = match result {
            Ok(server) if matches!(*state, State::Stopped) => {
                log::info!("dev server became ready after shutdown, stopping it");
                self.stop_server(server);
                Err(DevModeError::Stopped)
            }
            Ok(server) => {
                let port = server.port;
                log::info!("dev server running on port {port}");
                *state = State::Running(server);
                Ok(port)
            }
            Err(err) => {
                log::error!("dev server failed to start: {err}");
                if !matches!(*state, State::Stopped) {
                    *state = State::Failed(err.to_string());
                }
                Err(err)
            }
        };
        self.changed.notify_all();
        outcome
    }

    /// Forwards `request` to the dev server when its path is under the
    /// configured prefix. Returns `Ok(None)` for every other path.
    pub fn proxy(&self, request: &ProxyRequest) -> Result<Option<ProxyResponse>, DevModeError> {
        if !request.path.starts_with(&self.config.path_prefix) {
            return Ok(None);
        }
        let port = self.ensure_started()?;
        log::debug!("proxying {} {} to dev server", request.method, request.path);
        proxy::forward(&self.agent, &self.config.base_url(port), request).map(Some)
    }

    /// Stops the dev server if this process owns it and is not keeping it
    /// for reuse. Later calls are no-ops.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), State::Stopped);
        self.changed.notify_all();

        if let State::Running(server) = previous {
            match server.child {
                Some(_) if self.config.reuse_dev_server => {
                    log::info!("leaving dev server on port {} running for reuse", server.port);
                }
                Some(_) => self.stop_server(server),
                None => log::debug!("detaching from dev server on port {}", server.port),
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self) -> Result<RunningServer, DevModeError> {
        if let Some(port) = port_file::read_port(&self.config.port_file)? {
            if self.is_ready(port) {
                log::info!("attaching to existing dev server on port {port}");
                return Ok(RunningServer { port, child: None });
            }
            log::info!("dev server on port {port} is gone, starting a new one");
            port_file::remove(&self.config.port_file);
        }

        let port = reserve_port()?;
        let mut child = self.spawn(port)?;
        log::info!("started dev server (pid {}) on port {port}", child.id());

        let ready = port_file::write_port(&self.config.port_file, port)
            .and_then(|()| self.wait_until_ready(&mut child, port));
        match ready {
            Ok(()) => Ok(RunningServer {
                port,
                child: Some(child),
            }),
            Err(err) => {
                self.stop_server(RunningServer {
                    port,
                    child: Some(child),
                });
                Err(err)
            }
        }
    }

    fn spawn(&self, port: u16) -> Result<Child, DevModeError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or(DevModeError::EmptyCommand)?;
        let port_text = port.to_string();

        let mut command = Command::new(program);
        command
            .args(args.iter().map(|arg| arg.replace(PORT_PLACEHOLDER, &port_text)))
            .env(PORT_ENV, &port_text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command.spawn().map_err(DevModeError::Spawn)
    }

    fn wait_until_ready(&self, child: &mut Child, port: u16) -> Result<(), DevModeError> {
        let deadline = Instant::now() + self.config.start_timeout;
        let mut backoff = self.config.initial_backoff;

        loop {
            if let Some(status) = child.try_wait().map_err(DevModeError::Spawn)? {
                return Err(DevModeError::ExitedDuringStartup(status.to_string()));
            }
            if self.is_ready(port) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DevModeError::StartupTimeout(self.config.start_timeout));
            }
            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    /// Any HTTP answer counts as ready; only transport failures do not.
    fn is_ready(&self, port: u16) -> bool {
        let url = format!("{}{}", self.config.base_url(port), self.config.ready_path);
        match self.agent.get(&url).timeout(Duration::from_secs(1)).call() {
            Ok(_) | Err(ureq::Error::Status(..)) => true,
            Err(ureq::Error::Transport(err)) => {
                log::trace!("dev server on port {port} not ready: {err}");
                false
            }
        }
    }

    fn stop_server(&self, server: RunningServer) {
        let Some(mut child) = server.child else {
            return;
        };
        if let Err(err) = child.kill() {
            log::warn!("failed to stop dev server (pid {}): {err}", child.id());
        }
        if let Err(err) = child.wait() {
            log::warn!("failed to reap dev server (pid {}): {err}", child.id());
        }
        port_file::remove(&self.config.port_file);
        log::info!("dev server on port {} stopped", server.port);
    }
}

impl Drop for DevServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reserve_port() -> Result<u16, DevModeError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(DevModeError::PortReservation)?;
    let port = listener
        .local_addr()
        .map_err(DevModeError::PortReservation)?
        .port();
    Ok(port)
}
