// src/core/supervisor/mod.rs

//! The process supervisor: launches the sibling data-plane processes, funnels
//! their stdio into the log ring, and restarts crashed children with a fixed
//! delay up to a budget.

pub mod logs;
pub mod service;

use crate::config::ServiceConfig;
use crate::core::XpodError;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};

pub use logs::{LogEntry, LogLevel, LogRing, MAX_LOG_BUFFER};
pub use service::{ServiceReport, ServiceState, ServiceStatus};

/// Crash-restart budget per service; an operator reset re-arms it.
pub const MAX_RESTARTS: u32 = 5;
const RESTART_DELAY: Duration = Duration::from_secs(2);

pub type StatusChangeHandler = Arc<dyn Fn(&str, ServiceStatus) + Send + Sync>;

struct ServiceRuntime {
    config: ServiceConfig,
    state: ServiceState,
    manually_stopped: bool,
}

pub struct ServiceSupervisor {
    services: DashMap<String, ServiceRuntime>,
    logs: LogRing,
    shutting_down: AtomicBool,
    status_handler: RwLock<Option<StatusChangeHandler>>,
}

impl Default for ServiceSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceSupervisor {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            logs: LogRing::new(MAX_LOG_BUFFER),
            shutting_down: AtomicBool::new(false),
            status_handler: RwLock::new(None),
        }
    }

    pub fn register(&self, config: ServiceConfig) -> Result<(), XpodError> {
        let name = config.name.clone();
        if self.services.contains_key(&name) {
            return Err(XpodError::AlreadyExists(format!("service '{name}'")));
        }
        self.services.insert(
            name,
            ServiceRuntime {
                config,
                state: ServiceState::default(),
                manually_stopped: false,
            },
        );
        Ok(())
    }

    pub fn set_status_change_handler(&self, handler: StatusChangeHandler) {
        *self.status_handler.write() = Some(handler);
    }

    fn notify(&self, name: &str, status: ServiceStatus) {
        if let Some(handler) = self.status_handler.read().as_ref() {
            handler(name, status);
        }
    }

    pub fn add_log(&self, source: &str, level: LogLevel, message: &str) {
        self.logs.push(LogEntry::new(level, source, message));
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.snapshot()
    }

    pub fn logs_tail(
        &self,
        level: Option<LogLevel>,
        source: Option<&str>,
        limit: usize,
    ) -> Vec<LogEntry> {
        self.logs.tail(level, source, limit)
    }

    pub fn status(&self, name: &str) -> Option<ServiceReport> {
        self.services
            .get(name)
            .map(|runtime| ServiceReport::new(name, &runtime.state))
    }

    pub fn all_status(&self) -> Vec<ServiceReport> {
        let mut reports: Vec<ServiceReport> = self
            .services
            .iter()
            .map(|entry| ServiceReport::new(entry.key(), &entry.state))
            .collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }

    /// Re-arms the crash budget of every service.
    pub fn reset_restart_counts(&self) {
        for mut entry in self.services.iter_mut() {
            entry.state.restart_count = 0;
        }
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Spawns a registered service. A no-op when it is already starting or
    /// running.
    pub async fn start(self: &Arc<Self>, name: &str) -> Result<(), XpodError> {
        let config = {
            let mut runtime = self
                .services
                .get_mut(name)
                .ok_or_else(|| XpodError::NotFound(format!("service '{name}'")))?;
            if matches!(
                runtime.state.status,
                ServiceStatus::Starting | ServiceStatus::Running
            ) {
                return Ok(());
            }
            runtime.manually_stopped = false;
            runtime.state.status = ServiceStatus::Starting;
            runtime.state.pid = None;
            runtime.state.start_time = None;
            runtime.config.clone()
        };
        self.notify(name, ServiceStatus::Starting);

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        // Own process group so stop() can take the whole tree down.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Some(mut runtime) = self.services.get_mut(name) {
                    runtime.state.status = ServiceStatus::Stopped;
                }
                self.notify(name, ServiceStatus::Stopped);
                return Err(XpodError::Internal(format!(
                    "failed to spawn service '{name}': {e}"
                )));
            }
        };
        let pid = child.id();
        info!("service '{name}' started (pid {pid:?})");
        self.add_log("supervisor", LogLevel::Info, &format!("started '{name}'"));

        if let Some(stdout) = child.stdout.take() {
            self.spawn_line_reader(name, stdout, LogLevel::Info);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_line_reader(name, stderr, LogLevel::Error);
        }

        if let Some(mut runtime) = self.services.get_mut(name) {
            runtime.state.status = ServiceStatus::Running;
            runtime.state.pid = pid;
            runtime.state.start_time = Some(chrono::Utc::now());
        }
        self.notify(name, ServiceStatus::Running);

        let supervisor = Arc::clone(self);
        let service = name.to_string();
        tokio::spawn(async move {
            let exit = child.wait().await;
            supervisor.handle_exit(&service, exit).await;
        });
        Ok(())
    }

    /// Boxed entry point for callers that need to await `start` from inside
    /// another async fn without re-introducing a recursive opaque future type.
    fn start_boxed<'a>(
        self: &'a Arc<Self>,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), XpodError>> + Send + 'a>> {
        Box::pin(self.start(name))
    }

    /// Stops a service. The state flips to `stopped` before the signal goes
    /// out, which is what suppresses the auto-restart in the exit handler.
    pub fn stop(&self, name: &str) -> Result<(), XpodError> {
        let pid = {
            let mut runtime = self
                .services
                .get_mut(name)
                .ok_or_else(|| XpodError::NotFound(format!("service '{name}'")))?;
            runtime.manually_stopped = true;
            runtime.state.status = ServiceStatus::Stopped;
            runtime.state.start_time = None;
            runtime.state.pid.take()
        };
        self.notify(name, ServiceStatus::Stopped);
        if let Some(pid) = pid {
            info!("stopping service '{name}' (pid {pid})");
            self.add_log("supervisor", LogLevel::Info, &format!("stopping '{name}'"));
            kill_process_tree(pid, libc::SIGTERM);
        }
        Ok(())
    }

    pub async fn start_all(self: &Arc<Self>) -> Result<(), XpodError> {
        let names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.start(&name).await?;
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        let names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(e) = self.stop(&name) {
                warn!("stop of '{name}' failed: {e}");
            }
        }
    }

    /// Last-resort sweep on host exit: SIGKILL whatever is still alive.
    pub fn kill_all_now(&self) {
        for entry in self.services.iter() {
            if let Some(pid) = entry.state.pid {
                warn!("killing leftover service '{}' (pid {pid})", entry.key());
                kill_process_tree(pid, libc::SIGKILL);
            }
        }
    }

    async fn handle_exit(
        self: &Arc<Self>,
        name: &str,
        exit: std::io::Result<std::process::ExitStatus>,
    ) {
        let code = exit.as_ref().ok().and_then(|status| status.code());
        let clean = code == Some(0);

        let (new_status, should_restart, attempt) = {
            let Some(mut runtime) = self.services.get_mut(name) else {
                return;
            };
            // stop() already reaped the state; nothing left to do.
            if runtime.manually_stopped && runtime.state.status == ServiceStatus::Stopped {
                runtime.state.last_exit_code = code;
                return;
            }
            runtime.state.pid = None;
            runtime.state.start_time = None;
            runtime.state.last_exit_code = code;

            if clean || runtime.manually_stopped || self.shutting_down.load(Ordering::SeqCst) {
                runtime.state.status = ServiceStatus::Stopped;
                (ServiceStatus::Stopped, false, runtime.state.restart_count)
            } else if runtime.state.restart_count < MAX_RESTARTS {
                runtime.state.restart_count += 1;
                runtime.state.status = ServiceStatus::Crashed;
                (ServiceStatus::Crashed, true, runtime.state.restart_count)
            } else {
                runtime.state.status = ServiceStatus::Stopped;
                (ServiceStatus::Stopped, false, runtime.state.restart_count)
            }
        };
        self.notify(name, new_status);

        match exit {
            Ok(status) => {
                let level = if clean { LogLevel::Info } else { LogLevel::Warn };
                self.add_log("supervisor", level, &format!("'{name}' exited: {status}"));
            }
            Err(e) => {
                self.add_log(
                    "supervisor",
                    LogLevel::Error,
                    &format!("wait for '{name}' failed: {e}"),
                );
            }
        }

        if should_restart {
            warn!(
                "service '{name}' exited with {code:?}; restart {attempt}/{MAX_RESTARTS} in {RESTART_DELAY:?}"
            );
            let supervisor = Arc::clone(self);
            let service = name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(RESTART_DELAY).await;
                let still_wanted = supervisor
                    .services
                    .get(&service)
                    .map(|runtime| {
                        !runtime.manually_stopped
                            && runtime.state.status == ServiceStatus::Crashed
                    })
                    .unwrap_or(false);
                if still_wanted && !supervisor.shutting_down.load(Ordering::SeqCst) {
                    if let Err(e) = supervisor.start_boxed(&service).await {
                        error!("scheduled restart of '{service}' failed: {e}");
                    }
                }
            });
        } else if !clean {
            error!(
                "service '{name}' exited with {code:?}; giving up after {attempt} restarts"
            );
        }
    }

    fn spawn_line_reader<R>(self: &Arc<Self>, name: &str, reader: R, level: LogLevel)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let supervisor = Arc::clone(self);
        let source = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("[{source}] {line}");
                supervisor.logs.push(LogEntry::new(level, &source, &line));
            }
        });
    }
}

/// Signals the whole process group of `pid`, falling back to the process
/// itself when it has no group of its own.
fn kill_process_tree(pid: u32, signal: i32) {
    let pgid = pid as i32;
    let killed = unsafe { libc::kill(-pgid, signal) };
    if killed != 0 {
        unsafe {
            libc::kill(pgid, signal);
        }
    }
}
