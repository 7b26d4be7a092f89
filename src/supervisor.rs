//! Supervision of long-lived child processes (dev servers).
//!
//! Every task runs in its own process group so shutdown can kill the whole
//! tree with one signal to the negative PID.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{Result, WorkgraphError};
use crate::ui::UiSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Stopped,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub pid: u32,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub detected_port: Option<u16>,
}

pub struct TaskSupervisor {
    sink: Arc<dyn UiSink>,
    tasks: Mutex<BTreeMap<String, TaskRecord>>,
    clear_re: Regex,
    port_re: Regex,
}

impl TaskSupervisor {
    pub fn new(sink: Arc<dyn UiSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            tasks: Mutex::new(BTreeMap::new()),
            // Terminal-clear sequences would wipe the host UI.
            clear_re: Regex::new(r"\x1b\[[0-9;?]*[HJ]|\x1bc").unwrap(),
            port_re: Regex::new(r"(?i)port\s*:?\s*(\d{2,5})|https?://[^\s/:]+:(\d{2,5})")
                .unwrap(),
        })
    }

    /// Spawn a long-lived task in its own process group. Output is
    /// line-buffered, escape-stripped, prefixed with the task short-name,
    /// and forwarded to the sink.
    pub fn spawn_task(
        self: &Arc<Self>,
        id: &str,
        name: &str,
        argv: &[String],
        cwd: &Path,
    ) -> Result<u32> {
        if argv.is_empty() {
            return Err(WorkgraphError::TaskError(format!(
                "empty command for task '{}'",
                id
            )));
        }
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
        let mut child = cmd.spawn().map_err(|e| {
            WorkgraphError::TaskError(format!("failed to spawn task '{}': {}", id, e))
        })?;
        let pid = child.id();

        self.tasks.lock().unwrap().insert(
            id.to_string(),
            TaskRecord {
                id: id.to_string(),
                name: name.to_string(),
                pid,
                status: TaskStatus::Running,
                started_at: Utc::now(),
                ended_at: None,
                detected_port: None,
            },
        );
        self.sink
            .add_task(id, name, pid, TaskStatus::Running.as_str());
        info!("task '{}' started (pid {})", id, pid);

        let short = short_name(name).to_string();
        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(id, &short, stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(id, &short, stderr);
        }

        // Reaper: record how the task ended unless shutdown got there first.
        let supervisor = Arc::clone(self);
        let task_id = id.to_string();
        std::thread::spawn(move || match child.wait() {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                let ended = if code == 0 {
                    TaskStatus::Stopped
                } else {
                    TaskStatus::Error
                };
                let mut changed = false;
                {
                    let mut tasks = supervisor.tasks.lock().unwrap();
                    if let Some(record) = tasks.get_mut(&task_id) {
                        if record.status == TaskStatus::Running {
                            record.status = ended;
                            record.ended_at = Some(Utc::now());
                            changed = true;
                        }
                    }
                }
                if changed {
                    supervisor.sink.update_task(&task_id, ended.as_str());
                    supervisor
                        .sink
                        .task_log(&format!("task '{}' exited with code {}", task_id, code));
                }
            }
            Err(e) => warn!("failed to reap task '{}': {}", task_id, e),
        });

        Ok(pid)
    }

    fn spawn_reader<R: Read + Send + 'static>(self: &Arc<Self>, id: &str, short: &str, source: R) {
        let supervisor = Arc::clone(self);
        let task_id = id.to_string();
        let short = short.to_string();
        std::thread::spawn(move || {
            for line in BufReader::new(source).lines().map_while(|l| l.ok()) {
                let line = supervisor.clear_re.replace_all(&line, "");
                if let Some(port) = supervisor.detect_port(&line) {
                    let mut notify = false;
                    {
                        let mut tasks = supervisor.tasks.lock().unwrap();
                        if let Some(record) = tasks.get_mut(&task_id) {
                            if record.detected_port.is_none() {
                                record.detected_port = Some(port);
                                notify = true;
                            }
                        }
                    }
                    if notify {
                        supervisor.sink.update_task_port(&task_id, port);
                    }
                }
                supervisor.sink.task_log(&format!("[{}] {}", short, line));
            }
        });
    }

    fn detect_port(&self, line: &str) -> Option<u16> {
        let caps = self.port_re.captures(line)?;
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse::<u16>().ok())
            .filter(|p| *p > 0)
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.lock().unwrap().is_empty()
    }

    /// Deliver SIGKILL to every supervised task's process group; retry the
    /// positive PID when the group signal fails. Records outcome per task.
    pub fn kill_all(&self) {
        let snapshot: Vec<TaskRecord> = self.tasks.lock().unwrap().values().cloned().collect();
        for record in snapshot {
            if record.status != TaskStatus::Running {
                continue;
            }
            // Stop the reaper from reporting this as a task exit.
            {
                let mut tasks = self.tasks.lock().unwrap();
                if let Some(r) = tasks.get_mut(&record.id) {
                    r.status = TaskStatus::Stopped;
                    r.ended_at = Some(Utc::now());
                }
            }
            let group = Pid::from_raw(-(record.pid as i32));
            let result = kill(group, Signal::SIGKILL)
                .or_else(|_| kill(Pid::from_raw(record.pid as i32), Signal::SIGKILL));
            match result {
                Ok(()) => info!("killed task '{}' (pid {})", record.id, record.pid),
                Err(e) => warn!("failed to kill task '{}' (pid {}): {}", record.id, record.pid, e),
            }
            self.sink
                .update_task(&record.id, TaskStatus::Stopped.as_str());
            self.sink.remove_task(&record.id);
        }
    }
}

/// Display prefix: the last segment of a scoped name.
fn short_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
