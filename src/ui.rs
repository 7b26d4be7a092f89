//! The orchestrator's view of the terminal: an event sink. Rendering is
//! swappable; the built-in implementation is line-oriented stdout.

use owo_colors::OwoColorize;

use crate::executor::{BuildResult, Reporter, StepInfo};

pub trait UiSink: Send + Sync {
    fn log(&self, line: &str);
    fn task_log(&self, line: &str);
    fn set_status(&self, status: Option<&str>);
    fn add_task(&self, id: &str, name: &str, pid: u32, status: &str);
    fn update_task(&self, id: &str, status: &str);
    fn update_task_port(&self, id: &str, port: u16);
    fn remove_task(&self, id: &str);
    fn destroy(&self);
}

/// Plain line-oriented sink: every call degrades to a stdout line.
pub struct PlainSink;

impl UiSink for PlainSink {
    fn log(&self, line: &str) {
        println!("{}", line);
    }

    fn task_log(&self, line: &str) {
        println!("{}", line);
    }

    fn set_status(&self, status: Option<&str>) {
        if let Some(status) = status {
            println!("{} {}", "::".dimmed(), status);
        }
    }

    fn add_task(&self, id: &str, name: &str, pid: u32, status: &str) {
        println!(
            "{} {} [{}] started (pid {}, {})",
            "::".dimmed(),
            "task".bold(),
            name,
            pid,
            status
        );
        let _ = id;
    }

    fn update_task(&self, id: &str, status: &str) {
        println!("{} task {} is now {}", "::".dimmed(), id, status);
    }

    fn update_task_port(&self, id: &str, port: u16) {
        println!("{} task {} listening on port {}", "::".dimmed(), id, port);
    }

    fn remove_task(&self, id: &str) {
        println!("{} task {} removed", "::".dimmed(), id);
    }

    fn destroy(&self) {}
}

/// Bridges executor events onto a sink, prefixing streamed lines with the
/// owning project.
pub struct SinkReporter<'a> {
    pub sink: &'a dyn UiSink,
}

impl Reporter for SinkReporter<'_> {
    fn on_start(&self, info: &StepInfo) {
        let mode = if info.is_parallel { "parallel" } else { "serial" };
        self.sink.log(&format!(
            "[{}/{}] {} {} (wave {}/{}, {})",
            info.step,
            info.total_steps,
            "build".bold(),
            info.project,
            info.wave,
            info.total_waves,
            mode
        ));
    }

    fn on_output(&self, project: &str, line: &str, is_stderr: bool) {
        if is_stderr {
            self.sink.log(&format!("{} {} {}", project.dimmed(), "!".red(), line));
        } else {
            self.sink.log(&format!("{} {} {}", project.dimmed(), "|".dimmed(), line));
        }
    }

    fn on_complete(&self, result: &BuildResult) {
        if result.ok {
            self.sink.log(&format!(
                "{} {} ({} ms)",
                "ok".green().bold(),
                result.project,
                result.duration_ms
            ));
        } else {
            self.sink.log(&format!(
                "{} {} ({} ms)",
                "FAIL".red().bold(),
                result.project,
                result.duration_ms
            ));
        }
    }
}
