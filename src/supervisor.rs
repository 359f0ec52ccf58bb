//! Launches and monitors the child processes declared in configuration.
//!
//! One child per `SubprocessSpec`, spawned at startup before the listener
//! opens. Each stdout line becomes an info-level record, each stderr line
//! an error-level record, and the exit becomes an info-level record
//! regardless of the exit code. There is no restart policy: a crashed
//! child stays dead and the gateway keeps serving.

use crate::config::SubprocessSpec;
use crate::logging::{Level, LogRecord, SharedSink};
use anyhow::Context;
use dashmap::DashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

pub struct Supervisor {
    working_dir: PathBuf,
    sink: SharedSink,
    /// Pids of still-running children, for shutdown. The child handle
    /// itself is owned by the monitor task.
    pids: Arc<DashMap<String, u32>>,
}

impl Supervisor {
    pub fn new(working_dir: PathBuf, sink: SharedSink) -> Self {
        Self {
            working_dir,
            sink,
            pids: Arc::new(DashMap::new()),
        }
    }

    /// Launch every configured subprocess. A spawn failure is logged at
    /// error level and never takes the gateway down.
    pub fn launch_all(&self, specs: &[(String, SubprocessSpec)]) {
        for (name, spec) in specs {
            if let Err(e) = self.launch(name, spec) {
                self.sink.emit(LogRecord::plain(
                    Level::Error,
                    format!("Failed to launch {name}: {e:#}"),
                ));
            }
        }
    }

    /// Spawn one child and start streaming its output into the sink.
    pub fn launch(&self, name: &str, spec: &SubprocessSpec) -> anyhow::Result<()> {
        let cwd = match &spec.cwd {
            Some(dir) => self.working_dir.join(dir),
            None => self.working_dir.clone(),
        };

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("cannot spawn {:?}", spec.command))?;

        if let Some(pid) = child.id() {
            self.pids.insert(name.to_string(), pid);
            debug!(app = name, pid, "Subprocess spawned");
        }

        // Emitted right after spawn, before any output arrives.
        self.sink
            .emit(LogRecord::subprocess(Level::Info, name, "Started"));

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let sink = Arc::clone(&self.sink);
        let pids = Arc::clone(&self.pids);
        let name = name.to_string();

        tokio::spawn(async move {
            let out_task = stdout.map(|stream| {
                tokio::spawn(stream_lines(
                    stream,
                    Level::Info,
                    name.clone(),
                    Arc::clone(&sink),
                ))
            });
            let err_task = stderr.map(|stream| {
                tokio::spawn(stream_lines(
                    stream,
                    Level::Error,
                    name.clone(),
                    Arc::clone(&sink),
                ))
            });

            // Drain both streams to EOF before reaping, so the exit record
            // always comes after the last output record.
            if let Some(task) = out_task {
                let _ = task.await;
            }
            if let Some(task) = err_task {
                let _ = task.await;
            }

            let status = child.wait().await;
            pids.remove(&name);

            match status {
                Ok(status) => {
                    let data = match status.code() {
                        Some(code) => format!("Exited with code {code}"),
                        None => "Exited without a code (terminated by signal)".to_string(),
                    };
                    sink.emit(LogRecord::subprocess(Level::Info, &name, data));
                }
                Err(e) => {
                    sink.emit(LogRecord::subprocess(
                        Level::Error,
                        &name,
                        format!("Failed to reap: {e}"),
                    ));
                }
            }
        });

        Ok(())
    }

    /// Number of children still registered (not yet exited).
    pub fn running(&self) -> usize {
        self.pids.len()
    }

    /// Ask every surviving child to terminate. Called once when the
    /// gateway shuts down; children are never restarted.
    pub fn shutdown(&self) {
        for entry in self.pids.iter() {
            let (name, pid) = (entry.key(), *entry.value());
            debug!(app = %name, pid, "Sending SIGTERM to subprocess");

            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }
}

/// Read a child output stream line by line, one record per line.
async fn stream_lines<R>(stream: R, level: Level, name: String, sink: SharedSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.emit(LogRecord::subprocess(level, &name, line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use std::time::Duration;

    fn spec(command: &str, args: &[&str]) -> SubprocessSpec {
        SubprocessSpec {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
        }
    }

    async fn wait_for_exit_record(sink: &MemorySink) -> Vec<LogRecord> {
        for _ in 0..100 {
            let records = sink.records();
            let exited = records.iter().any(|r| {
                matches!(r, LogRecord::Subprocess { data, .. } if data.starts_with("Exited"))
            });
            if exited {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("subprocess never produced an exit record");
    }

    #[tokio::test]
    async fn test_echo_lifecycle_records_in_order() {
        let sink = MemorySink::new();
        let supervisor = Supervisor::new(PathBuf::from("."), sink.clone());
        supervisor.launch("greeter", &spec("echo", &["hi"])).unwrap();

        let records = wait_for_exit_record(&sink).await;
        assert_eq!(
            records[0],
            LogRecord::subprocess(Level::Info, "greeter", "Started")
        );
        assert!(records.iter().any(|r| matches!(
            r,
            LogRecord::Subprocess { level: Level::Info, app, data } if app == "greeter" && data.contains("hi")
        )));
        assert_eq!(
            records.last().unwrap(),
            &LogRecord::subprocess(Level::Info, "greeter", "Exited with code 0")
        );

        // Output must land between Started and Exited.
        let started = records
            .iter()
            .position(|r| matches!(r, LogRecord::Subprocess { data, .. } if data == "Started"))
            .unwrap();
        let output = records
            .iter()
            .position(|r| matches!(r, LogRecord::Subprocess { data, .. } if data.contains("hi")))
            .unwrap();
        let exited = records
            .iter()
            .position(|r| matches!(r, LogRecord::Subprocess { data, .. } if data.starts_with("Exited")))
            .unwrap();
        assert!(started < output && output < exited);
    }

    #[tokio::test]
    async fn test_stderr_lines_are_error_level() {
        let sink = MemorySink::new();
        let supervisor = Supervisor::new(PathBuf::from("."), sink.clone());
        supervisor
            .launch("noisy", &spec("sh", &["-c", "echo oops >&2"]))
            .unwrap();

        let records = wait_for_exit_record(&sink).await;
        assert!(records.iter().any(|r| matches!(
            r,
            LogRecord::Subprocess { level: Level::Error, app, data } if app == "noisy" && data == "oops"
        )));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_still_info() {
        let sink = MemorySink::new();
        let supervisor = Supervisor::new(PathBuf::from("."), sink.clone());
        supervisor
            .launch("failing", &spec("sh", &["-c", "exit 3"]))
            .unwrap();

        let records = wait_for_exit_record(&sink).await;
        assert!(records.contains(&LogRecord::subprocess(
            Level::Info,
            "failing",
            "Exited with code 3"
        )));
    }

    #[tokio::test]
    async fn test_missing_command_is_not_fatal() {
        let sink = MemorySink::new();
        let supervisor = Supervisor::new(PathBuf::from("."), sink.clone());
        supervisor.launch_all(&[(
            "ghost".to_string(),
            spec("definitely-not-a-real-command-xyz", &[]),
        )]);

        let records = sink.records();
        assert!(records.iter().any(|r| matches!(
            r,
            LogRecord::Plain { level: Level::Error, text } if text.contains("ghost")
        )));
        assert_eq!(supervisor.running(), 0);
    }
}
