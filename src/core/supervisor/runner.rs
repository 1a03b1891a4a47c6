//! Subcommand runner
//!
//! Re-invokes the agent executable as an isolated worker process for one job.
//! Structured parameters travel through private temp files, never argv, so
//! secrets stay out of process listings. Worker stdout and stderr are tee'd
//! line by line to a log file, an optional [`LogSink`] and optionally the
//! agent's own streams; stderr is also captured to a crash file.
//!
//! Every temp file is owned by a [`NamedTempFile`] and removed when the run
//! ends, including when the run future is dropped or unwinds.
//! [`SubcommandRunner::run_keep_log_file`] hands the log file to the caller.

use super::canceller::{signal_process_tree, TreeSignal};
use super::log_sink::{LogSink, OutputStream};
use super::registry::{ProcessRegistry, Registration};
use crate::core::events::{AgentEvent, EventPublisher};
use crate::domain::{AgentError, Result, SubprocessError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// The only command name that is registered and therefore cancellable
pub const EXPORT_COMMAND: &str = "export";

/// Crash output forwarded to the control plane is truncated to its tail
const MAX_CRASH_OUTPUT: usize = 64 * 1024;

const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Passed to the worker as `--pinpoint-root`
    pub state_root: PathBuf,
    /// Where temp files are created; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
    /// Time a cancelled worker gets to exit before it is killed
    pub cancel_grace: Duration,
    /// Echo worker output on the agent's own stdout/stderr
    pub echo_output: bool,
}

/// Parameters of one invocation
#[derive(Debug, Clone)]
pub struct RunParams {
    command: String,
    correlation_id: String,
    agent_config: Vec<u8>,
    integrations: Vec<u8>,
    extra_args: Vec<String>,
    capture_output: bool,
}

impl RunParams {
    pub fn new(command: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            correlation_id: correlation_id.into(),
            agent_config: b"{}".to_vec(),
            integrations: b"[]".to_vec(),
            extra_args: Vec::new(),
            capture_output: false,
        }
    }

    /// Serializes the document passed through `--agent-config-file`
    pub fn agent_config<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.agent_config = serde_json::to_vec(value)?;
        Ok(self)
    }

    /// Serializes the document passed through `--integrations-file`
    pub fn integrations<T: Serialize>(mut self, value: &T) -> Result<Self> {
        self.integrations = serde_json::to_vec(value)?;
        Ok(self)
    }

    /// Appends an extra worker argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Expects the worker to write one JSON document to `--output-file`
    pub fn capture_output(mut self) -> Self {
        self.capture_output = true;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Output of [`SubcommandRunner::run_keep_log_file`]
#[derive(Debug)]
pub struct RunOutput<T> {
    /// Decoded result document, when output capture was requested
    pub output: Option<T>,
    /// Combined worker log; the caller owns and removes it
    pub log_file: PathBuf,
}

/// Spawns and supervises worker processes
pub struct SubcommandRunner {
    executable: PathBuf,
    prefix_args: Vec<String>,
    registry: Arc<ProcessRegistry>,
    publisher: Arc<dyn EventPublisher>,
    log_sink: Option<Arc<dyn LogSink>>,
    options: RunnerOptions,
}

struct TempFiles {
    agent_config: NamedTempFile,
    integrations: NamedTempFile,
    output: Option<NamedTempFile>,
    crash: NamedTempFile,
    log: NamedTempFile,
}

#[derive(Clone)]
struct Tee {
    correlation_id: String,
    log: Arc<Mutex<std::fs::File>>,
    sink: Option<Arc<dyn LogSink>>,
    echo: bool,
}

impl SubcommandRunner {
    /// Runner that re-invokes the current executable
    pub fn new(
        registry: Arc<ProcessRegistry>,
        publisher: Arc<dyn EventPublisher>,
        options: RunnerOptions,
    ) -> Result<Self> {
        let executable = std::env::current_exe().map_err(|e| {
            AgentError::Other(format!("Failed to resolve current executable: {e}"))
        })?;
        Ok(Self {
            executable,
            prefix_args: Vec::new(),
            registry,
            publisher,
            log_sink: None,
            options,
        })
    }

    /// Runs `executable prefix_args... <command> ...` instead of the current executable
    pub fn with_executable(
        mut self,
        executable: impl Into<PathBuf>,
        prefix_args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.executable = executable.into();
        self.prefix_args = prefix_args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Runs the worker and removes every temp file afterwards
    pub async fn run<T: DeserializeOwned>(&self, params: RunParams) -> Result<Option<T>> {
        let (output, _) = self.execute(params, false).await?;
        Ok(output)
    }

    /// Runs the worker and keeps its log file for the caller
    ///
    /// The log file is kept only when the run succeeds.
    pub async fn run_keep_log_file<T: DeserializeOwned>(
        &self,
        params: RunParams,
    ) -> Result<RunOutput<T>> {
        let (output, log_file) = self.execute(params, true).await?;
        let log_file = log_file
            .ok_or_else(|| AgentError::Other("Worker log file was not kept".to_string()))?;
        Ok(RunOutput { output, log_file })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        params: RunParams,
        keep_log: bool,
    ) -> Result<(Option<T>, Option<PathBuf>)> {
        let command = params.command.clone();
        let files = self.create_temp_files(&params)?;

        let mut registration = if command == EXPORT_COMMAND {
            Some(self.registry.register(&command)?)
        } else {
            None
        };

        let args = self.worker_args(&params, &files);
        tracing::info!(
            command = %command,
            correlation_id = %params.correlation_id,
            "Starting subcommand"
        );

        let mut child = Command::new(&self.executable)
            .args(&self.prefix_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SubprocessError::Spawn {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if let (Some(registration), Some(pid)) = (&registration, child.id()) {
            registration.set_pid(pid);
        }

        let readers = self.spawn_readers(&mut child, &params.correlation_id, &files)?;
        let (status, cancelled) = self
            .wait_for_exit(&mut child, registration.as_mut(), &command)
            .await?;
        drain(readers).await;
        drop(registration);

        tracing::info!(
            command = %command,
            correlation_id = %params.correlation_id,
            code = ?status.code(),
            cancelled,
            "Subcommand exited"
        );

        if !status.success() {
            if cancelled {
                return Err(AgentError::Cancelled);
            }
            return Err(self.crash_error(&params, status, files.crash.path()).await);
        }

        let output = match &files.output {
            Some(file) => Some(decode_output(&command, file.path())?),
            None => None,
        };

        let log_file = if keep_log {
            let (_, path) = files.log.keep().map_err(|e| {
                AgentError::Io(format!("Failed to keep worker log file: {e}"))
            })?;
            Some(path)
        } else {
            None
        };

        Ok((output, log_file))
    }

    fn create_temp_files(&self, params: &RunParams) -> Result<TempFiles> {
        let dir = self
            .options
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&dir)?;

        Ok(TempFiles {
            agent_config: param_file(&dir, "agent-config", &params.agent_config)?,
            integrations: param_file(&dir, "integrations", &params.integrations)?,
            output: if params.capture_output {
                Some(temp_file(&dir, "output", ".json")?)
            } else {
                None
            },
            crash: temp_file(&dir, "crash", ".log")?,
            log: temp_file(&dir, "log", ".log")?,
        })
    }

    fn worker_args(&self, params: &RunParams, files: &TempFiles) -> Vec<String> {
        let mut args = vec![
            params.command.clone(),
            "--agent-config-file".to_string(),
            path_arg(files.agent_config.path()),
            "--integrations-file".to_string(),
            path_arg(files.integrations.path()),
            "--log-format".to_string(),
            "json".to_string(),
        ];
        if let Some(output) = &files.output {
            args.push("--output-file".to_string());
            args.push(path_arg(output.path()));
        }
        args.extend(params.extra_args.iter().cloned());
        args.push(format!("--pinpoint-root={}", self.options.state_root.display()));
        args
    }

    fn spawn_readers(
        &self,
        child: &mut Child,
        correlation_id: &str,
        files: &TempFiles,
    ) -> Result<Vec<JoinHandle<()>>> {
        let tee = Tee {
            correlation_id: correlation_id.to_string(),
            log: Arc::new(Mutex::new(files.log.reopen()?)),
            sink: self.log_sink.clone(),
            echo: self.options.echo_output,
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(tee_lines(
                stdout,
                OutputStream::Stdout,
                tee.clone(),
                None,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(tee_lines(
                stderr,
                OutputStream::Stderr,
                tee,
                Some(files.crash.reopen()?),
            )));
        }
        Ok(readers)
    }

    /// Waits for the child. Returns its status and whether it was cancelled.
    async fn wait_for_exit(
        &self,
        child: &mut Child,
        registration: Option<&mut Registration>,
        command: &str,
    ) -> Result<(ExitStatus, bool)> {
        let wait_err = |e: std::io::Error| SubprocessError::Wait {
            command: command.to_string(),
            message: e.to_string(),
        };

        let Some(registration) = registration else {
            return Ok((child.wait().await.map_err(wait_err)?, false));
        };

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(wait_err)?;
                return Ok((status, registration.is_cancelled()));
            }
            _ = registration.cancelled() => {}
        }

        tracing::info!(
            command,
            grace_ms = self.options.cancel_grace.as_millis() as u64,
            "Waiting for cancelled subcommand to exit"
        );
        let status = match tokio::time::timeout(self.options.cancel_grace, child.wait()).await {
            Ok(status) => status.map_err(wait_err)?,
            Err(_) => {
                tracing::warn!(command, "Cancelled subcommand did not exit in time, killing");
                // Descendants are found through the root, so the tree goes first.
                if let Some(pid) = child.id() {
                    signal_process_tree(pid, TreeSignal::Kill);
                }
                if let Err(e) = child.start_kill() {
                    tracing::warn!(command, error = %e, "Failed to kill subcommand");
                }
                child.wait().await.map_err(wait_err)?
            }
        };
        Ok((status, true))
    }

    /// Builds the error for a non-zero exit, forwarding crash output first
    async fn crash_error(&self, params: &RunParams, status: ExitStatus, crash_path: &Path) -> AgentError {
        let output = match std::fs::read(crash_path) {
            Ok(bytes) => tail(&bytes, MAX_CRASH_OUTPUT),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read crash output");
                String::new()
            }
        };

        if output.trim().is_empty() {
            return SubprocessError::Exited {
                command: params.command.clone(),
                code: status.code(),
            }
            .into();
        }

        tracing::error!(
            command = %params.command,
            correlation_id = %params.correlation_id,
            code = ?status.code(),
            "Subcommand crashed"
        );
        let report = AgentEvent::CrashReport {
            correlation_id: params.correlation_id.clone(),
            command: params.command.clone(),
            exit_code: status.code(),
            output: output.clone(),
        };
        if let Err(e) = self.publisher.publish(report).await {
            tracing::warn!(error = %e, "Failed to publish crash report");
        }

        SubprocessError::Crashed {
            command: params.command.clone(),
            code: status.code(),
            output,
        }
        .into()
    }
}

async fn tee_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: OutputStream,
    tee: Tee,
    mut crash: Option<std::fs::File>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%stream, error = %e, "Failed reading subcommand output");
                break;
            }
        }

        if let Ok(mut log) = tee.log.lock() {
            let _ = log.write_all(&buf);
        }
        if let Some(crash) = crash.as_mut() {
            let _ = crash.write_all(&buf);
        }
        if tee.echo {
            let _ = match stream {
                OutputStream::Stdout => std::io::stdout().lock().write_all(&buf),
                OutputStream::Stderr => std::io::stderr().lock().write_all(&buf),
            };
        }
        if let Some(sink) = &tee.sink {
            sink.write_line(&tee.correlation_id, stream, &String::from_utf8_lossy(&buf));
        }
    }
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            tracing::warn!("Subcommand output still open after exit, detaching reader");
            abort.abort();
        }
    }
}

fn decode_output<T: DeserializeOwned>(command: &str, path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| AgentError::InvalidOutput {
        command: command.to_string(),
        message: e.to_string(),
    })
}

fn temp_file(dir: &Path, name: &str, suffix: &str) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(&format!("hostagent-{name}-"))
        .suffix(suffix)
        .tempfile_in(dir)?)
}

fn param_file(dir: &Path, name: &str, contents: &[u8]) -> Result<NamedTempFile> {
    let mut file = temp_file(dir, name, ".json")?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn tail(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
