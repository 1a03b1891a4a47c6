//! Destinations for worker log lines

use serde_json::Value;
use std::fmt;

/// Stream a worker line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Receives every line a worker prints, keyed by correlation id
pub trait LogSink: Send + Sync {
    fn write_line(&self, correlation_id: &str, stream: OutputStream, line: &str);
}

/// Re-emits worker lines through the agent's own `tracing` subscriber
///
/// JSON lines keep their level and message; anything else is logged verbatim
/// at info (stdout) or warn (stderr).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write_line(&self, correlation_id: &str, stream: OutputStream, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }

        let (level, message) = match serde_json::from_str::<Value>(line) {
            Ok(json) => {
                let level = json
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("INFO")
                    .to_ascii_uppercase();
                let message = json
                    .pointer("/fields/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| line.to_string());
                (level, message)
            }
            Err(_) => {
                let level = match stream {
                    OutputStream::Stdout => "INFO",
                    OutputStream::Stderr => "WARN",
                };
                (level.to_string(), line.to_string())
            }
        };

        match level.as_str() {
            "ERROR" => tracing::error!(correlation_id, %stream, worker = true, "{message}"),
            "WARN" => tracing::warn!(correlation_id, %stream, worker = true, "{message}"),
            "DEBUG" => tracing::debug!(correlation_id, %stream, worker = true, "{message}"),
            "TRACE" => tracing::trace!(correlation_id, %stream, worker = true, "{message}"),
            _ => tracing::info!(correlation_id, %stream, worker = true, "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_sink_accepts_any_line() {
        let sink = TracingLogSink;
        sink.write_line("job-1", OutputStream::Stdout, r#"{"level":"WARN","fields":{"message":"slow"}}"#);
        sink.write_line("job-1", OutputStream::Stderr, "thread 'main' panicked");
        sink.write_line("job-1", OutputStream::Stdout, "");
    }

    #[test]
    fn test_stream_display() {
        assert_eq!(OutputStream::Stdout.to_string(), "stdout");
        assert_eq!(OutputStream::Stderr.to_string(), "stderr");
    }
}
