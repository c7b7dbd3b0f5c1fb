//! Sink nodes: the final stage of every pipeline.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use warden_core::OutputFormat;

use crate::context::AuditContext;
use crate::error::AuditError;
use crate::event::Event;
use crate::node::{Node, NodeType};

/// Formatted bytes for `format`, or why they are unavailable.
fn formatted<'a>(
    op: &'static str,
    ctx: &AuditContext,
    event: &'a Option<Event>,
    format: OutputFormat,
) -> Result<&'a [u8], AuditError> {
    if ctx.is_cancelled() {
        return Err(AuditError::cancelled(op));
    }
    let Some(event) = event else {
        return Err(AuditError::invalid_parameter(op, "event is nil"));
    };
    event.format(format.as_str()).ok_or_else(|| {
        AuditError::invalid_parameter(op, format!("unable to retrieve event formatted as {format}"))
    })
}

/// Appends entries to a file, one per line.
///
/// The handle is held open between writes. [`Node::reopen`] closes and
/// reopens it, which is how rotated files are picked up.
pub struct FileSink {
    path: PathBuf,
    format: OutputFormat,
    mode: Option<u32>,
    file: Mutex<Option<File>>,
}

impl FileSink {
    /// Open `path` for appending. `mode` is applied after opening when set.
    pub fn new(
        path: impl Into<PathBuf>,
        format: OutputFormat,
        mode: Option<u32>,
    ) -> Result<Self, AuditError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(AuditError::invalid_parameter("FileSink::new", "path is required"));
        }

        let file = open_append(&path, mode)?;
        Ok(Self {
            path,
            format,
            mode,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sink_error(&self, source: std::io::Error) -> AuditError {
        AuditError::Sink {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn open_append(path: &Path, mode: Option<u32>) -> Result<File, AuditError> {
    let sink_error = |source| AuditError::Sink {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(sink_error)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(sink_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = mode {
            file.set_permissions(std::fs::Permissions::from_mode(mode))
                .map_err(sink_error)?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(file)
}

#[async_trait]
impl Node for FileSink {
    fn node_type(&self) -> NodeType {
        NodeType::Sink
    }

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError> {
        const OP: &str = "FileSink::process";

        let bytes = formatted(OP, ctx, &event, self.format)?;

        let mut guard = self
            .file
            .lock()
            .map_err(|_| AuditError::LockPoisoned("file sink"))?;

        // A failed reopen leaves no handle; try again on the next write.
        if guard.is_none() {
            *guard = Some(open_append(&self.path, self.mode)?);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(bytes)
                .and_then(|_| file.write_all(b"\n"))
                .map_err(|e| self.sink_error(e))?;
        }

        Ok(None)
    }

    fn reopen(&self) -> Result<(), AuditError> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| AuditError::LockPoisoned("file sink"))?;

        if let Some(mut file) = guard.take() {
            file.flush().map_err(|e| self.sink_error(e))?;
        }
        *guard = Some(open_append(&self.path, self.mode)?);

        tracing::debug!(path = %self.path.display(), "reopened audit file");
        Ok(())
    }
}

/// Writes entries to standard output.
pub struct StdoutSink {
    format: OutputFormat,
}

impl StdoutSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl Node for StdoutSink {
    fn node_type(&self) -> NodeType {
        NodeType::Sink
    }

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError> {
        const OP: &str = "StdoutSink::process";

        let bytes = formatted(OP, ctx, &event, self.format)?;

        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(bytes)
            .and_then(|_| stdout.write_all(b"\n"))
            .map_err(|source| AuditError::Sink {
                path: "stdout".to_string(),
                source,
            })?;

        Ok(None)
    }

    fn reopen(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Accepts and discards every entry.
#[derive(Debug, Default)]
pub struct NoopSink;

impl NoopSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Node for NoopSink {
    fn node_type(&self) -> NodeType {
        NodeType::Sink
    }

    async fn process(
        &self,
        ctx: &AuditContext,
        event: Option<Event>,
    ) -> Result<Option<Event>, AuditError> {
        const OP: &str = "NoopSink::process";

        if ctx.is_cancelled() {
            return Err(AuditError::cancelled(OP));
        }
        if event.is_none() {
            return Err(AuditError::invalid_parameter(OP, "event is nil"));
        }
        Ok(None)
    }

    fn reopen(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AuditRecord, RecordKind};

    fn formatted_event(format: &str, body: &str) -> Event {
        let mut event = Event::audit(AuditRecord::new(RecordKind::Request));
        event
            .formatted
            .insert(format.to_string(), body.as_bytes().to_vec());
        event
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.log");
        let sink = FileSink::new(&path, OutputFormat::Json, Some(0o600)).unwrap();
        assert_eq!(sink.node_type(), NodeType::Sink);

        let ctx = AuditContext::new();
        let out = sink
            .process(&ctx, Some(formatted_event("json", r#"{"a":1}"#)))
            .await
            .unwrap();
        assert!(out.is_none());
        sink.process(&ctx, Some(formatted_event("json", r#"{"b":2}"#)))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"a\":1}\n{\"b\":2}\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_sink_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        FileSink::new(&path, OutputFormat::Json, Some(0o640)).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn test_file_sink_reopen_after_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let rotated = dir.path().join("audit.log.1");
        let sink = FileSink::new(&path, OutputFormat::Json, None).unwrap();
        let ctx = AuditContext::new();

        sink.process(&ctx, Some(formatted_event("json", "first")))
            .await
            .unwrap();
        std::fs::rename(&path, &rotated).unwrap();
        sink.reopen().unwrap();
        sink.process(&ctx, Some(formatted_event("json", "second")))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&rotated).unwrap(), "first\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[tokio::test]
    async fn test_file_sink_missing_format() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("audit.log"), OutputFormat::Jsonx, None).unwrap();

        let err = sink
            .process(&AuditContext::new(), Some(formatted_event("json", "x")))
            .await
            .unwrap_err();
        assert!(err.is_invalid_parameter());
    }

    #[test]
    fn test_file_sink_requires_path() {
        let err = FileSink::new("", OutputFormat::Json, None).err().unwrap();
        assert!(err.is_invalid_parameter());
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoopSink::new();
        let ctx = AuditContext::new();
        assert!(sink
            .process(&ctx, Some(formatted_event("json", "x")))
            .await
            .unwrap()
            .is_none());
        assert!(sink.process(&ctx, None).await.unwrap_err().is_invalid_parameter());

        ctx.cancel();
        assert!(sink
            .process(&ctx, Some(formatted_event("json", "x")))
            .await
            .unwrap_err()
            .is_cancelled());
    }

    #[tokio::test]
    async fn test_stdout_sink_writes() {
        let sink = StdoutSink::new(OutputFormat::Json);
        assert!(sink
            .process(&AuditContext::new(), Some(formatted_event("json", "{}")))
            .await
            .unwrap()
            .is_none());
    }
}
