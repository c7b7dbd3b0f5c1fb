//! `warden filter` commands.

use anyhow::{Context, Result};
use std::path::Path;

use warden_audit::{AuditContext, AuditRecord, EntryFilter, Event, LogInput, Namespace, Node, RecordKind};

/// Namespace for a `--namespace` argument. `root` or nothing means root.
pub fn namespace_from_arg(arg: Option<&str>) -> Namespace {
    let path = arg.map(|p| p.trim().trim_matches('/')).unwrap_or_default();
    if path.is_empty() || path.eq_ignore_ascii_case("root") {
        return Namespace::root();
    }
    let path = format!("{path}/");
    Namespace::new(path.clone(), path)
}

/// Whether `input` passes `expression`.
pub async fn check(expression: &str, input: LogInput, namespace: Option<&str>) -> Result<bool> {
    let filter = EntryFilter::new(expression)?;
    let ctx = AuditContext::new().with_namespace(namespace_from_arg(namespace));

    let event = Event::audit(AuditRecord::new(RecordKind::Request).with_data(input));
    let result = filter
        .process(&ctx, Some(event))
        .await
        .context("Filter evaluation failed")?;
    Ok(result.is_some())
}

/// Like [`check`], reading the record from a JSON file.
pub async fn check_file(expression: &str, record: &Path, namespace: Option<&str>) -> Result<bool> {
    let content = std::fs::read_to_string(record)
        .with_context(|| format!("Failed to read {}", record.display()))?;
    let input: LogInput = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", record.display()))?;
    check(expression, input, namespace).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LogInput {
        serde_json::from_str(
            r#"{"request": {"operation": "create", "mount_type": "kv", "path": "secret/app"}}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_check_matches() {
        assert!(check("mount_type == kv and operation == create", record(), None)
            .await
            .unwrap());
        assert!(!check("mount_type == transit", record(), None).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_record_without_operation() {
        let input: LogInput = serde_json::from_str(r#"{"request": {"mount_type": "kv"}}"#).unwrap();
        assert!(!check("operation == read", input, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_namespace() {
        assert!(check("namespace == root", record(), Some("root")).await.unwrap());
        assert!(check("namespace == team-a/", record(), Some("/team-a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_bad_expression() {
        assert!(check("   ", record(), None).await.is_err());
        assert!(check("____", record(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_check_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        std::fs::write(&path, r#"{"request": {"mount_type": "kv"}}"#).unwrap();

        assert!(check_file("mount_type == kv", &path, None).await.unwrap());
        assert!(check_file("mount_type == kv", &dir.path().join("missing.json"), None)
            .await
            .is_err());
    }

    #[test]
    fn test_namespace_from_arg() {
        assert!(namespace_from_arg(None).is_root());
        assert!(namespace_from_arg(Some("ROOT")).is_root());
        assert_eq!(namespace_from_arg(Some("team-a")).path, "team-a/");
    }
}
