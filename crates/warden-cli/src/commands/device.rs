//! `warden device` commands.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use warden_audit::{
    AuditContext, Auth, Backend, BackendConfig, Broker, FileBackend, InmemSaltStorage, LogInput,
    Namespace, Operation, Request, SaltConfig,
};
use warden_core::WardenConfig;

/// The synthetic record written when a device is tested.
pub fn test_input() -> LogInput {
    LogInput::for_request(Request {
        operation: Some(Operation::Update),
        path: "sys/audit/test".to_string(),
        ..Default::default()
    })
    .with_auth(Auth {
        client_token: "foo".to_string(),
        accessor: "bar".to_string(),
        display_name: "testtoken".to_string(),
        policies: vec!["root".to_string()],
        entity_id: "foobarentity".to_string(),
        token_type: "service".to_string(),
        ..Default::default()
    })
}

/// Build the configured devices and write a test entry through each.
///
/// Returns the names of the devices tested.
pub async fn test(config_path: &Path, name: Option<&str>) -> Result<Vec<String>> {
    let config = WardenConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let broker = Broker::new();
    for (mount, options) in &config.devices {
        if name.is_some_and(|n| n != mount.as_str()) {
            continue;
        }

        let backend = FileBackend::new(
            BackendConfig {
                mount_path: mount.clone(),
                options: options.clone(),
                salt_config: SaltConfig::default(),
                salt_view: Arc::new(InmemSaltStorage::new()),
            },
            None,
        )
        .with_context(|| format!("Failed to build audit device {mount}"))?;

        broker
            .register(Arc::new(backend))
            .with_context(|| format!("Failed to register audit device {mount}"))?;
    }

    let names = broker.names();
    if names.is_empty() {
        match name {
            Some(n) => bail!("No audit device named {n} in {}", config_path.display()),
            None => bail!("No audit devices configured in {}", config_path.display()),
        }
    }

    let ctx = AuditContext::new().with_namespace(Namespace::root());
    for device in &names {
        let Some(backend) = broker.get(device) else {
            continue;
        };
        backend
            .log_test_message(&ctx, test_input())
            .await
            .with_context(|| format!("Audit device {device} failed to write a test entry"))?;
        tracing::info!(device = %device, "test entry written");
    }

    Ok(names)
}

/// One line per configured device.
pub fn list(config_path: &Path) -> Result<Vec<String>> {
    let config = WardenConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    Ok(config
        .devices
        .iter()
        .map(|(mount, options)| {
            let mut line = format!("{mount}\t{}\tformat={}", options.file_path, options.format);
            if options.fallback {
                line.push_str("\tfallback");
            }
            if let Some(filter) = options.filter.as_deref().filter(|f| !f.trim().is_empty()) {
                line.push_str(&format!("\tfilter={filter:?}"));
            }
            line
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("warden.yaml");
        fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_devices_write_test_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let config = write_config(
            dir.path(),
            &format!(
                "devices:\n  file/:\n    file_path: {}\n  null/:\n    file_path: discard\n    fallback: true\n",
                log.display()
            ),
        );

        let tested = test(&config, None).await.unwrap();
        assert_eq!(tested, vec!["file/".to_string(), "null/".to_string()]);

        let contents = fs::read_to_string(&log).unwrap();
        let entry: serde_json::Value = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(entry["request"]["path"], "sys/audit/test");
        assert_eq!(entry["auth"]["display_name"], "testtoken");
        assert_ne!(entry["auth"]["client_token"], "foo");
    }

    #[tokio::test]
    async fn test_single_device_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            dir.path(),
            "devices:\n  a/:\n    file_path: discard\n  b/:\n    file_path: discard\n",
        );

        assert_eq!(test(&config, Some("b/")).await.unwrap(), vec!["b/".to_string()]);
        assert!(test(&config, Some("c/")).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            dir.path(),
            "devices:\n  a/:\n    file_path: discard\n    fallback: true\n    filter: mount_type == kv\n",
        );

        let err = test(&config, None).await.unwrap_err();
        assert!(err.to_string().contains("a/"));
    }

    #[test]
    fn test_list() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(
            dir.path(),
            "devices:\n  a/:\n    file_path: stdout\n    filter: mount_type == kv\n  b/:\n    file_path: discard\n    fallback: true\n",
        );

        let lines = list(&config).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "a/\tstdout\tformat=json\tfilter=\"mount_type == kv\"");
        assert_eq!(lines[1], "b/\tdiscard\tformat=json\tfallback");
    }
}
