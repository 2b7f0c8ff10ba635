//! Instance discovery from status files.
//!
//! A running editor advertises itself by writing `<anything>.json` into the
//! status directory:
//!
//! ```json
//! {"project_name": "MyGame", "project_path": "/work/MyGame", "port": 6400,
//!  "last_heartbeat": "2026-01-01T12:00:00Z"}
//! ```
//!
//! The instance id defaults to `<project_name>@<port>`. A heartbeat older
//! than the staleness window registers the instance as down.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{InstanceInfo, InstanceRegistry, InstanceStatus};
use crate::transport::{ChannelOptions, PeerChannel, TcpChannel};

#[derive(Debug, Clone, Deserialize)]
struct StatusFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    project_path: Option<String>,
    #[serde(default)]
    host: Option<String>,
    port: u16,
    #[serde(default)]
    last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub info: InstanceInfo,
    pub status: InstanceStatus,
    pub source: PathBuf,
}

/// Read every status file in `dir`. Unreadable or malformed files are
/// skipped with a warning; a missing directory yields nothing.
pub fn scan(dir: &Path, stale_after: Duration, now: DateTime<Utc>) -> Result<Vec<Discovered>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "Status directory does not exist");
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read status directory: {}", dir.display()))?;

    let mut found = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match parse_status_file(&path, stale_after, now) {
            Ok(discovered) => found.push(discovered),
            Err(e) => warn!(file = %path.display(), error = %format!("{:#}", e), "Skipping status file"),
        }
    }

    found.sort_by(|a, b| a.info.id.cmp(&b.info.id));
    Ok(found)
}

fn parse_status_file(path: &Path, stale_after: Duration, now: DateTime<Utc>) -> Result<Discovered> {
    let content = std::fs::read_to_string(path)?;
    let status: StatusFile = serde_json::from_str(&content).context("invalid status file")?;

    let fallback_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("instance")
        .to_string();
    let name = status
        .project_name
        .clone()
        .filter(|n| !n.trim().is_empty());
    let id = status
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("{}@{}", name.as_deref().unwrap_or(&fallback_name), status.port));

    let alive = match status.last_heartbeat {
        Some(beat) => now.signed_duration_since(beat).to_std().map_or(true, |age| age <= stale_after),
        None => true,
    };

    Ok(Discovered {
        info: InstanceInfo {
            id,
            name,
            project_path: status.project_path,
            host: status.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: status.port,
        },
        status: if alive {
            InstanceStatus::Alive
        } else {
            InstanceStatus::Down
        },
        source: path.to_path_buf(),
    })
}

/// Register discovered instances. An instance already registered at the
/// same address keeps its connection and only has its status updated.
/// Returns the number of newly registered instances.
pub async fn register_discovered(
    registry: &InstanceRegistry,
    discovered: Vec<Discovered>,
    options: ChannelOptions,
) -> usize {
    let mut added = 0;
    for found in discovered {
        let existing = registry.get(&found.info.id).await;
        let same_address = existing
            .as_ref()
            .is_some_and(|e| e.info.address() == found.info.address());

        if !same_address {
            let handle: Arc<dyn PeerChannel> = Arc::new(TcpChannel::new(found.info.address(), options));
            registry.register(found.info.clone(), handle).await;
            added += 1;
        }
        registry.set_status(&found.info.id, found.status).await;
    }
    if added > 0 {
        info!(added, "Registered discovered instances");
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn scan_reads_status_files() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        write(
            tmp.path(),
            "game.json",
            &format!(
                r#"{{"project_name": "Game", "project_path": "/work/Game", "port": 6400, "last_heartbeat": "{}"}}"#,
                now.to_rfc3339()
            ),
        );
        write(tmp.path(), "tools.json", r#"{"id": "tools-main", "host": "10.0.0.2", "port": 6401}"#);
        write(tmp.path(), "notes.txt", "ignored");
        write(tmp.path(), "broken.json", "{not json");

        let found = scan(tmp.path(), Duration::from_secs(120), now).unwrap();
        assert_eq!(found.len(), 2);

        assert_eq!(found[0].info.id, "Game@6400");
        assert_eq!(found[0].info.name.as_deref(), Some("Game"));
        assert_eq!(found[0].info.project_path.as_deref(), Some("/work/Game"));
        assert_eq!(found[0].status, InstanceStatus::Alive);

        assert_eq!(found[1].info.id, "tools-main");
        assert_eq!(found[1].info.address(), "10.0.0.2:6401");
    }

    #[test]
    fn stale_heartbeat_is_down() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let old = now - TimeDelta::seconds(600);
        write(
            tmp.path(),
            "old.json",
            &format!(r#"{{"project_name": "Old", "port": 6402, "last_heartbeat": "{}"}}"#, old.to_rfc3339()),
        );

        let found = scan(tmp.path(), Duration::from_secs(120), now).unwrap();
        assert_eq!(found[0].status, InstanceStatus::Down);
    }

    #[test]
    fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let found = scan(&tmp.path().join("absent"), Duration::from_secs(1), Utc::now()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn id_falls_back_to_file_stem() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "editor-a.json", r#"{"port": 7000}"#);
        let found = scan(tmp.path(), Duration::from_secs(1), Utc::now()).unwrap();
        assert_eq!(found[0].info.id, "editor-a@7000");
        assert_eq!(found[0].info.name, None);
    }

    #[tokio::test]
    async fn register_keeps_existing_connections() {
        let registry = InstanceRegistry::new();
        let discovered = vec![Discovered {
            info: InstanceInfo::new("Game@6400", "127.0.0.1", 6400),
            status: InstanceStatus::Alive,
            source: PathBuf::from("game.json"),
        }];

        assert_eq!(
            register_discovered(&registry, discovered.clone(), ChannelOptions::default()).await,
            1
        );

        let mut stale = discovered;
        stale[0].status = InstanceStatus::Down;
        assert_eq!(register_discovered(&registry, stale, ChannelOptions::default()).await, 0);
        assert!(!registry.get("Game@6400").await.unwrap().is_alive());
    }
}
