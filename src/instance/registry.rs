//! Registry of connected editor instances and session affinity.
//!
//! Lock order is always `instances` before `sessions`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{InstanceInfo, InstanceStatus};
use crate::transport::PeerChannel;

/// A registered instance with its connection handle.
#[derive(Clone)]
pub struct InstanceEntry {
    pub info: InstanceInfo,
    pub handle: Arc<dyn PeerChannel>,
    pub status: InstanceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl InstanceEntry {
    pub fn is_alive(&self) -> bool {
        self.status == InstanceStatus::Alive
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.info.id.clone(),
            name: self.info.name.clone(),
            project_path: self.info.project_path.clone(),
            address: self.info.address(),
            status: self.status,
            registered_at: self.registered_at,
            last_active: self.last_active,
        }
    }
}

/// Serializable view of an entry, for listings and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub address: String,
    pub status: InstanceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// A session's affinity to one instance.
#[derive(Debug, Clone)]
pub(super) struct Pin {
    pub(super) instance: String,
    pub(super) last_used: DateTime<Utc>,
}

impl Pin {
    pub(super) fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            last_used: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct InstanceRegistry {
    pub(super) instances: RwLock<HashMap<String, InstanceEntry>>,
    /// session id -> pin
    pub(super) sessions: RwLock<HashMap<String, Pin>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance as alive, replacing any entry with the same id.
    pub async fn register(&self, info: InstanceInfo, handle: Arc<dyn PeerChannel>) {
        let now = Utc::now();
        let id = info.id.clone();
        let mut instances = self.instances.write().await;
        let registered_at = instances
            .get(&id)
            .map(|existing| existing.registered_at)
            .unwrap_or(now);
        info!(instance = %id, peer = %handle.describe(), "Instance registered");
        instances.insert(
            id,
            InstanceEntry {
                info,
                handle,
                status: InstanceStatus::Alive,
                registered_at,
                last_active: now,
            },
        );
    }

    /// Remove an instance and every session pinned to it.
    pub async fn unregister(&self, id: &str) -> bool {
        let mut instances = self.instances.write().await;
        if instances.remove(id).is_none() {
            return false;
        }
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, pin| pin.instance != id);
        info!(instance = %id, "Instance unregistered");
        true
    }

    pub async fn set_status(&self, id: &str, status: InstanceStatus) -> bool {
        let mut instances = self.instances.write().await;
        match instances.get_mut(id) {
            Some(entry) => {
                if entry.status != status {
                    info!(instance = %id, ?status, "Instance status changed");
                }
                entry.status = status;
                true
            }
            None => false,
        }
    }

    /// Record a successful round trip. An instance that answered is alive.
    pub async fn touch(&self, id: &str) {
        let mut instances = self.instances.write().await;
        if let Some(entry) = instances.get_mut(id) {
            entry.last_active = Utc::now();
            if entry.status != InstanceStatus::Alive {
                info!(instance = %id, "Instance answered, marking alive");
                entry.status = InstanceStatus::Alive;
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<InstanceEntry> {
        self.instances.read().await.get(id).cloned()
    }

    /// All entries, sorted by id.
    pub async fn list(&self) -> Vec<InstanceEntry> {
        let instances = self.instances.read().await;
        let mut entries: Vec<InstanceEntry> = instances.values().cloned().collect();
        entries.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        entries
    }

    /// Pin a session to a registered instance. Returns false for unknown ids.
    pub async fn pin(&self, session_id: &str, id: &str) -> bool {
        let instances = self.instances.read().await;
        if !instances.contains_key(id) {
            return false;
        }
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), Pin::new(id));
        debug!(session = %session_id, instance = %id, "Session pinned");
        true
    }

    pub async fn pinned(&self, session_id: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|pin| pin.instance.clone())
    }

    /// Drop pins not used for longer than `max_idle`. Returns the sessions
    /// that lost their pin.
    pub async fn prune_pins(&self, max_idle: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let mut removed = Vec::new();

        sessions.retain(|session, pin| {
            let idle = now.signed_duration_since(pin.last_used).to_std().unwrap_or_default();
            if idle > max_idle {
                removed.push(session.clone());
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            debug!(count = removed.len(), "Pruned idle session pins");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockPeerChannel;

    fn channel() -> Arc<dyn PeerChannel> {
        let mut mock = MockPeerChannel::new();
        mock.expect_describe().return_const("mock".to_string());
        Arc::new(mock)
    }

    #[tokio::test]
    async fn register_and_list_sorted() {
        let registry = InstanceRegistry::new();
        registry
            .register(InstanceInfo::new("b", "127.0.0.1", 2), channel())
            .await;
        registry
            .register(InstanceInfo::new("a", "127.0.0.1", 1), channel())
            .await;

        let ids: Vec<String> = registry.list().await.into_iter().map(|e| e.info.id).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(registry.get("a").await.unwrap().is_alive());
    }

    #[tokio::test]
    async fn unregister_drops_pins() {
        let registry = InstanceRegistry::new();
        registry
            .register(InstanceInfo::new("a", "127.0.0.1", 1), channel())
            .await;
        registry
            .register(InstanceInfo::new("b", "127.0.0.1", 2), channel())
            .await;
        assert!(registry.pin("s1", "a").await);
        assert!(registry.pin("s2", "b").await);

        assert!(registry.unregister("a").await);
        assert_eq!(registry.pinned("s1").await, None);
        assert_eq!(registry.pinned("s2").await.as_deref(), Some("b"));
        assert!(!registry.unregister("a").await);
    }

    #[tokio::test]
    async fn pin_requires_known_instance() {
        let registry = InstanceRegistry::new();
        assert!(!registry.pin("s1", "ghost").await);
        assert_eq!(registry.pinned("s1").await, None);
    }

    #[tokio::test]
    async fn touch_and_status_update_entry() {
        let registry = InstanceRegistry::new();
        registry
            .register(InstanceInfo::new("a", "127.0.0.1", 1), channel())
            .await;
        let before = registry.get("a").await.unwrap().last_active;

        registry.touch("a").await;
        assert!(registry.get("a").await.unwrap().last_active >= before);

        assert!(registry.set_status("a", InstanceStatus::Down).await);
        assert!(!registry.get("a").await.unwrap().is_alive());
        assert!(!registry.set_status("missing", InstanceStatus::Down).await);
    }

    #[tokio::test]
    async fn answering_instance_is_alive_again() {
        let registry = InstanceRegistry::new();
        registry
            .register(InstanceInfo::new("a", "127.0.0.1", 1), channel())
            .await;
        registry.set_status("a", InstanceStatus::Down).await;

        registry.touch("a").await;
        assert!(registry.get("a").await.unwrap().is_alive());
    }

    #[tokio::test]
    async fn idle_pins_are_pruned() {
        let registry = InstanceRegistry::new();
        registry
            .register(InstanceInfo::new("a", "127.0.0.1", 1), channel())
            .await;
        registry.pin("old", "a").await;
        registry.pin("fresh", "a").await;
        registry.sessions.write().await.get_mut("old").unwrap().last_used =
            Utc::now() - chrono::TimeDelta::hours(2);

        let removed = registry.prune_pins(Duration::from_secs(3600)).await;
        assert_eq!(removed, ["old"]);
        assert_eq!(registry.pinned("old").await, None);
        assert_eq!(registry.pinned("fresh").await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn re_register_keeps_original_timestamp() {
        let registry = InstanceRegistry::new();
        registry
            .register(InstanceInfo::new("a", "127.0.0.1", 1), channel())
            .await;
        let first = registry.get("a").await.unwrap().registered_at;
        registry.set_status("a", InstanceStatus::Down).await;

        registry
            .register(InstanceInfo::new("a", "127.0.0.1", 9), channel())
            .await;
        let entry = registry.get("a").await.unwrap();
        assert_eq!(entry.registered_at, first);
        assert_eq!(entry.info.port, 9);
        assert!(entry.is_alive());
    }
}
