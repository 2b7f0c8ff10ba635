//! Editor instances: who is connected, and which one a call goes to.

pub mod discovery;
pub mod monitor;
pub mod registry;
pub mod resolver;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::transport::PeerChannel;

pub use registry::{InstanceEntry, InstanceRegistry, InstanceSummary};
pub use resolver::resolve;

/// Static description of a running editor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub host: String,
    pub port: u16,
}

impl InstanceInfo {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            name: None,
            project_path: None,
            host: host.into(),
            port,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Alive,
    Down,
}

/// Per-call routing context. Created for one tool call and discarded after.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    /// Key into the registry's session affinity table.
    pub session_id: Option<String>,
    /// Explicit instance selector (id or unique display name).
    pub instance: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_instance(mut self, selector: impl Into<String>) -> Self {
        self.instance = Some(selector.into());
        self
    }
}

/// How the resolver picked an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ResolvedBy {
    Explicit,
    Pinned,
    Sole,
    MostRecent { candidates: Vec<String> },
}

/// The instance a call was routed to, and why.
#[derive(Clone)]
pub struct Resolution {
    pub id: String,
    pub handle: Arc<dyn PeerChannel>,
    pub resolved_by: ResolvedBy,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("id", &self.id)
            .field("peer", &self.handle.describe())
            .field("resolved_by", &self.resolved_by)
            .finish()
    }
}
