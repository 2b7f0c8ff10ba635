//! Resolve, transmit, normalize.
//!
//! The dispatcher is the only path from a tool to an instance. It never
//! returns an unstructured fault: every failure becomes a `DispatchResult`.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::envelope::CommandEnvelope;
use crate::error::BridgeError;
use crate::instance::{self, InstanceRegistry, InstanceStatus, SessionContext};
use crate::response::{self, DispatchResult, Route};
use crate::transport::{RetryPolicy, TransportClient};

pub struct Dispatcher {
    registry: Arc<InstanceRegistry>,
    transport: TransportClient,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<InstanceRegistry>, policy: RetryPolicy, request_timeout: Duration) -> Self {
        Self {
            registry,
            transport: TransportClient::new(policy),
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Route `envelope` and deliver it. The result names the instance it went
    /// to once routing succeeded, whatever happened afterwards.
    pub async fn dispatch(&self, ctx: &SessionContext, envelope: &CommandEnvelope) -> DispatchResult {
        let resolution = match instance::resolve(&self.registry, ctx).await {
            Ok(resolution) => resolution,
            Err(e) => return DispatchResult::from_error(&e),
        };
        let route = Route {
            instance: resolution.id.clone(),
            resolved_by: resolution.resolved_by.clone(),
        };
        debug!(instance = %route.instance, command = %envelope.command, "Dispatching");

        let result = match self
            .transport
            .dispatch(&resolution, envelope, self.request_timeout)
            .await
        {
            Ok(raw) => {
                self.registry.touch(&resolution.id).await;
                response::normalize(raw)
            }
            Err(failure) => {
                // Unreachable or lost mid-call. A timeout alone may just be a busy editor.
                if matches!(failure.error, BridgeError::Connection { .. }) {
                    self.registry
                        .set_status(&resolution.id, InstanceStatus::Down)
                        .await;
                }
                DispatchResult::from_failure(&failure)
            }
        };

        result.with_route(route)
    }
}
