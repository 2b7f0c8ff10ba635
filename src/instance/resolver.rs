//! Session-to-instance routing.
//!
//! Rules, in order:
//! 1. an explicit selector (exact id, else unique display name) wins and
//!    pins the session;
//! 2. a pinned session keeps its instance, and fails if it went down;
//! 3. no alive instance fails with `NoInstanceAvailable`;
//! 4. a single alive instance is used and pinned;
//! 5. otherwise the most recently active instance is used (ties go to the
//!    smallest id) and pinned, with a warning.
//!
//! The resolver never waits for an instance to appear.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use super::registry::{InstanceEntry, InstanceRegistry, Pin};
use super::{Resolution, ResolvedBy, SessionContext};
use crate::error::{BridgeError, BridgeResult};

pub async fn resolve(registry: &InstanceRegistry, ctx: &SessionContext) -> BridgeResult<Resolution> {
    let instances = registry.instances.read().await;
    // Held for the whole decision so concurrent calls of one session agree.
    let mut sessions = registry.sessions.write().await;

    if let Some(selector) = ctx.instance.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let entry = select_explicit(&instances, selector)?;
        let resolution = resolution(entry, ResolvedBy::Explicit);
        if let Some(session) = ctx.session_id.as_deref() {
            sessions.insert(session.to_string(), Pin::new(resolution.id.clone()));
        }
        debug!(instance = %resolution.id, selector, "Resolved explicit instance");
        return Ok(resolution);
    }

    if let Some(session) = ctx.session_id.as_deref()
        && let Some(pin) = sessions.get_mut(session)
    {
        pin.last_used = Utc::now();
        let pinned = pin.instance.as_str();
        let entry = instances
            .get(pinned)
            .ok_or_else(|| not_found(pinned, "pinned instance is no longer registered", &instances))?;
        if !entry.is_alive() {
            return Err(not_found(
                pinned,
                "pinned instance is not alive; select another instance explicitly",
                &instances,
            ));
        }
        return Ok(resolution(entry, ResolvedBy::Pinned));
    }

    let mut alive: Vec<&InstanceEntry> = instances.values().filter(|e| e.is_alive()).collect();
    let resolved = match alive.len() {
        0 => return Err(BridgeError::NoInstanceAvailable),
        1 => resolution(alive[0], ResolvedBy::Sole),
        _ => {
            alive.sort_by(|a, b| {
                b.last_active
                    .cmp(&a.last_active)
                    .then_with(|| a.info.id.cmp(&b.info.id))
            });
            let mut candidates: Vec<String> = alive.iter().map(|e| e.info.id.clone()).collect();
            candidates.sort();
            let chosen = alive[0];
            warn!(
                instance = %chosen.info.id,
                candidates = ?candidates,
                "Multiple instances connected and none selected; using the most recently active"
            );
            resolution(chosen, ResolvedBy::MostRecent { candidates })
        }
    };

    if let Some(session) = ctx.session_id.as_deref() {
        sessions.insert(session.to_string(), Pin::new(resolved.id.clone()));
    }
    Ok(resolved)
}

fn select_explicit<'a>(
    instances: &'a HashMap<String, InstanceEntry>,
    selector: &str,
) -> BridgeResult<&'a InstanceEntry> {
    let entry = match instances.get(selector) {
        Some(entry) => entry,
        None => {
            let by_name: Vec<&InstanceEntry> = instances
                .values()
                .filter(|e| e.info.name.as_deref() == Some(selector))
                .collect();
            match by_name.as_slice() {
                [] => return Err(not_found(selector, "no instance with this id or name", instances)),
                [only] => *only,
                many => {
                    let mut ids: Vec<&str> = many.iter().map(|e| e.info.id.as_str()).collect();
                    ids.sort();
                    return Err(BridgeError::InstanceNotFound {
                        selector: selector.to_string(),
                        reason: format!("name is ambiguous; matching ids: {}", ids.join(", ")),
                    });
                }
            }
        }
    };

    if !entry.is_alive() {
        return Err(not_found(selector, "instance is not alive", instances));
    }
    Ok(entry)
}

fn resolution(entry: &InstanceEntry, resolved_by: ResolvedBy) -> Resolution {
    Resolution {
        id: entry.info.id.clone(),
        handle: entry.handle.clone(),
        resolved_by,
    }
}

fn not_found(selector: &str, reason: &str, instances: &HashMap<String, InstanceEntry>) -> BridgeError {
    let mut known: Vec<&str> = instances.keys().map(String::as_str).collect();
    known.sort();
    let known = if known.is_empty() {
        "none".to_string()
    } else {
        known.join(", ")
    };
    BridgeError::InstanceNotFound {
        selector: selector.to_string(),
        reason: format!("{}; known instances: {}", reason, known),
    }
}
