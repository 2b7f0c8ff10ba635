use std::sync::Arc;

use anyhow::Result;

use crate::dispatch::Dispatcher;
use crate::instance::InstanceRegistry;
use crate::tools::{ToolSchema, create_default_tools};
use crate::transport::RetryPolicy;

pub fn run() -> Result<()> {
    // Schemas do not depend on any instance being reachable.
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(InstanceRegistry::new()),
        RetryPolicy::default(),
        std::time::Duration::from_secs(30),
    ));
    let schemas: Vec<ToolSchema> = create_default_tools(dispatcher)
        .iter()
        .map(|t| t.schema())
        .collect();
    println!("{}", serde_json::to_string_pretty(&schemas)?);
    Ok(())
}
