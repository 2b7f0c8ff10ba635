pub mod call;
pub mod config;
pub mod instances;
pub mod paths;
pub mod serve;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::instance::monitor::Monitor;
use crate::instance::{InstanceRegistry, SessionContext};
use crate::transport::{PeerChannel, TcpChannel};

#[derive(Parser)]
#[command(name = "editor-bridge")]
#[command(author, version, about = "Route agent tool calls to running editor instances")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "EDITOR_BRIDGE_CONFIG")]
    pub config: Option<String>,

    /// Session id used for instance affinity
    #[arg(short, long, global = true, env = "EDITOR_BRIDGE_SESSION")]
    pub session: Option<String>,

    /// Instance id or name to route calls to
    #[arg(short, long, global = true, env = "EDITOR_BRIDGE_INSTANCE")]
    pub instance: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single tool call and print its result
    Call(call::CallArgs),

    /// Serve tool calls as JSON lines on stdin/stdout
    Serve,

    /// List known editor instances
    Instances(instances::InstancesArgs),

    /// Print tool schemas
    Tools,

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        Config::load_from(self.config.as_ref().map(PathBuf::from))
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            session_id: self.session.clone(),
            instance: self.instance.clone(),
        }
    }
}

/// Build the registry from configured and discovered instances, and the
/// dispatcher on top of it. The returned monitor has already run one pass.
pub async fn connect(config: &Config) -> Result<(Arc<Dispatcher>, Arc<Monitor>)> {
    let registry = Arc::new(InstanceRegistry::new());
    let options = config.channel_options();

    for instance in &config.instances {
        let info = instance.to_info();
        let handle: Arc<dyn PeerChannel> = Arc::new(TcpChannel::new(info.address(), options));
        registry.register(info, handle).await;
    }

    let mut monitor = Monitor::new(registry.clone(), options, config.session_idle())
        .with_fixed(config.instances.iter().map(|i| i.to_info().id));
    if config.discovery.enabled {
        monitor = monitor.with_discovery(config.status_dir(), config.stale_after());
    }
    monitor.refresh().await;
    debug!(instances = registry.list().await.len(), "Registry ready");

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        config.retry_policy(),
        config.request_timeout(),
    ));
    Ok((dispatcher, Arc::new(monitor)))
}
