use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use denlite::{DenConfig, DenliteLayout, DockerCli, Provisioner};

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "denlite", version, about = "Provision local, ephemeral dev-container environments")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bring a den up from its configuration
    Up(commands::up::UpArgs),
    /// Tear a den down
    Down(commands::down::DownArgs),
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Home directory for caches and state
    #[arg(long, global = true, env = "DENLITE_HOME")]
    pub home: Option<PathBuf>,

    /// Path to the prepared den configuration document
    #[arg(long, global = true, default_value = "den.json")]
    pub config: PathBuf,

    /// Log filter, e.g. "info" or "denlite=debug"
    #[arg(long, global = true, env = "DENLITE_LOG", default_value = "info")]
    pub log_filter: String,
}

impl GlobalFlags {
    pub fn init_logging(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_new(&self.log_filter)
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    /// Build a provisioner from the flags: config document, home layout,
    /// docker-backed runtime.
    pub fn create_provisioner(&self) -> anyhow::Result<Provisioner> {
        let config = DenConfig::from_json_file(&self.config)?;
        let layout = match &self.home {
            Some(home) => DenliteLayout::new(home.clone()),
            None => DenliteLayout::default_home()?,
        };
        let runtime = Arc::new(DockerCli::new());
        Ok(Provisioner::new(config, runtime, &layout)?)
    }
}
