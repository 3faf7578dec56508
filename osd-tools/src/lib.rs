//! Shared plumbing for the OSD command line tools.

pub mod shell;

use anyhow::{Context, Result};
use clap::Args;
use osd_core::sim::{SimulatedSoc, SocLayout};
use osd_core::transport::tcp::DEFAULT_PORT;
use osd_core::{Session, SessionConfig, TcpTransport, VerificationPolicy};
use std::path::{Path, PathBuf};

/// Where the debug system lives.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Run against an in-process simulated system
    #[arg(long, conflicts_with = "daemon")]
    pub sim: bool,

    /// Debug daemon address
    #[arg(long, default_value_t = format!("localhost:{DEFAULT_PORT}"))]
    pub daemon: String,
}

/// Session settings that can be given on the command line.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON session configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for trace logs
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// What to do on unexpected instruction fetches (record or abort)
    #[arg(long)]
    pub policy: Option<VerificationPolicy>,
}

impl ConfigArgs {
    /// The configuration file, if any, with command line overrides applied.
    pub fn load(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(dir) = &self.log_dir {
            config.log_dir.clone_from(dir);
        }
        if let Some(policy) = self.policy {
            config.verification_policy = policy;
        }
        Ok(config)
    }
}

/// Read a simulated system layout from JSON.
pub fn load_layout(path: &Path) -> Result<SocLayout> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read layout {}", path.display()))?;
    SocLayout::from_json(&text).with_context(|| format!("Failed to parse layout {}", path.display()))
}

/// Open a session on the selected debug system.
///
/// With `--sim` the simulated system is returned too, built from `layout`
/// only in that case.
pub fn open_session(
    connect: &ConnectArgs,
    config: SessionConfig,
    layout: impl FnOnce() -> Result<SocLayout>,
) -> Result<(Session, Option<SimulatedSoc>)> {
    if connect.sim {
        let soc = SimulatedSoc::new(layout()?);
        let session = Session::open(soc.connect(), config).context("Failed to open simulated session")?;
        log::info!("Using simulated debug system");
        Ok((session, Some(soc)))
    } else {
        let transport = TcpTransport::connect(connect.daemon.as_str())
            .with_context(|| format!("Cannot connect to debug daemon at {}", connect.daemon))?;
        let session = Session::open(transport, config).context("Failed to open session")?;
        Ok((session, None))
    }
}
