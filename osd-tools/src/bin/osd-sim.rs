use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use osd_core::sim::{server, SimulatedSoc, SocLayout};
use osd_core::transport::tcp::DEFAULT_PORT;
use osd_tools::load_layout;
use std::net::TcpListener;
use std::path::PathBuf;

/// Serve a simulated debug system to hosts over TCP.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// JSON module layout and program (default: one STM, CTM and MAM)
    #[arg(long)]
    layout: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let layout = match &args.layout {
        Some(path) => load_layout(path)?,
        None => SocLayout::default(),
    };
    info!("Simulating {} modules", layout.modules.len() + 1);
    let soc = SimulatedSoc::new(layout);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).with_context(|| format!("Failed to listen on {addr}"))?;
    server::serve(&soc, &listener).context("Simulator stopped")
}
