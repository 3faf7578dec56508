use anyhow::{Context, Result};
use clap::Parser;
use osd_core::sim::SocLayout;
use osd_tools::shell::{Flow, Shell};
use osd_tools::{load_layout, open_session, ConfigArgs, ConnectArgs};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

/// Interactive command line for a debug system.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Read commands from file at start
    #[arg(short, long, conflicts_with = "batch")]
    source: Option<PathBuf>,

    /// Read commands from file and exit
    #[arg(short, long)]
    batch: Option<PathBuf>,

    /// Layout of the simulated system (with --sim)
    #[arg(long)]
    layout: Option<PathBuf>,

    #[command(flatten)]
    connect: ConnectArgs,

    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.config.load()?;
    let (session, _soc) = open_session(&args.connect, config, || match &args.layout {
        Some(path) => load_layout(path),
        None => Ok(SocLayout::default()),
    })?;
    let mut shell = Shell::new(&session, io::stdout());

    if let Some(script) = args.source.as_ref().or(args.batch.as_ref()) {
        let file = File::open(script).with_context(|| format!("cannot open file '{}'", script.display()))?;
        if shell.run_script(BufReader::new(file))? == Flow::Quit || args.batch.is_some() {
            return Ok(());
        }
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("osd> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        match shell.execute(&line?) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => eprintln!("{e:#}"),
        }
    }
    Ok(())
}
