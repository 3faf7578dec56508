use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use osd_core::sim::SocLayout;
use osd_core::{Image, ModuleProxy};
use osd_tools::{load_layout, open_session, ConfigArgs, ConnectArgs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Reset the system, stream all trace to log files, load an ELF image into
/// every memory that can hold it, run, and wait for the program to stop.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ELF image to run
    image: PathBuf,

    /// Read loaded memory back, and flag core trace outside the image's code
    #[arg(long)]
    verify_memload: bool,

    /// Seconds to wait for the program to stop
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Layout of the simulated system (with --sim), instead of one sized to the image
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

    let image = Arc::new(
        Image::from_elf_file(&args.image).with_context(|| format!("Cannot load image {}", args.image.display()))?,
    );
    info!("Image {} with {} bytes in {} segments", args.image.display(), image.total_len(), image.segments().len());

    let config = args.config.load()?;
    let (session, _soc) = open_session(&args.connect, config, || match &args.layout {
        Some(path) => load_layout(path),
        None => Ok(SocLayout::for_image(&image)),
    })?;

    session.reset(true).context("reset")?;

    for stm in session.trace_modules() {
        let path = stm.attach_default_log().with_context(|| format!("log on module {}", stm.id()))?;
        info!("Module {} logging to {}", stm.id(), path.display());
    }
    for ctm in session.core_trace_modules() {
        let path = ctm
            .attach_default_log(Arc::clone(&image), args.verify_memload)
            .with_context(|| format!("log on module {}", ctm.id()))?;
        info!("Module {} logging to {}", ctm.id(), path.display());
    }

    let mams = session.memory_modules();
    if mams.is_empty() {
        warn!("No memory modules, image not loaded");
    }
    let mut loaded = 0;
    for mam in &mams {
        let fits = image.segments().iter().all(|s| mam.module().addresses(s.address, s.len()));
        if !fits {
            warn!("Module {} cannot address the whole image, skipping", mam.id());
            continue;
        }
        let result = if args.verify_memload { mam.load_image_verified(&image) } else { mam.load_image(&image) };
        result.with_context(|| format!("load image via module {}", mam.id()))?;
        loaded += 1;
    }
    if loaded == 0 && !mams.is_empty() && !image.segments().is_empty() {
        bail!("No memory module can address {}", args.image.display());
    }

    session.start().context("start")?;
    let reason = session.wait(Duration::from_secs(args.timeout)).context("wait")?;
    println!("Target {reason}");

    let failures = session.verification_failures();
    if !failures.is_empty() {
        for (module, error) in &failures {
            eprintln!("module {module}: {error}");
        }
        bail!("{} unexpected instruction fetches", failures.len());
    }
    Ok(())
}
