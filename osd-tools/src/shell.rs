//! The `osd-cli` command interpreter.
//!
//! Lines are parsed into a [`Command`] first and then executed against a
//! session, so parsing can be checked without a debug system.

use anyhow::{anyhow, bail, Context, Result};
use osd_core::{
    Image, ImageLoadRequest, ModuleId, ModuleProxy, Proxy, Session, SessionState, StateError, TraceLog,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const HELP_COMMANDS: &str = "\
Available commands:
  help        Print this help
  <cmd> help  Print help for command
  quit        Exit the command line
  reset       Reset the system
  start       Start the processor cores
  mem         Access memory
  wait        Wait for given seconds
  modules     List discovered modules
  log         Stream trace of a module to a file
";

pub const HELP_RESET: &str = "\
Usage: reset [-halt]
  -halt       Halt processor cores until 'start'
";

pub const HELP_START: &str = "Start cores after 'reset', no parameters\n";

pub const HELP_MEM: &str = "\
Available subcommands:
  help        Print this help
  test        Run memory tests
  loadelf     Load an elf to memory
  read        Read memory as hex
  write       Write hex bytes to memory
";

pub const HELP_MEM_LOADELF: &str = "\
Usage: mem loadelf <file> <memid>
  file   Filename to load
  memid  Module identifier of memory
";

pub const HELP_MEM_READ: &str = "Usage: mem read <memid> <address> <length>\n";

pub const HELP_MEM_WRITE: &str = "Usage: mem write <memid> <address> <hexbytes>\n";

pub const HELP_WAIT: &str = "\
Usage: wait <n>
  n  Number of seconds
";

pub const HELP_LOG: &str = "\
Usage: log <modid> <file> [<elf> [-verify]]
  modid  Trace module identifier
  file   Log file to create
  elf    Image to annotate core trace with (core trace modules only)
  -verify  Flag fetches outside the image's code
";

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help(&'static str),
    Quit,
    Reset { halt: bool },
    Start,
    MemTest,
    MemLoadElf { file: PathBuf, module: ModuleId },
    MemRead { module: ModuleId, address: u64, len: u64 },
    MemWrite { module: ModuleId, address: u64, data: Vec<u8> },
    Wait(Option<u64>),
    Modules,
    Log { module: ModuleId, file: PathBuf, elf: Option<PathBuf>, verify: bool },
}

/// Outcome of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// `0x`-prefixed hex or decimal.
pub fn parse_number(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn parse_module(s: Option<&str>, usage: &'static str) -> Result<ModuleId> {
    let s = s.ok_or_else(|| anyhow!("Missing module id\n{usage}"))?;
    parse_number(s)
        .and_then(|n| u16::try_from(n).ok())
        .map(ModuleId)
        .ok_or_else(|| anyhow!("Invalid module id: {s}\n{usage}"))
}

fn parse_value(s: Option<&str>, what: &str, usage: &'static str) -> Result<u64> {
    let s = s.ok_or_else(|| anyhow!("Missing {what}\n{usage}"))?;
    parse_number(s).ok_or_else(|| anyhow!("Invalid {what}: {s}\n{usage}"))
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else { return Ok(Command::Empty) };
    let sub = words.next();
    if sub == Some("help") {
        return Ok(Command::Help(match cmd {
            "reset" => HELP_RESET,
            "start" => HELP_START,
            "mem" => HELP_MEM,
            "wait" => HELP_WAIT,
            "log" => HELP_LOG,
            _ => HELP_COMMANDS,
        }));
    }

    let command = match cmd {
        "help" | "h" => Command::Help(HELP_COMMANDS),
        "quit" | "q" | "exit" => Command::Quit,
        "reset" => match sub {
            None => Command::Reset { halt: false },
            Some("-halt") => Command::Reset { halt: true },
            Some(other) => bail!("Unknown parameter: {other}\n{HELP_RESET}"),
        },
        "start" => match sub {
            None => Command::Start,
            Some(other) => bail!("No parameters accepted or unknown subcommand: {other}\n{HELP_START}"),
        },
        "mem" => match sub {
            Some("test") => Command::MemTest,
            Some("loadelf") => match words.next() {
                Some("help") => Command::Help(HELP_MEM_LOADELF),
                None => bail!("Missing filename\n{HELP_MEM_LOADELF}"),
                Some(file) => Command::MemLoadElf {
                    file: PathBuf::from(file),
                    module: parse_module(words.next(), HELP_MEM_LOADELF)?,
                },
            },
            Some("read") => Command::MemRead {
                module: parse_module(words.next(), HELP_MEM_READ)?,
                address: parse_value(words.next(), "address", HELP_MEM_READ)?,
                len: parse_value(words.next(), "length", HELP_MEM_READ)?,
            },
            Some("write") => {
                let module = parse_module(words.next(), HELP_MEM_WRITE)?;
                let address = parse_value(words.next(), "address", HELP_MEM_WRITE)?;
                let bytes = words.next().ok_or_else(|| anyhow!("Missing data\n{HELP_MEM_WRITE}"))?;
                let data = hex::decode(bytes.trim_start_matches("0x"))
                    .with_context(|| format!("Invalid data: {bytes}"))?;
                Command::MemWrite { module, address, data }
            }
            Some(other) => bail!("Unknown subcommand: {other}\n{HELP_MEM}"),
            None => Command::Help(HELP_MEM),
        },
        "wait" => match sub {
            None => Command::Wait(None),
            Some(s) => Command::Wait(Some(parse_number(s).ok_or_else(|| anyhow!("No valid seconds given: {s}"))?)),
        },
        "modules" => Command::Modules,
        "log" => {
            let module = parse_module(sub, HELP_LOG)?;
            let file = words.next().ok_or_else(|| anyhow!("Missing log file\n{HELP_LOG}"))?;
            let elf = words.next().map(PathBuf::from);
            let verify = match words.next() {
                None => false,
                Some("-verify") => true,
                Some(other) => bail!("Unknown parameter: {other}\n{HELP_LOG}"),
            };
            Command::Log { module, file: PathBuf::from(file), elf, verify }
        }
        other => bail!("Unknown command: {other}\n{HELP_COMMANDS}"),
    };
    Ok(command)
}

/// Executes commands against one session.
pub struct Shell<'a, W: Write> {
    session: &'a Session,
    out: W,
}

impl<'a, W: Write> Shell<'a, W> {
    pub const fn new(session: &'a Session, out: W) -> Self {
        Self { session, out }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Parse and run one line.
    pub fn execute(&mut self, line: &str) -> Result<Flow> {
        match parse(line)? {
            Command::Empty => {}
            Command::Help(text) => write!(self.out, "{text}")?,
            Command::Quit => return Ok(Flow::Quit),
            Command::Reset { halt } => self.session.reset(halt)?,
            Command::Start => self.session.start()?,
            Command::MemTest => {
                for mam in self.session.memory_modules() {
                    mam.memory_test()?;
                    writeln!(self.out, "Memory test passed for module {}", mam.id())?;
                }
            }
            Command::MemLoadElf { file, module } => {
                let image = Image::from_elf_file(&file)?;
                self.session.load(&ImageLoadRequest { module, image: &image, verify: false })?;
                writeln!(self.out, "Loaded {} bytes into module {module}", image.total_len())?;
            }
            Command::MemRead { module, address, len } => {
                let Some(Proxy::Memory(mam)) = self.session.proxy(module) else {
                    bail!(StateError::Unsupported { module, operation: "mem read" });
                };
                let data = mam.read(address, len)?;
                writeln!(self.out, "{address:#010x}: {}", hex::encode(data))?;
            }
            Command::MemWrite { module, address, data } => {
                let Some(Proxy::Memory(mam)) = self.session.proxy(module) else {
                    bail!(StateError::Unsupported { module, operation: "mem write" });
                };
                mam.write(address, &data)?;
            }
            Command::Wait(seconds) => self.wait(seconds)?,
            Command::Modules => {
                for module in self.session.modules() {
                    writeln!(self.out, "{module}")?;
                }
            }
            Command::Log { module, file, elf, verify } => self.log(module, &file, elf, verify)?,
        }
        Ok(Flow::Continue)
    }

    fn wait(&mut self, seconds: Option<u64>) -> Result<()> {
        let Some(seconds) = seconds else { return Ok(()) };
        let timeout = Duration::from_secs(seconds);
        if self.session.state() != SessionState::Running {
            std::thread::sleep(timeout);
            return Ok(());
        }
        match self.session.wait(timeout) {
            Ok(reason) => writeln!(self.out, "Target {reason}")?,
            Err(osd_core::Error::Timeout(_)) => writeln!(self.out, "Target still running after {seconds}s")?,
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn log(&mut self, module: ModuleId, file: &Path, elf: Option<PathBuf>, verify: bool) -> Result<()> {
        match self.session.proxy(module) {
            Some(Proxy::Trace(stm)) => stm.attach_log(file)?,
            Some(Proxy::CoreTrace(ctm)) => {
                let elf = elf.ok_or_else(|| anyhow!("Core trace needs an image\n{HELP_LOG}"))?;
                let image = Image::from_elf_file(&elf)?;
                ctm.attach_log(file, Arc::new(image), verify)?;
            }
            Some(other) => bail!(StateError::Unsupported { module: other.id(), operation: "log" }),
            None => bail!(StateError::UnknownModule { module }),
        }
        writeln!(self.out, "Logging module {module} to {}", file.display())?;
        Ok(())
    }

    /// Run every line of `input`, echoing each as it goes.
    ///
    /// Failing lines are reported and skipped.
    pub fn run_script(&mut self, input: impl BufRead) -> Result<Flow> {
        for line in input.lines() {
            let line = line.context("Failed to read commands")?;
            writeln!(self.out, "execute: {line}")?;
            match self.execute(&line) {
                Ok(Flow::Quit) => return Ok(Flow::Quit),
                Ok(Flow::Continue) => {}
                Err(e) => eprintln!("{e:#}"),
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osd_core::sim::{SimulatedSoc, SocLayout};
    use osd_core::SessionConfig;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_number("0x10"), Some(16));
        assert_eq!(parse_number("0XfF"), Some(255));
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("4x2"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("").unwrap(), Command::Empty);
        assert_eq!(parse("   ").unwrap(), Command::Empty);
        assert_eq!(parse("q").unwrap(), Command::Quit);
        assert_eq!(parse("reset").unwrap(), Command::Reset { halt: false });
        assert_eq!(parse("reset -halt").unwrap(), Command::Reset { halt: true });
        assert_eq!(parse("reset help").unwrap(), Command::Help(HELP_RESET));
        assert_eq!(parse("mem loadelf help").unwrap(), Command::Help(HELP_MEM_LOADELF));
        assert_eq!(
            parse("mem loadelf app.elf 0x4").unwrap(),
            Command::MemLoadElf { file: PathBuf::from("app.elf"), module: ModuleId(4) }
        );
        assert_eq!(
            parse("mem write 4 0x100 dead").unwrap(),
            Command::MemWrite { module: ModuleId(4), address: 0x100, data: vec![0xde, 0xad] }
        );
        assert_eq!(parse("wait").unwrap(), Command::Wait(None));
        assert_eq!(parse("wait 3").unwrap(), Command::Wait(Some(3)));
        assert_eq!(
            parse("log 3 ctm.log app.elf -verify").unwrap(),
            Command::Log {
                module: ModuleId(3),
                file: PathBuf::from("ctm.log"),
                elf: Some(PathBuf::from("app.elf")),
                verify: true
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = |line: &str| parse(line).unwrap_err().to_string();
        assert!(err("mem loadelf").starts_with("Missing filename"));
        assert!(err("mem loadelf app.elf").starts_with("Missing module id"));
        assert!(err("mem loadelf app.elf x").starts_with("Invalid module id: x"));
        assert!(err("mem loadelf app.elf 0x10000").starts_with("Invalid module id"));
        assert!(err("wait soon").starts_with("No valid seconds given"));
        assert!(err("start now").starts_with("No parameters accepted"));
        assert!(err("frobnicate").starts_with("Unknown command: frobnicate"));
        assert!(err("mem write 4 0 xyz").starts_with("Invalid data"));
    }

    #[test]
    fn test_script_against_simulator() {
        let soc = SimulatedSoc::new(SocLayout::default());
        let session = Session::open(soc.connect(), SessionConfig::default()).unwrap();
        let mut shell = Shell::new(&session, Vec::new());

        let script = "modules\nreset -halt\nmem write 4 0x100 cafef00d\nmem read 4 0x100 4\nbogus\nstart\nwait 5\nquit\nmodules\n";
        assert_eq!(shell.run_script(script.as_bytes()).unwrap(), Flow::Quit);

        let out = String::from_utf8(shell.into_output()).unwrap();
        assert!(out.contains("execute: reset -halt"));
        assert!(out.contains("0x00000100: cafef00d"));
        assert!(out.contains("Target exited with code 0"), "{out}");
        // Nothing after quit runs.
        assert_eq!(out.matches("execute: modules").count(), 1);
        assert_eq!(soc.memory(ModuleId(4), 0x100, 4).unwrap(), vec![0xca, 0xfe, 0xf0, 0x0d]);
    }

    #[test]
    fn test_log_needs_trace_module() {
        let dir = tempfile::tempdir().unwrap();
        let soc = SimulatedSoc::new(SocLayout::default());
        let session = Session::open(soc.connect(), SessionConfig::default()).unwrap();
        let mut shell = Shell::new(&session, Vec::new());
        shell.execute("reset -halt").unwrap();

        let path = dir.path().join("stm.log");
        shell.execute(&format!("log 2 {}", path.display())).unwrap();
        assert!(path.exists());
        assert!(shell.execute("log 4 mam.log").is_err());
        assert!(shell.execute("log 3 ctm.log").is_err());
        assert!(shell.execute("log 0x77 x.log").is_err());
    }
}
