//! Trace log sinks.
//!
//! Each trace-emitting module streams records to one sink. Software trace
//! records are written as-is; core trace records are annotated with the
//! function they fall into and optionally checked against the image.

use crate::error::VerificationError;
use crate::image::Image;
use crate::protocol::{Body, ModuleId};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Destination of trace records.
pub type Sink = Box<dyn Write + Send>;

/// Create or truncate a log file.
pub fn file_sink(path: &Path) -> io::Result<Sink> {
    Ok(Box::new(BufWriter::new(File::create(path)?)))
}

/// A sink several modules may write to.
///
/// Every record is written under one lock, so lines from different modules
/// interleave but never tear.
#[derive(Clone)]
pub struct SharedSink(Arc<Mutex<Sink>>);

impl SharedSink {
    pub fn new(sink: Sink) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }

    pub fn file(path: &Path) -> io::Result<Self> {
        Ok(Self::new(file_sink(path)?))
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        crate::link::lock(&self.0).write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        crate::link::lock(&self.0).write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        crate::link::lock(&self.0).flush()
    }
}

/// How records of one module are rendered.
#[derive(Debug, Clone)]
pub enum Decoder {
    /// Software trace: `timestamp id value`.
    Software,
    /// Core trace: `timestamp pc symbol`, optionally verified.
    Core { image: Arc<Image>, verify: bool },
}

/// An attached log.
pub struct LogAttachment {
    module: ModuleId,
    decoder: Decoder,
    sink: Sink,
    records: u64,
}

impl LogAttachment {
    pub fn new(module: ModuleId, decoder: Decoder, sink: Sink) -> Self {
        Self { module, decoder, sink, records: 0 }
    }

    pub const fn module(&self) -> ModuleId {
        self.module
    }

    /// Number of records written so far.
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Render a trace frame into the sink.
    ///
    /// Returns the verification failure the record represents, if any.
    /// Frames that are not trace records for this decoder are ignored.
    pub fn record(&mut self, body: &Body) -> io::Result<Option<VerificationError>> {
        let (line, violation) = match (&self.decoder, body) {
            (Decoder::Software, Body::StmTrace { timestamp, id, value }) => {
                (format!("{timestamp:08x} {id:04x} {value:016x}\n"), None)
            }
            (Decoder::Core { image, verify }, Body::CtmTrace { timestamp, pc }) => {
                let symbol = image
                    .symbolize(*pc)
                    .map_or_else(|| "??".to_string(), |(name, off)| format!("{name}+{off:#x}"));
                if *verify && !image.is_executable(*pc) {
                    (
                        format!("{timestamp:08x} {pc:#010x} {symbol} UNEXPECTED\n"),
                        Some(VerificationError::UnexpectedFetch { pc: *pc, timestamp: *timestamp }),
                    )
                } else {
                    (format!("{timestamp:08x} {pc:#010x} {symbol}\n"), None)
                }
            }
            _ => {
                log::debug!("Module {} sent {} to a mismatched log", self.module, body.name());
                return Ok(None);
            }
        };

        self.sink.write_all(line.as_bytes())?;
        self.records += 1;
        Ok(violation)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl Drop for LogAttachment {
    fn drop(&mut self) {
        if let Err(e) = self.sink.flush() {
            log::warn!("Failed to flush log of module {}: {e}", self.module);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Segment, SegmentFlags};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            crate::link::lock(&self.0).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(crate::link::lock(&self.0).clone()).unwrap()
        }
    }

    fn image() -> Arc<Image> {
        Arc::new(
            Image::new(0x100)
                .with_segment(Segment::new(0x100, vec![0; 0x100], SegmentFlags::CODE))
                .with_symbol("main", 0x100, 0x40),
        )
    }

    #[test]
    fn test_software_record_format() {
        let capture = Capture::default();
        let mut log = LogAttachment::new(ModuleId(2), Decoder::Software, Box::new(capture.clone()));
        let v = log.record(&Body::StmTrace { timestamp: 0x10, id: 4, value: 0x41 }).unwrap();
        assert!(v.is_none());
        assert_eq!(capture.text(), "00000010 0004 0000000000000041\n");
        assert_eq!(log.records(), 1);
    }

    #[test]
    fn test_core_record_annotation_and_verification() {
        let capture = Capture::default();
        let mut log = LogAttachment::new(
            ModuleId(3),
            Decoder::Core { image: image(), verify: true },
            Box::new(capture.clone()),
        );

        assert!(log.record(&Body::CtmTrace { timestamp: 1, pc: 0x104 }).unwrap().is_none());
        let v = log.record(&Body::CtmTrace { timestamp: 2, pc: 0x4000 }).unwrap();
        assert_eq!(v, Some(VerificationError::UnexpectedFetch { pc: 0x4000, timestamp: 2 }));

        let text = capture.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "00000001 0x00000104 main+0x4");
        assert_eq!(lines[1], "00000002 0x00004000 ?? UNEXPECTED");
    }

    #[test]
    fn test_unverified_core_log_never_reports() {
        let mut log = LogAttachment::new(
            ModuleId(3),
            Decoder::Core { image: image(), verify: false },
            Box::new(Capture::default()),
        );
        assert!(log.record(&Body::CtmTrace { timestamp: 2, pc: 0x4000 }).unwrap().is_none());
    }

    #[test]
    fn test_mismatched_records_are_skipped() {
        let capture = Capture::default();
        let mut log = LogAttachment::new(ModuleId(2), Decoder::Software, Box::new(capture.clone()));
        log.record(&Body::CtmTrace { timestamp: 0, pc: 0 }).unwrap();
        assert_eq!(log.records(), 0);
        assert!(capture.text().is_empty());
    }

    #[test]
    fn test_shared_sink_interleaves_whole_lines() {
        let capture = Capture::default();
        let shared = SharedSink::new(Box::new(capture.clone()));
        let mut a = LogAttachment::new(ModuleId(2), Decoder::Software, Box::new(shared.clone()));
        let mut b = LogAttachment::new(ModuleId(5), Decoder::Software, Box::new(shared));

        std::thread::scope(|s| {
            for (id, log) in [(2u16, &mut a), (5u16, &mut b)] {
                s.spawn(move || {
                    let body = Body::StmTrace { timestamp: 0, id, value: 0 };
                    for _ in 0..50 {
                        log.record(&body).unwrap();
                    }
                });
            }
        });

        let text = capture.text();
        assert_eq!(text.lines().count(), 100);
        assert!(text.lines().all(|l| l == "00000000 0002 0000000000000000" || l == "00000000 0005 0000000000000000"));
    }
}
