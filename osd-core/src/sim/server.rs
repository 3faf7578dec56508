//! Serve a [`SimulatedSoc`] over TCP, speaking the same framing as
//! [`TcpTransport`](crate::transport::TcpTransport).

use super::SimulatedSoc;
use crate::protocol::codec;
use crate::transport::Transport;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(20);

/// Accept connections one at a time until the listener fails.
pub fn serve(soc: &SimulatedSoc, listener: &TcpListener) -> io::Result<()> {
    log::info!("Simulated debug system listening on {}", listener.local_addr()?);
    for stream in listener.incoming() {
        let stream = stream?;
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        log::info!("Host connected from {peer}");
        if let Err(e) = serve_connection(soc, stream) {
            log::warn!("Connection from {peer} failed: {e}");
        }
        log::info!("Host {peer} disconnected");
    }
    Ok(())
}

/// Bridge one host connection to the system until either side hangs up.
pub fn serve_connection(soc: &SimulatedSoc, stream: TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let stale = soc.discard_pending();
    if stale > 0 {
        log::debug!("Dropped {stale} frames left over from the previous host");
    }
    let transport = Arc::new(soc.connect());
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let transport = Arc::clone(&transport);
        let done = Arc::clone(&done);
        let mut out = BufWriter::new(stream.try_clone()?);
        thread::Builder::new().name("osd-sim-writer".to_string()).spawn(move || {
            while !done.load(Ordering::SeqCst) {
                match transport.receive(POLL) {
                    Ok(Some(frame)) => {
                        if codec::write_frame(&mut out, &frame).and_then(|()| out.flush()).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("Simulated link failed: {e}");
                        break;
                    }
                }
            }
            done.store(true, Ordering::SeqCst);
            // Unblocks the reader.
            let _ = out.get_ref().shutdown(Shutdown::Both);
        })?
    };

    let mut reader = BufReader::new(stream.try_clone()?);
    let result = loop {
        if done.load(Ordering::SeqCst) {
            break Ok(());
        }
        match codec::read_frame(&mut reader) {
            Ok(Some(frame)) => {
                if let Err(e) = transport.send(&frame) {
                    break Err(io::Error::new(io::ErrorKind::BrokenPipe, e));
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    done.store(true, Ordering::SeqCst);
    let _ = stream.shutdown(Shutdown::Both);
    let _ = writer.join();
    result
}
