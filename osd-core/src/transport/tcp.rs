//! TCP transport to a debug daemon.
//!
//! Frames are exchanged with the length-prefixed encoding from
//! [`crate::protocol::codec`]. A reader thread decodes incoming frames into
//! a channel so `receive` can honour its timeout without tearing a frame in
//! half.

use super::Transport;
use crate::error::TransportError;
use crate::protocol::{codec, Frame};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::BufReader;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Default daemon port.
pub const DEFAULT_PORT: u16 = 9537;

/// Client side of a daemon connection.
pub struct TcpTransport {
    writer: Mutex<TcpStream>,
    incoming: Receiver<Result<Frame, TransportError>>,
    reader_thread: Option<thread::JoinHandle<()>>,
}

impl TcpTransport {
    /// Connect to a daemon.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        let read_half = stream.try_clone()?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let reader_thread = thread::Builder::new()
            .name("osd-tcp-reader".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(read_half);
                loop {
                    match codec::read_frame(&mut reader) {
                        Ok(Some(frame)) => {
                            if tx.send(Ok(frame)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => {
                            let _ = tx.send(Err(TransportError::LinkLost("daemon closed the connection".to_string())));
                            return;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.into()));
                            return;
                        }
                    }
                }
            })?;

        log::info!("Connected to debug daemon at {peer}");
        Ok(Self {
            writer: Mutex::new(stream),
            incoming: rx,
            reader_thread: Some(reader_thread),
        })
    }
}

impl Transport for TcpTransport {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut stream = self
            .writer
            .lock()
            .map_err(|_| TransportError::LinkLost("writer lock poisoned".to_string()))?;
        codec::write_frame(&mut *stream, frame)?;
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        match self.incoming.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::LinkLost("reader stopped".to_string()))
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Ok(stream) = self.writer.lock() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Body, ModuleId};
    use std::net::TcpListener;

    #[test]
    fn test_exchange_frames_with_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let frame = codec::read_frame(&mut stream).unwrap().unwrap();
            assert_eq!(frame.body, Body::RegRead { reg: 0x0200 });
            codec::write_frame(&mut stream, &Frame::to_host(frame.dest, Body::RegValue { reg: 0x0200, value: 4 }))
                .unwrap();
        });

        let transport = TcpTransport::connect(addr).unwrap();
        transport.send(&Frame::to_module(ModuleId::SCM, Body::RegRead { reg: 0x0200 })).unwrap();
        let reply = transport.receive(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(reply.src, ModuleId::SCM);
        assert_eq!(reply.body, Body::RegValue { reg: 0x0200, value: 4 });
        peer.join().unwrap();

        // Peer hung up after replying.
        let err = transport.receive(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransportError::LinkLost(_)));
    }

    #[test]
    fn test_receive_times_out_quietly() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = TcpTransport::connect(addr).unwrap();
        let (_held, _) = listener.accept().unwrap();

        assert!(transport.receive(Duration::from_millis(20)).unwrap().is_none());
    }
}
