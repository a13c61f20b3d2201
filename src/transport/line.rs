//! Line reassembly and the background read loop.
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Transport, TransportOptions};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 256;

/// What the read loop reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A complete line, terminator and one trailing `\r` stripped.
    Line(String),
    /// The read loop stopped on a read failure. Not retried.
    Disconnected(String),
    /// An outbound write failed. The connection stays up.
    WriteFailed(String),
}

/// Splits an arbitrarily chunked byte stream into `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and drain every line it completes, in stream order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes of the unterminated tail.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

/// A running connection: a worker thread turning inbound bytes into
/// [`Event::Line`]s, plus the outbound writer.
///
/// Dropping or closing the transport stops the worker and releases both
/// halves of the byte stream.
pub struct LineTransport {
    writer: Box<dyn Write + Send>,
    events: Receiver<Event>,
    notify: Sender<Event>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    // never sent on; disconnects when the worker exits
    finished: Receiver<()>,
    close_timeout: Duration,
}

impl LineTransport {
    /// Start the read loop on `reader`.
    ///
    /// `reader` should return within a short timeout when idle
    /// (`TimedOut`, `WouldBlock` or `Ok(0)`), so the loop can notice `close`.
    pub fn start(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        options: &TransportOptions,
    ) -> Result<Self> {
        let (tx, events) = mpsc::channel();
        let (finished_tx, finished) = mpsc::channel::<()>();
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let tx = tx.clone();
            let running = running.clone();
            let idle_wait = options.idle_wait;
            thread::Builder::new()
                .name("mlx-line-rx".into())
                .spawn(move || {
                    let _finished = finished_tx;
                    read_loop(reader, tx, running, idle_wait);
                })?
        };

        Ok(LineTransport {
            writer,
            events,
            notify: tx,
            running,
            worker: Some(worker),
            finished,
            close_timeout: options.close_timeout,
        })
    }

    /// Whether the read loop is still going.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Stop the read loop and release the endpoint.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        match self.finished.recv_timeout(self.close_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Read loop still busy after {:?}, detaching it",
                    self.close_timeout
                );
            }
            _ => {
                if worker.join().is_err() {
                    log::warn!("Read loop panicked");
                }
            }
        }
        let _ = self.writer.flush();
        log::debug!("Line transport closed");
    }
}

impl Drop for LineTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for LineTransport {
    fn send_raw(&mut self, raw: &[u8]) -> Result<()> {
        log::trace!("=> {}", hex::encode(raw));
        let written = self
            .writer
            .write_all(raw)
            .and_then(|_| self.writer.flush());
        if let Err(e) = written {
            let reason = format!("Write failed: {}", e);
            log::warn!("{}", reason);
            let _ = self.notify.send(Event::WriteFailed(reason.clone()));
            return Err(Error::Connection(reason));
        }
        Ok(())
    }
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    tx: Sender<Event>,
    running: Arc<AtomicBool>,
    idle_wait: Duration,
) {
    let mut lines = LineBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];

    while running.load(Ordering::Acquire) {
        match reader.read(&mut chunk) {
            Ok(0) => thread::sleep(idle_wait),
            Ok(n) => {
                log::trace!("<= {}", hex::encode(&chunk[..n]));
                for line in lines.push(&chunk[..n]) {
                    log::debug!("<< {}", line);
                    if tx.send(Event::Line(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(idle_wait),
            Err(e) => {
                let reason = format!("Serial read failed: {}", e);
                log::warn!("{}", reason);
                running.store(false, Ordering::Release);
                let _ = tx.send(Event::Disconnected(reason));
                return;
            }
        }
    }
    if !lines.pending().is_empty() {
        log::debug!("Dropping {} unterminated bytes", lines.pending().len());
    }
}
