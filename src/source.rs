use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use sysinfo::Networks;
use thiserror::Error;
use tracing::warn;

use crate::iface::Direction;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transient: the resource should appear on a later tick.
    #[error("{0} is not ready yet")]
    NotReady(String),
    /// The backing resource is gone.
    #[error("{0} is unavailable")]
    Unavailable(String),
}

/// One reading from a source, in the shape its acquisition mechanism allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// A monotonic counter value (interface counters, file sizes).
    Cumulative(u64),
    /// Bytes accumulated since the previous observation (streamed sources).
    Delta(u64),
}

/// Byte counter shared between a stream's reader thread and the tick driver.
/// The reader only ever adds; the tick side reads via [`StreamTail::drain`].
#[derive(Default)]
pub struct ByteAccumulator {
    total: AtomicU64,
    finished: AtomicBool,
}

impl ByteAccumulator {
    pub fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Tick-side view of a [`ByteAccumulator`].
pub struct StreamTail {
    acc: Arc<ByteAccumulator>,
    drained: u64,
}

impl StreamTail {
    fn new(acc: Arc<ByteAccumulator>) -> Self {
        Self { acc, drained: 0 }
    }

    /// Bytes accumulated since the previous drain. Never blocks; returns 0
    /// when nothing new has arrived (including after end of stream).
    pub fn drain(&mut self) -> u64 {
        let total = self.acc.total();
        let delta = total - self.drained;
        self.drained = total;
        delta
    }

    pub fn finished(&self) -> bool {
        self.acc.is_finished()
    }
}

fn spawn_reader<R>(mut reader: R, acc: Arc<ByteAccumulator>, events: Sender<String>, label: String)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => acc.add(n as u64),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(?e, source = %label, "stream read error");
                    break;
                }
            }
        }
        acc.finish();
        let _ = events.send(format!("{label}: end of stream"));
    });
}

pub struct InterfaceSource {
    iface: String,
    direction: Direction,
    networks: Networks,
}

impl InterfaceSource {
    fn poll(&mut self) -> Result<u64, SourceError> {
        // refresh_list rescans, so a removed interface actually disappears
        self.networks.refresh_list();
        match self.networks.iter().find(|(n, _)| n.as_str() == self.iface) {
            Some((_, data)) => Ok(match self.direction {
                Direction::Rx => data.total_received(),
                Direction::Tx => data.total_transmitted(),
            }),
            None => Err(SourceError::Unavailable(format!("interface {}", self.iface))),
        }
    }
}

pub struct FileSource {
    path: PathBuf,
    missing_as_zero: bool,
    expected: Option<u64>,
}

impl FileSource {
    fn poll(&self) -> Result<u64, SourceError> {
        match std::fs::metadata(&self.path) {
            Ok(md) => Ok(md.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.missing_as_zero {
                    Ok(0)
                } else {
                    Err(SourceError::NotReady(format!("file {}", self.path.display())))
                }
            }
            Err(e) => Err(SourceError::Unavailable(format!(
                "file {}: {e}",
                self.path.display()
            ))),
        }
    }
}

pub struct CommandSource {
    command: String,
    child: Child,
    tail: StreamTail,
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct StdinSource {
    tail: StreamTail,
}

/// Replays a scripted list of cumulative readings, one per tick; reports the
/// source as gone once the script runs out. Doubles as the test feed.
pub struct SimulatedSource {
    readings: VecDeque<u64>,
}

impl SimulatedSource {
    fn next(&mut self) -> Result<u64, SourceError> {
        self.readings
            .pop_front()
            .ok_or_else(|| SourceError::Unavailable("simulated feed".into()))
    }
}

/// A configured tap. Polled variants answer with a cumulative counter,
/// streamed variants with the bytes drained since the last tick; the two
/// shapes meet in [`Observation`].
pub enum Source {
    Interface(InterfaceSource),
    File(FileSource),
    Command(CommandSource),
    Stdin(StdinSource),
    Simulated(SimulatedSource),
}

impl Source {
    pub fn interface(iface: impl Into<String>, direction: Direction) -> Self {
        Source::Interface(InterfaceSource {
            iface: iface.into(),
            direction,
            networks: Networks::new_with_refreshed_list(),
        })
    }

    pub fn file(path: impl Into<PathBuf>, missing_as_zero: bool, expected: Option<u64>) -> Self {
        Source::File(FileSource {
            path: path.into(),
            missing_as_zero,
            expected,
        })
    }

    /// Starts `command` under `sh -c` with stdout captured by a background
    /// reader that feeds the byte accumulator.
    pub fn command(command: &str, events: &Sender<String>) -> Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning command {command:?}"))?;
        let stdout = child
            .stdout
            .take()
            .context("capturing command standard output")?;
        let acc = Arc::new(ByteAccumulator::default());
        spawn_reader(
            stdout,
            Arc::clone(&acc),
            events.clone(),
            format!("cmd {command:?}"),
        );
        Ok(Source::Command(CommandSource {
            command: command.to_string(),
            child,
            tail: StreamTail::new(acc),
        }))
    }

    /// Captures this process's own standard input.
    pub fn stdin(events: &Sender<String>) -> Self {
        let acc = Arc::new(ByteAccumulator::default());
        spawn_reader(
            std::io::stdin(),
            Arc::clone(&acc),
            events.clone(),
            "stdin".to_string(),
        );
        Source::Stdin(StdinSource {
            tail: StreamTail::new(acc),
        })
    }

    pub fn simulated(readings: impl IntoIterator<Item = u64>) -> Self {
        Source::Simulated(SimulatedSource {
            readings: readings.into_iter().collect(),
        })
    }

    pub fn label(&self) -> String {
        match self {
            Source::Interface(s) => format!("{}: {}", s.direction, s.iface),
            Source::File(s) => format!("file: {}", s.path.display()),
            Source::Command(s) => format!("cmd: {}", s.command),
            Source::Stdin(_) => "stdin".to_string(),
            Source::Simulated(_) => "simulated".to_string(),
        }
    }

    /// One reading for this tick. Never blocks.
    pub fn observe(&mut self) -> Result<Observation, SourceError> {
        match self {
            Source::Interface(s) => s.poll().map(Observation::Cumulative),
            Source::File(s) => s.poll().map(Observation::Cumulative),
            Source::Command(s) => Ok(Observation::Delta(s.tail.drain())),
            Source::Stdin(s) => Ok(Observation::Delta(s.tail.drain())),
            Source::Simulated(s) => s.next().map(Observation::Cumulative),
        }
    }

    /// Whether the backing stream has hit end of data. `None` for polled
    /// sources, which have no such notion.
    pub fn stream_finished(&self) -> Option<bool> {
        match self {
            Source::Command(s) => Some(s.tail.finished()),
            Source::Stdin(s) => Some(s.tail.finished()),
            _ => None,
        }
    }

    /// Expected final size for progress-tracked file taps.
    pub fn expected_size(&self) -> Option<u64> {
        match self {
            Source::File(s) => s.expected,
            _ => None,
        }
    }

    /// Whether this tap takes part in exit-on-completion tracking.
    pub fn tracks_completion(&self) -> bool {
        match self {
            Source::File(s) => s.expected.is_some(),
            Source::Command(_) | Source::Stdin(_) => true,
            Source::Interface(_) | Source::Simulated(_) => false,
        }
    }
}
