use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::display::{ChartOptions, Prefix, Scale, Units};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List network interfaces
    Ifaces {
        /// Show byte counters and hardware addresses
        #[arg(long)]
        verbose: bool,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: IfacesFormat,
    },
    /// Monitor byte-flow rates as live terminal graphs
    Watch(Watch),
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum IfacesFormat {
    Text,
    Json,
}

#[derive(Parser, Clone, Debug)]
pub struct Watch {
    /// Graph bytes received on a network interface (repeatable)
    #[arg(long = "rx", value_name = "IFACE")]
    pub rx: Vec<String>,

    /// Graph bytes transmitted on a network interface (repeatable)
    #[arg(long = "tx", value_name = "IFACE")]
    pub tx: Vec<String>,

    /// Graph a file's growing size; append :SIZE to track progress toward an
    /// expected size in bytes (repeatable)
    #[arg(long = "file", value_name = "PATH[:SIZE]")]
    pub files: Vec<String>,

    /// Graph bytes written to a shell command's standard output (repeatable)
    #[arg(long = "cmd", value_name = "COMMAND")]
    pub commands: Vec<String>,

    /// Graph bytes piped into this process's standard input
    #[arg(long)]
    pub stdin: bool,

    /// Refresh interval in seconds
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,

    /// Smoothing factor in (0, 1); higher reacts faster
    #[arg(long, default_value_t = 0.5)]
    pub alpha: f64,

    /// Readings averaged for the windowed rate
    #[arg(long, default_value_t = 6)]
    pub window: usize,

    /// Graph history length in samples
    #[arg(long, default_value_t = 300)]
    pub history: usize,

    /// Report missing files as size 0 instead of waiting for them
    #[arg(long = "zero-missing")]
    pub zero_missing: bool,

    /// Exit once every tracked transfer has completed
    #[arg(long = "exit-on-complete")]
    pub exit_on_complete: bool,

    /// Zero-growth ticks before a stream counts as complete
    #[arg(long = "idle-exit", default_value_t = 3)]
    pub idle_exit: u32,

    /// Abort after a source has failed this many consecutive ticks
    #[arg(long = "failure-limit", value_name = "TICKS")]
    pub failure_limit: Option<u32>,

    /// Display rates in bits per second
    #[arg(long)]
    pub bits: bool,

    /// Use SI (power-of-ten) unit prefixes instead of IEC
    #[arg(long)]
    pub si: bool,

    /// Linear chart scale instead of logarithmic
    #[arg(long)]
    pub linear: bool,

    /// Lowest rate on the chart, bytes/second
    #[arg(long, default_value_t = 32)]
    pub floor: u64,

    /// Highest rate on the chart, bytes/second
    #[arg(long, default_value_t = 4_294_967_296)]
    pub ceiling: u64,

    /// Plain line-per-tick output instead of the full-screen display
    #[arg(long)]
    pub plain: bool,

    /// Replay a comma-separated list of cumulative byte readings
    #[arg(long, value_name = "BYTES,BYTES,...", hide = true)]
    pub simulate: Option<String>,
}

/// Rejected before the refresh loop ever starts; mapped to its own exit code
/// in main.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("smoothing factor must be strictly between 0 and 1, got {0}")]
    AlphaOutOfRange(f64),
    #[error("refresh interval must be a positive number of seconds, got {0}")]
    IntervalNotPositive(f64),
    #[error("averaging window must be at least 1 reading")]
    WindowTooSmall,
    #[error("chart floor {floor} must be below chart ceiling {ceiling}")]
    ChartBounds { floor: u64, ceiling: u64 },
    #[error("unknown network interface {0:?}")]
    UnknownInterface(String),
    #[error("invalid simulated reading {0:?}")]
    BadSimulatedReading(String),
    #[error("no sources configured; pass --rx/--tx/--file/--cmd/--stdin or pipe data in")]
    NoSources,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub expected: Option<u64>,
}

impl Watch {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ConfigError::AlphaOutOfRange(self.alpha));
        }
        if !(self.interval > 0.0 && self.interval.is_finite()) {
            return Err(ConfigError::IntervalNotPositive(self.interval));
        }
        if self.window == 0 {
            return Err(ConfigError::WindowTooSmall);
        }
        if self.floor >= self.ceiling {
            return Err(ConfigError::ChartBounds {
                floor: self.floor,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    pub fn chart_options(&self) -> ChartOptions {
        ChartOptions {
            units: if self.bits { Units::Bits } else { Units::Bytes },
            prefix: if self.si { Prefix::Si } else { Prefix::Iec },
            scale: if self.linear { Scale::Linear } else { Scale::Log },
            floor: self.floor,
            ceiling: self.ceiling,
        }
    }
}

/// "PATH" or "PATH:SIZE". A trailing :SIZE only counts when the suffix is a
/// plain number, so paths containing colons still work.
pub fn parse_file_spec(raw: &str) -> FileSpec {
    if let Some((path, size)) = raw.rsplit_once(':') {
        if !path.is_empty() {
            if let Ok(expected) = size.parse::<u64>() {
                return FileSpec {
                    path: PathBuf::from(path),
                    expected: Some(expected),
                };
            }
        }
    }
    FileSpec {
        path: PathBuf::from(raw),
        expected: None,
    }
}

pub fn parse_simulated(raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| ConfigError::BadSimulatedReading(s.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn watch(args: &[&str]) -> Watch {
        let mut full = vec!["ratemeter", "watch"];
        full.extend_from_slice(args);
        match Cli::parse_from(full).command {
            Some(Commands::Watch(w)) => w,
            _ => panic!("expected watch subcommand"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_validate() {
        assert!(watch(&[]).validate().is_ok());
    }

    #[test]
    fn alpha_bounds_are_exclusive() {
        assert!(matches!(
            watch(&["--alpha", "0"]).validate(),
            Err(ConfigError::AlphaOutOfRange(_))
        ));
        assert!(matches!(
            watch(&["--alpha", "1"]).validate(),
            Err(ConfigError::AlphaOutOfRange(_))
        ));
        assert!(watch(&["--alpha", "0.2"]).validate().is_ok());
    }

    #[test]
    fn interval_must_be_positive() {
        assert!(matches!(
            watch(&["--interval", "0"]).validate(),
            Err(ConfigError::IntervalNotPositive(_))
        ));
    }

    #[test]
    fn chart_bounds_must_be_ordered() {
        assert!(matches!(
            watch(&["--floor", "1024", "--ceiling", "512"]).validate(),
            Err(ConfigError::ChartBounds { .. })
        ));
    }

    #[test]
    fn file_spec_with_expected_size() {
        let spec = parse_file_spec("/tmp/download.iso:700000000");
        assert_eq!(spec.path, PathBuf::from("/tmp/download.iso"));
        assert_eq!(spec.expected, Some(700_000_000));
    }

    #[test]
    fn file_spec_with_colon_in_path() {
        let spec = parse_file_spec("/tmp/oddly:named");
        assert_eq!(spec.path, PathBuf::from("/tmp/oddly:named"));
        assert_eq!(spec.expected, None);
    }

    #[test]
    fn simulated_readings_parse() {
        assert_eq!(parse_simulated("0, 10,20").unwrap(), vec![0, 10, 20]);
        assert!(parse_simulated("1,x").is_err());
    }

    #[test]
    fn repeatable_taps_collect_in_order() {
        let w = watch(&["--rx", "eth0", "--rx", "wlan0", "--tx", "eth0"]);
        assert_eq!(w.rx, vec!["eth0", "wlan0"]);
        assert_eq!(w.tx, vec!["eth0"]);
    }
}
