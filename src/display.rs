use std::time::Duration;

use anyhow::Result;

use crate::sampler::Snapshot;

/// Rate-to-pixels and rate-to-text preferences, owned entirely by the
/// display layer. The sampler never sees these.
#[derive(Debug, Clone, Copy)]
pub struct ChartOptions {
    pub units: Units,
    pub prefix: Prefix,
    pub scale: Scale,
    /// Lowest rate drawn on a chart, bytes/second.
    pub floor: u64,
    /// Highest rate drawn on a chart, bytes/second.
    pub ceiling: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Bytes,
    Bits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Iec,
    Si,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Log,
    Linear,
}

/// Pure sink for snapshots. `pump` hands the display the idle time between
/// ticks so interactive backends can watch for a quit request.
pub trait Display {
    fn render(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Returns true when the user asked to quit.
    fn pump(&mut self, budget: Duration) -> Result<bool>;
}

/// Line-per-tick output for pipes and `--plain`.
pub struct PlainDisplay {
    opts: ChartOptions,
}

impl PlainDisplay {
    pub fn new(opts: ChartOptions) -> Self {
        Self { opts }
    }
}

impl Display for PlainDisplay {
    fn render(&mut self, snapshot: &Snapshot) -> Result<()> {
        for e in &snapshot.entries {
            let mut line = format!(
                "{:<24} {:>12}  avg {:>12}  mean {:>12}",
                e.name,
                readable_speed(e.rate, self.opts.units, self.opts.prefix),
                readable_speed(e.windowed_avg, self.opts.units, self.opts.prefix),
                readable_speed(e.lifetime_avg, self.opts.units, self.opts.prefix),
            );
            if let Some(p) = &e.progress {
                let pct = if p.expected > 0 {
                    (p.current as f64 / p.expected as f64 * 100.0).min(100.0)
                } else {
                    100.0
                };
                line.push_str(&format!("  {pct:>3.0}%"));
                if let Some(eta) = p.eta_secs {
                    line.push_str(&format!("  {} left", readable_time(eta)));
                }
            }
            if e.stale {
                line.push_str("  [stale]");
            }
            println!("{line}");
        }
        Ok(())
    }

    fn pump(&mut self, budget: Duration) -> Result<bool> {
        std::thread::sleep(budget);
        Ok(false)
    }
}

/// Render a bytes/second rate as a short human-readable string.
pub fn readable_speed(bytes_per_sec: f64, units: Units, prefix: Prefix) -> String {
    let mut value = match units {
        Units::Bytes => bytes_per_sec.max(0.0),
        Units::Bits => bytes_per_sec.max(0.0) * 8.0,
    };
    let labels: [&str; 6] = match (units, prefix) {
        (Units::Bytes, Prefix::Iec) => ["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s", "PiB/s"],
        (Units::Bytes, Prefix::Si) => ["B/s", "kB/s", "MB/s", "GB/s", "TB/s", "PB/s"],
        (Units::Bits, Prefix::Iec) => ["b/s", "Kib/s", "Mib/s", "Gib/s", "Tib/s", "Pib/s"],
        (Units::Bits, Prefix::Si) => ["b/s", "kb/s", "Mb/s", "Gb/s", "Tb/s", "Pb/s"],
    };
    let step = match prefix {
        Prefix::Iec => 1024.0,
        Prefix::Si => 1000.0,
    };
    let mut idx = 0;
    while value >= step && idx < labels.len() - 1 {
        value /= step;
        idx += 1;
    }
    if idx == 0 {
        format!("{:.0} {}", value, labels[idx])
    } else {
        format!("{:.2} {}", value, labels[idx])
    }
}

/// Render a byte total as a short human-readable string.
pub fn readable_bytes(bytes: u64, prefix: Prefix) -> String {
    let step = match prefix {
        Prefix::Iec => 1024.0,
        Prefix::Si => 1000.0,
    };
    let labels: [&str; 6] = match prefix {
        Prefix::Iec => ["B", "KiB", "MiB", "GiB", "TiB", "PiB"],
        Prefix::Si => ["B", "kB", "MB", "GB", "TB", "PB"],
    };
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= step && idx < labels.len() - 1 {
        value /= step;
        idx += 1;
    }
    if idx == 0 {
        format!("{:.0} {}", value, labels[idx])
    } else {
        format!("{:.2} {}", value, labels[idx])
    }
}

/// Seconds as a short "3m 12s" style string.
pub fn readable_time(secs: f64) -> String {
    let secs = secs.max(0.0).round() as u64;
    if secs >= 86_400 {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    } else if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Map a rate onto 0..=steps chart levels under the configured scale and
/// bounds. Log scale compresses the usual many-decades span of byte rates.
pub fn chart_level(rate: f64, opts: &ChartOptions, steps: u64) -> u64 {
    if rate <= 0.0 || steps == 0 {
        return 0;
    }
    let (lo, hi, v) = match opts.scale {
        Scale::Log => (
            (opts.floor.max(1) as f64).log2(),
            (opts.ceiling.max(2) as f64).log2(),
            rate.log2(),
        ),
        Scale::Linear => (opts.floor as f64, opts.ceiling as f64, rate),
    };
    let span = hi - lo;
    if span <= 0.0 {
        return 0;
    }
    let norm = ((v - lo) / span).clamp(0.0, 1.0);
    (norm * steps as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(scale: Scale, floor: u64, ceiling: u64) -> ChartOptions {
        ChartOptions {
            units: Units::Bytes,
            prefix: Prefix::Iec,
            scale,
            floor,
            ceiling,
        }
    }

    #[test]
    fn readable_speed_iec_bytes() {
        assert_eq!(readable_speed(0.0, Units::Bytes, Prefix::Iec), "0 B/s");
        assert_eq!(readable_speed(512.0, Units::Bytes, Prefix::Iec), "512 B/s");
        assert_eq!(readable_speed(2048.0, Units::Bytes, Prefix::Iec), "2.00 KiB/s");
        assert_eq!(
            readable_speed(3.5 * 1024.0 * 1024.0, Units::Bytes, Prefix::Iec),
            "3.50 MiB/s"
        );
    }

    #[test]
    fn readable_speed_bits_multiplies_by_eight() {
        assert_eq!(readable_speed(128.0, Units::Bits, Prefix::Iec), "1.00 Kib/s");
        assert_eq!(readable_speed(125.0, Units::Bits, Prefix::Si), "1.00 kb/s");
    }

    #[test]
    fn readable_speed_negative_clamps_to_zero() {
        assert_eq!(readable_speed(-5.0, Units::Bytes, Prefix::Iec), "0 B/s");
    }

    #[test]
    fn readable_bytes_totals() {
        assert_eq!(readable_bytes(900, Prefix::Iec), "900 B");
        assert_eq!(readable_bytes(1536, Prefix::Iec), "1.50 KiB");
        assert_eq!(readable_bytes(1_500_000, Prefix::Si), "1.50 MB");
    }

    #[test]
    fn readable_time_breakdown() {
        assert_eq!(readable_time(5.0), "5s");
        assert_eq!(readable_time(192.0), "3m 12s");
        assert_eq!(readable_time(3700.0), "1h 1m");
        assert_eq!(readable_time(90_000.0), "1d 1h");
    }

    #[test]
    fn chart_level_log_scale_clamps_to_bounds() {
        let o = opts(Scale::Log, 32, 1 << 20);
        assert_eq!(chart_level(0.0, &o, 64), 0);
        assert_eq!(chart_level(1.0, &o, 64), 0);
        assert_eq!(chart_level((1u64 << 20) as f64, &o, 64), 64);
        assert_eq!(chart_level(f64::INFINITY, &o, 64), 64);
        let mid = chart_level(1024.0 * 32.0, &o, 64);
        assert!(mid > 0 && mid < 64);
    }

    #[test]
    fn chart_level_linear_scale_is_proportional() {
        let o = opts(Scale::Linear, 0, 1000);
        assert_eq!(chart_level(500.0, &o, 100), 50);
        assert_eq!(chart_level(2000.0, &o, 100), 100);
    }

    #[test]
    fn chart_level_monotone_in_rate() {
        let o = opts(Scale::Log, 32, 1 << 30);
        let mut prev = 0;
        for exp in 0..30 {
            let level = chart_level((1u64 << exp) as f64, &o, 64);
            assert!(level >= prev);
            prev = level;
        }
    }
}
