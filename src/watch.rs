use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel as channel;
use tracing::{info, warn};

use crate::cli::{parse_file_spec, parse_simulated, ConfigError, Watch};
use crate::display::{Display, PlainDisplay};
use crate::iface::{self, Direction};
use crate::sampler::SourceSet;
use crate::source::Source;
use crate::tui::TuiDisplay;

/// Ticks every source must spend unavailable before the loop gives up on the
/// whole set. A single bad tick (interface flap, racing re-creation) is not
/// the end of monitoring.
const UNAVAILABLE_EXIT_TICKS: u32 = 3;

/// Longest stretch the loop sleeps without checking the stop flag and the
/// display's input.
const POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Every tracked transfer completed (exit-on-complete).
    Finished,
    /// A source crossed the failure ceiling, or all sources are gone.
    Exhausted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Completed,
    Interrupted,
    SourceFailure(String),
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Completed | ExitStatus::Interrupted => 0,
            ExitStatus::SourceFailure(_) => 3,
        }
    }
}

/// Single-threaded tick driver: sample, render, evaluate, sleep. Ticks never
/// overlap; the stop flag is the only external control.
pub struct RefreshLoop {
    set: SourceSet,
    interval: Duration,
    exit_on_complete: bool,
    idle_exit: u32,
    failure_limit: Option<u32>,
    state: LoopState,
}

impl RefreshLoop {
    pub fn new(
        set: SourceSet,
        interval: Duration,
        exit_on_complete: bool,
        idle_exit: u32,
        failure_limit: Option<u32>,
    ) -> Self {
        Self {
            set,
            interval,
            exit_on_complete,
            idle_exit,
            failure_limit,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// One tick: sample all sources, deliver the snapshot, evaluate
    /// termination. The snapshot that completes a transfer is rendered before
    /// the loop winds down, so Draining needs no extra sampling pass.
    pub fn tick(&mut self, now: Instant, display: &mut dyn Display) -> Result<Step> {
        if self.state == LoopState::Idle {
            self.state = LoopState::Running;
        }

        let snapshot = self.set.sample(now);
        display.render(&snapshot)?;

        if let Some(limit) = self.failure_limit {
            if let Some(name) = self.set.source_over_failure_limit(limit) {
                self.state = LoopState::Stopped;
                return Ok(Step::Exhausted(name));
            }
        }
        if self.set.all_unavailable_for(UNAVAILABLE_EXIT_TICKS) {
            self.state = LoopState::Stopped;
            return Ok(Step::Exhausted("all sources".to_string()));
        }

        if self.exit_on_complete && self.set.tracked_complete(self.idle_exit) == Some(true) {
            // the completing snapshot is already on screen; the caller winds
            // down without another sampling pass
            self.state = LoopState::Draining;
            return Ok(Step::Finished);
        }

        Ok(Step::Continue)
    }

    /// Wind down after a [`Step::Finished`] tick.
    pub fn finish(&mut self) {
        self.state = LoopState::Stopped;
    }

    /// Drive ticks until interrupt, completion, or exhaustion.
    pub fn run(&mut self, display: &mut dyn Display, stop: &AtomicBool) -> Result<ExitStatus> {
        loop {
            if stop.load(Ordering::Relaxed) {
                self.state = LoopState::Stopped;
                return Ok(ExitStatus::Interrupted);
            }

            let started = Instant::now();
            match self.tick(started, display)? {
                Step::Continue => {}
                Step::Finished => {
                    self.finish();
                    info!("all tracked transfers complete");
                    return Ok(ExitStatus::Completed);
                }
                Step::Exhausted(name) => {
                    warn!(source = %name, "giving up after repeated source failures");
                    return Ok(ExitStatus::SourceFailure(name));
                }
            }

            // sleep to the next boundary in slices so interrupts and
            // keyboard input stay responsive
            let deadline = started + self.interval;
            loop {
                if stop.load(Ordering::Relaxed) {
                    self.state = LoopState::Stopped;
                    return Ok(ExitStatus::Interrupted);
                }
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                if display.pump(left.min(POLL_SLICE))? {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }
    }
}

pub fn run_watch(watch: Watch) -> Result<i32> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }
    run_watch_with_shutdown(watch, stop_flag)
}

pub(crate) fn run_watch_with_shutdown(watch: Watch, stop_flag: Arc<AtomicBool>) -> Result<i32> {
    watch.validate()?;

    let (event_tx, event_rx) = channel::unbounded::<String>();
    let mut set = SourceSet::new(watch.alpha, watch.window, watch.history);
    let mut has_stdin_tap = false;

    for name in &watch.rx {
        if !iface::interface_exists(name) {
            return Err(ConfigError::UnknownInterface(name.clone()).into());
        }
        set.push(Source::interface(name.clone(), Direction::Rx));
    }
    for name in &watch.tx {
        if !iface::interface_exists(name) {
            return Err(ConfigError::UnknownInterface(name.clone()).into());
        }
        set.push(Source::interface(name.clone(), Direction::Tx));
    }
    for raw in &watch.files {
        let spec = parse_file_spec(raw);
        set.push(Source::file(spec.path, watch.zero_missing, spec.expected));
    }
    for command in &watch.commands {
        set.push(Source::command(command, &event_tx)?);
    }
    if watch.stdin || (set.is_empty() && watch.simulate.is_none() && !std::io::stdin().is_terminal())
    {
        set.push(Source::stdin(&event_tx));
        has_stdin_tap = true;
    }
    if let Some(raw) = &watch.simulate {
        set.push(Source::simulated(parse_simulated(raw)?));
    }
    if set.is_empty() {
        return Err(ConfigError::NoSources.into());
    }

    info!(
        sources = set.len(),
        interval = watch.interval,
        "starting ratemeter"
    );

    // a stdin tap means the keyboard is not ours to read
    let plain = watch.plain || has_stdin_tap || !std::io::stdout().is_terminal();
    let opts = watch.chart_options();
    let mut display: Box<dyn Display> = if plain {
        Box::new(PlainDisplay::new(opts))
    } else {
        Box::new(TuiDisplay::new(opts, event_rx)?)
    };

    let mut refresh = RefreshLoop::new(
        set,
        Duration::from_secs_f64(watch.interval),
        watch.exit_on_complete,
        watch.idle_exit,
        watch.failure_limit,
    );
    let status = refresh.run(display.as_mut(), &stop_flag)?;
    drop(display); // restore the terminal before any final output

    if let ExitStatus::SourceFailure(name) = &status {
        eprintln!("ratemeter: {name} failed repeatedly, giving up");
    }
    Ok(status.code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::Snapshot;

    /// Render sink for loop tests.
    struct NullDisplay {
        renders: usize,
        last: Option<Snapshot>,
    }

    impl NullDisplay {
        fn new() -> Self {
            Self {
                renders: 0,
                last: None,
            }
        }
    }

    impl Display for NullDisplay {
        fn render(&mut self, snapshot: &Snapshot) -> Result<()> {
            self.renders += 1;
            self.last = Some(snapshot.clone());
            Ok(())
        }

        fn pump(&mut self, _budget: Duration) -> Result<bool> {
            Ok(false)
        }
    }

    fn tick_at(start: Instant, n: u64) -> Instant {
        start + Duration::from_secs(n)
    }

    fn wait_for_stream_end(source: &Source) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while source.stream_finished() != Some(true) {
            assert!(Instant::now() < deadline, "stream never finished");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn loop_starts_idle_and_runs() {
        let mut set = SourceSet::new(0.5, 6, 300);
        set.push(Source::simulated(0..100u64));
        let mut refresh = RefreshLoop::new(set, Duration::from_secs(1), false, 3, None);
        assert_eq!(refresh.state(), LoopState::Idle);

        let mut display = NullDisplay::new();
        let step = refresh.tick(Instant::now(), &mut display).unwrap();
        assert_eq!(step, Step::Continue);
        assert_eq!(refresh.state(), LoopState::Running);
        assert_eq!(display.renders, 1);
    }

    #[test]
    fn command_burst_then_idle_ticks_finishes_the_loop() {
        let (event_tx, _event_rx) = channel::unbounded();
        let source = Source::command("printf '%01000d' 7", &event_tx).unwrap();
        wait_for_stream_end(&source);

        let mut set = SourceSet::new(0.5, 6, 300);
        set.push(source);
        let mut refresh = RefreshLoop::new(set, Duration::from_secs(1), true, 3, None);
        let mut display = NullDisplay::new();

        let t0 = Instant::now();
        // burst tick: the whole 1000-byte output drains at once
        assert_eq!(refresh.tick(t0, &mut display).unwrap(), Step::Continue);
        let snap = display.last.as_ref().unwrap();
        assert_eq!(snap.entries[0].total_bytes, 1000);

        // two idle ticks keep running, the third completes the transfer
        assert_eq!(refresh.tick(tick_at(t0, 1), &mut display).unwrap(), Step::Continue);
        assert_eq!(refresh.tick(tick_at(t0, 2), &mut display).unwrap(), Step::Continue);
        assert_eq!(refresh.tick(tick_at(t0, 3), &mut display).unwrap(), Step::Finished);
        assert_eq!(refresh.state(), LoopState::Draining);
        refresh.finish();
        assert_eq!(refresh.state(), LoopState::Stopped);
        assert_eq!(display.renders, 4);
        assert_eq!(ExitStatus::Completed.code(), 0);
    }

    #[test]
    fn failure_ceiling_exhausts_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = SourceSet::new(0.5, 6, 300);
        set.push(Source::file(dir.path().join("never"), false, None));
        let mut refresh = RefreshLoop::new(set, Duration::from_secs(1), false, 3, Some(2));
        let mut display = NullDisplay::new();

        let t0 = Instant::now();
        assert_eq!(refresh.tick(t0, &mut display).unwrap(), Step::Continue);
        assert_eq!(refresh.tick(tick_at(t0, 1), &mut display).unwrap(), Step::Continue);
        let step = refresh.tick(tick_at(t0, 2), &mut display).unwrap();
        assert!(matches!(step, Step::Exhausted(_)));
        assert_eq!(refresh.state(), LoopState::Stopped);
    }

    #[test]
    fn sole_exhausted_source_stops_with_failure_status() {
        let mut set = SourceSet::new(0.5, 6, 300);
        set.push(Source::simulated([0, 100]));
        let mut refresh = RefreshLoop::new(set, Duration::from_secs(1), false, 3, None);
        let mut display = NullDisplay::new();

        let t0 = Instant::now();
        let mut n = 0;
        let step = loop {
            let step = refresh.tick(tick_at(t0, n), &mut display).unwrap();
            if step != Step::Continue {
                break step;
            }
            n += 1;
            assert!(n < 20, "loop never gave up");
        };
        assert!(matches!(step, Step::Exhausted(_)));
        assert_eq!(ExitStatus::SourceFailure("simulated".into()).code(), 3);
    }

    #[test]
    fn healthy_source_keeps_an_unavailable_neighbor_from_exhausting() {
        let mut set = SourceSet::new(0.5, 6, 300);
        set.push(Source::simulated([0, 100])); // dies after two ticks
        set.push(Source::simulated(0..100u64)); // keeps going
        let mut refresh = RefreshLoop::new(set, Duration::from_secs(1), false, 3, None);
        let mut display = NullDisplay::new();

        let t0 = Instant::now();
        for n in 0..15u64 {
            assert_eq!(refresh.tick(tick_at(t0, n), &mut display).unwrap(), Step::Continue);
        }
        assert_eq!(refresh.state(), LoopState::Running);
    }

    #[test]
    fn stop_flag_interrupts_run_cleanly() {
        let mut set = SourceSet::new(0.5, 6, 300);
        set.push(Source::simulated(0..100u64));
        let mut refresh = RefreshLoop::new(set, Duration::from_millis(20), false, 3, None);
        let mut display = NullDisplay::new();
        let stop = AtomicBool::new(true);
        let status = refresh.run(&mut display, &stop).unwrap();
        assert_eq!(status, ExitStatus::Interrupted);
        assert_eq!(status.code(), 0);
        assert_eq!(refresh.state(), LoopState::Stopped);
    }

    #[test]
    fn file_reaching_expected_size_finishes_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xfer");
        std::fs::write(&path, [0u8; 500]).unwrap();

        let mut set = SourceSet::new(0.5, 6, 300);
        set.push(Source::file(&path, false, Some(500)));
        let mut refresh = RefreshLoop::new(set, Duration::from_secs(1), true, 3, None);
        let mut display = NullDisplay::new();
        assert_eq!(refresh.tick(Instant::now(), &mut display).unwrap(), Step::Finished);
    }
}
