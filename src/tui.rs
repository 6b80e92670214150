use std::io::Stdout;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Sparkline},
    Terminal,
};

use crate::display::{
    chart_level, readable_bytes, readable_speed, readable_time, ChartOptions, Display,
};
use crate::sampler::{Snapshot, SnapshotEntry};

/// Vertical resolution of the sparkline charts.
const CHART_STEPS: u64 = 64;
const MAX_EVENTS: usize = 100;

/// Full-screen renderer: one scrolling rate graph per source, stacked in
/// configured order, with an event pane at the bottom.
pub struct TuiDisplay {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    opts: ChartOptions,
    events: Receiver<String>,
    logs: Vec<String>,
}

impl TuiDisplay {
    pub fn new(opts: ChartOptions, events: Receiver<String>) -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        Ok(Self {
            terminal: Terminal::new(backend)?,
            opts,
            events,
            logs: Vec::new(),
        })
    }

    fn title_for(entry: &SnapshotEntry, opts: &ChartOptions) -> String {
        let mut title = format!(
            " {}  {}  avg {}  mean {} ",
            entry.name,
            readable_speed(entry.rate, opts.units, opts.prefix),
            readable_speed(entry.windowed_avg, opts.units, opts.prefix),
            readable_speed(entry.lifetime_avg, opts.units, opts.prefix),
        );
        if entry.stale {
            title.push_str("[stale] ");
        }
        title
    }
}

impl Display for TuiDisplay {
    fn render(&mut self, snapshot: &Snapshot) -> Result<()> {
        while let Ok(ev) = self.events.try_recv() {
            self.logs.push(ev);
            if self.logs.len() > MAX_EVENTS {
                self.logs.remove(0);
            }
        }

        let opts = self.opts;
        let logs = &self.logs;
        self.terminal.draw(|f| {
            let mut constraints: Vec<Constraint> = snapshot
                .entries
                .iter()
                .map(|_| Constraint::Min(5))
                .collect();
            constraints.push(Constraint::Length(5)); // events
            constraints.push(Constraint::Length(1)); // help line
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints(constraints)
                .split(f.size());

            for (entry, chunk) in snapshot.entries.iter().zip(chunks.iter()) {
                let rows = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Min(3), Constraint::Length(1)].as_ref())
                    .split(*chunk);

                let width = rows[0].width.saturating_sub(2) as usize;
                let start = entry.history.len().saturating_sub(width);
                let data: Vec<u64> = entry.history[start..]
                    .iter()
                    .map(|r| chart_level(*r, &opts, CHART_STEPS))
                    .collect();
                let spark = Sparkline::default()
                    .block(
                        Block::default()
                            .title(Self::title_for(entry, &opts))
                            .borders(Borders::ALL),
                    )
                    .data(&data)
                    .max(CHART_STEPS)
                    .style(Style::default().fg(Color::Cyan));
                f.render_widget(spark, rows[0]);

                if let Some(p) = &entry.progress {
                    let ratio = if p.expected > 0 {
                        (p.current as f64 / p.expected as f64).clamp(0.0, 1.0)
                    } else {
                        1.0
                    };
                    let label = match p.eta_secs {
                        Some(eta) if eta > 0.0 => {
                            format!("{:.0}%  {} left", ratio * 100.0, readable_time(eta))
                        }
                        Some(_) => "done".to_string(),
                        None => format!("{:.0}%", ratio * 100.0),
                    };
                    let gauge = Gauge::default()
                        .gauge_style(Style::default().fg(Color::Green).bg(Color::DarkGray))
                        .ratio(ratio)
                        .label(label);
                    f.render_widget(gauge, rows[1]);
                } else {
                    let total = Paragraph::new(format!(
                        "total {}",
                        readable_bytes(entry.total_bytes, opts.prefix)
                    ));
                    f.render_widget(total, rows[1]);
                }
            }

            // events pane
            let items: Vec<ListItem> = logs.iter().rev().map(|l| ListItem::new(l.clone())).collect();
            let list =
                List::new(items).block(Block::default().title("Events").borders(Borders::ALL));
            f.render_widget(list, chunks[chunks.len() - 2]);

            let help = Paragraph::new("q: quit").style(Style::default().fg(Color::DarkGray));
            f.render_widget(help, chunks[chunks.len() - 1]);
        })?;
        Ok(())
    }

    fn pump(&mut self, budget: Duration) -> Result<bool> {
        if event::poll(budget)? {
            if let Event::Key(key) = event::read()? {
                let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc)
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL));
                if quit {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

impl Drop for TuiDisplay {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
