use std::time::{Duration, Instant};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use crate::batch::AggregateStats;
use crate::events::ConsoleEvent;
use crate::utils::formatting::format_elapsed;
use super::renderer::{render_event, render_stats};

/// Indicatif bars for a running batch: one bar over all units plus a status line.
pub struct BatchProgress {
    multi: MultiProgress,
    units_bar: ProgressBar,
    status_bar: ProgressBar,
    start_time: Instant,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self::with_target(total, ProgressDrawTarget::stderr())
    }

    /// Bars that draw nowhere, for `--quiet` runs and tests.
    pub fn hidden(total: usize) -> Self {
        Self::with_target(total, ProgressDrawTarget::hidden())
    }

    fn with_target(total: usize, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let units_bar = multi.add(ProgressBar::new(total as u64));
        if let Ok(bar_style) = ProgressStyle::default_bar()
            .template("  {bar:30.cyan/dark_gray} {pos}/{len} units | {msg}")
        {
            units_bar.set_style(bar_style.progress_chars("█▓░"));
        }
        units_bar.set_message("starting");

        let status_bar = multi.add(ProgressBar::new_spinner());
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
            status_bar.set_style(spinner_style);
        }
        status_bar.set_message("Launching batch...");
        status_bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            multi,
            units_bar,
            status_bar,
            start_time: Instant::now(),
        }
    }

    /// Handle a console event and update the bars accordingly.
    pub fn handle_event(&self, event: &ConsoleEvent) {
        match event {
            ConsoleEvent::StatsUpdated { stats } => self.update(stats),
            ConsoleEvent::UnitOutcome { outcome, .. } if outcome.status.is_terminal() => {
                if let Some(line) = render_event(event) {
                    self.println(&line);
                }
            }
            ConsoleEvent::PollDegraded { .. } => {
                if let Some(line) = render_event(event) {
                    self.println(&line);
                }
            }
            ConsoleEvent::BatchFinished { stats, cancelled } => {
                self.update(stats);
                let elapsed = format_elapsed(self.start_time.elapsed());
                if *cancelled {
                    self.units_bar.abandon_with_message("cancelled");
                    self.status_bar.finish_with_message(format!("Batch cancelled after {}", elapsed));
                } else {
                    self.units_bar.finish_with_message("done");
                    self.status_bar.finish_with_message(format!("Batch finished in {}", elapsed));
                }
                if let Some(line) = render_event(event) {
                    self.println(&line);
                }
            }
            _ => {}
        }
    }

    fn update(&self, stats: &AggregateStats) {
        self.units_bar.set_length(stats.total as u64);
        self.units_bar.set_position(stats.completed as u64);
        self.units_bar.set_message(format!("{} running", stats.running));
        self.status_bar.set_message(format!(
            "{} | {}",
            format_elapsed(self.start_time.elapsed()),
            render_stats(stats),
        ));
    }

    pub fn position(&self) -> u64 {
        self.units_bar.position()
    }

    /// Print a line through the multi-progress (won't interfere with bars).
    pub fn println(&self, msg: &str) {
        let _ = self.multi.println(msg);
    }
}
