//! Periodic "still working" messages for long external transfers

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// A running heartbeat; stop it with [`Heartbeat::finish`]
pub struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<u32>,
    spinner: Option<ProgressBar>,
}

/// Elapsed-time spinner for interactive terminals
fn spinner(label: &str) -> Option<ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed_precise}]") {
        pb.set_style(style);
    }
    pb.set_message(label.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

impl Heartbeat {
    /// Start logging `label` with the elapsed time every `period`
    pub fn start(label: impl Into<String>, period: Duration) -> Self {
        let label = label.into();
        let token = CancellationToken::new();
        let stop = token.clone();
        let spinner = spinner(&label);
        let bar = spinner.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval_at(started + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut beats = 0u32;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        beats += 1;
                        let secs = started.elapsed().as_secs();
                        let beat = || info!("{label}: still running ({}m {:02}s elapsed)", secs / 60, secs % 60);
                        match &bar {
                            Some(pb) => pb.suspend(beat),
                            None => beat(),
                        }
                    }
                }
            }
            beats
        });

        Self { token, handle, spinner }
    }

    /// Cancel the timer and wait for it; returns how many beats were logged
    pub async fn finish(self) -> u32 {
        self.token.cancel();
        let beats = self.handle.await.unwrap_or(0);
        if let Some(pb) = self.spinner {
            pb.finish_and_clear();
        }
        beats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn beats_until_finished() {
        let hb = Heartbeat::start("copy", Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(hb.finish().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn short_transfers_stay_quiet() {
        let hb = Heartbeat::start("copy", DEFAULT_PERIOD);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hb.finish().await, 0);
    }
}
