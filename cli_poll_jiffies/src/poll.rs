use cpu_jiffies::{wire, CpuState, Interval, JiffiesSource, SystemJiffies, SystemSample};

use anyhow::{anyhow, Context};
use futures::stream::StreamExt;
use log::{info, warn};
use std::io::Write;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::{self, Sender};
use tokio_timerfd::Interval as Timer;

use crate::cli::OutputFormat;

pub struct PollSettings {
    pub period: Duration,
    pub flush_interval: Duration,
    pub format: OutputFormat,
    /// States to write in the csv output.
    pub states: Vec<CpuState>,
    /// Stop after that many intervals, or never if `None`.
    pub count: Option<u64>,
}

pub async fn run(
    mut writer: Box<dyn Write + Send>,
    mut source: Box<dyn JiffiesSource>,
    settings: PollSettings,
) -> anyhow::Result<()> {
    // open a Channel to write to the output in another thread
    let (tx, mut rx) = mpsc::channel::<SystemJiffies>(4096);

    // Start the writer task, which will receive the intervals from the channel and write
    // them to the selected output.
    let format = settings.format;
    let states = settings.states.clone();
    let flush_interval = settings.flush_interval;
    let handle = tokio::spawn(async move {
        let mut previous_flush: Option<SystemTime> = None;

        write_header(&mut writer, format)?;
        while let Some(interval) = rx.recv().await {
            print_interval(&mut writer, &interval, format, &states)?;

            let last_flush = *previous_flush.get_or_insert(interval.start());
            let time_since_last_flush = interval.end().duration_since(last_flush).unwrap_or(Duration::ZERO);
            if time_since_last_flush >= flush_interval {
                previous_flush = Some(interval.end());
                writer.flush()?;
            }
        }
        // the channel is closed: polling has stopped
        writer.flush()?;
        anyhow::Ok(())
    });

    // Poll the jiffies at regular intervals and send the intervals to the writer task,
    // until the count is reached or the user interrupts us.
    let polled = tokio::select! {
        res = poll_jiffies(source.as_mut(), settings.period, settings.count, tx) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping.");
            Ok(())
        }
    };

    // The sender has been dropped with the polling future, so the writer task ends
    // once it has written everything. Its error comes first: when it stops early,
    // polling only fails because the channel is closed.
    handle.await?.context("writer task error")?;
    polled.context("polling cpu jiffies")
}

async fn poll_jiffies(
    source: &mut dyn JiffiesSource,
    period: Duration,
    count: Option<u64>,
    tx: Sender<SystemJiffies>,
) -> anyhow::Result<()> {
    // Underneath, this uses a periodic timer from timerfd, which has a higher resolution than std::time::sleep and tokio::time::sleep
    let mut timer = Timer::new_interval(period)?;
    let mut tracker = IntervalTracker::default();
    let mut sent = 0;

    while count.map_or(true, |n| sent < n) {
        // wait for the next tick of the periodic timer
        timer.next().await.transpose().context("periodic timer")?;

        let sample = source.sample().context("sampling")?;
        if let Some(interval) = tracker.push(sample) {
            tx.send(interval)
                .await
                .map_err(|_| anyhow!("the writer task has stopped"))?;
            sent += 1;
        }
    }
    if tracker.dropped > 0 {
        warn!("{} intervals have been dropped", tracker.dropped);
    }
    Ok(())
}

/// Turns consecutive samples into intervals.
///
/// A pair of samples that does not give a valid interval is skipped, and the
/// most recent sample becomes the new reference.
#[derive(Default)]
pub(crate) struct IntervalTracker {
    previous: Option<SystemSample>,
    /// Number of rejected pairs.
    pub dropped: u64,
}

impl IntervalTracker {
    pub fn push(&mut self, sample: SystemSample) -> Option<SystemJiffies> {
        let result = match &self.previous {
            None => None,
            Some(previous) => match SystemJiffies::between(previous, &sample) {
                Ok(interval) if interval.is_monotonic() => Some(interval),
                Ok(interval) => {
                    for r in interval.regressions() {
                        warn!("cpu {} {}: counter went backwards by {}", r.cpu, r.state, -r.delta);
                    }
                    warn!("Dropping interval {:?} -> {:?}: counters have been reset", interval.start(), interval.end());
                    None
                }
                Err(e) => {
                    warn!("Dropping tick: {e}");
                    None
                }
            },
        };
        if result.is_none() && self.previous.is_some() {
            self.dropped += 1;
        }
        self.previous = Some(sample);
        result
    }
}

pub(crate) fn write_header(writer: &mut dyn Write, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Csv {
        writer.write_all("start_ms;end_ms;cpu;state;jiffies\n".as_bytes())?;
    }
    Ok(())
}

pub(crate) fn print_interval(
    writer: &mut dyn Write,
    interval: &SystemJiffies,
    format: OutputFormat,
    states: &[CpuState],
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            writeln!(writer, "{}", wire::to_json(interval)?)?;
        }
        OutputFormat::Csv => {
            let start_ms = interval.start().duration_since(SystemTime::UNIX_EPOCH)?.as_millis();
            let end_ms = interval.end().duration_since(SystemTime::UNIX_EPOCH)?.as_millis();
            for cpu in interval.data() {
                for state in states {
                    let jiffies = cpu.get(*state);
                    writeln!(writer, "{start_ms};{end_ms};{};{state};{jiffies}", cpu.cpu)?;
                }
            }
        }
    }
    Ok(())
}
