use std::{
    fmt::Display,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

use crate::{wire, Component, CpuJiffies, CpuState, JiffiesDelta, JiffiesError, SystemSample};

/// Some data about a [`Component`] over a time range.
pub trait Interval {
    type Data;

    fn start(&self) -> SystemTime;

    fn end(&self) -> SystemTime;

    /// The component that the data applies to.
    fn component(&self) -> Component;

    /// Returns a copy of the data of the interval.
    fn data(&self) -> Self::Data;
}

/// The jiffies consumed by every cpu core of the machine between two samples.
///
/// An interval is immutable. Intervals are ordered by start, then by end, which
/// gives the chronological order of consecutive intervals. Overlapping intervals
/// are not rejected by the ordering, use [`check_timeline`] to detect them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "wire::RawSystemJiffies")]
pub struct SystemJiffies {
    // The field order matters for the derived Ord, and for the wire format.
    #[serde(with = "wire::epoch")]
    start: SystemTime,
    #[serde(with = "wire::epoch")]
    end: SystemTime,
    #[serde(rename = "data")]
    jiffies: Vec<JiffiesDelta>,
}

/// A counter that went backwards during an interval.
///
/// This happens when the counters are reset (reboot), or when the samples have
/// been taken out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regression {
    pub cpu: u32,
    pub state: CpuState,
    pub delta: i64,
}

impl SystemJiffies {
    /// Computes the jiffies consumed between two samples.
    ///
    /// `first` must have been taken strictly before `second`, and both must have
    /// the same number of cpus. The cpu at position `i` is assumed to be the same
    /// physical cpu in the two samples, its id is taken from `first`.
    ///
    /// The counters are subtracted without any correction: a counter that went
    /// backwards gives a negative delta, see [`SystemJiffies::regressions`].
    /// A difference that does not fit in an `i64` is a [`JiffiesError::DeltaOverflow`].
    pub fn between(first: &SystemSample, second: &SystemSample) -> Result<SystemJiffies, JiffiesError> {
        if first.timestamp() >= second.timestamp() {
            return Err(JiffiesError::OrderingViolation {
                first: first.timestamp(),
                second: second.timestamp(),
            });
        }
        let jiffies = difference(first.data(), second.data())?;
        Ok(SystemJiffies {
            start: first.timestamp(),
            end: second.timestamp(),
            jiffies,
        })
    }

    /// Creates an interval from existing deltas, which are copied.
    pub fn new(start: SystemTime, end: SystemTime, jiffies: &[JiffiesDelta]) -> Result<SystemJiffies, JiffiesError> {
        if end < start {
            return Err(JiffiesError::EndBeforeStart { start, end });
        }
        Ok(SystemJiffies {
            start,
            end,
            jiffies: jiffies.to_vec(),
        })
    }

    pub fn duration(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or(Duration::ZERO)
    }

    pub fn cpu_count(&self) -> usize {
        self.jiffies.len()
    }

    /// Lists the counters that have a negative delta.
    pub fn regressions(&self) -> impl Iterator<Item = Regression> + '_ {
        self.jiffies.iter().flat_map(|cpu| {
            cpu.counters()
                .into_iter()
                .filter(|(_, delta)| *delta < 0)
                .map(move |(state, delta)| Regression {
                    cpu: cpu.cpu,
                    state,
                    delta,
                })
        })
    }

    /// Returns `true` if no counter went backwards.
    pub fn is_monotonic(&self) -> bool {
        self.regressions().next().is_none()
    }
}

fn difference(first: &[CpuJiffies<u64>], second: &[CpuJiffies<u64>]) -> Result<Vec<JiffiesDelta>, JiffiesError> {
    if first.len() != second.len() {
        return Err(JiffiesError::ShapeMismatch {
            first: first.len(),
            second: second.len(),
        });
    }
    first.iter().zip(second).map(|(before, after)| before.delta(after)).collect()
}

impl Interval for SystemJiffies {
    type Data = Vec<JiffiesDelta>;

    fn start(&self) -> SystemTime {
        self.start
    }

    fn end(&self) -> SystemTime {
        self.end
    }

    fn component(&self) -> Component {
        Component::System
    }

    fn data(&self) -> Vec<JiffiesDelta> {
        self.jiffies.clone()
    }
}

impl Display for SystemJiffies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = wire::to_json(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

/// Checks that chronologically sorted intervals do not overlap.
///
/// Touching intervals (one ends exactly when the next one starts) are fine, gaps too.
pub fn check_timeline<I: Interval>(intervals: &[I]) -> Result<(), JiffiesError> {
    for (i, pair) in intervals.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);
        if current.start() < previous.end() {
            return Err(JiffiesError::Overlap {
                index: i + 1,
                previous_end: previous.end(),
                start: current.start(),
            });
        }
    }
    Ok(())
}
