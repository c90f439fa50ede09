use std::time::SystemTime;

use thiserror::Error;

use crate::CpuState;

/// Validation failures of samples and intervals.
///
/// They are all detected when a value is constructed, so that no partially
/// valid interval is ever produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JiffiesError {
    /// The first sample is not strictly before the second one.
    #[error("first sample is not before second sample ({first:?} !< {second:?})")]
    OrderingViolation { first: SystemTime, second: SystemTime },

    /// The samples do not have the same number of cpus, for instance because
    /// a cpu has been hot-plugged between them.
    #[error("samples do not have the same number of cpus ({first} != {second})")]
    ShapeMismatch { first: usize, second: usize },

    /// The difference between two counters does not fit in an `i64`.
    #[error("cpu {cpu} {state}: the counter moved from {before} to {after}, the difference does not fit in an i64")]
    DeltaOverflow {
        cpu: u32,
        state: CpuState,
        before: u64,
        after: u64,
    },

    #[error("interval ends before it starts ({start:?} > {end:?})")]
    EndBeforeStart { start: SystemTime, end: SystemTime },

    /// The cpu stored at `position` does not report `position` as its id.
    #[error("cpu at position {position} has id {cpu}, cpu ids must be dense")]
    MisalignedCpu { position: usize, cpu: u32 },

    /// The interval at `index` starts before the end of the previous one.
    #[error("interval {index} starts at {start:?}, before the end of the previous interval ({previous_end:?})")]
    Overlap {
        index: usize,
        previous_end: SystemTime,
        start: SystemTime,
    },

    #[error("invalid timestamp: {seconds}s + {nanos}ns since the epoch")]
    InvalidTimestamp { seconds: i64, nanos: i32 },
}
