//! Structured representation of the intervals, for other tools.
//!
//! An interval is rendered as
//! ```json
//! {
//!   "start": { "seconds": 1700000000, "nanos": 0 },
//!   "end":   { "seconds": 1700000000, "nanos": 10000000 },
//!   "data":  [ { "cpu": 0, "user": 5, "nice": 0, "system": 0, "idle": 50, "iowait": 0,
//!                "irq": 0, "softirq": 0, "steal": 0, "guest": 0, "guest_nice": 0 } ]
//! }
//! ```
//! The timestamps are relative to the Unix epoch, with `nanos` always in `0..1_000_000_000`
//! (an instant before the epoch has negative `seconds`). The cpus are in the order of their
//! position, and the fields of each cpu are in the order of [`crate::CpuState::ALL`].

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::{JiffiesDelta, JiffiesError, SystemJiffies};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A point in time, as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => Timestamp {
                seconds: d.as_secs() as i64,
                nanos: d.subsec_nanos() as i32,
            },
            Err(before_epoch) => {
                let d = before_epoch.duration();
                let mut seconds = -(d.as_secs() as i64);
                let mut nanos = d.subsec_nanos();
                if nanos > 0 {
                    // borrow one second so that nanos stays positive
                    seconds -= 1;
                    nanos = NANOS_PER_SEC - nanos;
                }
                Timestamp {
                    seconds,
                    nanos: nanos as i32,
                }
            }
        }
    }
}

impl TryFrom<Timestamp> for SystemTime {
    type Error = JiffiesError;

    fn try_from(t: Timestamp) -> Result<Self, Self::Error> {
        let invalid = JiffiesError::InvalidTimestamp {
            seconds: t.seconds,
            nanos: t.nanos,
        };
        if !(0..NANOS_PER_SEC as i32).contains(&t.nanos) {
            return Err(invalid);
        }
        let secs = Duration::from_secs(t.seconds.unsigned_abs());
        let base = if t.seconds >= 0 {
            SystemTime::UNIX_EPOCH.checked_add(secs)
        } else {
            SystemTime::UNIX_EPOCH.checked_sub(secs)
        };
        base.and_then(|b| b.checked_add(Duration::from_nanos(t.nanos as u64)))
            .ok_or(invalid)
    }
}

/// (De)serializes a [`SystemTime`] as a [`Timestamp`], for `#[serde(with = "...")]`.
pub mod epoch {
    use std::time::SystemTime;

    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    use super::Timestamp;

    pub fn serialize<S: Serializer>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        Timestamp::from(*t).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let t = Timestamp::deserialize(deserializer)?;
        SystemTime::try_from(t).map_err(D::Error::custom)
    }
}

/// Unchecked interval, as read from the wire.
#[derive(Deserialize)]
pub(crate) struct RawSystemJiffies {
    #[serde(with = "epoch")]
    start: SystemTime,
    #[serde(with = "epoch")]
    end: SystemTime,
    data: Vec<JiffiesDelta>,
}

impl TryFrom<RawSystemJiffies> for SystemJiffies {
    type Error = JiffiesError;

    fn try_from(raw: RawSystemJiffies) -> Result<Self, Self::Error> {
        SystemJiffies::new(raw.start, raw.end, &raw.data)
    }
}

pub fn to_json(interval: &SystemJiffies) -> serde_json::Result<String> {
    serde_json::to_string(interval)
}

pub fn from_json(json: &str) -> serde_json::Result<SystemJiffies> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::{from_json, to_json, Timestamp};
    use crate::{CpuJiffies, Interval, SystemJiffies};

    #[test]
    fn test_timestamp_after_epoch() {
        let t = SystemTime::UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let ts = Timestamp::from(t);
        assert_eq!(ts, Timestamp { seconds: 1_700_000_000, nanos: 123_456_789 });
        assert_eq!(SystemTime::try_from(ts), Ok(t));
    }

    #[test]
    fn test_timestamp_before_epoch() {
        let t = SystemTime::UNIX_EPOCH - Duration::new(1, 250_000_000);
        let ts = Timestamp::from(t);
        assert_eq!(ts, Timestamp { seconds: -2, nanos: 750_000_000 });
        assert_eq!(SystemTime::try_from(ts), Ok(t));

        let t = SystemTime::UNIX_EPOCH - Duration::from_secs(3);
        assert_eq!(Timestamp::from(t), Timestamp { seconds: -3, nanos: 0 });
    }

    #[test]
    fn test_invalid_nanos() {
        assert!(SystemTime::try_from(Timestamp { seconds: 0, nanos: -1 }).is_err());
        assert!(SystemTime::try_from(Timestamp { seconds: 0, nanos: 1_000_000_000 }).is_err());
    }

    #[test]
    fn test_json_field_order() {
        let interval = SystemJiffies::new(
            SystemTime::UNIX_EPOCH,
            SystemTime::UNIX_EPOCH + Duration::from_millis(10),
            &[CpuJiffies { cpu: 0, guest_nice: -1, ..Default::default() }],
        )
        .unwrap();
        let json = to_json(&interval).unwrap();
        let keys = ["\"start\"", "\"end\"", "\"data\"", "\"cpu\"", "\"user\"", "\"nice\"", "\"system\"", "\"idle\"",
            "\"iowait\"", "\"irq\"", "\"softirq\"", "\"steal\"", "\"guest\"", "\"guest_nice\""];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{json}");
        assert!(json.contains(r#""end":{"seconds":0,"nanos":10000000}"#), "{json}");
        assert_eq!(from_json(&json).unwrap().data(), interval.data());
    }

    #[test]
    fn test_reject_end_before_start() {
        let json = r#"{"start":{"seconds":10,"nanos":0},"end":{"seconds":9,"nanos":0},"data":[]}"#;
        let err = from_json(json).unwrap_err();
        assert!(err.to_string().contains("ends before it starts"), "{err}");
    }

    #[test]
    fn test_reject_bad_nanos() {
        let json = r#"{"start":{"seconds":10,"nanos":-5},"end":{"seconds":11,"nanos":0},"data":[]}"#;
        assert!(from_json(json).is_err());
    }
}
