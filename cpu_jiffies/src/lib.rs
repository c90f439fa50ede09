use std::{fmt::Display, fs, num::ParseIntError, time::SystemTime};

use clap::ValueEnum;
use enum_map::{Enum, EnumMap};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod interval;
pub mod procstat;
pub mod wire;

pub use error::JiffiesError;
pub use interval::{check_timeline, Interval, Regression, SystemJiffies};

/// The states in which the kernel accounts cpu time, see `man 5 proc` (`/proc/stat`).
#[derive(Enum, Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum CpuState {
    /// normal processes executing in user mode
    User,
    /// niced processes executing in user mode
    Nice,
    /// processes executing in kernel mode
    System,
    /// twiddling thumbs
    Idle,
    /// waiting for I/O to complete (unreliable)
    Iowait,
    /// servicing interrupts
    Irq,
    /// servicing softirqs
    Softirq,
    /// involuntary wait, time stolen by the hypervisor
    Steal,
    /// running a normal guest
    Guest,
    /// running a niced guest
    GuestNice,
}

impl CpuState {
    /// All the states, in the order of the `/proc/stat` columns.
    pub const ALL: [CpuState; 10] = [
        CpuState::User,
        CpuState::Nice,
        CpuState::System,
        CpuState::Idle,
        CpuState::Iowait,
        CpuState::Irq,
        CpuState::Softirq,
        CpuState::Steal,
        CpuState::Guest,
        CpuState::GuestNice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CpuState::User => "user",
            CpuState::Nice => "nice",
            CpuState::System => "system",
            CpuState::Idle => "idle",
            CpuState::Iowait => "iowait",
            CpuState::Irq => "irq",
            CpuState::Softirq => "softirq",
            CpuState::Steal => "steal",
            CpuState::Guest => "guest",
            CpuState::GuestNice => "guest_nice",
        }
    }
}

impl Display for CpuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The hardware (or the part of it) that a measurement applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// The whole machine.
    System,
    /// A single logical cpu core.
    Cpu { cpu: u32 },
}

/// The jiffies of one cpu core.
///
/// In a [`SystemSample`], `T` is `u64` and the values are the raw counters,
/// which only increase since boot. In a [`SystemJiffies`] interval, `T` is `i64`
/// and the values are the differences between two samples.
///
/// The field order is part of the wire format, don't change it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CpuJiffies<T = u64> {
    pub cpu: u32,
    pub user: T,
    pub nice: T,
    pub system: T,
    pub idle: T,
    pub iowait: T,
    pub irq: T,
    pub softirq: T,
    pub steal: T,
    pub guest: T,
    pub guest_nice: T,
}

/// Jiffies consumed by a cpu core during an interval.
pub type JiffiesDelta = CpuJiffies<i64>;

impl<T: Copy> CpuJiffies<T> {
    pub fn get(&self, state: CpuState) -> T {
        match state {
            CpuState::User => self.user,
            CpuState::Nice => self.nice,
            CpuState::System => self.system,
            CpuState::Idle => self.idle,
            CpuState::Iowait => self.iowait,
            CpuState::Irq => self.irq,
            CpuState::Softirq => self.softirq,
            CpuState::Steal => self.steal,
            CpuState::Guest => self.guest,
            CpuState::GuestNice => self.guest_nice,
        }
    }

    /// Returns all the counters, indexed by state.
    pub fn counters(&self) -> EnumMap<CpuState, T> {
        EnumMap::from_fn(|state| self.get(state))
    }

    pub fn component(&self) -> Component {
        Component::Cpu { cpu: self.cpu }
    }
}

impl CpuJiffies<u64> {
    /// Computes, field by field, how much the counters have moved between `self` and `later`.
    ///
    /// The result keeps the cpu id of `self`. A counter that went backwards gives
    /// a negative value, it is not clamped. Fails if a difference does not fit in an `i64`.
    pub fn delta(&self, later: &CpuJiffies<u64>) -> Result<JiffiesDelta, JiffiesError> {
        let diff = |state: CpuState| {
            let (before, after) = (self.get(state), later.get(state));
            i64::try_from(after as i128 - before as i128).map_err(|_| JiffiesError::DeltaOverflow {
                cpu: self.cpu,
                state,
                before,
                after,
            })
        };
        Ok(CpuJiffies {
            cpu: self.cpu,
            user: diff(CpuState::User)?,
            nice: diff(CpuState::Nice)?,
            system: diff(CpuState::System)?,
            idle: diff(CpuState::Idle)?,
            iowait: diff(CpuState::Iowait)?,
            irq: diff(CpuState::Irq)?,
            softirq: diff(CpuState::Softirq)?,
            steal: diff(CpuState::Steal)?,
            guest: diff(CpuState::Guest)?,
            guest_nice: diff(CpuState::GuestNice)?,
        })
    }
}

/// The jiffies of all the cpu cores of the machine, captured at the same instant.
///
/// Samples are ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SystemSample {
    // keep `timestamp` first: the derived Ord compares it first
    timestamp: SystemTime,
    data: Vec<CpuJiffies<u64>>,
}

impl SystemSample {
    /// Creates a new sample.
    ///
    /// The position of each cpu is its id: `data[i].cpu` must be `i`.
    pub fn new(timestamp: SystemTime, data: Vec<CpuJiffies<u64>>) -> Result<SystemSample, JiffiesError> {
        if let Some((position, cpu)) = data.iter().enumerate().find(|(i, cpu)| cpu.cpu as usize != *i) {
            return Err(JiffiesError::MisalignedCpu { position, cpu: cpu.cpu });
        }
        Ok(SystemSample { timestamp, data })
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn data(&self) -> &[CpuJiffies<u64>] {
        &self.data
    }

    pub fn cpu_count(&self) -> usize {
        self.data.len()
    }
}

/// Something that can capture the jiffies of the whole machine.
pub trait JiffiesSource: Send {
    /// Reads the current value of the counters of every cpu.
    fn sample(&mut self) -> anyhow::Result<SystemSample>;
}

/// Retrieves the ids of the cpus that are currently online.
pub fn online_cpus() -> anyhow::Result<Vec<u32>> {
    let list = fs::read_to_string("/sys/devices/system/cpu/online")?;
    parse_cpu_list(&list)
}

fn parse_cpu_list(cpulist: &str) -> anyhow::Result<Vec<u32>> {
    // handles "n" or "start-end"
    fn parse_cpulist_item(item: &str) -> anyhow::Result<Vec<u32>> {
        let bounds: Vec<u32> = item
            .split('-')
            .map(str::parse)
            .collect::<Result<Vec<u32>, ParseIntError>>()?;

        match bounds.as_slice() {
            &[start, end] if start <= end => Ok((start..=end).collect()),
            &[n] => Ok(vec![n]),
            _ => Err(anyhow::anyhow!("invalid cpulist: {}", item)),
        }
    }

    // this can be "0,64" or "0-1" or "0-1,64-66"
    let cpus: Vec<u32> = cpulist
        .trim_end()
        .split(',')
        .map(parse_cpulist_item)
        .collect::<anyhow::Result<Vec<Vec<u32>>>>()?
        .into_iter()
        .flatten()
        .collect();

    Ok(cpus)
}
