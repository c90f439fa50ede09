// See `man 5 proc`, section /proc/stat, for the meaning of the columns.

use std::{
    fs::File,
    io::{BufRead, BufReader, Seek},
    path::Path,
    time::SystemTime,
};

use anyhow::Context;
use procfs::{CpuTime, ExplicitSystemInfo, FromBufReadSI, KernelStats, LocalSystemInfo, SystemInfoInterface};

use crate::{CpuJiffies, JiffiesSource, SystemSample};

pub const PROC_STAT_PATH: &str = "/proc/stat";

/// Reads the jiffies of every cpu from `/proc/stat`.
///
/// The file is opened once and read again from the beginning on each sample.
///
/// The cpu ids are the positions of the `cpuN` lines, not the `N` they carry:
/// `/proc/stat` skips offline cpus, so with only cpus 0 and 2 online the second
/// line is reported as cpu 1. The source warns when the number of lines changes.
pub struct ProcStatSource<R = BufReader<File>> {
    reader: R,
    sysinfo: ExplicitSystemInfo,
    /// Number of cpus seen in the first sample.
    expected_cpus: Option<usize>,
}

impl ProcStatSource<BufReader<File>> {
    pub fn new() -> anyhow::Result<Self> {
        Self::open(PROC_STAT_PATH)
    }

    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("could not open {path:?}"))?;
        let local = LocalSystemInfo;
        let sysinfo = ExplicitSystemInfo {
            boot_time_secs: local.boot_time_secs().context("could not read the boot time")?,
            ticks_per_second: local.ticks_per_second(),
            page_size: local.page_size(),
            is_little_endian: local.is_little_endian(),
        };
        Ok(Self::with_reader(BufReader::new(file), sysinfo))
    }
}

impl<R: BufRead + Seek> ProcStatSource<R> {
    /// Uses an arbitrary reader instead of the real `/proc/stat`.
    pub fn with_reader(reader: R, sysinfo: ExplicitSystemInfo) -> Self {
        Self {
            reader,
            sysinfo,
            expected_cpus: None,
        }
    }

    /// The number of jiffies per second (`USER_HZ`), usually 100.
    pub fn ticks_per_second(&self) -> u64 {
        self.sysinfo.ticks_per_second
    }

    /// Parses the whole content of `/proc/stat`.
    pub fn read_stats(&mut self) -> anyhow::Result<KernelStats> {
        self.reader.rewind()?;
        let stats = KernelStats::from_buf_read(&mut self.reader, &self.sysinfo).context("failed to parse /proc/stat")?;
        Ok(stats)
    }
}

fn to_cpu_jiffies(position: usize, time: &CpuTime) -> CpuJiffies<u64> {
    // the optional columns don't exist on old kernels
    CpuJiffies {
        cpu: position as u32,
        user: time.user,
        nice: time.nice,
        system: time.system,
        idle: time.idle,
        iowait: time.iowait.unwrap_or(0),
        irq: time.irq.unwrap_or(0),
        softirq: time.softirq.unwrap_or(0),
        steal: time.steal.unwrap_or(0),
        guest: time.guest.unwrap_or(0),
        guest_nice: time.guest_nice.unwrap_or(0),
    }
}

impl<R: BufRead + Seek + Send> JiffiesSource for ProcStatSource<R> {
    fn sample(&mut self) -> anyhow::Result<SystemSample> {
        let stats = self.read_stats()?;
        let timestamp = SystemTime::now();

        // /proc/stat only lists the online cpus, in order
        let data: Vec<CpuJiffies<u64>> = stats
            .cpu_time
            .iter()
            .enumerate()
            .map(|(i, time)| to_cpu_jiffies(i, time))
            .collect();

        match self.expected_cpus {
            None => {
                log::debug!("{} cpus found in /proc/stat", data.len());
                self.expected_cpus = Some(data.len());
            }
            Some(n) if n != data.len() => {
                log::warn!("The number of cpus has changed from {n} to {}, a cpu has probably been (un)plugged.", data.len());
                self.expected_cpus = Some(data.len());
            }
            Some(_) => (),
        }

        let sample = SystemSample::new(timestamp, data)?;
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use procfs::ExplicitSystemInfo;

    use super::ProcStatSource;
    use crate::{CpuJiffies, JiffiesSource};

    const PROC_STAT: &str = "cpu  110 3 120 2000 7 0 1 0 0 0
cpu0 100 1 100 900 5 0 1 0 0 0
cpu1 10 2 20 1100 2 0 0 0 0 0
intr 12345 0 0
ctxt 98765
btime 1700000000
processes 4242
procs_running 2
procs_blocked 0
softirq 42 0 0
";

    fn sysinfo() -> ExplicitSystemInfo {
        ExplicitSystemInfo {
            boot_time_secs: 1_700_000_000,
            ticks_per_second: 100,
            page_size: 4096,
            is_little_endian: true,
        }
    }

    #[test]
    fn test_sample_proc_stat() -> anyhow::Result<()> {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut source = ProcStatSource::with_reader(Cursor::new(PROC_STAT.as_bytes().to_vec()), sysinfo());
        assert_eq!(source.ticks_per_second(), 100);

        let sample = source.sample()?;
        assert_eq!(sample.cpu_count(), 2);
        assert_eq!(
            sample.data()[0],
            CpuJiffies {
                cpu: 0,
                user: 100,
                nice: 1,
                system: 100,
                idle: 900,
                iowait: 5,
                irq: 0,
                softirq: 1,
                steal: 0,
                guest: 0,
                guest_nice: 0
            }
        );
        assert_eq!(sample.data()[1].cpu, 1);
        assert_eq!(sample.data()[1].idle, 1100);

        // the file is read again from the beginning
        let again = source.sample()?;
        assert_eq!(again.data(), sample.data());
        Ok(())
    }

    #[test]
    fn test_ids_follow_line_positions() -> anyhow::Result<()> {
        // cpu1 is offline
        let holes = "cpu  30 0 0 300
cpu0 10 0 0 100
cpu2 20 0 0 200
ctxt 1
btime 1700000000
processes 1
";
        let mut source = ProcStatSource::with_reader(Cursor::new(holes.as_bytes().to_vec()), sysinfo());
        let sample = source.sample()?;
        let ids: Vec<(u32, u64)> = sample.data().iter().map(|cpu| (cpu.cpu, cpu.user)).collect();
        assert_eq!(ids, vec![(0, 10), (1, 20)]);
        Ok(())
    }

    #[test]
    fn test_old_kernel_columns() -> anyhow::Result<()> {
        let old = "cpu  1 2 3 4
cpu0 1 2 3 4
ctxt 1
btime 1700000000
processes 1
";
        let mut source = ProcStatSource::with_reader(Cursor::new(old.as_bytes().to_vec()), sysinfo());
        let sample = source.sample()?;
        let cpu = sample.data()[0];
        assert_eq!((cpu.user, cpu.nice, cpu.system, cpu.idle), (1, 2, 3, 4));
        assert_eq!((cpu.iowait, cpu.steal, cpu.guest_nice), (0, 0, 0));
        Ok(())
    }

    #[test]
    fn test_cpu_count_change() -> anyhow::Result<()> {
        let mut source = ProcStatSource::with_reader(Cursor::new(PROC_STAT.as_bytes().to_vec()), sysinfo());
        assert_eq!(source.sample()?.cpu_count(), 2);

        let unplugged = PROC_STAT.replace("cpu1 10 2 20 1100 2 0 0 0 0 0\n", "");
        source.reader = Cursor::new(unplugged.into_bytes());
        assert_eq!(source.sample()?.cpu_count(), 1);
        assert_eq!(source.expected_cpus, Some(1));
        Ok(())
    }

    #[test]
    fn test_garbage() {
        let mut source = ProcStatSource::with_reader(Cursor::new(b"not a stat file".to_vec()), sysinfo());
        assert!(source.sample().is_err());
    }
}
