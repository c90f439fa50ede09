use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use cli::{Cli, Commands, OutputFormat, OutputType};
use cpu_jiffies::{procstat::ProcStatSource, CpuState};
use log::{info, warn};
use poll::PollSettings;

mod cli;
mod poll;

const MEASUREMENTS_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const WRITER_BUFFER_CAPACITY: usize = 8192 * 10;

// The timerfd-based periodic timer requires a tokio runtime
#[tokio::main(worker_threads = 2)]
async fn main() -> Result<(), anyhow::Error> {
    // initialize logger
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    // parse CLI arguments
    let cli = Cli::parse();

    // get cpu info and open the counters
    let online_cpus = cpu_jiffies::online_cpus()?;
    let mut source = ProcStatSource::new()?;
    info!("{} online CPU (cores) found: {online_cpus:?}", online_cpus.len());

    // run the command
    match cli.command {
        Commands::Info => {
            let stats = source.read_stats()?;
            let n_stat_cpus = stats.cpu_time.len();
            if n_stat_cpus != online_cpus.len() {
                warn!(
                    "/proc/stat lists {n_stat_cpus} CPUs but {} are online, the per-CPU lines may not match the CPU ids.",
                    online_cpus.len()
                );
            }

            println!("\nOnline CPUs: {}", mkstring(&online_cpus, ", "));
            println!("CPUs in /proc/stat: {n_stat_cpus}");
            println!("Jiffies per second: {}", source.ticks_per_second());
            println!("Boot time: {} (seconds since the epoch)", stats.btime);
            println!("\nAccounted CPU states: {}", mkstring(&CpuState::ALL, ", "));
        }
        Commands::Poll {
            period_ms,
            output,
            output_file,
            format,
            states,
            count,
        } => {
            // compute the polling period, or stop if zero
            if period_ms == 0 {
                info!("Period set to zero, stopping here.");
                return Ok(());
            }
            let period = Duration::from_millis(period_ms);

            let states = if states.is_empty() {
                CpuState::ALL.to_vec()
            } else {
                if format != OutputFormat::Csv {
                    warn!("--states only applies to the csv format, all the states will be written.");
                }
                states
            };
            info!("Sampling every {period:?}, states: {}", mkstring(&states, ", "));

            // prepare the output, if any
            let writer: Box<dyn Write + Send> = match output {
                OutputType::None => Box::new(std::io::sink()),
                OutputType::Stdout => Box::new(BufWriter::with_capacity(WRITER_BUFFER_CAPACITY, std::io::stdout())),
                OutputType::File => {
                    let filename = if let Some(f) = output_file {
                        f
                    } else {
                        let now = OffsetDateTime::now_utc().format(&Rfc3339)?;
                        format!("poll-jiffies-{now}.{}", format.extension())
                    };
                    info!("Writing the intervals to {filename}");
                    let file = File::create(filename)?;
                    let writer = BufWriter::with_capacity(WRITER_BUFFER_CAPACITY, file);
                    // return the writer
                    Box::new(writer)
                }
            };

            let settings = PollSettings {
                period,
                flush_interval: MEASUREMENTS_FLUSH_INTERVAL,
                format,
                states,
                count,
            };
            poll::run(writer, Box::new(source), settings).await?;
        }
    }

    Ok(())
}

/// Takes a slice of elements that can be converted to strings, converts them and joins them all.
fn mkstring<A: ToString>(elems: &[A], sep: &str) -> String {
    elems.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(sep)
}
