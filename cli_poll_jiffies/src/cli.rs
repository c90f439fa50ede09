use std::fmt::Display;

use clap::{Parser, Subcommand, ValueEnum};
use cpu_jiffies::CpuState;

#[derive(Parser)]
#[command(author, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Only show info about the CPUs and their time counters, then exit.
    Info,

    /// Poll the jiffies of all the CPUs continuously
    Poll {
        /// Time between two samples, in milliseconds.
        #[arg(short, long, default_value_t = 10)]
        period_ms: u64,

        /// Where to write the intervals.
        #[arg(short, long, value_enum, default_value_t = OutputType::Stdout)]
        output: OutputType,

        /// Sets the output file, if output if set to file.
        #[arg(long)]
        output_file: Option<String>,

        /// How to format the intervals.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// The CPU states to record in the csv output (all of them by default).
        #[arg(short, long, value_delimiter = ',')]
        states: Vec<CpuState>,

        /// Stop after this number of intervals.
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
}

#[derive(Clone, ValueEnum, Debug, PartialEq, Eq, Copy)]
pub enum OutputType {
    None,
    Stdout,
    File,
}

impl Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (self as &dyn std::fmt::Debug).fmt(f)
    }
}

#[derive(Clone, ValueEnum, Debug, PartialEq, Eq, Copy)]
pub enum OutputFormat {
    /// One json object per interval and per line
    Json,
    /// One line per interval, cpu and state
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "jsonl",
            OutputFormat::Csv => "csv",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use cpu_jiffies::CpuState;

    use super::{Cli, Commands, OutputFormat, OutputType};

    #[test]
    fn test_poll_defaults() {
        let cli = Cli::try_parse_from(["cli_poll_jiffies", "poll"]).unwrap();
        match cli.command {
            Commands::Poll {
                period_ms,
                output,
                output_file,
                format,
                states,
                count,
            } => {
                assert_eq!(period_ms, 10);
                assert_eq!(output, OutputType::Stdout);
                assert_eq!(output_file, None);
                assert_eq!(format, OutputFormat::Json);
                assert!(states.is_empty());
                assert_eq!(count, None);
            }
            Commands::Info => panic!("expected poll"),
        }
    }

    #[test]
    fn test_poll_csv_states() {
        let cli = Cli::try_parse_from([
            "cli_poll_jiffies",
            "poll",
            "--period-ms=100",
            "--format=csv",
            "--states=user,guest-nice",
            "-n",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Poll {
                period_ms,
                format,
                states,
                count,
                ..
            } => {
                assert_eq!(period_ms, 100);
                assert_eq!(format, OutputFormat::Csv);
                assert_eq!(states, vec![CpuState::User, CpuState::GuestNice]);
                assert_eq!(count, Some(5));
            }
            Commands::Info => panic!("expected poll"),
        }
    }

    #[test]
    fn test_unknown_state() {
        assert!(Cli::try_parse_from(["cli_poll_jiffies", "poll", "--states=sleeping"]).is_err());
    }
}
