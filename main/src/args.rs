use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Override the extraction cache root from the configuration
    #[arg(long, global = true, env = "HARVESTER_CACHE_DIR")]
    pub cache_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, extract and cache every entry of a JSON-lines index file
    Retrieve {
        #[arg(long)]
        bucket: String,

        /// Index entries, one JSON object per line
        #[arg(long)]
        index: PathBuf,

        /// Concurrent items; 0 runs sequentially
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long, value_enum, default_value_t = Extractor::Readability)]
        extractor: Extractor,
    },
    /// Flush the hot log into a new batch file
    Compact {
        #[arg(long)]
        bucket: String,

        /// Minimum hot log lines required before flushing
        #[arg(long, default_value_t = 1)]
        threshold: usize,
    },
    /// Drop records with empty content so they are fetched again
    Strip {
        #[arg(long)]
        bucket: String,
    },
    /// Rewrite a bucket into evenly sized batch files
    Redump {
        #[arg(long)]
        bucket: String,

        /// Records per batch file; defaults to the configured hot log size
        #[arg(long)]
        threshold: Option<usize>,
    },
    /// Print record counts for a bucket
    Stats {
        #[arg(long)]
        bucket: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// Readability main-content extraction
    Readability,
    /// Keep the payload as-is
    Passthrough,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_retrieve_with_defaults() {
        let cli = Cli::try_parse_from([
            "harvester",
            "retrieve",
            "--bucket",
            "2024-10",
            "--index",
            "entries.jsonl",
        ])
        .expect("parse");

        match cli.command {
            Command::Retrieve {
                bucket,
                index,
                workers,
                extractor,
            } => {
                assert_eq!(bucket, "2024-10");
                assert_eq!(index, PathBuf::from("entries.jsonl"));
                assert!(workers.is_none());
                assert_eq!(extractor, Extractor::Readability);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn compact_threshold_defaults_to_one() {
        let cli = Cli::try_parse_from(["harvester", "compact", "--bucket", "b"]).expect("parse");
        assert!(matches!(cli.command, Command::Compact { threshold: 1, .. }));
    }

    #[test]
    fn bucket_is_required() {
        assert!(Cli::try_parse_from(["harvester", "stats"]).is_err());
    }
}
