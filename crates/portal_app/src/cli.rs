use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use portal_core::JobCategory;
use portal_logging::LogDestination;

use crate::config::CONFIG_FILENAME;

#[derive(Debug, Parser)]
#[command(name = "portal", version, about = "Dataset manager tools for an archival data portal")]
pub struct Cli {
    /// Config file (RON).
    #[arg(long, global = true, env = "PORTAL_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,
    #[arg(long, global = true, value_enum, default_value_t = LogTarget::File)]
    pub log: LogTarget,
    /// Repeat for more detail (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a config file with default settings.
    Init {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        base_url: Option<String>,
        /// Overwrite an existing config.
        #[arg(long)]
        force: bool,
    },
    /// List files in the configured stage.
    List {
        #[arg(long, default_value = "")]
        prefix: String,
        /// Start listing after this key.
        #[arg(long)]
        after: Option<String>,
        /// Follow truncated listings to the end.
        #[arg(long)]
        all: bool,
    },
    /// Stream a file's contents, validating it unless told not to.
    Preview {
        key: String,
        /// Override the configured byte budget.
        #[arg(long, conflicts_with = "whole")]
        max_bytes: Option<u64>,
        /// Load the whole file regardless of size.
        #[arg(long)]
        whole: bool,
        #[arg(long)]
        pretty: bool,
        #[arg(long)]
        no_validate: bool,
    },
    /// Preview a file transformed with the given mappings.
    ConvertPreview {
        key: String,
        /// Transformation step as SOURCE=TARGET; repeatable, applied in order.
        #[arg(long = "mapping", value_parser = parse_mapping)]
        mappings: Vec<(String, String)>,
        #[arg(long)]
        pretty: bool,
    },
    /// Start a convert job for one file, or the whole stage, and follow its log.
    Convert {
        key: Option<String>,
        #[arg(long = "mapping", value_parser = parse_mapping)]
        mappings: Vec<(String, String)>,
        /// Convert files whose output is already up to date.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        detach: bool,
    },
    /// Start an OAI-PMH harvest into the dataset and follow its log.
    Harvest {
        /// Provider endpoint.
        #[arg(long)]
        url: String,
        /// Metadata prefix to request.
        #[arg(long, default_value = "ead")]
        format: String,
        #[arg(long)]
        set: Option<String>,
        /// Harvest everything instead of only changes since the last run.
        #[arg(long)]
        full: bool,
        #[arg(long)]
        detach: bool,
    },
    /// Start a ResourceSync job into the dataset and follow its log.
    Sync {
        /// Capability list or resource list URL.
        #[arg(long)]
        url: String,
        /// Only sync resources whose path matches this pattern.
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        detach: bool,
    },
    /// Upload local files to the configured stage, one at a time.
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Start an ingest job for the given keys and follow its log.
    Ingest {
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(long, default_value = "Ingested from the command line")]
        message: String,
        #[arg(long)]
        commit: bool,
        #[arg(long)]
        tolerant: bool,
        #[arg(long)]
        allow_updates: bool,
        /// Record the job and return without following it.
        #[arg(long)]
        detach: bool,
    },
    /// Re-attach to a job recorded by an earlier invocation.
    Monitor {
        #[arg(value_parser = parse_category)]
        category: JobCategory,
    },
    /// Cancel the recorded job of a category.
    Cancel {
        #[arg(value_parser = parse_category)]
        category: JobCategory,
    },
}

fn parse_mapping(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((source, target)) if !source.is_empty() && !target.is_empty() => {
            Ok((source.to_string(), target.to_string()))
        }
        _ => Err(format!("expected SOURCE=TARGET, got {raw:?}")),
    }
}

fn parse_category(raw: &str) -> Result<JobCategory, String> {
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn convert_preview_collects_mappings_in_order() {
        let cli = Cli::try_parse_from([
            "portal",
            "convert-preview",
            "a.xml",
            "--mapping",
            "ead=ead3",
            "--mapping",
            "ead3=html",
        ])
        .unwrap();
        match cli.command {
            Command::ConvertPreview { key, mappings, .. } => {
                assert_eq!(key, "a.xml");
                assert_eq!(
                    mappings,
                    vec![
                        ("ead".to_string(), "ead3".to_string()),
                        ("ead3".to_string(), "html".to_string()),
                    ]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn malformed_mapping_is_rejected() {
        assert!(
            Cli::try_parse_from(["portal", "convert-preview", "a.xml", "--mapping", "ead"]).is_err()
        );
    }

    #[test]
    fn convert_job_without_a_key_covers_the_stage() {
        let cli =
            Cli::try_parse_from(["portal", "convert", "--mapping", "ead=ead3", "--force"]).unwrap();
        match cli.command {
            Command::Convert {
                key,
                mappings,
                force,
                detach,
            } => {
                assert_eq!(key, None);
                assert_eq!(mappings, vec![("ead".to_string(), "ead3".to_string())]);
                assert!(force);
                assert!(!detach);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn harvest_defaults_to_ead_since_the_last_run() {
        let cli = Cli::try_parse_from(["portal", "harvest", "--url", "http://oai.example/p"]).unwrap();
        match cli.command {
            Command::Harvest {
                url,
                format,
                set,
                full,
                ..
            } => {
                assert_eq!(url, "http://oai.example/p");
                assert_eq!(format, "ead");
                assert_eq!(set, None);
                assert!(!full);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["portal", "harvest"]).is_err());
    }

    #[test]
    fn sync_takes_an_optional_filter() {
        let cli = Cli::try_parse_from([
            "portal",
            "sync",
            "--url",
            "http://rs.example/caps.xml",
            "--filter",
            "^ead/",
            "--detach",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Sync { filter: Some(ref f), detach: true, .. } if f == "^ead/"
        ));
    }

    #[test]
    fn monitor_takes_a_job_category() {
        let cli = Cli::try_parse_from(["portal", "monitor", "Harvest", "-vv"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Monitor {
                category: JobCategory::Harvest
            }
        ));
        assert_eq!(cli.log_level(), LevelFilter::Trace);
        assert!(Cli::try_parse_from(["portal", "cancel", "publish"]).is_err());
    }

    #[test]
    fn preview_budget_flags_conflict() {
        assert!(
            Cli::try_parse_from(["portal", "preview", "a.xml", "--whole", "--max-bytes", "10"])
                .is_err()
        );
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
