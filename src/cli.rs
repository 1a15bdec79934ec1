//! Command line interface.

use clap::Parser;
use std::path::PathBuf;

/// Generates config files from metadata-driven templates.
#[derive(Debug, Parser)]
#[command(name = "confgen", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the metadata service
    #[arg(long, value_name = "URL")]
    pub metadata_url: Option<String>,

    /// Metadata API version path segment
    #[arg(long, value_name = "VERSION")]
    pub metadata_version: Option<String>,

    /// Polling interval in seconds
    #[arg(short, long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Render each template once and exit
    #[arg(long)]
    pub onetime: bool,

    /// Include stopped containers in the context
    #[arg(long)]
    pub include_inactive: bool,

    /// Container UUID to resolve as self, overriding the metadata answer
    #[arg(long, value_name = "UUID")]
    pub self_id: Option<String>,

    /// Command run against the staging file before publishing,
    /// "{{staging}}" expands to the staging path
    #[arg(long, value_name = "CMD")]
    pub check_cmd: Option<String>,

    /// Command run after the destination file changed
    #[arg(long, value_name = "CMD")]
    pub notify_cmd: Option<String>,

    /// Log the notify command's output
    #[arg(long)]
    pub notify_output: bool,

    /// Log level filter (overrides CONFGEN_LOG)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub log_format: String,

    /// Template source file (when no config file is used)
    pub source: Option<PathBuf>,

    /// Destination path (stdout when omitted)
    pub dest: Option<PathBuf>,
}
