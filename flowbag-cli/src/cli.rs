//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "flowbag.toml";

/// Path meaning standard input or standard output.
pub const STDIO_PATH: &str = "-";

/// flowbag -- build, combine and print Aggregate Bag files.
///
/// Use `flowbag <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "flowbag", version, about, long_about = None)]
pub struct Cli {
    /// Path to the flowbag.toml configuration file [default: flowbag.toml].
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format for reports and `cat`.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Effective configuration path and whether it was given explicitly.
    pub fn config_path(&self) -> (&Path, bool) {
        match &self.config {
            Some(path) => (path.as_path(), true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        }
    }
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Count flow records into one or more Bag / Aggregate Bag files.
    Accumulate(AccumulateArgs),

    /// Build an Aggregate Bag from delimited text or Bag files.
    Build(BuildArgs),

    /// Project, combine, filter and convert Aggregate Bag files.
    Tool(ToolArgs),

    /// Print the rows of Bag / Aggregate Bag files.
    Cat(CatArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- accumulate ----

/// Read JSON-lines flow records and count them into containers.
#[derive(Args, Debug)]
pub struct AccumulateArgs {
    /// Output as KEYS:COUNTERS:PATH (repeatable, replaces configured outputs).
    #[arg(long = "output-spec", value_name = "KEYS:COUNTERS:PATH")]
    pub output_specs: Vec<String>,

    /// Load a prefix map as NAME=PATH (repeatable).
    #[arg(long = "pmap", value_name = "NAME=PATH")]
    pub pmaps: Vec<String>,

    /// Country code table used by scc / dcc fields.
    #[arg(long)]
    pub country_codes: Option<PathBuf>,

    /// Add an annotation to every output (repeatable).
    #[arg(long = "note-add", value_name = "TEXT")]
    pub notes: Vec<String>,

    /// Do not record this invocation in the output headers.
    #[arg(long)]
    pub invocation_strip: bool,

    /// Drop annotations from the output headers.
    #[arg(long)]
    pub notes_strip: bool,

    /// JSON-lines flow record files (default: standard input).
    pub inputs: Vec<PathBuf>,
}

// ---- build ----

/// Build an Aggregate Bag from text rows or Bag files.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Comma-separated column fields (default: read the title line).
    #[arg(long)]
    pub fields: Option<String>,

    /// Treat the first line as data; requires --fields.
    #[arg(long, requires = "fields")]
    pub no_titles: bool,

    /// Column separator character.
    #[arg(long, default_value_t = '|')]
    pub column_separator: char,

    /// Add FIELD=VALUE to every row (repeatable).
    #[arg(long = "constant-field", value_name = "FIELD=VALUE")]
    pub constants: Vec<String>,

    /// Abort on the first malformed line instead of skipping it.
    #[arg(long)]
    pub stop_on_error: bool,

    /// Bag or Aggregate Bag file to merge into the result (repeatable).
    #[arg(long = "bag-input", value_name = "PATH")]
    pub bag_inputs: Vec<PathBuf>,

    /// Destination file (`-` for standard output).
    #[arg(long, default_value = STDIO_PATH)]
    pub output_path: PathBuf,

    /// Add an annotation to the output (repeatable).
    #[arg(long = "note-add", value_name = "TEXT")]
    pub notes: Vec<String>,

    /// Do not record this invocation in the output header.
    #[arg(long)]
    pub invocation_strip: bool,

    /// Drop annotations from the output header.
    #[arg(long)]
    pub notes_strip: bool,

    /// Delimited text files (default: standard input when no --bag-input).
    pub inputs: Vec<PathBuf>,
}

// ---- tool ----

/// Transform Aggregate Bag files.
///
/// Each input is projected, the inputs are combined with add or subtract,
/// the result is filtered, then written or converted.
#[derive(Args, Debug)]
pub struct ToolArgs {
    /// Add the inputs together (default).
    #[arg(long, conflicts_with = "subtract")]
    pub add: bool,

    /// Subtract the second and later inputs from the first.
    #[arg(long)]
    pub subtract: bool,

    /// Insert FIELD=VALUE into every input that lacks the field (repeatable).
    #[arg(long = "insert-field", value_name = "FIELD=VALUE")]
    pub insert_fields: Vec<String>,

    /// Comma-separated fields to remove.
    #[arg(long, conflicts_with = "select_fields")]
    pub remove_fields: Option<String>,

    /// Comma-separated fields to keep.
    #[arg(long)]
    pub select_fields: Option<String>,

    /// Keep rows whose FIELD is at least VALUE (repeatable).
    #[arg(long = "min-field", value_name = "FIELD=VALUE")]
    pub min_fields: Vec<String>,

    /// Keep rows whose FIELD is at most VALUE (repeatable).
    #[arg(long = "max-field", value_name = "FIELD=VALUE")]
    pub max_fields: Vec<String>,

    /// Keep rows whose IP FIELD is in the IP set at PATH (repeatable).
    #[arg(long = "set-intersect", value_name = "FIELD=PATH")]
    pub set_intersect: Vec<String>,

    /// Keep rows whose IP FIELD is not in the IP set at PATH (repeatable).
    #[arg(long = "set-complement", value_name = "FIELD=PATH")]
    pub set_complement: Vec<String>,

    /// Write a Bag with the given key and counter.
    #[arg(
        long,
        value_name = "KEY,COUNTER",
        conflicts_with_all = ["to_ipset", "remove_fields", "select_fields"]
    )]
    pub to_bag: Option<String>,

    /// Write an IP set of FIELD for rows with a non-zero counter.
    #[arg(
        long,
        value_name = "FIELD[,COUNTER]",
        conflicts_with_all = ["remove_fields", "select_fields"]
    )]
    pub to_ipset: Option<String>,

    /// Destination file (`-` for standard output).
    #[arg(long, default_value = STDIO_PATH)]
    pub output_path: PathBuf,

    /// Add an annotation to the output (repeatable).
    #[arg(long = "note-add", value_name = "TEXT")]
    pub notes: Vec<String>,

    /// Do not record this invocation in the output header.
    #[arg(long)]
    pub invocation_strip: bool,

    /// Drop annotations from the output header.
    #[arg(long)]
    pub notes_strip: bool,

    /// Input files (default: standard input).
    pub inputs: Vec<PathBuf>,
}

// ---- cat ----

/// Print container rows.
#[derive(Args, Debug)]
pub struct CatArgs {
    /// Do not print the title line.
    #[arg(long)]
    pub no_titles: bool,

    /// Do not pad values into aligned columns.
    #[arg(long)]
    pub no_columns: bool,

    /// Column separator character.
    #[arg(long, default_value_t = '|')]
    pub column_separator: char,

    /// Do not print a separator after the last column.
    #[arg(long)]
    pub no_final_delimiter: bool,

    /// Print sensors as integers instead of names.
    #[arg(long)]
    pub integer_sensors: bool,

    /// Print TCP flags as integers instead of letters.
    #[arg(long)]
    pub integer_tcp_flags: bool,

    /// Print times as seconds since the epoch.
    #[arg(long)]
    pub epoch_time: bool,

    /// Input files (default: standard input).
    pub inputs: Vec<PathBuf>,
}

// ---- config ----

/// Manage flowbag configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, output, site, accumulator).
        #[arg(long)]
        section: Option<String>,
    },
}
