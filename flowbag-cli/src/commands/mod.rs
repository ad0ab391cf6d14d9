//! Command handlers -- one module per subcommand

pub mod accumulate;
pub mod build;
pub mod cat;
pub mod config;
pub mod tool;

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use flowbag_aggbag::{AggBag, Container, WriteOptions};
use flowbag_core::config::FlowbagConfig;
use flowbag_core::error::{ConfigError, FlowbagError};
use flowbag_core::{FieldKind, FieldRole};

use crate::cli::STDIO_PATH;
use crate::error::CliError;

/// Load the configuration for a command.
///
/// A missing file is only an error when the path was given explicitly;
/// otherwise defaults plus environment overrides are used.
pub async fn load_config(path: &Path, explicit: bool) -> Result<FlowbagConfig, CliError> {
    match FlowbagConfig::load(path).await {
        Ok(config) => Ok(config),
        Err(FlowbagError::Config(ConfigError::FileNotFound { .. })) if !explicit => {
            debug!(path = %path.display(), "no configuration file, using defaults");
            let mut config = FlowbagConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(e.into()),
    }
}

/// Command line of this process, recorded in output headers.
pub(crate) fn invocation() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

/// Header options for written containers. Flags are OR-ed with the `[output]` defaults.
pub(crate) fn write_options(
    config: &FlowbagConfig,
    invocation_strip: bool,
    notes_strip: bool,
) -> WriteOptions {
    WriteOptions {
        invocation: Some(invocation()),
        invocation_strip: invocation_strip || config.output.invocation_strip,
        notes_strip: notes_strip || config.output.notes_strip,
    }
}

pub(crate) fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == STDIO_PATH
}

/// Input list with standard input substituted for an empty list.
pub(crate) fn inputs_or_stdin(inputs: &[PathBuf]) -> Vec<PathBuf> {
    if inputs.is_empty() {
        vec![PathBuf::from(STDIO_PATH)]
    } else {
        inputs.to_vec()
    }
}

/// Split `NAME=VALUE`, rejecting an empty name or value.
pub(crate) fn split_assignment<'a>(
    raw: &'a str,
    option: &str,
) -> Result<(&'a str, &'a str), CliError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() && !value.trim().is_empty() => {
            Ok((name.trim(), value.trim()))
        }
        _ => Err(CliError::Config(format!(
            "--{} expects FIELD=VALUE, got '{}'",
            option, raw
        ))),
    }
}

/// Parse a comma-separated field list.
pub(crate) fn parse_field_list(list: &str, option: &str) -> Result<Vec<FieldKind>, CliError> {
    let kinds = list
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .map(FieldKind::lookup)
        .collect::<Result<Vec<_>, _>>()?;
    if kinds.is_empty() {
        return Err(CliError::Config(format!("--{} needs at least one field", option)));
    }
    Ok(kinds)
}

/// Parse a field name, preferring the given role for aliases.
pub(crate) fn parse_field(name: &str, role: FieldRole) -> Result<FieldKind, CliError> {
    Ok(FieldKind::lookup_in(name, role)?)
}

/// Read a Bag or Aggregate Bag from a file or standard input.
///
/// The blocking decode runs on the blocking pool and observes `cancel`.
pub(crate) async fn read_input(
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Container, CliError> {
    let path = path.to_path_buf();
    let token = cancel.clone();
    let container = tokio::task::spawn_blocking(move || {
        if is_stdio(&path) {
            let stdin = std::io::stdin();
            flowbag_aggbag::read_container(stdin.lock(), Some(&token))
        } else {
            flowbag_aggbag::read_from_path(&path, Some(&token))
        }
    })
    .await
    .map_err(|e| CliError::Command(format!("input reader task failed: {}", e)))??;
    Ok(container)
}

/// Write an Aggregate Bag to a file or standard output.
pub(crate) fn write_aggbag_output(
    bag: &AggBag,
    path: &Path,
    opts: &WriteOptions,
) -> Result<(), CliError> {
    if is_stdio(path) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        flowbag_aggbag::write_aggbag(bag, &mut handle, opts)?;
        handle.flush()?;
        info!(rows = bag.len(), "wrote container to stdout");
    } else {
        flowbag_aggbag::write_aggbag_to_path(bag, path, opts)?;
    }
    Ok(())
}
