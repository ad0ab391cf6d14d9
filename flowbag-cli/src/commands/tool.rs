//! `flowbag tool` command handler
//!
//! Pipeline order: project each input, combine with add or subtract,
//! filter the result, then write it or convert it.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use flowbag_aggbag::{
    AggBag, FieldSelection, Filter, InsertSpec, IpSet, Projection, RangeBound, SetPolarity,
    WriteOptions, to_bag, to_ipset,
};
use flowbag_core::config::FlowbagConfig;
use flowbag_core::{FieldKind, FieldRole, SiteLookup, parse_field_value};

use crate::cli::ToolArgs;
use crate::commands::{
    inputs_or_stdin, is_stdio, parse_field, parse_field_list, read_input, split_assignment,
    write_aggbag_output, write_options,
};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// How the inputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Add,
    Subtract,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
        }
    }
}

/// What the final container is written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    None,
    ToBag { key: FieldKind, counter: FieldKind },
    ToIpset { field: FieldKind, counter: Option<FieldKind> },
}

impl Conversion {
    fn format_name(self) -> &'static str {
        match self {
            Self::None => "aggbag",
            Self::ToBag { .. } => "bag",
            Self::ToIpset { .. } => "ipset",
        }
    }
}

/// Execute the `tool` command.
pub async fn execute(
    args: ToolArgs,
    config: &FlowbagConfig,
    writer: &OutputWriter,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let projection = build_projection(&args, &config.site)?;
    let filter = build_filter(&args, &config.site).await?;
    let conversion = parse_conversion(&args)?;
    let operation = if args.subtract {
        Operation::Subtract
    } else {
        Operation::Add
    };

    let inputs = inputs_or_stdin(&args.inputs);
    let mut combined: Option<AggBag> = None;
    for path in &inputs {
        if cancel.is_cancelled() {
            return Err(CliError::Cancelled);
        }
        let bag = read_input(path, cancel).await?.into_aggbag();
        let bag = if projection.is_identity() {
            bag
        } else {
            projection.apply(&bag)?
        };
        debug!(path = %path.display(), rows = bag.len(), "input projected");
        match combined.as_mut() {
            None => combined = Some(bag),
            Some(acc) => {
                match operation {
                    Operation::Add => acc.merge_add(&bag)?,
                    Operation::Subtract => acc.merge_sub(&bag)?,
                }
                acc.extend_provenance(&bag);
            }
        }
    }
    let mut result =
        combined.ok_or_else(|| CliError::Command("no input containers".to_owned()))?;

    let rows_filtered = filter.apply(&mut result);
    for note in &args.notes {
        result.add_annotation(note.clone());
    }

    let opts = write_options(config, args.invocation_strip, args.notes_strip);
    let rows_written = write_result(&result, conversion, &args.output_path, &opts).await?;

    let report = ToolReport {
        inputs: inputs.len(),
        operation: operation.name(),
        rows_filtered,
        rows_written,
        format: conversion.format_name(),
        destination: args.output_path.display().to_string(),
    };
    info!(
        inputs = report.inputs,
        rows = report.rows_written,
        filtered = report.rows_filtered,
        format = report.format,
        "tool complete"
    );
    if !is_stdio(&args.output_path) {
        writer.render(&report)?;
    }
    Ok(())
}

fn build_projection(args: &ToolArgs, site: &dyn SiteLookup) -> Result<Projection, CliError> {
    let mut projection = Projection::new();
    for raw in &args.insert_fields {
        let (name, text) = split_assignment(raw, "insert-field")?;
        let kind = FieldKind::lookup(name)?;
        let value = parse_field_value(kind, text, Some(site))?;
        projection.add_insert(InsertSpec::new(kind, value)?)?;
    }
    if let Some(list) = &args.remove_fields {
        projection.set_selection(FieldSelection::Remove(parse_field_list(
            list,
            "remove-fields",
        )?))?;
    }
    if let Some(list) = &args.select_fields {
        projection.set_selection(FieldSelection::Select(parse_field_list(
            list,
            "select-fields",
        )?))?;
    }
    Ok(projection)
}

async fn build_filter(args: &ToolArgs, site: &dyn SiteLookup) -> Result<Filter, CliError> {
    let mut filter = Filter::new();
    let ranges = args
        .min_fields
        .iter()
        .map(|raw| (raw, RangeBound::Min, "min-field"))
        .chain(
            args.max_fields
                .iter()
                .map(|raw| (raw, RangeBound::Max, "max-field")),
        );
    for (raw, bound, option) in ranges {
        let (name, text) = split_assignment(raw, option)?;
        let kind = FieldKind::lookup(name)?;
        let value = parse_field_value(kind, text, Some(site))?;
        filter.add_range(kind, bound, value)?;
    }

    let sets = args
        .set_intersect
        .iter()
        .map(|raw| (raw, SetPolarity::Intersect, "set-intersect"))
        .chain(
            args.set_complement
                .iter()
                .map(|raw| (raw, SetPolarity::Complement, "set-complement")),
        );
    for (raw, polarity, option) in sets {
        let (name, path) = split_assignment(raw, option)?;
        let kind = FieldKind::lookup(name)?;
        let set = IpSet::load(Path::new(path)).await?;
        filter.add_set(kind, polarity, Arc::new(set))?;
    }
    Ok(filter)
}

fn parse_conversion(args: &ToolArgs) -> Result<Conversion, CliError> {
    if let Some(raw) = &args.to_bag {
        let (key, counter) = raw.split_once(',').ok_or_else(|| {
            CliError::Config(format!("--to-bag expects KEY,COUNTER, got '{}'", raw))
        })?;
        return Ok(Conversion::ToBag {
            key: parse_field(key, FieldRole::Key)?,
            counter: parse_field(counter, FieldRole::Counter)?,
        });
    }
    if let Some(raw) = &args.to_ipset {
        let (field, counter) = match raw.split_once(',') {
            Some((field, counter)) => (field, Some(counter)),
            None => (raw.as_str(), None),
        };
        return Ok(Conversion::ToIpset {
            field: parse_field(field, FieldRole::Key)?,
            counter: counter
                .map(|name| parse_field(name, FieldRole::Counter))
                .transpose()?,
        });
    }
    Ok(Conversion::None)
}

/// Write the final container in the requested form. Returns the rows written.
async fn write_result(
    result: &AggBag,
    conversion: Conversion,
    path: &Path,
    opts: &WriteOptions,
) -> Result<usize, CliError> {
    match conversion {
        Conversion::None => {
            write_aggbag_output(result, path, opts)?;
            Ok(result.len())
        }
        Conversion::ToBag { key, counter } => {
            let bag = to_bag(result, key, counter)?;
            if is_stdio(path) {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                flowbag_aggbag::write_bag(&bag, &mut handle, opts)?;
                handle.flush()?;
            } else {
                flowbag_aggbag::write_bag_to_path(&bag, path, opts)?;
            }
            Ok(bag.len())
        }
        Conversion::ToIpset { field, counter } => {
            let set = to_ipset(result, field, counter)?;
            let text = set.to_text();
            if is_stdio(path) {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                handle.write_all(text.as_bytes())?;
                handle.flush()?;
            } else {
                tokio::fs::write(path, text.as_bytes()).await?;
            }
            Ok(set.len_ranges())
        }
    }
}

/// Summary of one tool run.
#[derive(Serialize)]
pub struct ToolReport {
    /// Number of input containers
    pub inputs: usize,
    /// Combination applied (`add` or `subtract`)
    pub operation: &'static str,
    /// Rows removed by filters
    pub rows_filtered: usize,
    /// Rows (or IP ranges) in the output
    pub rows_written: usize,
    /// Output format (`aggbag`, `bag` or `ipset`)
    pub format: &'static str,
    /// Destination path
    pub destination: String,
}

impl Render for ToolReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Wrote {} ({}): {} rows from {} inputs ({}), {} filtered out",
            self.destination,
            self.format,
            self.rows_written,
            self.inputs,
            self.operation,
            self.rows_filtered
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbag_core::config::SiteConfig;
    use std::path::PathBuf;

    fn args() -> ToolArgs {
        ToolArgs {
            add: false,
            subtract: false,
            insert_fields: Vec::new(),
            remove_fields: None,
            select_fields: None,
            min_fields: Vec::new(),
            max_fields: Vec::new(),
            set_intersect: Vec::new(),
            set_complement: Vec::new(),
            to_bag: None,
            to_ipset: None,
            output_path: PathBuf::from("-"),
            notes: Vec::new(),
            invocation_strip: false,
            notes_strip: false,
            inputs: Vec::new(),
        }
    }

    #[test]
    fn test_default_projection_is_identity() {
        let projection = build_projection(&args(), &SiteConfig::default()).expect("projection");
        assert!(projection.is_identity());
    }

    #[test]
    fn test_projection_insert_and_select() {
        let mut a = args();
        a.insert_fields = vec!["sensor=4".to_owned()];
        a.select_fields = Some("sensor,sIPv4,records".to_owned());
        let projection = build_projection(&a, &SiteConfig::default()).expect("projection");
        assert_eq!(projection.inserts().len(), 1);
        assert_eq!(projection.inserts()[0].kind(), FieldKind::Sensor);
        assert!(matches!(
            projection.selection(),
            Some(FieldSelection::Select(kinds)) if kinds.len() == 3
        ));
    }

    #[test]
    fn test_projection_rejects_bad_insert_value() {
        let mut a = args();
        a.insert_fields = vec!["dPort=http".to_owned()];
        let err = build_projection(&a, &SiteConfig::default()).expect_err("not a port");
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_filter_from_ranges() {
        let mut a = args();
        a.min_fields = vec!["records=10".to_owned()];
        a.max_fields = vec!["dPort=1024".to_owned()];
        let filter = build_filter(&a, &SiteConfig::default()).await.expect("filter");
        assert!(!filter.is_empty());
    }

    #[tokio::test]
    async fn test_filter_set_requires_ip_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("internal.set");
        tokio::fs::write(&path, "10.0.0.0/8\n").await.expect("write set");

        let mut a = args();
        a.set_intersect = vec![format!("dPort={}", path.display())];
        let err = build_filter(&a, &SiteConfig::default())
            .await
            .expect_err("dPort is not an IP field");
        assert_eq!(err.exit_code(), 2);

        a.set_intersect = vec![format!("sIPv4={}", path.display())];
        assert!(build_filter(&a, &SiteConfig::default()).await.is_ok());
    }

    #[test]
    fn test_parse_conversion() {
        assert_eq!(parse_conversion(&args()).expect("none"), Conversion::None);

        let mut a = args();
        a.to_bag = Some("sIPv4,bytes".to_owned());
        assert_eq!(
            parse_conversion(&a).expect("to-bag"),
            Conversion::ToBag {
                key: FieldKind::SIpv4,
                counter: FieldKind::SumBytes
            }
        );

        let mut a = args();
        a.to_ipset = Some("dIPv4".to_owned());
        assert_eq!(
            parse_conversion(&a).expect("to-ipset"),
            Conversion::ToIpset {
                field: FieldKind::DIpv4,
                counter: None
            }
        );

        let mut a = args();
        a.to_bag = Some("sIPv4".to_owned());
        assert!(parse_conversion(&a).is_err(), "to-bag needs a counter");
    }
}
