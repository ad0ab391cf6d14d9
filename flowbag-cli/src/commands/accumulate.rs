//! `flowbag accumulate` command handler

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowbag_accumulator::{
    Accumulator, AccumulatorError, FlowReader, OutputSpec, OutputTarget, PmapRegistry,
};
use flowbag_core::config::{FlowbagConfig, parse_pmap_entry};
use flowbag_core::error::FlowbagError;

use crate::cli::AccumulateArgs;
use crate::commands::{inputs_or_stdin, write_options};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `accumulate` command.
///
/// Outputs are written only after every input was consumed. An interrupt
/// or a failed input leaves every output unwritten.
pub async fn execute(
    args: AccumulateArgs,
    config: &FlowbagConfig,
    writer: &OutputWriter,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let outputs = output_specs(&args, config)?;
    let registry = PmapRegistry::load(&pmap_entries(&args, config)?).await?;

    let mut builder = Accumulator::builder().outputs(outputs).pmaps(registry);
    if let Some(path) = country_codes(&args, config) {
        builder = builder.country_codes(path);
    }
    for note in &args.notes {
        builder = builder.note(note.clone());
    }
    let mut acc = builder.build().await?;

    let mut unparsed_lines = 0u64;
    for input in inputs_or_stdin(&args.inputs) {
        let mut reader = FlowReader::open(&input).await?;
        match acc.run(&mut reader, cancel).await {
            Ok(_) => unparsed_lines += reader.skipped(),
            Err(AccumulatorError::Cancelled) => {
                warn!(records = acc.records(), "interrupted, outputs not written");
                return Err(CliError::Cancelled);
            }
            Err(e) => return Err(e.into()),
        }
    }

    acc.write_all(&write_options(
        config,
        args.invocation_strip,
        args.notes_strip,
    ))?;

    let report = AccumulateReport::new(&acc, unparsed_lines);
    info!(
        records = report.records,
        outputs = report.outputs.len(),
        "accumulation complete"
    );
    if report.outputs.iter().any(|o| o.path == OutputTarget::Stdout.to_string()) {
        // stdout carries container bytes
        return Ok(());
    }
    writer.render(&report)?;
    Ok(())
}

/// Output list: command line specs replace the configured ones.
fn output_specs(args: &AccumulateArgs, config: &FlowbagConfig) -> Result<Vec<OutputSpec>, CliError> {
    let specs = if args.output_specs.is_empty() {
        config
            .accumulator
            .outputs
            .iter()
            .map(OutputSpec::from_section)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        args.output_specs
            .iter()
            .map(|raw| raw.parse::<OutputSpec>())
            .collect::<Result<Vec<_>, _>>()?
    };
    if specs.is_empty() {
        return Err(CliError::Config(
            "no outputs: pass --output-spec or configure [[accumulator.outputs]]".to_owned(),
        ));
    }
    Ok(specs)
}

/// Prefix maps from the configuration, with command line entries replacing same-named ones.
fn pmap_entries(
    args: &AccumulateArgs,
    config: &FlowbagConfig,
) -> Result<Vec<(String, PathBuf)>, CliError> {
    let mut entries = config
        .accumulator
        .pmap_entries()
        .map_err(FlowbagError::from)?;
    for raw in &args.pmaps {
        let (name, path) = parse_pmap_entry(raw).map_err(FlowbagError::from)?;
        entries.retain(|(existing, _)| *existing != name);
        entries.push((name, path));
    }
    Ok(entries)
}

fn country_codes(args: &AccumulateArgs, config: &FlowbagConfig) -> Option<PathBuf> {
    args.country_codes.clone().or_else(|| {
        let configured = config.accumulator.country_codes.trim();
        (!configured.is_empty()).then(|| PathBuf::from(configured))
    })
}

/// Summary of one accumulation run.
#[derive(Serialize)]
pub struct AccumulateReport {
    /// Flow records read
    pub records: u64,
    /// Input lines that were not valid flow records
    pub unparsed_lines: u64,
    /// Per-output results
    pub outputs: Vec<OutputSummary>,
}

/// Result for one output container.
#[derive(Serialize)]
pub struct OutputSummary {
    /// Output spec as KEYS:COUNTERS:PATH
    pub spec: String,
    /// Destination path (`-` for stdout)
    pub path: String,
    /// File format written (`bag` or `aggbag`)
    pub format: &'static str,
    /// Distinct keys
    pub rows: usize,
    /// Records that could not be keyed for this output
    pub skipped_records: u64,
    /// Whether any counter saturated
    pub overflowed: bool,
}

impl AccumulateReport {
    fn new(acc: &Accumulator, unparsed_lines: u64) -> Self {
        let outputs = acc
            .containers()
            .zip(acc.skipped())
            .map(|((spec, bag, _), (_, skipped))| OutputSummary {
                spec: spec.to_string(),
                path: spec.target.to_string(),
                format: if spec.is_legacy_bag() { "bag" } else { "aggbag" },
                rows: bag.len(),
                skipped_records: skipped,
                overflowed: bag.overflowed(),
            })
            .collect();
        Self {
            records: acc.records(),
            unparsed_lines,
            outputs,
        }
    }
}

impl Render for AccumulateReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Accumulated {} records ({} unparsed lines)",
            self.records, self.unparsed_lines
        )?;
        for output in &self.outputs {
            write!(
                w,
                "  {:<8} {:>10} rows  {}",
                output.format, output.rows, output.spec
            )?;
            if output.skipped_records > 0 {
                write!(w, "  ({} records skipped)", output.skipped_records)?;
            }
            if output.overflowed {
                write!(w, "  [overflow]")?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}
