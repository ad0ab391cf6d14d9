//! `flowbag build` command handler

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use flowbag_accumulator::{TextBuildOptions, TextBuilder};
use flowbag_core::SiteLookup;
use flowbag_core::config::FlowbagConfig;

use crate::cli::BuildArgs;
use crate::commands::{inputs_or_stdin, is_stdio, write_aggbag_output, write_options};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `build` command.
///
/// Bag inputs are merged first, then every text input in order. With no
/// inputs at all, text rows are read from standard input.
pub async fn execute(
    args: BuildArgs,
    config: &FlowbagConfig,
    writer: &OutputWriter,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let site: Arc<dyn SiteLookup> = Arc::new(config.site.clone());
    let mut builder = TextBuilder::new(text_options(&args), Some(site))?;

    for path in &args.bag_inputs {
        builder.add_binary_path(path, cancel).await?;
    }
    let text_inputs = if args.bag_inputs.is_empty() {
        inputs_or_stdin(&args.inputs)
    } else {
        args.inputs.clone()
    };
    for path in &text_inputs {
        builder.add_text_path(path, cancel).await?;
    }

    let rows_added = builder.rows();
    let bad_lines = builder.bad_lines();
    let mut bag = builder.finish()?;
    for note in &args.notes {
        bag.add_annotation(note.clone());
    }

    write_aggbag_output(
        &bag,
        &args.output_path,
        &write_options(config, args.invocation_strip, args.notes_strip),
    )?;

    let report = BuildReport {
        destination: args.output_path.display().to_string(),
        key_fields: bag.key_schema().to_string(),
        counter_fields: bag.counter_schema().to_string(),
        rows_added,
        bad_lines,
        distinct_keys: bag.len(),
    };
    info!(
        rows = report.rows_added,
        bad_lines = report.bad_lines,
        keys = report.distinct_keys,
        "build complete"
    );
    if !is_stdio(&args.output_path) {
        writer.render(&report)?;
    }
    Ok(())
}

fn text_options(args: &BuildArgs) -> TextBuildOptions {
    TextBuildOptions {
        fields: args.fields.as_ref().map(|list| {
            list.split(',')
                .map(|name| name.trim().to_owned())
                .collect()
        }),
        no_titles: args.no_titles,
        separator: args.column_separator,
        constants: args.constants.clone(),
        stop_on_error: args.stop_on_error,
    }
}

/// Summary of one build run.
#[derive(Serialize)]
pub struct BuildReport {
    /// Destination path
    pub destination: String,
    /// Key schema of the result
    pub key_fields: String,
    /// Counter schema of the result
    pub counter_fields: String,
    /// Rows read from all inputs
    pub rows_added: u64,
    /// Text lines skipped as malformed
    pub bad_lines: u64,
    /// Distinct keys in the result
    pub distinct_keys: usize,
}

impl Render for BuildReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Built {}", self.destination)?;
        writeln!(w, "  Keys:      {}", self.key_fields)?;
        writeln!(w, "  Counters:  {}", self.counter_fields)?;
        writeln!(
            w,
            "  Rows:      {} read, {} distinct, {} bad lines",
            self.rows_added, self.distinct_keys, self.bad_lines
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> BuildArgs {
        BuildArgs {
            fields: Some("sIPv4, ignore ,records".to_owned()),
            no_titles: true,
            column_separator: ',',
            constants: vec!["sensor=2".to_owned()],
            stop_on_error: true,
            bag_inputs: Vec::new(),
            output_path: PathBuf::from("-"),
            notes: Vec::new(),
            invocation_strip: false,
            notes_strip: false,
            inputs: Vec::new(),
        }
    }

    #[test]
    fn test_text_options_from_args() {
        let opts = text_options(&args());
        assert_eq!(
            opts.fields,
            Some(vec![
                "sIPv4".to_owned(),
                "ignore".to_owned(),
                "records".to_owned()
            ])
        );
        assert!(opts.no_titles);
        assert_eq!(opts.separator, ',');
        assert_eq!(opts.constants, ["sensor=2"]);
        assert!(opts.stop_on_error);
    }

    #[test]
    fn test_report_text() {
        let report = BuildReport {
            destination: "out.agg".to_owned(),
            key_fields: "sIPv4".to_owned(),
            counter_fields: "records".to_owned(),
            rows_added: 5,
            bad_lines: 1,
            distinct_keys: 3,
        };
        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");
        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.contains("Built out.agg"));
        assert!(text.contains("5 read, 3 distinct, 1 bad lines"));
    }
}
