//! `flowbag cat` command handler

use std::io::Write;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use flowbag_aggbag::AggBag;
use flowbag_core::config::FlowbagConfig;
use flowbag_core::field_text::text_width;
use flowbag_core::{FieldKind, RenderOptions, SiteLookup, render_field_value};

use crate::cli::CatArgs;
use crate::commands::{inputs_or_stdin, read_input};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `cat` command.
///
/// Each input is printed in turn; JSON output emits one document per input.
pub async fn execute(
    args: CatArgs,
    config: &FlowbagConfig,
    writer: &OutputWriter,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let opts = RenderOptions {
        integer_sensors: args.integer_sensors,
        integer_tcp_flags: args.integer_tcp_flags,
        epoch_time: args.epoch_time,
    };
    let layout = TextLayout {
        titles: !args.no_titles,
        columns: !args.no_columns,
        separator: args.column_separator,
        final_delimiter: !args.no_final_delimiter,
    };

    for path in inputs_or_stdin(&args.inputs) {
        let container = read_input(&path, cancel).await?;
        let format = container.format_name();
        let bag = container.into_aggbag();
        debug!(path = %path.display(), format, rows = bag.len(), "printing container");
        let report = CatReport::new(
            path.display().to_string(),
            format,
            &bag,
            &opts,
            &config.site,
            layout,
        );
        writer.render(&report)?;
    }
    Ok(())
}

/// Text layout options.
#[derive(Debug, Clone, Copy)]
pub struct TextLayout {
    /// Print the title line
    pub titles: bool,
    /// Pad values into aligned columns
    pub columns: bool,
    /// Column separator
    pub separator: char,
    /// Print a separator after the last column
    pub final_delimiter: bool,
}

/// One printed row.
#[derive(Serialize)]
pub struct CatRow {
    /// Rendered key values in key schema order
    pub keys: Vec<String>,
    /// Counter values in counter schema order
    pub counters: Vec<u64>,
}

/// Rows of one container.
#[derive(Serialize)]
pub struct CatReport {
    /// Input path
    pub source: String,
    /// File format (`bag` or `aggbag`)
    pub format: &'static str,
    /// Key field names
    pub key_fields: Vec<&'static str>,
    /// Counter field names
    pub counter_fields: Vec<&'static str>,
    /// Header annotations
    pub annotations: Vec<String>,
    /// Rows in key order
    pub rows: Vec<CatRow>,
    #[serde(skip)]
    widths: Vec<usize>,
    #[serde(skip)]
    layout: TextLayout,
}

impl CatReport {
    fn new(
        source: String,
        format: &'static str,
        bag: &AggBag,
        opts: &RenderOptions,
        site: &dyn SiteLookup,
        layout: TextLayout,
    ) -> Self {
        let key_kinds = bag.key_schema().kinds();
        let counter_kinds = bag.counter_schema().kinds();
        let widths = key_kinds
            .iter()
            .chain(counter_kinds.iter())
            .map(|kind| column_width(*kind, opts))
            .collect();
        let rows = bag
            .iter()
            .map(|(key, counters)| CatRow {
                keys: key_kinds
                    .iter()
                    .zip(&key)
                    .map(|(kind, value)| render_field_value(*kind, value, opts, Some(site)))
                    .collect(),
                counters: counters.to_vec(),
            })
            .collect();
        Self {
            source,
            format,
            key_fields: key_kinds.iter().map(|k| k.name()).collect(),
            counter_fields: counter_kinds.iter().map(|k| k.name()).collect(),
            annotations: bag.annotations().to_vec(),
            rows,
            widths,
            layout,
        }
    }

    fn write_line<'a>(
        &self,
        w: &mut dyn Write,
        cells: impl Iterator<Item = std::borrow::Cow<'a, str>>,
    ) -> std::io::Result<()> {
        let mut line = String::new();
        for (idx, cell) in cells.enumerate() {
            if idx > 0 {
                line.push(self.layout.separator);
            }
            if self.layout.columns {
                let width = self.widths.get(idx).copied().unwrap_or(0);
                line.push_str(&format!("{:>width$}", cell, width = width));
            } else {
                line.push_str(&cell);
            }
        }
        if self.layout.final_delimiter {
            line.push(self.layout.separator);
        }
        writeln!(w, "{}", line)
    }
}

fn column_width(kind: FieldKind, opts: &RenderOptions) -> usize {
    text_width(kind, opts).max(kind.name().len())
}

impl Render for CatReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.layout.titles {
            let names = self
                .key_fields
                .iter()
                .chain(self.counter_fields.iter())
                .map(|name| std::borrow::Cow::Borrowed(*name));
            self.write_line(w, names)?;
        }
        for row in &self.rows {
            let cells = row
                .keys
                .iter()
                .map(|k| std::borrow::Cow::Borrowed(k.as_str()))
                .chain(row.counters.iter().map(|c| std::borrow::Cow::Owned(c.to_string())));
            self.write_line(w, cells)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbag_core::config::SiteConfig;
    use flowbag_core::{FieldValue, Schema};

    fn sample() -> AggBag {
        let mut bag = AggBag::new(
            Schema::keys([FieldKind::SIpv4, FieldKind::DPort]).expect("keys"),
            Schema::counters([FieldKind::Records]).expect("counters"),
        )
        .expect("bag");
        bag.add(
            &[
                FieldValue::Ipv4("10.0.0.1".parse().expect("ip")),
                FieldValue::Unsigned(80),
            ],
            &[3],
        )
        .expect("add");
        bag
    }

    fn render(layout: TextLayout) -> String {
        let report = CatReport::new(
            "sample.agg".to_owned(),
            "aggbag",
            &sample(),
            &RenderOptions::default(),
            &SiteConfig::default(),
            layout,
        );
        let mut buffer = Vec::new();
        report.render_text(&mut buffer).expect("render");
        String::from_utf8(buffer).expect("utf8")
    }

    #[test]
    fn test_delimited_output() {
        let text = render(TextLayout {
            titles: true,
            columns: false,
            separator: ',',
            final_delimiter: false,
        });
        assert_eq!(text, "sIPv4,dPort,records\n10.0.0.1,80,3\n");
    }

    #[test]
    fn test_column_output_pads_and_ends_with_separator() {
        let text = render(TextLayout {
            titles: false,
            columns: true,
            separator: '|',
            final_delimiter: true,
        });
        let line = text.lines().next().expect("one row");
        assert!(line.ends_with('|'));
        let cells: Vec<&str> = line.trim_end_matches('|').split('|').collect();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].len(), 15, "IPv4 column is 15 wide");
        assert_eq!(cells[0].trim(), "10.0.0.1");
        assert_eq!(cells[2].trim(), "3");
    }

    #[test]
    fn test_json_shape() {
        let report = CatReport::new(
            "sample.agg".to_owned(),
            "aggbag",
            &sample(),
            &RenderOptions::default(),
            &SiteConfig::default(),
            TextLayout {
                titles: true,
                columns: true,
                separator: '|',
                final_delimiter: true,
            },
        );
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["key_fields"], serde_json::json!(["sIPv4", "dPort"]));
        assert_eq!(json["rows"][0]["keys"], serde_json::json!(["10.0.0.1", "80"]));
        assert_eq!(json["rows"][0]["counters"], serde_json::json!([3]));
        assert!(json.get("widths").is_none());
    }
}
