use std::fmt::Write as _;
use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CommandOutput, ItemOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print(output: &CommandOutput) -> io::Result<()> {
        Self::print_json(output)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print(output: &CommandOutput) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(render(output).as_bytes())?;
        Ok(())
    }
}

/// Human-readable form of a command result.
pub fn render(output: &CommandOutput) -> String {
    let mut text = String::new();
    match output {
        CommandOutput::Species {
            series_only,
            species,
            total,
            skipped,
        } => {
            let scope = if *series_only { "series" } else { "datasets" };
            let _ = writeln!(text, "species by number of {scope}:");
            for entry in species {
                let _ = writeln!(text, "{:>6} {}", entry.count, entry.name);
            }
            let _ = writeln!(text, "{total} species mentions in {} species", species.len());
            skipped_line(&mut text, *skipped);
        }
        CommandOutput::Records {
            heading,
            records,
            skipped,
        } => {
            let _ = writeln!(text, "{} {heading}:", records.len());
            for record in records {
                let _ = writeln!(text, "{}", record.title_line());
                let _ = writeln!(text, "    {}", record.path);
            }
            skipped_line(&mut text, *skipped);
        }
        CommandOutput::Distinct { heading, entries } => {
            let _ = writeln!(text, "{heading}:");
            for entry in entries {
                let _ = writeln!(text, "{:>6} {}", entry.count, entry.key);
            }
        }
        CommandOutput::Overlap { overlaps } => {
            for overlap in overlaps {
                let _ = writeln!(
                    text,
                    "{} / {}: {} shared",
                    overlap.left,
                    overlap.right,
                    overlap.ids.len()
                );
                for id in &overlap.ids {
                    let _ = writeln!(text, "    {id}");
                }
            }
            if overlaps.is_empty() {
                let _ = writeln!(text, "fewer than two protocols selected");
            }
        }
        CommandOutput::Protocols { protocols } => {
            for entry in protocols {
                let _ = writeln!(text, "{:>6} {}", entry.records, entry.protocol);
            }
        }
        CommandOutput::Summaries { items } => {
            render_items(&mut text, items, |text, status| {
                let _ = writeln!(text, "{} [{}]", status.key, status.asset_state);
                let _ = write!(text, "{}", status.summary);
                if !status.summary.ends_with('\n') {
                    text.push('\n');
                }
                if let Some(path) = &status.data_path {
                    let _ = writeln!(text, "data: {path}");
                }
            });
        }
        CommandOutput::Fetch { items } => {
            render_items(&mut text, items, |text, report| {
                let _ = writeln!(text, "  {} ({} files)", report.action, report.files.len());
                if let Some(contributor) = &report.contributor {
                    let _ = writeln!(text, "  contributor: {contributor}");
                }
            });
        }
        CommandOutput::SraLists { items } => {
            render_items(&mut text, items, |text, report| {
                let _ = writeln!(text, "  {} ({} runs)", report.action, report.entries.len());
                for entry in &report.entries {
                    let _ = writeln!(text, "    {entry}");
                }
                for url in &report.failed_listings {
                    let _ = writeln!(text, "  listing failed: {url}");
                }
            });
        }
        CommandOutput::Import { report } => {
            let _ = writeln!(
                text,
                "{}: {} created, {} written, {} failed",
                report.protocol,
                report.created.len(),
                report.imported.len(),
                report.failed.len()
            );
            for failure in &report.failed {
                let _ = writeln!(text, "  {}: {}", failure.id, failure.reason);
            }
        }
    }
    text
}

fn render_items<T>(
    text: &mut String,
    items: &[ItemOutcome<T>],
    describe: impl Fn(&mut String, &T),
) {
    for item in items {
        match (&item.result, &item.error) {
            (Some(result), _) => {
                let _ = writeln!(text, "{}", item.target);
                describe(text, result);
            }
            (None, Some(error)) => {
                let _ = writeln!(text, "{}: {error}", item.target);
            }
            (None, None) => {}
        }
    }
}

fn skipped_line(text: &mut String, skipped: usize) {
    if skipped > 0 {
        let _ = writeln!(text, "({skipped} unreadable records skipped)");
    }
}
