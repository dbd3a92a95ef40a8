//! Item timestamps given on the command line or in a file

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use std::path::Path;

/// Accepted timestamp layouts: ISO 8601 without zone, and the EXIF form
const FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y:%m:%d %H:%M:%S",
];

/// An item to correlate: the text it came from and its parsed time
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub label: String,
    pub date_time: NaiveDateTime,
}

pub fn parse_item_time(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .with_context(|| format!("Invalid timestamp: {value:?}"))
}

/// Parse one timestamp per line, skipping blank lines and `#` comments
pub fn parse_item_lines(content: &str) -> Result<Vec<Item>> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_number, line)| {
            let date_time =
                parse_item_time(line).with_context(|| format!("Line {line_number}"))?;
            Ok(Item {
                label: line.to_string(),
                date_time,
            })
        })
        .collect()
}

/// Collect items from an optional file followed by the given arguments
pub fn collect_items(file: Option<&Path>, arguments: &[String]) -> Result<Vec<Item>> {
    let mut items = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read items from {}", path.display()))?;
            parse_item_lines(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => Vec::new(),
    };

    for argument in arguments {
        items.push(Item {
            label: argument.trim().to_string(),
            date_time: parse_item_time(argument)?,
        });
    }

    if items.is_empty() {
        bail!("No timestamps given; pass them as arguments or with --items");
    }
    Ok(items)
}
