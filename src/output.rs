//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Analyze
//!
//! ```text
//! 001 seamaster.jpg
//!     Offset: +0.125, -0.040
//!     Dial: #1f3db3
//! 002 https://example.com/blank.jpg
//!     Offset: +0.000, +0.000 (neutral)
//! 003 missing.jpg: unreadable (No such file or directory (os error 2))
//! ```
//!
//! ## Prepare
//!
//! ```text
//! 001 seamaster.jpg → out/seamaster.jpg
//!     900x900, 84.2 KB
//!     Offset: +0.125, -0.040
//!     Dial: #1f3db3
//! 002 notes.jpg: failed (cannot decode or encode photo)
//! 003 speedmaster.jpg → out/speedmaster.jpg (exists, skipped)
//!
//! Prepared 1 photo, 1 skipped, 1 failed
//! Failures listed in out/failed.json
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for
//! testability and, where the CLI needs one, a `print_*` wrapper that writes
//! to stdout. Format functions are pure: no I/O, no side effects.

use crate::prepare::{BatchSummary, PrepareEvent};
use crate::types::SaliencyDescriptor;
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Human-readable byte count.
fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Indented offset and dial lines for a descriptor.
fn descriptor_lines(descriptor: &SaliencyDescriptor, depth: usize) -> Vec<String> {
    let pad = indent(depth);
    let mut lines = vec![format!(
        "{pad}Offset: {:+.3}, {:+.3}{}",
        descriptor.offset_x,
        descriptor.offset_y,
        if descriptor.is_neutral() {
            " (neutral)"
        } else {
            ""
        }
    )];
    if let Some(dial) = descriptor.dial_color {
        lines.push(format!("{pad}Dial: {}", dial.to_hex()));
    }
    lines
}

// ============================================================================
// analyze
// ============================================================================

/// Format one analyzed source: index + source, then descriptor context.
pub fn format_descriptor(index: usize, source: &str, descriptor: &SaliencyDescriptor) -> Vec<String> {
    let mut lines = vec![format!("{} {}", format_index(index), source)];
    lines.extend(descriptor_lines(descriptor, 1));
    lines
}

pub fn print_descriptor(index: usize, source: &str, descriptor: &SaliencyDescriptor) {
    for line in format_descriptor(index, source, descriptor) {
        println!("{}", line);
    }
}

/// Format a source that could not be read at all.
pub fn format_source_error(index: usize, source: &str, error: &str) -> Vec<String> {
    vec![format!("{} {}: unreadable ({})", format_index(index), source, error)]
}

pub fn print_source_error(index: usize, source: &str, error: &str) {
    for line in format_source_error(index, source, error) {
        println!("{}", line);
    }
}

// ============================================================================
// prepare
// ============================================================================

/// Format a single prepare progress event as display lines.
pub fn format_prepare_event(event: &PrepareEvent) -> Vec<String> {
    match event {
        PrepareEvent::Prepared {
            index,
            source,
            output,
            dimensions,
            bytes,
            descriptor,
        } => {
            let mut lines = vec![
                format!(
                    "{} {} \u{2192} {}",
                    format_index(*index),
                    file_label(source),
                    output.display()
                ),
                format!(
                    "{}{}x{}, {}",
                    indent(1),
                    dimensions.0,
                    dimensions.1,
                    format_size(*bytes)
                ),
            ];
            lines.extend(descriptor_lines(descriptor, 1));
            lines
        }
        PrepareEvent::Skipped {
            index,
            source,
            output,
        } => vec![format!(
            "{} {} \u{2192} {} (exists, skipped)",
            format_index(*index),
            file_label(source),
            output.display()
        )],
        PrepareEvent::Failed {
            index,
            source,
            reason,
        } => vec![format!(
            "{} {}: failed ({})",
            format_index(*index),
            file_label(source),
            reason
        )],
    }
}

/// Closing line for a batch.
pub fn format_batch_summary(summary: &BatchSummary) -> Vec<String> {
    let noun = if summary.prepared == 1 {
        "photo"
    } else {
        "photos"
    };
    let mut line = format!("Prepared {} {}", summary.prepared, noun);
    if summary.skipped > 0 {
        line.push_str(&format!(", {} skipped", summary.skipped));
    }
    if summary.failed > 0 {
        line.push_str(&format!(", {} failed", summary.failed));
    }
    vec![line]
}

pub fn print_batch_summary(summary: &BatchSummary) {
    for line in format_batch_summary(summary) {
        println!("{}", line);
    }
}
