//! Exposition format encoding and parsing
//!
//! Nodes publish their gauges as line-oriented text, one metric per block:
//!
//! ```text
//! # HELP node_current_load Current charging load of the node
//! # TYPE node_current_load gauge
//! node_current_load 42.5
//! ```
//!
//! The router reads the same text back through [`parse_exposition`], which
//! yields typed [`Sample`]s or an [`ExpositionError`] pinpointing the bad line.

use std::fmt::Write;

use thiserror::Error;

/// Content type used for exposition responses
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Errors produced while reading exposition text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpositionError {
    #[error("Malformed exposition at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Metric '{0}' not found in exposition")]
    MissingMetric(String),
}

/// Kind of a published metric, written on the `# TYPE` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// One parsed sample line
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    /// Look up a label value by name
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Builder for an exposition document
#[derive(Debug, Default)]
pub struct Exposition {
    buf: String,
}

impl Exposition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the HELP and TYPE annotations for a metric
    pub fn describe(&mut self, name: &str, help: &str, kind: MetricKind) -> &mut Self {
        let _ = writeln!(self.buf, "# HELP {} {}", name, help);
        let _ = writeln!(self.buf, "# TYPE {} {}", name, kind.as_str());
        self
    }

    /// Write an unlabeled sample
    pub fn sample(&mut self, name: &str, value: f64) -> &mut Self {
        let _ = writeln!(self.buf, "{} {}", name, value);
        self
    }

    /// Write an unlabeled sample with a fixed number of decimals
    pub fn sample_fixed(&mut self, name: &str, value: f64, decimals: usize) -> &mut Self {
        let _ = writeln!(self.buf, "{} {:.*}", name, decimals, value);
        self
    }

    /// Write a labeled sample
    pub fn labeled_sample(&mut self, name: &str, labels: &[(&str, &str)], value: f64) -> &mut Self {
        let rendered = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(self.buf, "{}{{{}}} {}", name, rendered, value);
        self
    }

    /// Describe and write a single unlabeled gauge
    pub fn gauge(&mut self, name: &str, help: &str, value: f64) -> &mut Self {
        self.describe(name, help, MetricKind::Gauge).sample(name, value)
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a full exposition document into samples.
/// Blank lines and `#` comment lines are skipped; anything else must be a
/// well-formed sample line.
pub fn parse_exposition(text: &str) -> Result<Vec<Sample>, ExpositionError> {
    let mut samples = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = parse_sample_line(line).map_err(|reason| ExpositionError::Malformed {
            line: idx + 1,
            reason,
        })?;
        samples.push(sample);
    }
    Ok(samples)
}

/// Find the first unlabeled-or-labeled sample with the given name
pub fn find_value(samples: &[Sample], name: &str) -> Result<f64, ExpositionError> {
    samples
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.value)
        .ok_or_else(|| ExpositionError::MissingMetric(name.to_string()))
}

fn parse_sample_line(line: &str) -> Result<Sample, String> {
    let name_end = line
        .find(|c: char| !is_name_char(c))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_valid_name(name) {
        return Err(format!("invalid metric name in '{}'", line));
    }

    let mut rest = &line[name_end..];
    let labels = if rest.starts_with('{') {
        let (labels, after) = parse_labels(&rest[1..])?;
        rest = after;
        labels
    } else {
        Vec::new()
    };

    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return Err(format!("expected whitespace before value for '{}'", name));
    }
    let mut fields = rest.split_ascii_whitespace();
    let value_str = fields
        .next()
        .ok_or_else(|| format!("missing value for '{}'", name))?;
    // An optional trailing timestamp is allowed by the format; more is not
    if fields.clone().count() > 1 {
        return Err(format!("unexpected trailing fields for '{}'", name));
    }
    if let Some(ts) = fields.next() {
        ts.parse::<i64>()
            .map_err(|_| format!("invalid timestamp '{}' for '{}'", ts, name))?;
    }

    let value = parse_value(value_str).ok_or_else(|| format!("invalid value '{}'", value_str))?;

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

/// Parse `k="v",...}` and return the labels plus the remainder after `}`
fn parse_labels(input: &str) -> Result<(Vec<(String, String)>, &str), String> {
    let mut labels = Vec::new();
    let mut rest = input.trim_start();

    loop {
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let key_end = rest
            .find(|c: char| !is_name_char(c))
            .ok_or_else(|| "unterminated label set".to_string())?;
        let key = &rest[..key_end];
        if !is_valid_name(key) {
            return Err(format!("invalid label name near '{}'", rest));
        }
        rest = rest[key_end..].trim_start();
        rest = rest
            .strip_prefix('=')
            .ok_or_else(|| format!("expected '=' after label '{}'", key))?
            .trim_start();
        rest = rest
            .strip_prefix('"')
            .ok_or_else(|| format!("expected quoted value for label '{}'", key))?;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        let consumed = loop {
            match chars.next() {
                Some((i, '"')) => break i + 1,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c @ ('\\' | '"'))) => value.push(c),
                    Some((_, c)) => return Err(format!("invalid escape '\\{}'", c)),
                    None => return Err("unterminated label value".to_string()),
                },
                Some((_, c)) => value.push(c),
                None => return Err("unterminated label value".to_string()),
            }
        };
        labels.push((key.to_string(), value));

        rest = rest[consumed..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after.trim_start();
        } else if !rest.starts_with('}') {
            return Err(format!("expected ',' or '}}' after label '{}'", key));
        }
    }
}

fn parse_value(s: &str) -> Option<f64> {
    match s {
        "+Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => {
            // Reject Rust-only spellings like "inf" or "infinity"
            if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return None;
            }
            s.parse::<f64>().ok()
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => chars.all(is_name_char),
        _ => false,
    }
}
