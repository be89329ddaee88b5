use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("response body is not valid JSON")]
    Parse(#[from] serde_json::Error),
    #[error("failed to serialize output as YAML")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported content encoding '{0}'")]
    Encoding(String),
    #[error("failed to decode base64 content")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    JsonPretty,
    Yaml,
}

/// When to print `--- (i/total) <context>` above each body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum HeaderPolicy {
    Always,
    #[default]
    Multiple,
    Never,
}

impl HeaderPolicy {
    pub fn shows_headers(self, total: usize) -> bool {
        match self {
            HeaderPolicy::Always => true,
            HeaderPolicy::Multiple => total > 1,
            HeaderPolicy::Never => false,
        }
    }
}

/// Parse a JSON response body and render it in `format`.
pub fn format_body(body: &[u8], format: OutputFormat) -> Result<String, FormatError> {
    let value: Value = serde_json::from_slice(body)?;
    format_value(&value, format)
}

pub fn format_value<T: Serialize + ?Sized>(
    value: &T,
    format: OutputFormat,
) -> Result<String, FormatError> {
    let mut out = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => return Ok(serde_yaml::to_string(value)?),
    };
    out.push('\n');
    Ok(out)
}

/// One printable body and the identifier context shown in its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub context: String,
    pub body: String,
}

impl Section {
    pub fn new(context: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            body: body.into(),
        }
    }
}

/// Bodies are printed with exactly one trailing newline.
pub fn write_sections<W: Write>(
    out: &mut W,
    sections: &[Section],
    policy: HeaderPolicy,
) -> io::Result<()> {
    let total = sections.len();
    let headers = policy.shows_headers(total);
    for (i, section) in sections.iter().enumerate() {
        if headers {
            writeln!(out, "--- ({}/{}) {}", i + 1, total, section.context)?;
        }
        writeln!(out, "{}", section.body.trim_end_matches('\n'))?;
    }
    Ok(())
}
