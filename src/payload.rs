//! Reading `-d`/`-f` payloads.
//!
//! `-d` takes literal text, `@path` to read a file or `@-` to read standard
//! input. YAML is decoded through `serde_json::Value`, so a YAML payload ends
//! up as the same value as the equivalent JSON and is sent as JSON.

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum InputFormat {
    #[default]
    Json,
    Yaml,
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputFormat::Json => write!(f, "json"),
            InputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to read payload from {}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to read payload from standard input: {0}")]
    Stdin(io::Error),
    #[error("failed to decode {format} payload: {reason}")]
    Format { format: InputFormat, reason: String },
    #[error("no input data: pass -d/--data (use @- to read standard input)")]
    MissingInput,
    #[error("payload is empty")]
    Empty,
}

/// What to do when no `-d` was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Required,
    /// Read standard input, unless it is a terminal.
    Stdin,
}

/// Resolve a `-d` value to raw bytes, reading `stdin` for `@-`.
pub fn read_source<R: Read>(data: &str, mut stdin: R) -> Result<Vec<u8>, PayloadError> {
    match data.strip_prefix('@') {
        Some("-") => {
            let mut buf = Vec::new();
            stdin.read_to_end(&mut buf).map_err(PayloadError::Stdin)?;
            Ok(buf)
        }
        Some(path) => {
            let path = PathBuf::from(path);
            fs::read(&path).map_err(|source| PayloadError::Io { path, source })
        }
        None => Ok(data.as_bytes().to_vec()),
    }
}

pub fn read_input_from<R: Read>(
    data: Option<&str>,
    fallback: Fallback,
    mut stdin: R,
    stdin_is_terminal: bool,
) -> Result<Vec<u8>, PayloadError> {
    match (data, fallback) {
        (Some(data), _) => read_source(data, stdin),
        (None, Fallback::Required) => Err(PayloadError::MissingInput),
        (None, Fallback::Stdin) if stdin_is_terminal => Err(PayloadError::MissingInput),
        (None, Fallback::Stdin) => {
            tracing::debug!("no -d given, reading payload from standard input");
            let mut buf = Vec::new();
            stdin.read_to_end(&mut buf).map_err(PayloadError::Stdin)?;
            Ok(buf)
        }
    }
}

pub fn read_input(data: Option<&str>, fallback: Fallback) -> Result<Vec<u8>, PayloadError> {
    let stdin = io::stdin();
    let is_terminal = stdin.is_terminal();
    read_input_from(data, fallback, stdin.lock(), is_terminal)
}

fn decode_value(bytes: &[u8], format: InputFormat) -> Result<Value, PayloadError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(PayloadError::Empty);
    }
    let value = match format {
        InputFormat::Json => serde_json::from_slice::<Value>(bytes).map_err(|e| e.to_string()),
        InputFormat::Yaml => serde_yaml::from_slice::<Value>(bytes).map_err(|e| e.to_string()),
    };
    value.map_err(|reason| PayloadError::Format { format, reason })
}

fn from_value<T: DeserializeOwned>(value: Value, format: InputFormat) -> Result<T, PayloadError> {
    serde_json::from_value(value).map_err(|e| PayloadError::Format {
        format,
        reason: e.to_string(),
    })
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], format: InputFormat) -> Result<T, PayloadError> {
    from_value(decode_value(bytes, format)?, format)
}

/// Decode a single object or a list of objects into a list.
pub fn decode_list<T: DeserializeOwned>(
    bytes: &[u8],
    format: InputFormat,
) -> Result<Vec<T>, PayloadError> {
    let items = match decode_value(bytes, format)? {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(PayloadError::Format {
                format,
                reason: format!("expected an object or a list of objects, got {other}"),
            })
        }
    };
    if items.is_empty() {
        return Err(PayloadError::Empty);
    }
    items
        .into_iter()
        .map(|item| from_value(item, format))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Item {
        name: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    fn no_stdin() -> &'static [u8] {
        b""
    }

    #[test]
    fn literal_is_used_verbatim() {
        let raw = "  {\"name\": \"x\"}\r\n";
        assert_eq!(read_source(raw, no_stdin()).unwrap(), raw.as_bytes());
    }

    #[test]
    fn at_path_reads_exact_file_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        let content = b"name: compute\n\xe2\x9c\x93\n\n";
        file.write_all(content).unwrap();

        let data = format!("@{}", file.path().display());
        assert_eq!(read_source(&data, no_stdin()).unwrap(), content);
    }

    #[test]
    fn at_dash_reads_all_of_stdin() {
        let stdin: &[u8] = b"line one\nline two\n\n  trailing";
        assert_eq!(read_source("@-", stdin).unwrap(), stdin);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_source("@/definitely/not/here.json", no_stdin()).unwrap_err();
        assert!(matches!(err, PayloadError::Io { .. }));
    }

    #[test]
    fn required_input_without_data_fails() {
        let err = read_input_from(None, Fallback::Required, &b"{}"[..], false).unwrap_err();
        assert!(matches!(err, PayloadError::MissingInput));
    }

    #[test]
    fn stdin_fallback_reads_piped_input() {
        let stdin: &[u8] = b"{\"name\":\"a\"}";
        let bytes = read_input_from(None, Fallback::Stdin, stdin, false).unwrap();
        assert_eq!(bytes, stdin);
    }

    #[test]
    fn stdin_fallback_refuses_a_terminal() {
        let err = read_input_from(None, Fallback::Stdin, no_stdin(), true).unwrap_err();
        assert!(matches!(err, PayloadError::MissingInput));
    }

    #[test]
    fn yaml_and_json_decode_to_the_same_value() {
        let json = br#"[{"name": "compute", "tags": ["a", "b"]}, {"name": "io"}]"#;
        let yaml = b"- name: compute\n  tags: [a, b]\n- name: io\n";
        let from_json: Vec<Item> = decode_list(json, InputFormat::Json).unwrap();
        let from_yaml: Vec<Item> = decode_list(yaml, InputFormat::Yaml).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json.len(), 2);
    }

    #[test]
    fn single_object_becomes_one_item_list() {
        let items: Vec<Item> = decode_list(b"name: compute\n", InputFormat::Yaml).unwrap();
        assert_eq!(
            items,
            vec![Item {
                name: "compute".into(),
                tags: vec![]
            }]
        );
    }

    #[test]
    fn scalars_and_empty_lists_are_rejected() {
        assert!(matches!(
            decode_list::<Item>(b"42", InputFormat::Json),
            Err(PayloadError::Format { .. })
        ));
        assert!(matches!(
            decode_list::<Item>(b"[]", InputFormat::Json),
            Err(PayloadError::Empty)
        ));
        assert!(matches!(
            decode_list::<Item>(b"  \n", InputFormat::Yaml),
            Err(PayloadError::Empty)
        ));
    }

    #[test]
    fn malformed_payload_is_format_error() {
        let err = decode::<Item>(b"{\"name\": ", InputFormat::Json).unwrap_err();
        assert!(matches!(
            err,
            PayloadError::Format {
                format: InputFormat::Json,
                ..
            }
        ));
    }
}
