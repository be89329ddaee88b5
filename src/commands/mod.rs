//! Handlers for `ochami cloud-init ...`.
//!
//! Each handler takes an already-built [`Context`], the decoded payload or
//! identifiers, and a writer for command output.

pub mod configs;
pub mod data;
pub mod defaults;
pub mod group;
pub mod node;
pub mod service;

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use reqwest::Certificate;

use crate::auth;
use crate::batch::{error_chain, AggregateResult, ExitStatus};
use crate::client::{build_http_client, CloudInitClient, HttpClient, HttpEnvelope};
use crate::config::{cloud_init_base_uri, Config, ConfigError};
use crate::format::{format_body, write_sections, HeaderPolicy, OutputFormat, Section};

/// When a command has to send a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenNeed {
    Always,
    /// Only with `--secure`.
    Secure,
    /// Unless the cluster sets `enable-auth = false`.
    AuthEnabled,
    Never,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextOptions<'a> {
    pub cluster: Option<&'a str>,
    pub uri: Option<&'a str>,
    pub cacert: Option<&'a Path>,
    pub insecure: bool,
    pub token: Option<&'a str>,
    pub secure: bool,
    pub need: TokenNeed,
}

/// Everything a cloud-init handler needs, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub client: CloudInitClient,
    pub secure: bool,
}

impl Context {
    pub fn new(opts: ContextOptions<'_>, config: &Config) -> Result<Self> {
        let (cluster_name, cluster) = match config.cluster(opts.cluster)? {
            Some((name, cluster)) => (Some(name), Some(cluster)),
            None => (None, None),
        };

        let service_uri = opts
            .uri
            .or_else(|| cluster.and_then(|c| c.cloud_init_uri.as_deref()));
        let base = cloud_init_base_uri(cluster.and_then(|c| c.uri.as_deref()), service_uri)?;

        let cacert = opts
            .cacert
            .or_else(|| cluster.and_then(|c| c.cacert.as_deref()))
            .map(load_cacert)
            .transpose()?;

        let token_required = match opts.need {
            TokenNeed::Always => true,
            TokenNeed::Secure => opts.secure,
            TokenNeed::AuthEnabled => cluster.map_or(true, |c| c.enable_auth),
            TokenNeed::Never => false,
        };
        let token = if token_required {
            Some(auth::require(opts.token, cluster_name)?.value)
        } else {
            None
        };

        let http =
            build_http_client(cacert, opts.insecure).context("Failed to create HTTP client")?;
        let client = CloudInitClient::new(HttpClient::new(http, token), base);
        tracing::debug!(
            base = %client.base(),
            cluster = cluster_name,
            "resolved cloud-init base URI"
        );
        Ok(Self {
            client,
            secure: opts.secure,
        })
    }
}

fn load_cacert(path: &Path) -> Result<Certificate, ConfigError> {
    let invalid = |reason: String| ConfigError::CaCert {
        path: path.to_path_buf(),
        reason,
    };
    let pem = fs::read(path).map_err(|e| invalid(e.to_string()))?;
    Certificate::from_pem(&pem).map_err(|e| invalid(e.to_string()))
}

/// Format each successful JSON body and print it under an `id=` header. A
/// body that does not format is logged and counted as a failure; the rest
/// are still printed.
pub(crate) fn print_formatted<W: Write>(
    out: &mut W,
    result: &AggregateResult<HttpEnvelope>,
    format: OutputFormat,
    headers: HeaderPolicy,
) -> Result<ExitStatus> {
    let mut status = ExitStatus::Success;
    let mut sections = Vec::new();
    for (id, env) in result.successes() {
        match format_body(&env.body, format) {
            Ok(body) => sections.push(Section::new(format!("id={id}"), body)),
            Err(e) => {
                tracing::error!(
                    id = %id,
                    error = %error_chain(&e),
                    "failed to format response body"
                );
                status = ExitStatus::PartialFailure;
            }
        }
    }
    write_sections(out, &sections, headers)?;
    Ok(status)
}

/// Print each successful body as-is.
pub(crate) fn print_raw<W: Write>(
    out: &mut W,
    result: &AggregateResult<HttpEnvelope>,
    context_key: &str,
    headers: HeaderPolicy,
) -> Result<()> {
    let sections: Vec<Section> = result
        .successes()
        .map(|(id, env)| {
            tracing::debug!(
                id,
                status = %env.status,
                content_type = env.content_type().unwrap_or("unknown"),
                len = env.body.len(),
                "printing response body"
            );
            Section::new(format!("{context_key}={id}"), env.text())
        })
        .collect();
    write_sections(out, &sections, headers)?;
    Ok(())
}
