use std::io::Write;

use anyhow::Result;

use super::{print_formatted, Context};
use crate::batch::{error_chain, run_bulk, ExitStatus};
use crate::format::{HeaderPolicy, OutputFormat};

pub async fn version<W: Write>(
    ctx: &Context,
    format: OutputFormat,
    out: &mut W,
) -> Result<ExitStatus> {
    let result = run_bulk("version", ctx.client.get_version()).await;
    let status = result.report("service version");
    let printed = print_formatted(out, &result, format, HeaderPolicy::Never)?;
    Ok(status.and(printed))
}

/// Ask the version endpoint whether the service is up.
pub async fn status<W: Write>(ctx: &Context, quiet: bool, out: &mut W) -> Result<ExitStatus> {
    let (message, status) = match ctx.client.get_version().await {
        Ok(_) => ("cloud-init is running", ExitStatus::Success),
        Err(e) if e.is_unsuccessful() => {
            tracing::error!(
                error = %error_chain(&e),
                "cloud-init status request yielded unsuccessful HTTP response"
            );
            (
                "cloud-init is running, but not normally",
                ExitStatus::PartialFailure,
            )
        }
        Err(e) => {
            tracing::error!(error = %error_chain(&e), "failed to get cloud-init status");
            ("cloud-init is not running", ExitStatus::PartialFailure)
        }
    };
    if !quiet {
        writeln!(out, "{message}")?;
    }
    Ok(status)
}

/// Print the service's OpenAPI document.
pub async fn api<W: Write>(ctx: &Context, format: OutputFormat, out: &mut W) -> Result<ExitStatus> {
    let result = run_bulk("openapi.json", ctx.client.get_api()).await;
    let status = result.report("service api");
    let printed = print_formatted(out, &result, format, HeaderPolicy::Never)?;
    Ok(status.and(printed))
}
