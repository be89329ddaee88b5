use std::io::Write;

use anyhow::Result;

use super::{print_formatted, Context};
use crate::batch::{run_bulk, run_each, ExitStatus};
use crate::client::models::CloudInitConfig;
use crate::format::{HeaderPolicy, OutputFormat};

pub async fn add(ctx: &Context, configs: &[CloudInitConfig]) -> Result<ExitStatus> {
    let result = run_each(configs, |ci| ctx.client.post_config(ci, ctx.secure)).await;
    Ok(result.report("config add"))
}

pub async fn get<W: Write>(
    ctx: &Context,
    ids: &[String],
    format: OutputFormat,
    headers: HeaderPolicy,
    out: &mut W,
) -> Result<ExitStatus> {
    let result = if ids.is_empty() {
        run_bulk("all", ctx.client.get_configs(None, ctx.secure)).await
    } else {
        let client = &ctx.client;
        run_each(ids, |id| client.get_configs(Some(id.as_str()), ctx.secure)).await
    };

    let status = result.report("config get");
    let printed = print_formatted(out, &result, format, headers)?;
    Ok(status.and(printed))
}

pub async fn set(ctx: &Context, configs: &[CloudInitConfig]) -> Result<ExitStatus> {
    let result = run_each(configs, |ci| ctx.client.put_config(ci, ctx.secure)).await;
    Ok(result.report("config set"))
}

pub async fn delete(ctx: &Context, ids: &[String]) -> Result<ExitStatus> {
    let result = run_each(ids, |id| ctx.client.delete_config(id, ctx.secure)).await;
    Ok(result.report("config delete"))
}
