use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context as _, Result};
use minijinja::Environment;
use serde::Serialize;
use serde_json::{json, Value};

use super::Context;
use crate::batch::{error_chain, run_bulk, run_each, AggregateResult, ExitStatus};
use crate::client::models::{groups_by_name, GroupData};
use crate::client::{ClientError, DataKind};
use crate::format::{format_value, write_sections, HeaderPolicy, OutputFormat, Section};
use crate::payload::{self, Fallback, InputFormat};

pub async fn add(ctx: &Context, groups: &[GroupData]) -> Result<ExitStatus> {
    let result = run_each(groups, |group| ctx.client.post_group(group)).await;
    Ok(result.report("group add"))
}

pub async fn set(ctx: &Context, groups: &[GroupData]) -> Result<ExitStatus> {
    let result = run_each(groups, |group| ctx.client.put_group(group)).await;
    Ok(result.report("group set"))
}

/// Groups named on the command line, else the names in the `-d` payload.
pub fn delete_targets(
    names: Vec<String>,
    data: Option<&str>,
    format: InputFormat,
) -> Result<Vec<String>> {
    if !names.is_empty() {
        return Ok(names);
    }
    let bytes = payload::read_input(data, Fallback::Required)?;
    let groups: Vec<GroupData> = payload::decode_list(&bytes, format)?;
    Ok(groups.into_iter().map(|g| g.name).collect())
}

pub async fn delete(ctx: &Context, names: &[String]) -> Result<ExitStatus> {
    let result = run_each(names, |name| ctx.client.delete_group(name)).await;
    Ok(result.report("group delete"))
}

/// All groups (ordered by name) when `names` is empty, else the named ones
/// in the order given.
async fn fetch(ctx: &Context, names: &[String]) -> (Vec<GroupData>, ExitStatus) {
    let result: AggregateResult<Vec<GroupData>> = if names.is_empty() {
        run_bulk("all", async {
            let env = ctx.client.get_groups().await?;
            Ok::<_, ClientError>(groups_by_name(env.json::<BTreeMap<String, GroupData>>()?))
        })
        .await
    } else {
        run_each(names, |name| async move {
            let env = ctx.client.get_group(name).await?;
            Ok::<_, ClientError>(vec![env.json::<GroupData>()?])
        })
        .await
    };

    let groups = result
        .successes()
        .flat_map(|(_, groups)| groups.iter().cloned())
        .collect();
    (groups, result.report("group get"))
}

/// Print each group's cloud-config with transfer encoding removed.
pub async fn get_config<W: Write>(
    ctx: &Context,
    names: &[String],
    headers: HeaderPolicy,
    out: &mut W,
) -> Result<ExitStatus> {
    let (groups, mut status) = fetch(ctx, names).await;

    let mut sections = Vec::new();
    for group in &groups {
        let Some(file) = group.file.as_ref().filter(|f| !f.content.is_empty()) else {
            tracing::warn!(group = %group.name, "cloud-config for group was empty, not printing");
            continue;
        };
        match file.decoded() {
            Ok(content) => sections.push(Section::new(format!("group={}", group.name), content)),
            Err(e) => {
                tracing::error!(
                    group = %group.name,
                    error = %error_chain(&e),
                    "failed to decode cloud-config for group"
                );
                status = ExitStatus::PartialFailure;
            }
        }
    }

    write_sections(out, &sections, headers)?;
    Ok(status)
}

#[derive(Serialize)]
struct GroupMetaData<'a> {
    name: &'a str,
    #[serde(rename = "meta-data")]
    meta_data: &'a Option<Value>,
}

pub async fn get_meta_data<W: Write>(
    ctx: &Context,
    names: &[String],
    format: OutputFormat,
    out: &mut W,
) -> Result<ExitStatus> {
    let (groups, status) = fetch(ctx, names).await;
    let meta: Vec<GroupMetaData<'_>> = groups
        .iter()
        .map(|g| GroupMetaData {
            name: &g.name,
            meta_data: &g.meta_data,
        })
        .collect();
    let text = format_value(&meta, format).context("Failed to format output")?;
    out.write_all(text.as_bytes())?;
    Ok(status)
}

pub async fn get_raw<W: Write>(
    ctx: &Context,
    names: &[String],
    format: OutputFormat,
    out: &mut W,
) -> Result<ExitStatus> {
    let (groups, status) = fetch(ctx, names).await;
    let text = format_value(&groups, format).context("Failed to format output")?;
    out.write_all(text.as_bytes())?;
    Ok(status)
}

/// Render `group`'s cloud-config for `node` as a Jinja template. The node's
/// meta-data is available to the template as `ds.meta_data`.
pub async fn render<W: Write>(
    ctx: &Context,
    group: &str,
    node: &str,
    out: &mut W,
) -> Result<ExitStatus> {
    let config = run_bulk(group, ctx.client.get_node_group_data(node, group)).await;
    let Some((_, config_env)) = config.successes().next() else {
        return Ok(config.report("group render"));
    };
    if config_env.body.is_empty() {
        tracing::warn!(
            group,
            node,
            "cloud-config for group was empty, cannot render for node"
        );
        return Ok(ExitStatus::Success);
    }

    let meta = run_bulk(node, ctx.client.get_node_data(DataKind::MetaData, node)).await;
    let Some((_, meta_env)) = meta.successes().next() else {
        return Ok(meta.report("node meta-data get"));
    };
    let meta_data: Value = serde_yaml::from_slice(&meta_env.body)
        .with_context(|| format!("Failed to parse meta-data for node {node}"))?;

    let mut jinja = Environment::new();
    jinja.set_keep_trailing_newline(true);
    let rendered = jinja
        .render_str(
            &config_env.text(),
            json!({ "ds": { "meta_data": meta_data } }),
        )
        .with_context(|| {
            format!("Failed to render cloud-config for group {group}")
        })?;
    out.write_all(rendered.as_bytes())?;

    Ok(ExitStatus::Success)
}
