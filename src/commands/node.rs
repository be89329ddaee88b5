use std::io::Write;

use anyhow::{Context as _, Result};
use serde_json::Value;

use super::{print_raw, Context};
use crate::batch::{error_chain, run_each, ExitStatus};
use crate::client::models::InstanceInfo;
use crate::client::DataKind;
use crate::format::{format_value, write_sections, HeaderPolicy, OutputFormat, Section};

/// Meta-data comes back as YAML; collect every node's into one document.
/// Nodes whose meta-data does not parse are logged and left out.
pub async fn get_meta_data<W: Write>(
    ctx: &Context,
    nodes: &[String],
    format: OutputFormat,
    out: &mut W,
) -> Result<ExitStatus> {
    let kind = DataKind::MetaData;
    let result = run_each(nodes, |node| ctx.client.get_node_data(kind, node)).await;
    let mut status = result.report("node meta-data get");

    let mut docs = Vec::new();
    for (node, env) in result.successes() {
        match serde_yaml::from_slice::<Value>(&env.body) {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                tracing::error!(
                    node = %node,
                    error = %error_chain(&e),
                    "failed to parse meta-data"
                );
                status = ExitStatus::PartialFailure;
            }
        }
    }
    let text = format_value(&docs, format).context("Failed to format output")?;
    out.write_all(text.as_bytes())?;

    Ok(status)
}

pub async fn get_data<W: Write>(
    ctx: &Context,
    kind: DataKind,
    nodes: &[String],
    headers: HeaderPolicy,
    out: &mut W,
) -> Result<ExitStatus> {
    let result = run_each(nodes, |node| ctx.client.get_node_data(kind, node)).await;
    print_raw(out, &result, "node", headers)?;
    Ok(result.report(&format!("node {} get", kind.as_str())))
}

/// The cloud-config each group renders for `node`.
pub async fn get_group<W: Write>(
    ctx: &Context,
    node: &str,
    groups: &[String],
    headers: HeaderPolicy,
    out: &mut W,
) -> Result<ExitStatus> {
    let result = run_each(groups, |group| ctx.client.get_node_group_data(node, group)).await;

    let sections: Vec<Section> = result
        .successes()
        .filter_map(|(group, env)| {
            if env.body.is_empty() {
                tracing::warn!(
                    node,
                    group,
                    "cloud-config for group was empty, not printing"
                );
                return None;
            }
            let label = format!("node={node} group={group}");
            Some(Section::new(label, env.text()))
        })
        .collect();
    write_sections(out, &sections, headers)?;

    Ok(result.report("node group get"))
}

pub async fn set(ctx: &Context, infos: &[InstanceInfo]) -> Result<ExitStatus> {
    let result = run_each(infos, |info| ctx.client.put_instance_info(info)).await;
    Ok(result.report("node set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{capture_logs, context, ids, output};
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn meta_data_is_one_formatted_list() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1000/meta-data");
            then.status(200)
                .body("instance-id: i-1\nlocal-hostname: nid1\n");
        });
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1001/meta-data");
            then.status(200).body("instance-id: i-2\n");
        });

        let mut out = Vec::new();
        let status = get_meta_data(
            &context(&server, false),
            &ids(&["x1001", "x1000"]),
            OutputFormat::Json,
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(status, ExitStatus::Success);
        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            printed,
            json!([
                {"instance-id": "i-2"},
                {"instance-id": "i-1", "local-hostname": "nid1"}
            ])
        );
    }

    #[tokio::test]
    async fn unparsable_meta_data_is_logged_after_http_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1000/meta-data");
            then.status(200).body("instance-id: i-1\n");
        });
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1001/meta-data");
            then.status(404).body("node not found");
        });
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1002/meta-data");
            then.status(200).body("key: [unclosed\n");
        });

        let (logs, _guard) = capture_logs();
        let mut out = Vec::new();
        let status = get_meta_data(
            &context(&server, false),
            &ids(&["x1000", "x1001", "x1002"]),
            OutputFormat::Json,
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(status, ExitStatus::PartialFailure);
        assert_eq!(output(out), "[{\"instance-id\":\"i-1\"}]\n");
        let logs = logs.contents();
        assert!(logs.contains("id=x1001"), "{logs}");
        assert!(logs.contains("node=x1002"), "{logs}");
    }

    #[tokio::test]
    async fn vendor_data_with_node_headers() {
        let server = MockServer::start();
        for node in ["x1000", "x1001"] {
            server.mock(|when, then| {
                when.method("GET")
                    .path(format!(
                        "/cloud-init/admin/impersonation/{node}/vendor-data"
                    ));
                then.status(200)
                    .body(format!("#include\nhttp://ci/{node}.yaml\n"));
            });
        }

        let mut out = Vec::new();
        get_data(
            &context(&server, false),
            DataKind::VendorData,
            &ids(&["x1000", "x1001"]),
            HeaderPolicy::Multiple,
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(
            output(out),
            "--- (1/2) node=x1000\n#include\nhttp://ci/x1000.yaml\n--- (2/2) node=x1001\n#include\nhttp://ci/x1001.yaml\n"
        );
    }

    #[tokio::test]
    async fn group_data_skips_empty_bodies_and_counts_printed_ones() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1000/compute.yaml");
            then.status(200).body("#cloud-config\nhostname: nid1\n");
        });
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1000/empty.yaml");
            then.status(200);
        });
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1000/slurm.yaml");
            then.status(200).body("#cloud-config\npackages: [slurm]\n");
        });

        let mut out = Vec::new();
        let status = get_group(
            &context(&server, false),
            "x1000",
            &ids(&["compute", "empty", "slurm"]),
            HeaderPolicy::Always,
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(
            output(out),
            "--- (1/2) node=x1000 group=compute\n#cloud-config\nhostname: nid1\n\
             --- (2/2) node=x1000 group=slurm\n#cloud-config\npackages: [slurm]\n"
        );
    }

    #[tokio::test]
    async fn set_puts_instance_info_per_node() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("PUT")
                .path("/cloud-init/admin/instance-info/x1000")
                .json_body(json!({"id": "x1000", "local-hostname": "nid1"}));
            then.status(200);
        });

        let raw = json!([{"id": "x1000", "local-hostname": "nid1"}, {"id": ""}]);
        let infos: Vec<InstanceInfo> = serde_json::from_value(raw).unwrap();
        let status = set(&context(&server, false), &infos).await.unwrap();
        mock.assert();
        assert_eq!(status, ExitStatus::PartialFailure);
    }
}
