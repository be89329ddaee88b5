use std::io::Write;

use anyhow::Result;

use super::{print_formatted, Context};
use crate::batch::{run_bulk, ExitStatus};
use crate::client::models::ClusterDefaults;
use crate::format::{HeaderPolicy, OutputFormat};

pub async fn get<W: Write>(ctx: &Context, format: OutputFormat, out: &mut W) -> Result<ExitStatus> {
    let result = run_bulk("cluster-defaults", ctx.client.get_defaults()).await;
    let status = result.report("defaults get");
    let printed = print_formatted(out, &result, format, HeaderPolicy::Never)?;
    Ok(status.and(printed))
}

pub async fn set(ctx: &Context, defaults: &ClusterDefaults) -> Result<ExitStatus> {
    let result = run_bulk("cluster-defaults", ctx.client.post_defaults(defaults)).await;
    Ok(result.report("defaults set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{context, output};
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn get_formats_defaults() {
        let body = r#"{"cluster-name":"demo","base-url":"http://172.16.0.254:8081/cloud-init"}"#;
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/cluster-defaults");
            then.status(200).body(body);
        });

        let mut out = Vec::new();
        let status = get(&context(&server, false), OutputFormat::Yaml, &mut out)
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::Success);
        assert_eq!(
            output(out),
            "base-url: http://172.16.0.254:8081/cloud-init\ncluster-name: demo\n"
        );
    }

    #[tokio::test]
    async fn set_posts_defaults() {
        let body = json!({"cluster-name": "demo", "public-keys": ["ssh-ed25519 AAAA"]});
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/cloud-init/admin/cluster-defaults")
                .json_body(body.clone());
            then.status(200);
        });

        let defaults: ClusterDefaults = serde_json::from_value(body).unwrap();
        let status = set(&context(&server, false), &defaults).await.unwrap();
        mock.assert();
        assert_eq!(status, ExitStatus::Success);
    }

    #[tokio::test]
    async fn failed_get_prints_nothing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/cluster-defaults");
            then.status(401).body("unauthorized");
        });

        let mut out = Vec::new();
        let status = get(&context(&server, false), OutputFormat::Json, &mut out)
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::PartialFailure);
        assert!(out.is_empty());
    }
}
