use reqwest::Method;
use serde::Serialize;
use url::Url;

use super::http::{ClientError, HttpClient, HttpEnvelope};
use super::models::{CloudInitConfig, ClusterDefaults, GroupData, InstanceInfo};

/// Which per-node document to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    UserData,
    MetaData,
    VendorData,
}

impl DataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::UserData => "user-data",
            DataKind::MetaData => "meta-data",
            DataKind::VendorData => "vendor-data",
        }
    }
}

/// Client for the cloud-init service rooted at `base`.
///
/// Config and data routes have a secure twin whose last base path segment
/// carries a `-secure` suffix; admin and service routes hang off `base`.
#[derive(Debug, Clone)]
pub struct CloudInitClient {
    http: HttpClient,
    base: Url,
}

impl CloudInitClient {
    pub fn new(http: HttpClient, base: Url) -> Self {
        Self { http, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn secure_base(&self) -> Result<Url, ClientError> {
        let last = self
            .base
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::Url(format!("{} has no path segment to secure", self.base))
            })?;

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::Url(format!("{} cannot be a base", self.base))
            })?
            .pop_if_empty()
            .pop()
            .push(&format!("{last}-secure"));
        Ok(url)
    }

    fn endpoint(&self, secure: bool, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = if secure {
            self.secure_base()?
        } else {
            self.base.clone()
        };
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::Url(format!("{} cannot be a base", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn admin(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut all = vec!["admin"];
        all.extend_from_slice(segments);
        self.endpoint(false, &all)
    }

    async fn get(&self, url: Url) -> Result<HttpEnvelope, ClientError> {
        self.http.send(Method::GET, url, None).await
    }

    async fn send_json<T: Serialize>(
        &self,
        method: Method,
        url: Url,
        payload: &T,
    ) -> Result<HttpEnvelope, ClientError> {
        let body = serde_json::to_value(payload).map_err(|e| ClientError::Body(e.to_string()))?;
        self.http.send(method, url, Some(body)).await
    }

    pub async fn get_configs(
        &self,
        id: Option<&str>,
        secure: bool,
    ) -> Result<HttpEnvelope, ClientError> {
        let url = match id {
            Some(id) => self.endpoint(secure, &[non_blank("config id", id)?])?,
            None => self.endpoint(secure, &[])?,
        };
        self.get(url).await
    }

    pub async fn post_config(
        &self,
        ci: &CloudInitConfig,
        secure: bool,
    ) -> Result<HttpEnvelope, ClientError> {
        non_blank("config name", &ci.name)?;
        let url = self.endpoint(secure, &[])?;
        self.send_json(Method::POST, url, ci).await
    }

    pub async fn put_config(
        &self,
        ci: &CloudInitConfig,
        secure: bool,
    ) -> Result<HttpEnvelope, ClientError> {
        let url = self.endpoint(secure, &[non_blank("config name", &ci.name)?])?;
        self.send_json(Method::PUT, url, ci).await
    }

    pub async fn delete_config(&self, id: &str, secure: bool) -> Result<HttpEnvelope, ClientError> {
        let url = self.endpoint(secure, &[non_blank("config id", id)?])?;
        self.http.send(Method::DELETE, url, None).await
    }

    pub async fn get_data(
        &self,
        kind: DataKind,
        id: &str,
        secure: bool,
    ) -> Result<HttpEnvelope, ClientError> {
        let url = self.endpoint(secure, &[non_blank("config id", id)?, kind.as_str()])?;
        self.get(url).await
    }

    pub async fn get_defaults(&self) -> Result<HttpEnvelope, ClientError> {
        self.get(self.admin(&["cluster-defaults"])?).await
    }

    pub async fn post_defaults(
        &self,
        defaults: &ClusterDefaults,
    ) -> Result<HttpEnvelope, ClientError> {
        let url = self.admin(&["cluster-defaults"])?;
        self.send_json(Method::POST, url, defaults).await
    }

    pub async fn get_groups(&self) -> Result<HttpEnvelope, ClientError> {
        self.get(self.admin(&["groups"])?).await
    }

    pub async fn get_group(&self, id: &str) -> Result<HttpEnvelope, ClientError> {
        self.get(self.admin(&["groups", non_blank("group name", id)?])?)
            .await
    }

    pub async fn post_group(&self, group: &GroupData) -> Result<HttpEnvelope, ClientError> {
        non_blank("group name", &group.name)?;
        let url = self.admin(&["groups"])?;
        self.send_json(Method::POST, url, group).await
    }

    pub async fn put_group(&self, group: &GroupData) -> Result<HttpEnvelope, ClientError> {
        let url = self.admin(&["groups", non_blank("group name", &group.name)?])?;
        self.send_json(Method::PUT, url, group).await
    }

    pub async fn delete_group(&self, id: &str) -> Result<HttpEnvelope, ClientError> {
        let url = self.admin(&["groups", non_blank("group name", id)?])?;
        self.http.send(Method::DELETE, url, None).await
    }

    pub async fn put_instance_info(
        &self,
        info: &InstanceInfo,
    ) -> Result<HttpEnvelope, ClientError> {
        let url = self.admin(&["instance-info", non_blank("node id", &info.id)?])?;
        self.send_json(Method::PUT, url, info).await
    }

    /// Fetch a document as the service would render it for `node`.
    pub async fn get_node_data(
        &self,
        kind: DataKind,
        node: &str,
    ) -> Result<HttpEnvelope, ClientError> {
        let url = self.admin(&[
            "impersonation",
            non_blank("node id", node)?,
            kind.as_str(),
        ])?;
        self.get(url).await
    }

    pub async fn get_node_group_data(
        &self,
        node: &str,
        group: &str,
    ) -> Result<HttpEnvelope, ClientError> {
        let file = format!("{}.yaml", non_blank("group name", group)?);
        let url = self.admin(&["impersonation", non_blank("node id", node)?, &file])?;
        self.get(url).await
    }

    pub async fn get_version(&self) -> Result<HttpEnvelope, ClientError> {
        self.get(self.endpoint(false, &["version"])?).await
    }

    pub async fn get_api(&self) -> Result<HttpEnvelope, ClientError> {
        self.get(self.endpoint(false, &["openapi.json"])?).await
    }
}

fn non_blank<'a>(what: &str, value: &'a str) -> Result<&'a str, ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::Body(format!("{what} must not be blank")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::http::build_http_client;
    use httpmock::MockServer;
    use serde_json::json;

    fn client_at(base: &str, token: Option<&str>) -> CloudInitClient {
        let inner = build_http_client(None, false).unwrap();
        let http = HttpClient::new(inner, token.map(String::from));
        CloudInitClient::new(http, Url::parse(base).unwrap())
    }

    fn client(server: &MockServer, token: Option<&str>) -> CloudInitClient {
        client_at(&server.url("/cloud-init"), token)
    }

    #[tokio::test]
    async fn get_config_by_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET").path("/cloud-init/compute");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"name":"compute"}"#);
        });

        let env = client(&server, None)
            .get_configs(Some("compute"), false)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(env.status, 200);
        assert_eq!(env.text(), r#"{"name":"compute"}"#);
    }

    #[tokio::test]
    async fn secure_routes_use_suffixed_base_and_bearer_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init-secure/x1000/user-data")
                .header("authorization", "Bearer tok");
            then.status(200).body("#cloud-config\n");
        });

        let env = client(&server, Some("tok"))
            .get_data(DataKind::UserData, "x1000", true)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(env.text(), "#cloud-config\n");
    }

    #[tokio::test]
    async fn not_found_is_unsuccessful_with_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/cloud-init/compute");
            then.status(404).body("not found\n");
        });

        let err = client(&server, None)
            .get_configs(Some("compute"), false)
            .await
            .unwrap_err();
        assert!(err.is_unsuccessful());
        match err {
            ClientError::Unsuccessful { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ids_are_single_encoded_segments() {
        let client = client_at("http://ci.example/cloud-init", None);
        let url = client.admin(&["groups", "a/b c"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://ci.example/cloud-init/admin/groups/a%2Fb%20c"
        );
        let url = client
            .endpoint(true, &["x1000", DataKind::VendorData.as_str()])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://ci.example/cloud-init-secure/x1000/vendor-data"
        );
    }

    #[tokio::test]
    async fn put_group_sends_json_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("PUT")
                .path("/cloud-init/admin/groups/compute")
                .json_body(json!({"name": "compute", "meta-data": {"foo": "bar"}}));
            then.status(200);
        });

        let body = json!({"name": "compute", "meta-data": {"foo": "bar"}});
        let group: GroupData = serde_json::from_value(body).unwrap();
        client(&server, None).put_group(&group).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn node_group_data_path() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/cloud-init/admin/impersonation/x1000/compute.yaml");
            then.status(200).body("#cloud-config\n");
        });

        client(&server, None)
            .get_node_group_data("x1000", "compute")
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn blank_names_fail_before_sending() {
        let server = MockServer::start();
        let err = client(&server, None)
            .put_config(&CloudInitConfig::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Body(_)));

        let err = client(&server, None).get_group("  ").await.unwrap_err();
        assert!(matches!(err, ClientError::Body(_)));
    }

    #[test]
    fn secure_base_needs_a_path_segment() {
        let client = client_at("http://localhost:8080/", None);
        assert!(matches!(client.secure_base(), Err(ClientError::Url(_))));
    }
}
