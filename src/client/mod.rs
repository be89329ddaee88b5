mod cloud_init;
mod http;
pub mod models;

pub use cloud_init::{CloudInitClient, DataKind};
pub use http::{build_http_client, ClientError, HttpClient, HttpEnvelope};
