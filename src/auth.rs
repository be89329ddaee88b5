use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use keyring::Entry;
use serde::Deserialize;
use thiserror::Error;

use crate::batch::error_chain;

const SERVICE_NAME: &str = "ochami";

/// Tokens expiring sooner than this get a warning.
const EXPIRY_WARNING_MINUTES: i64 = 15;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no access token: pass --token, set {env_var}, or run 'ochami auth login'")]
    Missing { env_var: String },
    #[error("no cluster selected: pass --cluster or set default-cluster")]
    NoCluster,
    #[error("access token is not a valid JWT: {0}")]
    Malformed(String),
    #[error("access token expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("access token is not valid until {0}")]
    NotYetValid(DateTime<Utc>),
    #[error("keyring error")]
    Keyring(#[from] keyring::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Flag,
    Env(String),
    Keyring,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Flag => write!(f, "--token flag"),
            TokenSource::Env(var) => write!(f, "environment variable {var}"),
            TokenSource::Keyring => write!(f, "keyring"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub source: TokenSource,
}

#[derive(Debug, Default, Deserialize)]
pub struct Claims {
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub iat: Option<i64>,
    pub sub: Option<String>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(timestamp)
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// `demo-cluster` -> `DEMO_CLUSTER_ACCESS_TOKEN`
pub fn env_var_name(cluster: &str) -> String {
    let prefix: String = cluster
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("{prefix}_ACCESS_TOKEN")
}

/// Find a token: flag, then the cluster's environment variable, then the
/// keyring.
pub fn resolve(flag: Option<&str>, cluster: Option<&str>) -> Option<Token> {
    resolve_with(
        flag,
        cluster,
        |var| std::env::var(var).ok(),
        |cluster| match keyring_get(cluster) {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!(
                    cluster,
                    error = %error_chain(&e),
                    "could not read token from keyring"
                );
                None
            }
        },
    )
}

fn resolve_with(
    flag: Option<&str>,
    cluster: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Option<Token> {
    if let Some(value) = flag {
        return Some(Token {
            value: value.to_string(),
            source: TokenSource::Flag,
        });
    }

    let cluster = cluster?;
    let var = env_var_name(cluster);
    if let Some(value) = env(&var).filter(|v| !v.trim().is_empty()) {
        return Some(Token {
            value,
            source: TokenSource::Env(var),
        });
    }

    keyring(cluster).map(|value| Token {
        value,
        source: TokenSource::Keyring,
    })
}

/// Resolve and validate a token for a request that cannot go out without one.
pub fn require(flag: Option<&str>, cluster: Option<&str>) -> Result<Token, AuthError> {
    let token = resolve(flag, cluster).ok_or_else(|| AuthError::Missing {
        env_var: cluster
            .map(env_var_name)
            .unwrap_or_else(|| "<CLUSTER>_ACCESS_TOKEN".to_string()),
    })?;
    check(&token.value, Utc::now())?;
    tracing::debug!(source = %token.source, "using access token");
    Ok(token)
}

/// Decode the JWT claims without verifying the signature and check the
/// validity window against `now`.
pub fn check(token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
    let claims = decode_claims(token)?;

    if let Some(exp) = claims.expires_at() {
        if exp <= now {
            return Err(AuthError::Expired(exp));
        }
        if exp - now <= Duration::minutes(EXPIRY_WARNING_MINUTES) {
            tracing::warn!(expires_at = %exp, "access token expires soon");
        }
    }
    for not_before in [claims.nbf, claims.iat].into_iter().flatten() {
        if let Some(t) = timestamp(not_before) {
            if t > now {
                return Err(AuthError::NotYetValid(t));
            }
        }
    }

    Ok(claims)
}

pub fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut parts = token.trim().split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(AuthError::Malformed(
                "expected three dot-separated parts".into(),
            ))
        }
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::Malformed(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(e.to_string()))
}

pub fn keyring_get(cluster: &str) -> Result<Option<String>, AuthError> {
    let entry = Entry::new(SERVICE_NAME, cluster)?;
    match entry.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn keyring_set(cluster: &str, token: &str) -> Result<(), AuthError> {
    let entry = Entry::new(SERVICE_NAME, cluster)?;
    entry.set_password(token)?;
    Ok(())
}

pub fn keyring_remove(cluster: &str) -> Result<(), AuthError> {
    let entry = Entry::new(SERVICE_NAME, cluster)?;
    match entry.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
pub(crate) fn test_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"tester","exp":{exp}}}"#));
    format!("{header}.{claims}.sig")
}
