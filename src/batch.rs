//! Running one request per identifier and reporting on the lot.
//!
//! Requests go out one at a time in input order. A failed request never
//! stops the ones after it; the failures are logged together once the batch
//! is done and turn into a non-zero exit status.

use std::error::Error;
use std::future::Future;

use crate::client::models::Identify;
use crate::client::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    PartialFailure,
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => std::process::ExitCode::SUCCESS,
            ExitStatus::PartialFailure => std::process::ExitCode::FAILURE,
        }
    }
}

impl ExitStatus {
    /// Failure if either side failed.
    pub fn and(self, other: ExitStatus) -> ExitStatus {
        match (self, other) {
            (ExitStatus::Success, ExitStatus::Success) => ExitStatus::Success,
            _ => ExitStatus::PartialFailure,
        }
    }
}

/// `err` followed by each of its sources, joined with `: `.
pub fn error_chain(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[derive(Debug)]
pub struct RequestOutcome<T> {
    pub target: String,
    pub result: Result<T, ClientError>,
}

#[derive(Debug)]
pub struct AggregateResult<T> {
    pub outcomes: Vec<RequestOutcome<T>>,
}

impl<T> AggregateResult<T> {
    pub fn had_errors(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_err())
    }

    /// Successful results paired with their identifier, in input order.
    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (o.target.as_str(), v)))
    }

    /// Log every failure with its identifier and summarize. `action` names
    /// the command, e.g. "config get".
    pub fn report(&self, action: &str) -> ExitStatus {
        if !self.had_errors() {
            return ExitStatus::Success;
        }

        let mut failed = 0;
        for outcome in &self.outcomes {
            let Err(err) = &outcome.result else { continue };
            failed += 1;
            let error = error_chain(err);
            if err.is_unsuccessful() {
                tracing::error!(
                    id = %outcome.target,
                    %error,
                    "cloud-init {action} request yielded unsuccessful HTTP response"
                );
            } else {
                tracing::error!(id = %outcome.target, %error, "cloud-init {action} request failed");
            }
        }

        tracing::warn!(
            failed,
            total = self.outcomes.len(),
            "cloud-init {action} completed with errors"
        );
        ExitStatus::PartialFailure
    }
}

/// Call `op` for each item in order, waiting for each call to finish before
/// starting the next.
pub async fn run_each<'a, S, T, F, Fut>(items: &'a [S], mut op: F) -> AggregateResult<T>
where
    S: Identify,
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut outcomes = Vec::with_capacity(items.len());
    for item in items {
        let target = item.identifier().to_string();
        tracing::debug!(id = %target, "sending request");
        let result = op(item).await;
        outcomes.push(RequestOutcome { target, result });
    }
    AggregateResult { outcomes }
}

/// A single "everything at once" request, reported like a batch of one.
pub async fn run_bulk<T, Fut>(label: &str, fut: Fut) -> AggregateResult<T>
where
    Fut: Future<Output = Result<T, ClientError>>,
{
    AggregateResult {
        outcomes: vec![RequestOutcome {
            target: label.to_string(),
            result: fut.await,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{format_body, OutputFormat};
    use reqwest::StatusCode;
    use std::cell::RefCell;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn preserves_order_and_keeps_going_after_failures() {
        let calls = RefCell::new(Vec::new());
        let targets = ids(&["a", "b", "c"]);
        let result = run_each(&targets, |id| {
            calls.borrow_mut().push(id.clone());
            let id = id.clone();
            async move {
                if id == "b" {
                    Err(ClientError::Unsuccessful {
                        status: StatusCode::NOT_FOUND,
                        body: "missing".into(),
                    })
                } else {
                    Ok(format!("body-{id}"))
                }
            }
        })
        .await;

        assert_eq!(*calls.borrow(), ["a", "b", "c"]);
        let targets: Vec<&str> = result
            .outcomes
            .iter()
            .map(|o| o.target.as_str())
            .collect();
        assert_eq!(targets, ["a", "b", "c"]);
        let ok: Vec<(&str, &String)> = result.successes().collect();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[0], ("a", &"body-a".to_string()));
        assert_eq!(ok[1], ("c", &"body-c".to_string()));
        assert!(result.had_errors());
        assert_eq!(result.report("config get"), ExitStatus::PartialFailure);
    }

    #[tokio::test]
    async fn all_successes_report_success() {
        let targets = ids(&["x1000", "x1001"]);
        let result = run_each(&targets, |id| {
            let id = id.clone();
            async move { Ok::<_, ClientError>(id) }
        })
        .await;
        assert!(!result.had_errors());
        assert_eq!(result.report("data get"), ExitStatus::Success);
    }

    #[tokio::test]
    async fn non_http_errors_also_fail_the_batch() {
        let targets = ids(&["only"]);
        let result = run_each(&targets, |_| async {
            Err::<(), _>(ClientError::Url("bad".into()))
        })
        .await;
        assert_eq!(result.report("group delete"), ExitStatus::PartialFailure);
    }

    #[test]
    fn exit_status_and_fails_if_either_failed() {
        use ExitStatus::*;
        assert_eq!(Success.and(Success), Success);
        assert_eq!(Success.and(PartialFailure), PartialFailure);
        assert_eq!(PartialFailure.and(Success), PartialFailure);
    }

    #[test]
    fn error_chain_includes_sources_once() {
        let err = format_body(b"<html>", OutputFormat::Json).unwrap_err();
        let chain = error_chain(&err);
        assert!(chain.starts_with("response body is not valid JSON: "));
        assert_eq!(chain.matches("expected value").count(), 1);
    }

    #[tokio::test]
    async fn bulk_is_a_single_outcome() {
        let result = run_bulk("all", async { Ok::<_, ClientError>(3) }).await;
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.successes().next(), Some(("all", &3)));
    }
}
