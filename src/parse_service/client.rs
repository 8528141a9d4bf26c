//! HTTP client for the parse service task API.
//!
//! The service runs OCR/layout analysis behind three endpoints: a
//! multipart submit that returns a task id, a status endpoint that is
//! polled to completion, and a data endpoint returning the structured
//! result. One pooled [`reqwest::Client`] is shared by every worker of an
//! ingestion; per-call timeouts live on the client, the overall wait
//! deadline on the polling loop.

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart;
use tokio_util::sync::CancellationToken;

use crate::models::PageRange;

use super::types::{RangeResult, SubmitResponse, TaskDataResponse, TaskStatus, TaskStatusResponse};
use super::{ParseServiceError, RangeParser};

/// Task parameters sent with every submit.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Service backend, `pipeline` or `ocr`.
    pub backend: String,
    pub lang: String,
    pub method: String,
    pub formula_enable: bool,
    pub table_enable: bool,
    pub priority: i32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            backend: "pipeline".to_string(),
            lang: "ch".to_string(),
            method: "auto".to_string(),
            formula_enable: true,
            table_enable: true,
            priority: 0,
        }
    }
}

/// Connection settings for the parse service.
#[derive(Debug, Clone)]
pub struct ParseServiceConfig {
    /// Base URL, e.g. `http://localhost:18000`.
    pub endpoint: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Timeout applied to each individual HTTP call.
    pub http_timeout: Duration,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Overall deadline for one task to reach a terminal status.
    pub overall_timeout: Duration,
    pub options: ParseOptions,
}

impl Default for ParseServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:18000".to_string(),
            api_key: None,
            http_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            overall_timeout: Duration::from_secs(600),
            options: ParseOptions::default(),
        }
    }
}

/// Client for the parse service task API.
#[derive(Clone)]
pub struct ParseServiceClient {
    http: reqwest::Client,
    config: ParseServiceConfig,
}

impl ParseServiceClient {
    pub fn new(config: ParseServiceConfig) -> Result<Self, ParseServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Submit a parse task for `file`, optionally limited to an inclusive
    /// page range. Returns the service task id.
    pub async fn submit(
        &self,
        file: Bytes,
        file_name: &str,
        range: Option<PageRange>,
        cancel: &CancellationToken,
    ) -> Result<String, ParseServiceError> {
        let options = &self.config.options;
        let file_part = multipart::Part::stream(file)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| ParseServiceError::Internal(format!("multipart build: {e}")))?;

        let mut form = multipart::Form::new()
            .part("file", file_part)
            .text("backend", options.backend.clone())
            .text("lang", options.lang.clone())
            .text("method", options.method.clone())
            .text("formula_enable", options.formula_enable.to_string())
            .text("table_enable", options.table_enable.to_string())
            .text("priority", options.priority.to_string());

        if let Some(range) = range {
            form = form
                .text("start_page_id", range.start.to_string())
                .text("end_page_id", range.end.to_string());
        }

        let url = format!("{}/api/v1/tasks/submit", self.config.endpoint);
        let request = self.auth(self.http.post(&url)).multipart(form);

        let response = with_cancel(cancel, async { Ok(request.send().await?) }).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParseServiceError::Submit {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let submit: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| ParseServiceError::Decode(format!("submit response: {e}")))?;

        tracing::debug!(task_id = %submit.task_id, file_name, ?range, "parse task submitted");
        Ok(submit.task_id)
    }

    /// Poll the task until it reaches a terminal status.
    ///
    /// `completed` returns `Ok`; `failed` and `cancelled` map to their
    /// error kinds; exceeding the configured overall timeout maps to
    /// [`ParseServiceError::Timeout`].
    pub async fn wait_for_completion(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ParseServiceError> {
        let started = tokio::time::Instant::now();
        let url = format!("{}/api/v1/tasks/{task_id}", self.config.endpoint);

        loop {
            if cancel.is_cancelled() {
                return Err(ParseServiceError::Cancelled);
            }

            let request = self.auth(self.http.get(&url));
            let response = with_cancel(cancel, async { Ok(request.send().await?) }).await?;
            let http_status = response.status();
            if !http_status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ParseServiceError::Http {
                    status: http_status.as_u16(),
                    body,
                });
            }

            let body = response.text().await?;
            let status: TaskStatusResponse = serde_json::from_str(&body)
                .map_err(|e| ParseServiceError::Decode(format!("status response: {e}")))?;

            match status.status {
                TaskStatus::Completed => return Ok(()),
                TaskStatus::Failed => {
                    let message = status
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(ParseServiceError::Task(message));
                }
                TaskStatus::Cancelled => return Err(ParseServiceError::Cancelled),
                TaskStatus::Pending | TaskStatus::Running => {}
            }

            if started.elapsed() > self.config.overall_timeout {
                tracing::warn!(task_id, "parse task exceeded overall timeout");
                return Err(ParseServiceError::Timeout);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ParseServiceError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Fetch and decode the structured result of a completed task.
    pub async fn fetch_data(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RangeResult, ParseServiceError> {
        let url = format!("{}/api/v1/tasks/{task_id}/data", self.config.endpoint);
        let request = self.auth(self.http.get(&url)).query(&[
            ("include_fields", "md,content_list,middle_json,images"),
            ("upload_images", "false"),
            ("include_image_base64", "true"),
            ("include_metadata", "false"),
        ]);

        let response = with_cancel(cancel, async { Ok(request.send().await?) }).await?;
        let http_status = response.status();
        if !http_status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParseServiceError::Http {
                status: http_status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let envelope: TaskDataResponse = serde_json::from_str(&body)
            .map_err(|e| ParseServiceError::Decode(format!("data response: {e}")))?;

        if envelope.status != TaskStatus::Completed {
            return Err(ParseServiceError::Decode(format!(
                "data endpoint returned non-completed status {:?}",
                envelope.status
            )));
        }

        RangeResult::from_raw(envelope.data)
    }
}

#[async_trait::async_trait]
impl RangeParser for ParseServiceClient {
    async fn parse_range(
        &self,
        file: Bytes,
        file_name: &str,
        range: Option<PageRange>,
        cancel: &CancellationToken,
    ) -> Result<RangeResult, ParseServiceError> {
        let task_id = self.submit(file, file_name, range, cancel).await?;
        self.wait_for_completion(&task_id, cancel).await?;
        self.fetch_data(&task_id, cancel).await
    }
}

/// Race a service call against cancellation.
async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, ParseServiceError>>,
) -> Result<T, ParseServiceError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ParseServiceError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ParseServiceConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.overall_timeout, Duration::from_secs(600));
        assert_eq!(config.options.backend, "pipeline");
        assert_eq!(config.options.priority, 0);
    }

    #[tokio::test]
    async fn test_with_cancel_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_cancel(&cancel, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ParseServiceError::Cancelled)));
    }
}
