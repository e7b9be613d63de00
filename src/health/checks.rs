use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{AppError, Result};

const DEFAULT_TCP_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Success,
    Error,
    Unknown,
}

/// Outcome of one check run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub date: DateTime<Utc>,
    pub status: CheckStatus,
    pub details: String,
}

impl CheckResult {
    fn new(status: CheckStatus, details: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            status,
            details: details.into(),
        }
    }

    fn success(details: impl Into<String>) -> Self {
        Self::new(CheckStatus::Success, details)
    }

    fn error(details: impl Into<String>) -> Self {
        Self::new(CheckStatus::Error, details)
    }
}

/// What a check looks at, as submitted by API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckDefinition {
    /// Connect to `ip_address:port`. With `match_value`, optionally send
    /// `command` and match the response against the regex instead.
    Tcp {
        ip_address: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_value: Option<String>,
        #[serde(default = "default_tcp_timeout_ms")]
        timeout_ms: u64,
    },
    /// GET `url` and compare either the status code or the body.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body_regex: Option<String>,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
    FileExists { path: PathBuf },
}

fn default_tcp_timeout_ms() -> u64 {
    DEFAULT_TCP_TIMEOUT_MS
}

fn default_http_timeout_ms() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}

/// A validated check, ready to run.
#[derive(Debug)]
pub struct Check {
    definition: CheckDefinition,
    pattern: Option<Regex>,
}

impl Check {
    pub fn new(definition: CheckDefinition) -> Result<Self> {
        let pattern = match &definition {
            CheckDefinition::Tcp {
                ip_address,
                port,
                command,
                match_value,
                timeout_ms,
            } => {
                if ip_address.trim().is_empty() {
                    return Err(invalid("ip_address must not be empty"));
                }
                if *port == 0 {
                    return Err(invalid("port must be between 1 and 65535"));
                }
                if *timeout_ms == 0 {
                    return Err(invalid("timeout_ms must be positive"));
                }
                if command.is_some() && match_value.is_none() {
                    return Err(invalid("command requires match_value"));
                }
                match_value.as_deref().map(compile).transpose()?
            }
            CheckDefinition::Http {
                url,
                status_code,
                body_regex,
                timeout_ms,
            } => {
                let parsed = reqwest::Url::parse(url).map_err(|e| invalid(format!("invalid url {}: {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(invalid(format!("unsupported url scheme: {}", parsed.scheme())));
                }
                if *timeout_ms == 0 {
                    return Err(invalid("timeout_ms must be positive"));
                }
                match (status_code, body_regex) {
                    (Some(_), None) => None,
                    (None, Some(pattern)) => Some(compile(pattern)?),
                    _ => return Err(invalid("exactly one of status_code and body_regex is required")),
                }
            }
            CheckDefinition::FileExists { path } => {
                if path.as_os_str().is_empty() {
                    return Err(invalid("path must not be empty"));
                }
                None
            }
        };

        Ok(Self { definition, pattern })
    }

    pub fn definition(&self) -> &CheckDefinition {
        &self.definition
    }

    /// Run the check once. Failures are reported in the result, never as
    /// an error.
    pub async fn run(&self, client: &reqwest::Client) -> CheckResult {
        match &self.definition {
            CheckDefinition::Tcp {
                ip_address,
                port,
                command,
                timeout_ms,
                ..
            } => {
                let timeout = Duration::from_millis(*timeout_ms);
                let attempt = self.run_tcp(ip_address, *port, command.as_deref());
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => CheckResult::error(format!("Timeout after {} ms", timeout_ms)),
                }
            }
            CheckDefinition::Http {
                url,
                status_code,
                timeout_ms,
                ..
            } => {
                self.run_http(client, url, *status_code, Duration::from_millis(*timeout_ms))
                    .await
            }
            CheckDefinition::FileExists { path } => match tokio::fs::metadata(path).await {
                Ok(_) => CheckResult::success("File exists."),
                Err(_) => CheckResult::error("File does not exist."),
            },
        }
    }

    async fn run_tcp(&self, ip_address: &str, port: u16, command: Option<&str>) -> CheckResult {
        let mut stream = match TcpStream::connect((ip_address, port)).await {
            Ok(stream) => stream,
            Err(e) => return CheckResult::error(format!("Check failed - returned exception: {}", e)),
        };

        let Some(pattern) = &self.pattern else {
            return CheckResult::success(format!(
                "Successfully established connection to IP {} port {}",
                ip_address, port
            ));
        };

        let mut response = Vec::new();
        let exchanged = async {
            if let Some(command) = command {
                stream.write_all(command.as_bytes()).await?;
                stream.shutdown().await?;
            }
            stream.read_to_end(&mut response).await
        };
        if let Err(e) = exchanged.await {
            return CheckResult::error(format!("Check failed - returned exception: {}", e));
        }

        match_body(pattern, &String::from_utf8_lossy(&response))
    }

    async fn run_http(
        &self,
        client: &reqwest::Client,
        url: &str,
        expected_status: Option<u16>,
        timeout: Duration,
    ) -> CheckResult {
        let response = match client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return CheckResult::error(format!("Check failed - returned exception: {}", e)),
        };

        let status = response.status().as_u16();
        if let Some(expected) = expected_status {
            let details = format!("Returned status code: {}", status);
            return if status == expected {
                CheckResult::success(details)
            } else {
                CheckResult::error(details)
            };
        }

        match (&self.pattern, response.text().await) {
            (Some(pattern), Ok(body)) => match_body(pattern, &body),
            (None, Ok(_)) => CheckResult::new(CheckStatus::Unknown, "No match configured"),
            (_, Err(e)) => CheckResult::error(format!("Check failed - returned exception: {}", e)),
        }
    }
}

fn match_body(pattern: &Regex, body: &str) -> CheckResult {
    if pattern.is_match(body) {
        CheckResult::success(format!(
            "The response body matched the regular expression: {}",
            pattern.as_str()
        ))
    } else {
        CheckResult::error(format!(
            "The response body didn't match the regular expression: {}",
            pattern.as_str()
        ))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| invalid(format!("invalid regular expression {}: {}", pattern, e)))
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::ValidationError(format!("Invalid check: {}", message.into()))
}
