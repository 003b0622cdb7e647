use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, warn};

const QUERY_ENDPOINT: &str = "/api/v1/query";

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no data found for container: {0}")]
    NoData(String),
    #[error("unexpected result type: {0}")]
    UnexpectedResultType(String),
    #[error("upstream query failed ({error_type}): {error}")]
    Upstream { error_type: String, error: String },
    #[error("upstream returned HTTP {0}")]
    Status(StatusCode),
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream request failed: {0}")]
    Transport(reqwest::Error),
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QueryError::Timeout
        } else {
            QueryError::Transport(e)
        }
    }
}

/// Envelope returned by every Prometheus HTTP API call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    data: Option<QueryData>,
    error_type: Option<String>,
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub result_type: String,
    pub result: serde_json::Value,
}

impl QueryData {
    pub fn into_vector(self) -> Result<Vec<Sample>, QueryError> {
        if self.result_type != "vector" {
            return Err(QueryError::UnexpectedResultType(self.result_type));
        }
        serde_json::from_value(self.result).map_err(|e| QueryError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    pub value: SamplePoint,
}

/// `[<unix timestamp>, "<value>"]`
#[derive(Debug, Deserialize)]
pub struct SamplePoint(pub f64, pub String);

impl SamplePoint {
    /// Prometheus encodes sample values as strings, including `NaN` and `+Inf`.
    pub fn value(&self) -> Result<f64, QueryError> {
        self.1
            .parse::<f64>()
            .map_err(|_| QueryError::Decode(format!("invalid sample value '{}'", self.1)))
    }
}

/// Average CPU usage of one container over the window, as a percentage.
///
/// The `avg` aggregation keeps the result to at most one sample even when
/// several series share the container name.
pub fn cpu_usage_query(container: &str, window_secs: u64) -> String {
    format!(
        r#"avg(rate(container_cpu_usage_seconds_total{{name="{}"}}[{}s])) * 100"#,
        escape_label_value(container),
        window_secs
    )
}

/// Per-container CPU usage for every container whose name starts with `prefix`.
pub fn cpu_load_by_prefix_query(prefix: &str, window_secs: u64) -> String {
    format!(
        r#"rate(container_cpu_usage_seconds_total{{image!="",name=~"{}.*"}}[{}s]) * 100"#,
        escape_label_value(&regex::escape(prefix)),
        window_secs
    )
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
}

impl PrometheusClient {
    pub fn new(client: Client, base_url: Url) -> Self {
        PrometheusClient { client, base_url }
    }

    #[cfg(test)]
    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Runs an instant query evaluated at `time`.
    pub async fn query(&self, expr: &str, time: SystemTime) -> Result<QueryData, QueryError> {
        let url = format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            QUERY_ENDPOINT
        );
        let ts = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        debug!(query = expr, time = ts, "Sending instant query");

        let resp = self
            .client
            .get(url)
            .query(&[("query", expr.to_string()), ("time", format!("{:.3}", ts))])
            .send()
            .await
            .map_err(|e| {
                error!("Request to {} failed: {}", self.base_url, e);
                QueryError::from(e)
            })?;
        let status = resp.status();
        let body = resp.bytes().await?;

        // Prometheus sends a JSON error envelope alongside 4xx/5xx statuses
        let parsed: ApiResponse = match serde_json::from_slice(&body) {
            Ok(p) => p,
            Err(_) if !status.is_success() => return Err(QueryError::Status(status)),
            Err(e) => return Err(QueryError::Decode(e.to_string())),
        };

        if !parsed.warnings.is_empty() {
            warn!(warnings = ?parsed.warnings, "Upstream returned warnings");
        }

        if parsed.status != "success" {
            let err = QueryError::Upstream {
                error_type: parsed.error_type.unwrap_or_else(|| "unknown".into()),
                error: parsed.error.unwrap_or_default(),
            };
            error!("{}", err);
            return Err(err);
        }

        parsed
            .data
            .ok_or_else(|| QueryError::Decode("missing data in success response".into()))
    }

    pub async fn average_cpu_usage(
        &self,
        container: &str,
        window_secs: u64,
    ) -> Result<f64, QueryError> {
        let expr = cpu_usage_query(container, window_secs);
        let samples = self.query(&expr, SystemTime::now()).await?.into_vector()?;
        match samples.first() {
            Some(sample) => {
                debug!(%container, timestamp = sample.value.0, "Upstream sample");
                sample.value.value()
            }
            None => Err(QueryError::NoData(container.to_string())),
        }
    }

    /// Maps container name to CPU usage for all containers matching `prefix`.
    /// Evaluated at the start of the window.
    pub async fn average_cpu_load_by_prefix(
        &self,
        prefix: &str,
        window_secs: u64,
    ) -> Result<BTreeMap<String, f64>, QueryError> {
        let expr = cpu_load_by_prefix_query(prefix, window_secs);
        let at = SystemTime::now()
            .checked_sub(Duration::from_secs(window_secs))
            .unwrap_or(UNIX_EPOCH);

        let samples = self.query(&expr, at).await?.into_vector()?;

        let mut load = BTreeMap::new();
        for sample in samples {
            let name = sample.metric.get("name").cloned().unwrap_or_default();
            load.insert(name, sample.value.value()?);
        }
        Ok(load)
    }
}
