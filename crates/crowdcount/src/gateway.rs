//! Remote query gateway.
//!
//! Everything that talks SQL goes through [`QueryGateway::execute`]. The
//! production implementation, [`SqlApiGateway`], speaks the platform's SQL
//! REST API: statements are submitted with `POST /api/v2/statements`,
//! long-running ones are polled by handle, and partitioned results are
//! gathered page by page so callers always see the full result set.

use crate::config::{CrowdConfig, Secret, TokenType};
use crate::error::CrowdError;
use crate::ident::QualifiedName;
use crate::snapshot::{Column, ResultSet, Snapshot};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

const STATEMENTS_PATH: &str = "api/v2/statements";
const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
const CLIENT_NAME: &str = concat!("crowdcount/", env!("CARGO_PKG_VERSION"));

/// Positional statement parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: String,
}

/// SQL text plus its bindings, in `?` order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<Binding>,
    /// SQL text carries credentials and is never logged
    pub sensitive: bool,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
            sensitive: false,
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// SQL text as it may appear in logs
    pub fn log_text(&self) -> &str {
        if self.sensitive {
            "[REDACTED]"
        } else {
            &self.sql
        }
    }

    pub fn bind_text(mut self, value: impl Into<String>) -> Self {
        self.bindings.push(Binding {
            kind: "TEXT",
            value: value.into(),
        });
        self
    }

    pub fn bind_fixed(mut self, value: u64) -> Self {
        self.bindings.push(Binding {
            kind: "FIXED",
            value: value.to_string(),
        });
        self
    }

    /// Bindings keyed "1", "2", ... as the SQL API expects
    fn bindings_json(&self) -> Map<String, Value> {
        self.bindings
            .iter()
            .enumerate()
            .map(|(i, b)| {
                (
                    (i + 1).to_string(),
                    serde_json::json!({ "type": b.kind, "value": b.value }),
                )
            })
            .collect()
    }
}

/// Executes SQL against the remote platform
#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, CrowdError>;
}

/// Run the fixed table query and wrap the result as a snapshot
///
/// No retry and no partial result: any failure is returned as is.
pub async fn fetch_snapshot(
    gateway: &dyn QueryGateway,
    table: &QualifiedName,
) -> Result<Snapshot, CrowdError> {
    let sql = format!("SELECT * FROM {table}");
    debug!("Fetching snapshot: {sql}", sql: sql);
    let result = gateway.execute(&Statement::new(sql)).await?;
    let rows = result.len();
    debug!("Snapshot fetched with {rows} rows", rows: rows);
    Ok(Snapshot::new(result))
}

/// Poll settings for statements that outlive the initial request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_polls: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_polls: 30,
        }
    }
}

/// Gateway over the SQL REST API
pub struct SqlApiGateway {
    http: reqwest::Client,
    base: Url,
    token: Secret,
    token_type: TokenType,
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
    timeout_secs: u64,
    poll: PollSettings,
}

impl SqlApiGateway {
    pub fn new(config: &CrowdConfig) -> Result<Self, CrowdError> {
        let base = Url::parse(&config.account_url)
            .map_err(|e| CrowdError::config(format!("account_url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_add(10)))
            .build()?;

        Ok(Self {
            http,
            base,
            token: config.token.clone(),
            token_type: config.token_type,
            database: Some(config.database.clone()),
            schema: Some(config.schema.clone()),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            timeout_secs: config.timeout_secs,
            poll: PollSettings::default(),
        })
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    fn statements_url(&self) -> Result<Url, CrowdError> {
        self.base
            .join(STATEMENTS_PATH)
            .map_err(|e| CrowdError::config(format!("account_url: {e}")))
    }

    fn statement_url(&self, handle: &str) -> Result<Url, CrowdError> {
        self.base
            .join(&format!("{STATEMENTS_PATH}/{handle}"))
            .map_err(|e| CrowdError::config(format!("statement handle {handle:?}: {e}")))
    }

    fn request_body(&self, statement: &Statement) -> Value {
        let mut body = Map::new();
        body.insert("statement".into(), Value::String(statement.sql.clone()));
        body.insert("timeout".into(), Value::from(self.timeout_secs));
        let context = [
            ("database", &self.database),
            ("schema", &self.schema),
            ("warehouse", &self.warehouse),
            ("role", &self.role),
        ];
        for (key, value) in context {
            if let Some(value) = value {
                body.insert(key.into(), Value::String(value.clone()));
            }
        }
        if !statement.bindings.is_empty() {
            body.insert("bindings".into(), Value::Object(statement.bindings_json()));
        }
        Value::Object(body)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(self.token.as_declassified())
            .header(TOKEN_TYPE_HEADER, self.token_type.header_value())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_NAME)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String), CrowdError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    async fn submit(&self, statement: &Statement) -> Result<Reply, CrowdError> {
        let mut url = self.statements_url()?;
        url.query_pairs_mut()
            .append_pair("requestId", &uuid7::uuid7().to_string());
        let body = serde_json::to_vec(&self.request_body(statement))?;

        let (status, text) = self
            .send(
                self.http
                    .post(url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body),
            )
            .await?;
        parse_reply(status, &text)
    }

    /// One status check; a statement still running comes back as `Statement`
    async fn statement_status(&self, handle: &str) -> Result<StatementResponse, CrowdError> {
        let (status, text) = self.send(self.http.get(self.statement_url(handle)?)).await?;
        match parse_reply(status, &text)? {
            Reply::Complete(response) => Ok(response),
            Reply::Pending(pending) => Err(CrowdError::Statement {
                handle: handle.to_string(),
                message: pending
                    .message
                    .unwrap_or_else(|| "still running".to_string()),
            }),
        }
    }

    async fn wait_for(&self, handle: &str) -> Result<StatementResponse, CrowdError> {
        debug!("Waiting for statement {handle}", handle: handle);
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.poll.min_delay)
            .with_max_delay(self.poll.max_delay)
            .with_max_times(self.poll.max_polls);

        (|| self.statement_status(handle))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, CrowdError::Statement { .. }))
            .await
    }

    async fn fetch_partition(&self, handle: &str, partition: usize) -> Result<Vec<Vec<Value>>, CrowdError> {
        let mut url = self.statement_url(handle)?;
        url.query_pairs_mut()
            .append_pair("partition", &partition.to_string());
        let (status, text) = self.send(self.http.get(url)).await?;
        match parse_reply(status, &text)? {
            Reply::Complete(response) => Ok(response.data.unwrap_or_default()),
            Reply::Pending(_) => Err(CrowdError::Statement {
                handle: handle.to_string(),
                message: format!("partition {partition} not ready"),
            }),
        }
    }
}

#[async_trait]
impl QueryGateway for SqlApiGateway {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, CrowdError> {
        let sql = statement.log_text();
        debug!("Executing statement: {sql}", sql: sql);

        let response = match self.submit(statement).await? {
            Reply::Complete(response) => response,
            Reply::Pending(pending) => {
                let handle = pending.statement_handle.ok_or_else(|| CrowdError::Api {
                    status: StatusCode::ACCEPTED.as_u16(),
                    code: pending.code.unwrap_or_default(),
                    message: "statement accepted without a handle".to_string(),
                })?;
                self.wait_for(&handle).await?
            }
        };

        let partitions = response.partition_count();
        let handle = response.statement_handle.clone().unwrap_or_default();
        let mut result = response.into_result_set()?;

        for partition in 1..partitions {
            debug!("Fetching partition {partition} of {partitions} for {handle}",
                partition: partition, partitions: partitions, handle: handle);
            let rows = self.fetch_partition(&handle, partition).await?;
            check_row_widths(&rows, result.columns.len())?;
            result.rows.extend(rows);
        }

        let rows = result.len();
        debug!("Statement {handle} returned {rows} rows", handle: handle, rows: rows);
        Ok(result)
    }
}

/// Body of a statement or status response
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatementResponse {
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type", default)]
    sql_type: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl StatementResponse {
    fn partition_count(&self) -> usize {
        self.result_set_meta_data
            .as_ref()
            .map(|m| m.partition_info.len().max(1))
            .unwrap_or(1)
    }

    fn into_result_set(self) -> Result<ResultSet, CrowdError> {
        let meta = self.result_set_meta_data.unwrap_or_default();
        let columns: Vec<Column> = meta
            .row_type
            .into_iter()
            .map(|r| Column {
                name: r.name,
                sql_type: r.sql_type,
                nullable: r.nullable,
            })
            .collect();
        let rows = self.data.unwrap_or_default();
        check_row_widths(&rows, columns.len())?;
        Ok(ResultSet::new(columns, rows))
    }
}

/// Every row must carry one value per declared column
fn check_row_widths(rows: &[Vec<Value>], columns: usize) -> Result<(), CrowdError> {
    match rows.iter().find(|row| row.len() != columns) {
        Some(bad) => Err(CrowdError::Api {
            status: StatusCode::OK.as_u16(),
            code: String::new(),
            message: format!(
                "row has {} values but the result declares {} columns",
                bad.len(),
                columns
            ),
        }),
        None => Ok(()),
    }
}

#[derive(Debug)]
pub(crate) enum Reply {
    Complete(StatementResponse),
    Pending(StatementResponse),
}

/// Interpret an HTTP status and body from the statements endpoint
pub(crate) fn parse_reply(status: StatusCode, text: &str) -> Result<Reply, CrowdError> {
    if status == StatusCode::OK {
        return Ok(Reply::Complete(serde_json::from_str(text)?));
    }
    if status == StatusCode::ACCEPTED {
        return Ok(Reply::Pending(serde_json::from_str(text).unwrap_or_default()));
    }

    let (code, message) = match serde_json::from_str::<StatementResponse>(text) {
        Ok(body) => (
            body.code.unwrap_or_default(),
            body.message.unwrap_or_else(|| text.to_string()),
        ),
        Err(_) => (String::new(), text.to_string()),
    };
    let status = status.as_u16();
    error!("SQL API returned HTTP {status}: {message}", status: status, message: message);
    Err(CrowdError::Api {
        status,
        code,
        message,
    })
}
