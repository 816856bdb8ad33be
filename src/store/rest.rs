//! Hosted backend speaking the PostgREST dialect used by Supabase.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{ensure_collection, ensure_column, op_context, RecordStore, Select};
use crate::error::{AppError, AppResult, STORE_HTTP};
use crate::model::RecordId;

/// Error body PostgREST returns on a rejected request.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

#[derive(Debug)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::from(e).with_context("operation", "http_client"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: RwLock::new(None),
        })
    }

    /// Requests made after this carry the signed-in user's token instead of
    /// the anonymous key.
    pub fn set_access_token(&self, token: Option<String>) {
        let mut slot = self
            .access_token
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = token;
    }

    fn table_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    fn headers(&self) -> HeaderMap {
        let token = self
            .access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| self.api_key.clone());
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, v);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn request(&self, method: reqwest::Method, collection: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(collection))
            .headers(self.headers())
    }
}

/// `select=` parameter, with the embed written as `alias:fk(column)`.
pub fn select_param(query: &Select) -> String {
    let mut parts: Vec<String> = if query.columns.is_empty() {
        vec![String::from("*")]
    } else {
        query.columns.clone()
    };
    if let Some(embed) = &query.embed {
        parts.push(format!(
            "{}:{}({})",
            embed.alias, embed.foreign_key, embed.column
        ));
    }
    parts.join(",")
}

/// Filter operand for `col=op.value`.
pub fn eq_operand(value: &Value) -> String {
    match value {
        Value::Null => String::from("is.null"),
        Value::String(s) => format!("eq.{s}"),
        other => format!("eq.{other}"),
    }
}

pub fn query_params(query: &Select) -> Vec<(String, String)> {
    let mut params = vec![(String::from("select"), select_param(query))];
    for (column, value) in &query.filters {
        params.push((column.clone(), eq_operand(value)));
    }
    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
            .collect::<Vec<_>>()
            .join(",");
        params.push((String::from("order"), order));
    }
    params
}

async fn check(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.to_string()
            } else {
                text.clone()
            }
        });
    let mut err = AppError::new(STORE_HTTP, message).with_context("status", status.as_u16().to_string());
    if let Some(code) = body.code {
        err = err.with_context("pg_code", code);
    }
    if let Some(details) = body.details {
        err = err.with_context("details", details);
    }
    if let Some(hint) = body.hint {
        err = err.with_context("hint", hint);
    }
    Err(err)
}

async fn rows_of(response: Response) -> AppResult<Vec<Value>> {
    let body: Value = response.json().await?;
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

impl RestStore {
    async fn write(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
        prefer: &'static str,
    ) -> AppResult<Vec<Value>> {
        ensure_collection(collection)?;
        for row in &rows {
            for column in row.keys() {
                ensure_column(column)?;
            }
        }
        let body: Vec<Value> = rows.into_iter().map(Value::Object).collect();
        let response = self
            .request(reqwest::Method::POST, collection)
            .header("Prefer", prefer)
            .json(&body)
            .send()
            .await?;
        rows_of(check(response).await?).await
    }
}

#[async_trait]
impl RecordStore for RestStore {
    fn backend(&self) -> &'static str {
        "rest"
    }

    async fn select(&self, query: &Select) -> AppResult<Vec<Value>> {
        query.validate()?;
        let mut request = self
            .request(reqwest::Method::GET, &query.collection)
            .query(&query_params(query));
        if let Some(range) = query.range {
            request = request
                .header("Range-Unit", "items")
                .header("Range", format!("{}-{}", range.from, range.to));
        }
        debug!(target: "pipadmin", event = "rest_select", collection = %query.collection, range = ?query.range);
        let result: AppResult<Vec<Value>> = async {
            let response = check(request.send().await?).await?;
            rows_of(response).await
        }
        .await;
        result.map_err(|err| op_context(err, "select", &query.collection))
    }

    async fn insert(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
    ) -> AppResult<Vec<Value>> {
        self.write(collection, rows, "return=representation")
            .await
            .map_err(|err| op_context(err, "insert", collection))
    }

    async fn upsert(
        &self,
        collection: &str,
        rows: Vec<Map<String, Value>>,
    ) -> AppResult<Vec<Value>> {
        self.write(
            collection,
            rows,
            "return=representation,resolution=merge-duplicates",
        )
        .await
        .map_err(|err| op_context(err, "upsert", collection))
    }

    async fn update(
        &self,
        collection: &str,
        id: &RecordId,
        patch: Map<String, Value>,
    ) -> AppResult<()> {
        ensure_collection(collection)?;
        for column in patch.keys() {
            ensure_column(column)?;
        }
        let result: AppResult<()> = async {
            let response = self
                .request(reqwest::Method::PATCH, collection)
                .query(&[("id", eq_operand(&id.to_value()))])
                .header("Prefer", "return=minimal")
                .json(&Value::Object(patch))
                .send()
                .await?;
            check(response).await.map(|_| ())
        }
        .await;
        result.map_err(|err| op_context(err, "update", collection).with_context("id", id.to_string()))
    }

    async fn delete(&self, collection: &str, id: &RecordId) -> AppResult<()> {
        ensure_collection(collection)?;
        let result: AppResult<()> = async {
            let response = self
                .request(reqwest::Method::DELETE, collection)
                .query(&[("id", eq_operand(&id.to_value()))])
                .send()
                .await?;
            check(response).await.map(|_| ())
        }
        .await;
        result.map_err(|err| op_context(err, "delete", collection).with_context("id", id.to_string()))
    }
}
