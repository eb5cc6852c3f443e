//! Tushare Pro HTTP client.
//!
//! Every call is a `POST` of `{api_name, token, params, fields}`; the
//! response carries a status `code` and a column-oriented table.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Provider;
use crate::engine::result_set::ResultSet;
use crate::error::ProviderError;

#[derive(Debug, Serialize)]
struct ProRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: &'a Map<String, Value>,
    fields: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<ProData>,
}

#[derive(Debug, Deserialize)]
struct ProData {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

impl ProResponse {
    pub(crate) fn into_result_set(self) -> Result<ResultSet, ProviderError> {
        if self.code != 0 {
            return Err(ProviderError::Api {
                code: self.code,
                msg: self.msg.unwrap_or_default(),
            });
        }
        match self.data {
            Some(data) => Ok(ResultSet::from_table(data.fields, data.items)),
            None => Ok(ResultSet::default()),
        }
    }
}

/// Client for the Pro endpoint.
pub struct ProClient {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl ProClient {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            token: token.to_string(),
        })
    }

    /// Query one Pro API.
    ///
    /// A `fields` entry in `params` is sent as the request's field list
    /// rather than as a call parameter.
    pub async fn query(&self, api_name: &str, params: &Map<String, Value>) -> Result<ResultSet, ProviderError> {
        let (params, fields) = split_fields(params);
        let request = ProRequest {
            api_name,
            token: &self.token,
            params: &params,
            fields: &fields,
        };

        tracing::debug!(api_name, params = %serde_json::Value::Object(params.clone()), "Calling Pro API");
        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: ProResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        body.into_result_set()
    }
}

#[async_trait]
impl Provider for ProClient {
    async fn call(&self, api_code: &str, params: &Map<String, Value>) -> Result<ResultSet, ProviderError> {
        self.query(api_code, params).await
    }
}

fn split_fields(params: &Map<String, Value>) -> (Map<String, Value>, String) {
    let mut params = params.clone();
    let fields = match params.remove("fields") {
        Some(Value::String(s)) => s,
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    };
    (params, fields)
}
