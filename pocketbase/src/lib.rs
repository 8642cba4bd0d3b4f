use reqwest::{Client, Error as ReqwestError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PocketBaseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] ReqwestError),
    #[error("API error: {message} (code: {code})")]
    Api { message: String, code: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct PocketBaseClient {
    client: Client,
    base_url: String,
    admin_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub created: String,
    pub updated: String,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl PocketBaseClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: String) -> Self {
        self.admin_token = Some(token);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_auth_headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &self.admin_token {
            if let Ok(value) = format!("Bearer {}", token).parse() {
                headers.insert("Authorization", value);
            }
        }
        headers
    }

    /// Probes that a collection is reachable. Used by the Lifecycle Manager at boot in
    /// place of real index DDL, which this store's REST surface doesn't expose.
    pub async fn ensure_collection(&self, collection: &str) -> Result<(), PocketBaseError> {
        let url = format!(
            "{}/api/collections/{}/records?perPage=1",
            self.base_url, collection
        );
        let response = self
            .client
            .get(&url)
            .headers(self.get_auth_headers())
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(PocketBaseError::Api {
                message: format!("collection '{}' unreachable", collection),
                code: status.to_string(),
            })
        }
    }

    pub async fn create_record(
        &self,
        collection: &str,
        data: Value,
    ) -> Result<Record, PocketBaseError> {
        let url = format!("{}/api/collections/{}/records", self.base_url, collection);
        let response = self
            .client
            .post(&url)
            .headers(self.get_auth_headers())
            .json(&data)
            .send()
            .await?;

        if response.status().is_success() {
            let record: Record = response.json().await?;
            debug!(collection, id = %record.id, "created record");
            Ok(record)
        } else {
            let status = response.status();
            let error: Value = response.json().await.unwrap_or_default();
            Err(PocketBaseError::Api {
                message: error["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
                code: status.to_string(),
            })
        }
    }

    pub async fn get_record(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Record>, PocketBaseError> {
        let url = format!(
            "{}/api/collections/{}/records/{}",
            self.base_url, collection, id
        );
        let response = self
            .client
            .get(&url)
            .headers(self.get_auth_headers())
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status().is_success() {
            let record: Record = response.json().await?;
            Ok(Some(record))
        } else {
            let status = response.status();
            Err(PocketBaseError::Api {
                message: format!("failed to fetch record '{}'", id),
                code: status.to_string(),
            })
        }
    }

    pub async fn update_record(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> Result<Option<Record>, PocketBaseError> {
        let url = format!(
            "{}/api/collections/{}/records/{}",
            self.base_url, collection, id
        );
        let response = self
            .client
            .patch(&url)
            .headers(self.get_auth_headers())
            .json(&data)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status().is_success() {
            let record: Record = response.json().await?;
            debug!(collection, id, "updated record");
            Ok(Some(record))
        } else {
            let status = response.status();
            let error: Value = response.json().await.unwrap_or_default();
            Err(PocketBaseError::Api {
                message: error["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
                code: status.to_string(),
            })
        }
    }

    /// Lists records, optionally filtered and sorted, plus the total matching count.
    pub async fn list_records(
        &self,
        collection: &str,
        filter: Option<&str>,
        sort: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Record>, u64), PocketBaseError> {
        let page = offset / limit.max(1) + 1;
        let mut url = format!(
            "{}/api/collections/{}/records?perPage={}&page={}",
            self.base_url, collection, limit, page
        );
        if let Some(f) = filter {
            url.push_str(&format!("&filter={}", urlencoding_lite(f)));
        }
        if let Some(s) = sort {
            url.push_str(&format!("&sort={}", urlencoding_lite(s)));
        }

        let response = self
            .client
            .get(&url)
            .headers(self.get_auth_headers())
            .send()
            .await?;

        if response.status().is_success() {
            let body: Value = response.json().await?;
            let records: Vec<Record> = serde_json::from_value(body["items"].clone())?;
            let total = body["totalItems"].as_u64().unwrap_or(records.len() as u64);
            Ok((records, total))
        } else {
            let status = response.status();
            Err(PocketBaseError::Api {
                message: format!("failed to list records from '{}'", collection),
                code: status.to_string(),
            })
        }
    }
}

/// Minimal query-string escaping sufficient for the filter/sort expressions this client builds.
fn urlencoding_lite(raw: &str) -> String {
    raw.replace(' ', "%20")
}
