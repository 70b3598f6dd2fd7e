//! Firebase Realtime Database backend over its REST API.

use super::{RemoteStore, StorePath, children_from};
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::debug;

/// How many times a conditional write is re-attempted after losing an ETag race.
const MAX_CONDITIONAL_ATTEMPTS: usize = 5;

/// A [`RemoteStore`] talking to `https://<db>.firebaseio.com`.
#[derive(Clone)]
pub struct FirebaseStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl FirebaseStore {
    /// Creates a client for the database at `base_url`.
    ///
    /// `auth_token`, when present, is sent as the `auth` query parameter on
    /// every request.
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn url(&self, path: &StorePath) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn request(&self, method: Method, path: &StorePath) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }

    async fn read_value(path: &StorePath, response: Response) -> Result<Option<Value>, StoreError> {
        let response = check(path, response).await?;
        let value: Value = response.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Reads `path` together with the ETag guarding it.
    async fn read_with_etag(&self, path: &StorePath) -> Result<(Option<Value>, String), StoreError> {
        let response = self
            .request(Method::GET, path)
            .header("X-Firebase-ETag", "true")
            .send()
            .await?;
        let etag = response
            .headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Unavailable(format!("no ETag returned for '{path}'")))?;
        let value = Self::read_value(path, response).await?;
        Ok((value, etag))
    }
}

async fn check(path: &StorePath, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        path: path.to_string(),
        body,
    })
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let response = self.request(Method::GET, path).send().await?;
        Self::read_value(path, response).await
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let response = self.request(Method::PUT, path).json(&value).send().await?;
        check(path, response).await?;
        Ok(())
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let response = self.request(Method::PATCH, path).json(&fields).send().await?;
        check(path, response).await?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        path: &StorePath,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        for attempt in 1..=MAX_CONDITIONAL_ATTEMPTS {
            let (current, etag) = self.read_with_etag(path).await?;
            if current.as_ref() != expected {
                return Ok(false);
            }
            let response = self
                .request(Method::PUT, path)
                .header("if-match", etag)
                .json(&new)
                .send()
                .await?;
            if response.status() == StatusCode::PRECONDITION_FAILED {
                debug!(%path, attempt, "Conditional write lost a race; re-reading.");
                continue;
            }
            check(path, response).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn query_ordered(&self, path: &StorePath, start_key: &str) -> Result<Vec<(String, Value)>, StoreError> {
        // Ordering by `$key` needs no `.indexOn` rule. Query values are JSON.
        let response = self
            .request(Method::GET, path)
            .query(&[("orderBy", "\"$key\"".to_string()), ("startAt", Value::from(start_key).to_string())])
            .send()
            .await?;
        // Filtered server-side, but the REST API returns an unordered object.
        match Self::read_value(path, response).await? {
            Some(Value::Object(children)) => Ok(children_from(children, start_key)),
            Some(other) => Err(StoreError::Unavailable(format!(
                "expected an object at '{path}', got {other}"
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        let response = self.request(Method::DELETE, path).send().await?;
        check(path, response).await?;
        Ok(())
    }
}
