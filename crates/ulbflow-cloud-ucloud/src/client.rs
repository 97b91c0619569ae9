//! UCloud API client
//!
//! Every UCloud action is a form POST to the API endpoint. Requests carry
//! `Action`, `PublicKey`, `Region` and optionally `ProjectId`, and are signed
//! with the SHA1 of the sorted parameters followed by the private key.
//! Responses share a `RetCode`/`Message` envelope; `RetCode` 0 means success.

use crate::error::{Result, UCloudError};
use serde::de::DeserializeOwned;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use ulbflow_config::Credentials;

/// Request parameters, kept sorted for signing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    /// Set an array parameter as `Name.0`, `Name.1`, ...
    pub fn set_list<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        for (i, value) in values.into_iter().enumerate() {
            self.0.insert(format!("{}.{}", name, i), value.to_string());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

/// Signature over `params` for `private_key`
pub fn sign(params: &Params, private_key: &str) -> String {
    let mut hasher = Sha1::new();
    for (key, value) in &params.0 {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.update(private_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Signed UCloud API client
pub struct UCloudClient {
    http: reqwest::Client,
    credentials: Credentials,
}

impl UCloudClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        credentials.validate()?;
        Ok(Self {
            http: reqwest::Client::new(),
            credentials,
        })
    }

    /// Complete `params` with the common fields and sign them
    pub fn prepare(&self, action: &str, params: Params) -> Params {
        let mut params = params
            .set("Action", action)
            .set("PublicKey", &self.credentials.public_key);
        if !params.contains("Region") {
            params = params.set("Region", &self.credentials.region);
        }
        if let Some(project_id) = &self.credentials.project_id
            && !params.contains("ProjectId")
        {
            params = params.set("ProjectId", project_id);
        }

        let signature = sign(&params, &self.credentials.private_key);
        params.set("Signature", signature)
    }

    /// Invoke `action` and decode the response body
    pub async fn call<T: DeserializeOwned>(&self, action: &str, params: Params) -> Result<T> {
        let params = self.prepare(action, params);
        tracing::debug!("Calling UCloud {}", action);

        let response = self
            .http
            .post(&self.credentials.base_url)
            .form(&params.0)
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let envelope: Envelope = serde_json::from_value(body.clone())?;

        if envelope.ret_code != 0 {
            tracing::debug!(
                "UCloud {} returned {}: {}",
                action,
                envelope.ret_code,
                envelope.message
            );
            return Err(UCloudError::Api {
                code: envelope.ret_code,
                message: envelope.message,
            });
        }

        Ok(serde_json::from_value(body)?)
    }
}

#[derive(Debug, serde::Deserialize)]
struct Envelope {
    #[serde(rename = "RetCode")]
    ret_code: i64,
    #[serde(rename = "Message", default)]
    message: String,
}
