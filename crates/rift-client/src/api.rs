//! Admin API wire types and response handling shared by the async and
//! blocking clients.

use crate::error::{Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response to `POST /imposters`. Only the port matters to us.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedImposter {
    pub port: u16,
}

/// Response to `GET /imposters/{port}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImposterDetail {
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub number_of_requests: u64,
    #[serde(default)]
    pub stubs: Vec<serde_json::Value>,
    #[serde(default)]
    pub requests: Vec<RecordedRequest>,
}

/// Request recorded by an imposter, as reported by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_from: Option<String>,
    #[serde(default)]
    pub method: String,
    pub path: String,
    /// Values are strings, or arrays for repeated keys
    #[serde(default)]
    pub query: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Fields this crate does not model, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Error body from the Admin API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// First `code: message` pair of a Mountebank error body, if it is one
pub fn error_summary(body: &str) -> Option<String> {
    let parsed: ErrorResponse = serde_json::from_str(body).ok()?;
    let first = parsed.errors.first()?;
    Some(format!("{}: {}", first.code, first.message))
}

/// Admin API resource URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoints {
    admin: String,
}

impl Endpoints {
    pub(crate) fn new(admin_url: &str) -> Self {
        Self {
            admin: admin_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn admin(&self) -> &str {
        &self.admin
    }

    pub(crate) fn root(&self) -> String {
        format!("{}/", self.admin)
    }

    pub(crate) fn imposters(&self) -> String {
        format!("{}/imposters", self.admin)
    }

    pub(crate) fn imposter(&self, port: u16) -> String {
        format!("{}/imposters/{}", self.admin, port)
    }
}

pub(crate) fn created_port(status: StatusCode, body: &str) -> Result<u16> {
    if !status.is_success() {
        return Err(Error::Registration {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    let created: CreatedImposter = serde_json::from_str(body)
        .map_err(|e| Error::Parse(format!("invalid create response: {e}")))?;
    Ok(created.port)
}

pub(crate) fn imposter_detail(status: StatusCode, body: &str) -> Result<ImposterDetail> {
    if !status.is_success() {
        return Err(Error::Remote {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    serde_json::from_str(body).map_err(|e| Error::Parse(format!("invalid imposter response: {e}")))
}

pub(crate) fn deleted(port: u16, status: StatusCode, body: &str) -> Result<()> {
    if !status.is_success() {
        return Err(Error::Teardown {
            port,
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    Ok(())
}
