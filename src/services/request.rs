//! Outbound requests for the initial, update and reset phases.

use crate::engine::payload::{Body, MultipartBody, Part};
use crate::model::{RequestMethod, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
use crate::services::datasource::Datasources;
use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part as FormPart};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: RequestMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

/// A fully resolved request: URLs and headers interpolated, body encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPlan {
    Http(HttpRequest),
    Datasource { reference: String, payload: JsonValue },
}

impl RequestPlan {
    pub fn describe(&self) -> String {
        match self {
            RequestPlan::Http(r) => format!("{} {}", r.method.as_str(), r.url),
            RequestPlan::Datasource { reference, .. } => format!("datasource {reference}"),
        }
    }
}

/// A failed request, kept for later hooks as `context.panel.error`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {
    pub message: String,
    pub status: Option<u16>,
}

impl RequestFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        json!({"message": self.message, "status": self.status})
    }
}

impl std::fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (HTTP {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Sends HTTP requests. Swappable so the panel can be driven without a
/// network.
pub trait Transport: Send + Sync {
    fn send(&self, req: &HttpRequest) -> std::result::Result<JsonValue, RequestFailure>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

fn form_from(body: &MultipartBody) -> Result<Form> {
    let mut form = Form::new();
    for part in &body.parts {
        form = match part {
            Part::Text { name, value } => form.text(name.clone(), value.clone()),
            Part::File { name, file } => {
                let bytes = file.read().map_err(|e| anyhow!("{e}"))?;
                let p = FormPart::bytes(bytes)
                    .file_name(file.name.clone())
                    .mime_str(file.mime_or_default())
                    .with_context(|| format!("content type of {}", file.name))?;
                form.part(name.clone(), p)
            }
        };
    }
    Ok(form)
}

fn method_of(m: RequestMethod) -> reqwest::Method {
    match m {
        RequestMethod::Post => reqwest::Method::POST,
        RequestMethod::Put => reqwest::Method::PUT,
        RequestMethod::Patch => reqwest::Method::PATCH,
        RequestMethod::Delete => reqwest::Method::DELETE,
        _ => reqwest::Method::GET,
    }
}

impl Transport for HttpTransport {
    fn send(&self, req: &HttpRequest) -> std::result::Result<JsonValue, RequestFailure> {
        info!(method = req.method.as_str(), url = %req.url, "sending request");
        let mut builder = self.client.request(method_of(req.method), &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        builder = match &req.body {
            Body::Empty => builder,
            Body::Json(text) => builder
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_JSON)
                .body(text.clone()),
            Body::Text(text) => builder
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_TEXT)
                .body(text.clone()),
            Body::Multipart(m) => {
                builder.multipart(form_from(m).map_err(|e| RequestFailure::new(e.to_string()))?)
            }
        };
        let resp = builder
            .send()
            .map_err(|e| RequestFailure::new(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().map_err(|e| RequestFailure::new(e.to_string()))?;
        let parsed = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));
        if !status.is_success() {
            let message = parsed
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "Request failed".to_string());
            return Err(RequestFailure {
                message,
                status: Some(status.as_u16()),
            });
        }
        Ok(parsed)
    }
}

/// Execute a plan with the given collaborators.
pub fn execute(
    plan: &RequestPlan,
    transport: &dyn Transport,
    datasources: &Datasources,
) -> std::result::Result<JsonValue, RequestFailure> {
    match plan {
        RequestPlan::Http(req) => transport.send(req),
        RequestPlan::Datasource { reference, payload } => datasources
            .query(reference, payload)
            .map_err(|e| RequestFailure::new(format!("{e:#}"))),
    }
}
