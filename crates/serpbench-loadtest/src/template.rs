//! HTTP request templates
//!
//! Any string in a template may contain `{query}` (the raw keyword) or
//! `{query_encoded}` (form-urlencoded). Substitution covers the URL, static
//! query parameters, header values and every string leaf of a JSON body.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{BenchError, Result};

/// How to build one request for a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Static query parameters appended to the URL
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// When set, the keyword is appended as `?<query_param>=<keyword>`
    #[serde(default)]
    pub query_param: Option<String>,

    /// JSON body sent with the request
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// A fully substituted request, ready to send
#[derive(Debug, Clone)]
pub struct RenderedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestTemplate {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            query_param: None,
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: "POST".to_string(),
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>) -> Self {
        self.query_param = Some(name.into());
        self
    }

    /// Substitute `query` into the template
    pub fn render(&self, query: &str) -> Result<RenderedRequest> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| BenchError::Template(format!("invalid HTTP method '{}'", self.method)))?;

        let encoded = encode(query);
        let mut url = Url::parse(&substitute(&self.url, query, &encoded))
            .map_err(|e| BenchError::Template(format!("invalid URL '{}': {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BenchError::Template(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        if !self.params.is_empty() || self.query_param.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.params {
                pairs.append_pair(name, &substitute(value, query, &encoded));
            }
            if let Some(name) = &self.query_param {
                pairs.append_pair(name, query);
            }
        }

        let headers = self
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), substitute(value, query, &encoded)))
            .collect();

        let body = self.body.as_ref().map(|body| {
            let mut body = body.clone();
            substitute_value(&mut body, query, &encoded);
            body
        });

        Ok(RenderedRequest {
            method,
            url,
            headers,
            body,
        })
    }

    /// Check that the template renders at all
    pub fn validate(&self) -> Result<()> {
        self.render("sample").map(|_| ())
    }
}

fn encode(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

fn substitute(template: &str, query: &str, encoded: &str) -> String {
    template
        .replace("{query_encoded}", encoded)
        .replace("{query}", query)
}

fn substitute_value(value: &mut Value, query: &str, encoded: &str) {
    match value {
        Value::String(s) => *s = substitute(s, query, encoded),
        Value::Array(items) => {
            for item in items {
                substitute_value(item, query, encoded);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_value(item, query, encoded);
            }
        }
        _ => {}
    }
}
