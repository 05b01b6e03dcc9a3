//! Response validation for 2xx responses
//!
//! A response can arrive with a 2xx status and still be useless: an HTML
//! captcha page, an `{"error": ...}` payload, or JSON without any results.
//! Such responses are recorded as transport errors with the reason as detail.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a successful response must look like
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseCheck {
    /// Reject bodies shorter than this many bytes
    #[serde(default)]
    pub min_size: u64,

    /// Body must be JSON (and not served as `text/html`)
    #[serde(default)]
    pub expect_json: bool,

    /// Reject the response when this top-level field is present and not null
    #[serde(default)]
    pub error_field: Option<String>,

    /// At least one of these top-level fields must be present
    #[serde(default)]
    pub require_any: Vec<String>,

    /// Values to copy into the outcome, by name -> JSON pointer
    #[serde(default)]
    pub extract: BTreeMap<String, String>,
}

impl ResponseCheck {
    /// Plain JSON API expectations with an `error` field
    pub fn json_api() -> Self {
        Self {
            expect_json: true,
            error_field: Some("error".to_string()),
            ..Default::default()
        }
    }

    pub fn requiring_any<I, T>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.require_any = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn extracting(mut self, name: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.extract.insert(name.into(), pointer.into());
        self
    }

    fn needs_json(&self) -> bool {
        self.expect_json
            || self.error_field.is_some()
            || !self.require_any.is_empty()
            || !self.extract.is_empty()
    }

    /// Returns the extracted fields, or why the response was rejected
    pub fn evaluate(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> std::result::Result<BTreeMap<String, String>, String> {
        if (body.len() as u64) < self.min_size {
            return Err(format!(
                "response too small: {} bytes, expected at least {}",
                body.len(),
                self.min_size
            ));
        }
        if !self.needs_json() {
            return Ok(BTreeMap::new());
        }

        if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html")) {
            return Err("unexpected HTML response".to_string());
        }
        let json: Value =
            serde_json::from_slice(body).map_err(|e| format!("JSON decode error: {}", e))?;

        if let Some(field) = &self.error_field {
            match json.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(message)) => return Err(message.clone()),
                Some(other) => return Err(other.to_string()),
            }
        }

        if !self.require_any.is_empty()
            && !self.require_any.iter().any(|field| json.get(field).is_some())
        {
            return Err("no result fields in response".to_string());
        }

        Ok(self
            .extract
            .iter()
            .filter_map(|(name, pointer)| {
                json.pointer(pointer).map(|value| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), value)
                })
            })
            .collect())
    }
}
