use std::{collections::HashMap, convert::Infallible, str::FromStr, time::Duration};

use bytes::Bytes;
use serde::Serialize;

use crate::StdResult;

/// Out-of-band information about a finished call.
///
/// `status` is `None` and `error` is set when the transport failed before a
/// response arrived. Non-2xx statuses are not failures at this layer and are
/// reported here like any other status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseInfo {
    pub url: String,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    /// Lower-case header names, each value kept separately in arrival order.
    pub headers: HashMap<String, Vec<String>>,
    pub total_time: Duration,
    pub size_upload: u64,
    pub size_download: u64,
    pub error: Option<String>,
}

impl ResponseInfo {
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|status| (200..300).contains(&status))
    }
}

/// The result of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    /// The payload decoded as UTF-8. Invalid sequences are replaced with
    /// U+FFFD; `raw` holds the bytes as received.
    pub body: Option<String>,
    #[serde(skip)]
    pub raw: Bytes,
    pub info: ResponseInfo,
}

impl Completion {
    pub fn failed(url: impl Into<String>, error: impl ToString, total_time: Duration) -> Self {
        Self {
            body: None,
            raw: Bytes::new(),
            info: ResponseInfo {
                url: url.into(),
                total_time,
                error: Some(error.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn json(&self) -> serde_json::Value {
        parse_json(self.body.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Raw,
    Json,
}

/// `"json"` selects [`ResponseFormat::Json`], anything else the raw body.
impl FromStr for ResponseFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Ok(match s {
            "json" => ResponseFormat::Json,
            _ => ResponseFormat::Raw,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody<'a> {
    Raw(&'a str),
    Json(serde_json::Value),
}

/// Malformed or missing JSON yields `Value::Null`.
fn parse_json(body: Option<&str>) -> serde_json::Value {
    body.and_then(|body| serde_json::from_str(body).ok())
        .unwrap_or(serde_json::Value::Null)
}
