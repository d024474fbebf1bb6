//! Request bodies and their `application/x-www-form-urlencoded` encoding.
//!
//! A body starts out either as [`RequestBody::Raw`] form data or as an
//! already encoded string. [`encode_form`] turns the former into the latter
//! and has no side effects, so [`HttpRequest`](crate::HttpRequest) decides
//! when encoding happens.

use url::form_urlencoded::Serializer;

use crate::{InvalidInput, StdResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    List(Vec<FormValue>),
    Map(FormData),
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl<T: Into<FormValue>> From<Vec<T>> for FormValue {
    fn from(values: Vec<T>) -> Self {
        FormValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<FormData> for FormValue {
    fn from(value: FormData) -> Self {
        FormValue::Map(value)
    }
}

/// Ordered form fields. Fields are encoded in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData(Vec<(String, FormValue)>);

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FormValue>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FormValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl<K, V> FromIterator<(K, V)> for FormData
where
    K: Into<String>,
    V: Into<FormValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for FormData
where
    K: Into<String>,
    V: Into<FormValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Objects convert field by field and arrays use their indexes as keys.
/// `null` entries are dropped and booleans become `1` / `0`. Any other
/// top-level value is rejected.
impl TryFrom<serde_json::Value> for FormData {
    type Error = InvalidInput;

    fn try_from(value: serde_json::Value) -> StdResult<Self, Self::Error> {
        match json_to_form_value(value) {
            Some(FormValue::Map(data)) => Ok(data),
            _ => Err(InvalidInput::ArrayExpected),
        }
    }
}

fn json_to_form_value(value: serde_json::Value) -> Option<FormValue> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(FormValue::Text(if b { "1" } else { "0" }.to_string())),
        Value::Number(n) => Some(FormValue::Text(n.to_string())),
        Value::String(s) => Some(FormValue::Text(s)),
        // keep indexes stable across dropped nulls
        Value::Array(items) => Some(FormValue::Map(
            items
                .into_iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    json_to_form_value(item).map(|item| (index.to_string(), item))
                })
                .collect(),
        )),
        Value::Object(fields) => Some(FormValue::Map(
            fields
                .into_iter()
                .filter_map(|(key, item)| json_to_form_value(item).map(|item| (key, item)))
                .collect(),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Form fields not yet encoded.
    Raw(FormData),
    /// A body ready to be sent as is.
    Encoded(String),
}

impl RequestBody {
    /// Encodes raw form data. Already encoded bodies are returned unchanged.
    pub fn encode(self) -> String {
        match self {
            RequestBody::Raw(data) => encode_form(&data),
            RequestBody::Encoded(body) => body,
        }
    }

    pub fn as_encoded(&self) -> Option<&str> {
        match self {
            RequestBody::Encoded(body) => Some(body),
            RequestBody::Raw(_) => None,
        }
    }
}

impl From<FormData> for RequestBody {
    fn from(data: FormData) -> Self {
        RequestBody::Raw(data)
    }
}

impl From<String> for RequestBody {
    fn from(body: String) -> Self {
        RequestBody::Encoded(body)
    }
}

impl From<&str> for RequestBody {
    fn from(body: &str) -> Self {
        RequestBody::Encoded(body.to_string())
    }
}

/// Encodes form data as `key=value&key=value`.
///
/// Nested values flatten to bracket-indexed keys: `tags[0]=a&tags[1]=b` for
/// lists and `user[name]=x` for maps. Empty lists and maps produce no pair.
pub fn encode_form(data: &FormData) -> String {
    let mut serializer = Serializer::new(String::new());
    for (key, value) in data.iter() {
        append_value(&mut serializer, key, value);
    }
    serializer.finish()
}

fn append_value(serializer: &mut Serializer<'_, String>, key: &str, value: &FormValue) {
    match value {
        FormValue::Text(text) => {
            serializer.append_pair(key, text);
        }
        FormValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                append_value(serializer, &format!("{}[{}]", key, index), item);
            }
        }
        FormValue::Map(fields) => {
            for (field, item) in fields.iter() {
                append_value(serializer, &format!("{}[{}]", key, field), item);
            }
        }
    }
}
