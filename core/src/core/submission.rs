use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use url::form_urlencoded;

use crate::errors::{FuzzError, Result};

/// Wire format a target accepts its submission in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionType {
    /// `key=v1,v2;key2=v3`, sent as the URL query string
    #[serde(alias = "urlparams", alias = "url-parameters")]
    QueryParams,
    /// `a=1&a=2&b=3`, sent as an `application/x-www-form-urlencoded` body
    #[serde(alias = "urlencode", alias = "form")]
    UrlEncodedForm,
    /// Any JSON document, sent as an `application/json` body
    Json,
}

impl SubmissionType {
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            SubmissionType::QueryParams => None,
            SubmissionType::UrlEncodedForm => Some("application/x-www-form-urlencoded; charset=utf-8"),
            SubmissionType::Json => Some("application/json"),
        }
    }
}

impl std::fmt::Display for SubmissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionType::QueryParams => write!(f, "query-params"),
            SubmissionType::UrlEncodedForm => write!(f, "url-encoded-form"),
            SubmissionType::Json => write!(f, "json"),
        }
    }
}

/// A leaf value. Mutations arrive as raw bytes and are kept that way until
/// a wire format decides how to render them.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Textual byte form, as fed to the mutation oracle and form encoders.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Scalar::Null => Vec::new(),
            Scalar::Bool(b) => b.to_string().into_bytes(),
            Scalar::Number(n) => n.to_string().into_bytes(),
            Scalar::String(s) => s.as_bytes().to_vec(),
            Scalar::Bytes(b) => b.clone(),
        }
    }

    /// Text form; invalid UTF-8 is decoded byte-for-byte as Latin-1.
    pub fn to_text(&self) -> String {
        match self {
            Scalar::String(s) => s.clone(),
            Scalar::Bytes(b) => bytes_to_text(b),
            other => String::from_utf8_lossy(&other.to_bytes()).into_owned(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::String(s) => Value::String(s.clone()),
            Scalar::Bytes(b) => Value::String(bytes_to_text(b)),
        }
    }
}

/// Renders mutated bytes as text without losing any byte.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// A structured submission: scalar, ordered list or ordered keyed map.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Scalar(Scalar),
    List(Vec<Submission>),
    Map(IndexMap<String, Submission>),
}

impl Submission {
    pub fn string(value: &str) -> Self {
        Submission::Scalar(Scalar::String(value.to_string()))
    }

    pub fn bytes(value: &[u8]) -> Self {
        Submission::Scalar(Scalar::Bytes(value.to_vec()))
    }

    /// Parses a raw valid submission according to its wire format.
    pub fn parse(raw: &str, kind: SubmissionType) -> Result<Self> {
        match kind {
            SubmissionType::QueryParams => parse_query_params(raw),
            SubmissionType::UrlEncodedForm => Ok(parse_form(raw)),
            SubmissionType::Json => {
                let value: Value = serde_json::from_str(raw).map_err(|e| FuzzError::MalformedSubmission {
                    format: "json",
                    detail: e.to_string(),
                })?;
                Ok(Submission::from(&value))
            }
        }
    }

    /// Serialises the submission into its wire format.
    pub fn encode(&self, kind: SubmissionType) -> Result<String> {
        match kind {
            SubmissionType::QueryParams => self.to_query_params(),
            SubmissionType::UrlEncodedForm => self.to_form(),
            SubmissionType::Json => Ok(self.to_json_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Submission::Scalar(s) => s.to_json(),
            Submission::List(items) => Value::Array(items.iter().map(Submission::to_json).collect()),
            Submission::Map(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// `key=v1,v2;key2=v3`; null values render as empty.
    pub fn to_query_params(&self) -> Result<String> {
        let map = self.top_level_map("query-params")?;
        let mut params = Vec::with_capacity(map.len());
        for (key, value) in map {
            let values = flat_values(value, "query-params", key)?
                .into_iter()
                .map(|v| encode_bytes(&v))
                .collect::<Vec<_>>();
            params.push(format!("{}={}", encode_bytes(key.as_bytes()), values.join(",")));
        }
        Ok(params.join(";"))
    }

    /// `a=1&a=2&b=3`; list values repeat their key.
    pub fn to_form(&self) -> Result<String> {
        let map = self.top_level_map("url-encoded-form")?;
        let mut pairs = Vec::new();
        for (key, value) in map {
            let encoded_key = encode_bytes(key.as_bytes());
            for v in flat_values(value, "url-encoded-form", key)? {
                pairs.push(format!("{}={}", encoded_key, encode_bytes(&v)));
            }
        }
        Ok(pairs.join("&"))
    }

    fn top_level_map(&self, context: &'static str) -> Result<&IndexMap<String, Submission>> {
        match self {
            Submission::Map(map) => Ok(map),
            Submission::List(_) => Err(FuzzError::UnsupportedNode {
                context,
                detail: "top level must be a map, found a list".to_string(),
            }),
            Submission::Scalar(_) => Err(FuzzError::UnsupportedNode {
                context,
                detail: "top level must be a map, found a scalar".to_string(),
            }),
        }
    }
}

impl From<&Value> for Submission {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Submission::Scalar(Scalar::Null),
            Value::Bool(b) => Submission::Scalar(Scalar::Bool(*b)),
            Value::Number(n) => Submission::Scalar(Scalar::Number(n.clone())),
            Value::String(s) => Submission::Scalar(Scalar::String(s.clone())),
            Value::Array(items) => Submission::List(items.iter().map(Submission::from).collect()),
            Value::Object(map) => Submission::Map(
                map.iter().map(|(k, v)| (k.clone(), Submission::from(v))).collect(),
            ),
        }
    }
}

/// Values of one flat-format key: a scalar, or a list of scalars.
fn flat_values(value: &Submission, context: &'static str, key: &str) -> Result<Vec<Vec<u8>>> {
    match value {
        Submission::Scalar(s) => Ok(vec![s.to_bytes()]),
        Submission::List(items) => items
            .iter()
            .map(|item| match item {
                Submission::Scalar(s) => Ok(s.to_bytes()),
                _ => Err(FuzzError::UnsupportedNode {
                    context,
                    detail: format!("nested structure under key '{}'", key),
                }),
            })
            .collect(),
        Submission::Map(_) => Err(FuzzError::UnsupportedNode {
            context,
            detail: format!("nested map under key '{}'", key),
        }),
    }
}

fn encode_bytes(bytes: &[u8]) -> String {
    form_urlencoded::byte_serialize(bytes).collect()
}

fn decode_component(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

fn parse_query_params(raw: &str) -> Result<Submission> {
    let mut map = IndexMap::new();
    for pair in raw.split(';').filter(|p| !p.is_empty()) {
        let (key, values) = pair.split_once('=').ok_or_else(|| FuzzError::MalformedSubmission {
            format: "query-params",
            detail: format!("pair '{}' has no '='", pair),
        })?;
        let list = values
            .split(',')
            .map(|v| Submission::string(&decode_component(v)))
            .collect();
        map.insert(decode_component(key), Submission::List(list));
    }
    Ok(Submission::Map(map))
}

fn parse_form(raw: &str) -> Submission {
    let mut grouped: IndexMap<String, Vec<Submission>> = IndexMap::new();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        grouped
            .entry(key.into_owned())
            .or_default()
            .push(Submission::string(&value));
    }
    Submission::Map(
        grouped
            .into_iter()
            .map(|(k, v)| (k, Submission::List(v)))
            .collect(),
    )
}
