use std::collections::HashSet;

use log::warn;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::submission::{Submission, SubmissionType};
use crate::errors::{FuzzError, Result};
use crate::http::client::VALID_CASE_HEADER;
use crate::http::HttpRequest;

/// A target as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    pub scenario_id: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub uri: String,
    pub submission_type: SubmissionType,
    pub valid_submission: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// One endpoint under test with its parsed valid submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub scenario_id: String,
    /// Method of the valid case
    pub method: Method,
    pub uri: Url,
    pub submission_type: SubmissionType,
    pub valid_submission: Submission,
}

impl Target {
    pub fn from_config(config: &TargetConfig) -> Result<Self> {
        let invalid = |reason: String| FuzzError::InvalidTarget {
            scenario_id: config.scenario_id.clone(),
            reason,
        };

        if config.scenario_id.trim().is_empty() {
            return Err(invalid("scenario id is empty".to_string()));
        }
        let method = parse_method(&config.method).map_err(invalid)?;
        let uri = Url::parse(&config.uri).map_err(|e| invalid(format!("bad uri '{}': {}", config.uri, e)))?;
        let valid_submission = Submission::parse(&config.valid_submission, config.submission_type)?;

        Ok(Self {
            scenario_id: config.scenario_id.clone(),
            method,
            uri,
            submission_type: config.submission_type,
            valid_submission,
        })
    }

    /// Places the submission where its format belongs: the query string
    /// for query parameters, the body otherwise.
    pub fn build_request(&self, method: &Method, submission: &Submission, valid_case: bool) -> Result<HttpRequest> {
        let encoded = submission.encode(self.submission_type)?;
        let mut url = self.uri.clone();
        let mut headers = HeaderMap::new();
        let mut body = String::new();

        match self.submission_type {
            SubmissionType::QueryParams => {
                let query = match self.uri.query() {
                    Some(existing) if !existing.is_empty() => format!("{}&{}", existing, encoded),
                    _ => encoded,
                };
                url.set_query(Some(&query));
            }
            SubmissionType::UrlEncodedForm | SubmissionType::Json => {
                if let Some(content_type) = self.submission_type.content_type() {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                body = encoded;
            }
        }

        if valid_case {
            headers.insert(VALID_CASE_HEADER, HeaderValue::from_static("1"));
        }

        Ok(HttpRequest::new(method.clone(), url, headers, body))
    }
}

pub fn parse_method(raw: &str) -> std::result::Result<Method, String> {
    Method::from_bytes(raw.trim().to_uppercase().as_bytes()).map_err(|_| format!("bad method '{}'", raw))
}

/// Ordered target list, deduplicated by scenario id.
#[derive(Debug, Default)]
pub struct TargetManager {
    targets: Vec<Target>,
    seen: HashSet<String>,
}

impl TargetManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[TargetConfig]) -> Result<Self> {
        let mut manager = Self::new();
        for config in configs {
            manager.add_target(Target::from_config(config)?);
        }
        Ok(manager)
    }

    /// Adds a target unless its scenario id is already taken.
    pub fn add_target(&mut self, target: Target) -> bool {
        if !self.seen.insert(target.scenario_id.clone()) {
            warn!("Duplicate scenario id {}, keeping the first target", target.scenario_id);
            return false;
        }
        self.targets.push(target);
        true
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl<'a> IntoIterator for &'a TargetManager {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
