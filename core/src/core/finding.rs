use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classifier::Verdict;
use crate::http::{headers_to_json, HttpRequest, Outcome, TransportErrorKind};

/// A suspicious outcome, as persisted in the findings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Assigned by the store on insert
    pub issue_no: Option<i64>,
    pub is_new: bool,
    pub timestamp: DateTime<Utc>,
    pub runner_host: String,
    pub scenario_id: String,
    pub url: String,
    pub injected_field: String,
    pub request_method: String,
    pub request_headers: String,
    pub request_body: String,
    /// Empty when no response arrived
    pub response_status: String,
    pub response_headers: String,
    pub response_body: String,
    pub response_history: String,
    pub protocol_error: String,
    pub timed_out: bool,
    pub body_error_detected: bool,
    pub body_error_matched: String,
}

/// The response attributes that identify one underlying defect.
///
/// Two findings with equal fingerprints are the same defect, whatever
/// payload or raw body triggered them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub scenario_id: String,
    pub request_method: String,
    pub response_status: String,
    pub protocol_error: String,
    pub body_error_matched: String,
    pub timed_out: bool,
}

impl Finding {
    pub fn from_outcome(
        scenario_id: &str,
        injected_field: &str,
        request: &HttpRequest,
        outcome: &Outcome,
        verdict: &Verdict,
        runner_host: &str,
    ) -> Self {
        let mut finding = Finding {
            issue_no: None,
            is_new: true,
            timestamp: Utc::now(),
            runner_host: runner_host.to_string(),
            scenario_id: scenario_id.to_string(),
            url: request.url.to_string(),
            injected_field: injected_field.to_string(),
            request_method: request.method.to_string(),
            request_headers: request.headers_json(),
            request_body: request.body.clone(),
            response_status: String::new(),
            response_headers: String::new(),
            response_body: String::new(),
            response_history: String::new(),
            protocol_error: String::new(),
            timed_out: false,
            body_error_detected: !verdict.matched_patterns.is_empty(),
            body_error_matched: verdict.matched_text(),
        };

        match outcome {
            Outcome::Response(response) => {
                finding.response_status = response.status.to_string();
                finding.response_headers = headers_to_json(&response.headers);
                finding.response_body = response.body.clone();
                finding.response_history = response.final_url.clone().unwrap_or_default();
            }
            Outcome::Failure(error) if error.kind == TransportErrorKind::Timeout => {
                finding.timed_out = true;
            }
            Outcome::Failure(error) => {
                finding.protocol_error = error.to_string();
            }
        }

        finding
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            scenario_id: self.scenario_id.clone(),
            request_method: self.request_method.clone(),
            response_status: self.response_status.clone(),
            protocol_error: self.protocol_error.clone(),
            body_error_matched: self.body_error_matched.clone(),
            timed_out: self.timed_out,
        }
    }

    /// Request as a readable text block.
    pub fn raw_request(&self) -> String {
        format!(
            "{} {}\nheaders: {}\n\n{}",
            self.request_method, self.url, self.request_headers, self.request_body
        )
    }

    /// Response, or the transport failure, as a readable text block.
    pub fn raw_response(&self) -> String {
        if self.timed_out {
            return "<timed out>".to_string();
        }
        if !self.protocol_error.is_empty() {
            return format!("<{}>", self.protocol_error);
        }
        format!(
            "status {}\nheaders: {}\n\n{}",
            self.response_status, self.response_headers, self.response_body
        )
    }

    /// Short label used in console output.
    pub fn summary(&self) -> String {
        if self.timed_out {
            "timeout".to_string()
        } else if !self.protocol_error.is_empty() {
            self.protocol_error.clone()
        } else if self.body_error_detected {
            format!("status {} | body matched: {}", self.response_status, self.body_error_matched)
        } else {
            format!("status {}", self.response_status)
        }
    }
}
