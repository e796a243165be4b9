use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};

use crate::errors::{FuzzError, Result};
use crate::http::Outcome;
use crate::FuzzConfig;

/// Decides which responses count as suspicious.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Empty means any status is allowed
    pub allowed_status_codes: BTreeSet<u16>,
    /// Empty means no status is disallowed
    pub disallowed_status_codes: BTreeSet<u16>,
    body_error_patterns: Vec<Regex>,
}

impl Policy {
    /// Compiles the body patterns once; matching is case-insensitive.
    pub fn new(
        allowed_status_codes: impl IntoIterator<Item = u16>,
        disallowed_status_codes: impl IntoIterator<Item = u16>,
        body_error_patterns: &[String],
    ) -> Result<Self> {
        let body_error_patterns = body_error_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| FuzzError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            allowed_status_codes: allowed_status_codes.into_iter().collect(),
            disallowed_status_codes: disallowed_status_codes.into_iter().collect(),
            body_error_patterns,
        })
    }

    pub fn from_config(config: &FuzzConfig) -> Result<Self> {
        Self::new(
            config.allowed_status_codes.iter().copied(),
            config.disallowed_status_codes.iter().copied(),
            &config.body_error_patterns,
        )
    }

    /// The policy the unmodified submission must pass: allow-list only.
    pub fn for_valid_case(&self) -> Self {
        Self {
            allowed_status_codes: self.allowed_status_codes.clone(),
            disallowed_status_codes: BTreeSet::new(),
            body_error_patterns: Vec::new(),
        }
    }

    pub fn body_error_patterns(&self) -> impl Iterator<Item = &str> {
        self.body_error_patterns.iter().map(Regex::as_str)
    }
}

/// Why an outcome was judged suspicious.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suspicion {
    TransportFailure,
    StatusNotAllowed(u16),
    StatusDisallowed(u16),
    BodyErrorMatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub suspicious: bool,
    pub reason: Option<Suspicion>,
    /// Texts of every body pattern that matched, in policy order
    pub matched_patterns: Vec<String>,
}

impl Verdict {
    fn benign() -> Self {
        Self::default()
    }

    fn suspicious(reason: Suspicion) -> Self {
        Self {
            suspicious: true,
            reason: Some(reason),
            matched_patterns: Vec::new(),
        }
    }

    /// Matched patterns joined the way they are stored in findings.
    pub fn matched_text(&self) -> String {
        self.matched_patterns.join(", ")
    }
}

/// Applies the rules in order; the first one that fires decides.
pub fn classify(outcome: &Outcome, policy: &Policy) -> Verdict {
    let response = match outcome {
        Outcome::Failure(_) => return Verdict::suspicious(Suspicion::TransportFailure),
        Outcome::Response(response) => response,
    };

    let status = response.status;
    if !policy.allowed_status_codes.is_empty() && !policy.allowed_status_codes.contains(&status) {
        return Verdict::suspicious(Suspicion::StatusNotAllowed(status));
    }
    if policy.disallowed_status_codes.contains(&status) {
        return Verdict::suspicious(Suspicion::StatusDisallowed(status));
    }

    let matched: Vec<String> = policy
        .body_error_patterns
        .iter()
        .filter(|re| re.is_match(&response.body))
        .map(|re| re.as_str().to_string())
        .collect();
    if !matched.is_empty() {
        return Verdict {
            suspicious: true,
            reason: Some(Suspicion::BodyErrorMatched),
            matched_patterns: matched,
        };
    }

    Verdict::benign()
}
