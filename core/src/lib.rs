pub mod core;
pub mod errors;
pub mod http;
pub mod oracle;
pub mod utils;

#[cfg(test)]
pub(crate) mod tests_support;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};

pub use crate::core::classifier::{classify, Policy, Suspicion, Verdict};
pub use crate::core::collector::{PoolKey, ValuePool};
pub use crate::core::engine::{FuzzEngine, TargetPlan};
pub use crate::core::expander::{AnomalyExpander, FieldPath, InjectedField, InjectedSubmission};
pub use crate::core::finding::{Finding, Fingerprint};
pub use crate::core::result_aggregator::{ResultAggregator, RunSummary};
pub use crate::core::store::{FindingBackend, FindingStore};
pub use crate::core::submission::{Scalar, Submission, SubmissionType};
pub use crate::core::target_manager::{Target, TargetConfig, TargetManager};
pub use crate::errors::{FuzzError, Result};
pub use crate::http::{HttpClient, Outcome, Transport};
pub use crate::oracle::{MutationOracle, MutationSet, RadamsaOracle, RoundMutations};
pub use crate::utils::static_catalog::StaticCatalog;

pub const DEFAULT_BODY_ERRORS: &[&str] = &[
    "string",
    "server error",
    "invalid response",
    "bad gateway",
    "internal ASP error",
    "service unavailable",
    "exceeded",
    "premature",
    "fatal error",
    "proxy error",
    "database error",
    "backend error",
    "mysql",
    "root:",
    "parse error",
    "exhausted",
    "warning",
    "denied",
];

/// Fuzz run configuration, read from a JSON file and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FuzzConfig {
    pub methods: Vec<String>,
    pub allowed_status_codes: Vec<u16>,
    pub disallowed_status_codes: Vec<u16>,
    pub body_error_patterns: Vec<String>,
    /// Mutation rounds requested from the oracle per target
    pub anomalies: usize,
    pub timeout_seconds: u64,
    pub radamsa_path: Option<String>,
    /// SQLite path or `:memory:`; unset means findings cannot be stored
    pub database: Option<String>,
    pub static_anomalies: bool,
    pub static_payloads: Option<String>,
    /// `Name: value; Other: value`
    pub headers: String,
    pub proxy: String,
    pub fail_on_unprocessed: bool,
    /// JSON lines file receiving every new finding
    pub output: Option<String>,
    pub targets: Vec<TargetConfig>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_status_codes: vec![200, 404],
            disallowed_status_codes: Vec::new(),
            body_error_patterns: DEFAULT_BODY_ERRORS.iter().map(|s| s.to_string()).collect(),
            anomalies: 1,
            timeout_seconds: 30,
            radamsa_path: None,
            database: None,
            static_anomalies: true,
            static_payloads: None,
            headers: String::new(),
            proxy: String::new(),
            fail_on_unprocessed: true,
            output: None,
            targets: Vec::new(),
        }
    }
}

impl FuzzConfig {
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        utils::parse_custom_headers(&self.headers)
    }

    pub fn parsed_methods(&self) -> Result<Vec<Method>> {
        self.methods
            .iter()
            .map(|m| crate::core::target_manager::parse_method(m).map_err(FuzzError::Config))
            .collect()
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        if self.proxy.is_empty() { None } else { Some(&self.proxy) }
    }
}

/// Output abstraction for the fuzz pipeline.
pub trait FuzzEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, finding: &Finding);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn FuzzEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl FuzzEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        println!("{}", colored);
    }

    fn on_finding(&self, finding: &Finding) {
        use colored::*;
        println!(
            "\n{} New finding in {}",
            "[+]".red().bold(),
            finding.scenario_id.bold()
        );
        println!("    Request:  {} {}", finding.request_method, finding.url.white());
        println!("    Injected: {}", finding.injected_field.bright_yellow());
        println!("    Result:   {}", finding.summary().cyan());
        println!("{}", "──────────────────────────────────────────".dimmed());
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        if total > 0 {
            println!("{}", format!("[*] {} ({}/{})", phase, current, total).bright_cyan());
        } else {
            println!("{}", format!("[*] {}", phase).bright_cyan());
        }
    }
}
