use thiserror::Error;

/// Errors that abort a fuzz run.
///
/// Suspicious responses and transport failures during injection are not
/// errors: they flow into classification and end up as findings.
#[derive(Error, Debug)]
pub enum FuzzError {
    /// A submission shape that the requested operation cannot express
    #[error("Unsupported node in {context}: {detail}")]
    UnsupportedNode { context: &'static str, detail: String },

    /// A valid submission that does not parse in its declared format
    #[error("Malformed {format} submission: {detail}")]
    MalformedSubmission { format: &'static str, detail: String },

    /// The mutation set has no catch-all entry to fall back on
    #[error("No catch-all mutation available for round {round}")]
    MissingMutation { round: usize },

    /// The external mutation binary is missing or failed
    #[error("Could not execute mutation oracle {path}: {reason}")]
    MutationOracle { path: String, reason: String },

    /// The unmodified submission already looked suspicious
    #[error("The valid case for {scenario_id} failed ({detail}), check that the target is up and reachable")]
    ValidCaseFailed {
        scenario_id: String,
        detail: String,
        raw_response: String,
    },

    /// A finding had to be stored but no findings database is in use
    #[error("Response from server failed a check, and no findings database is in use (scenario id = {scenario_id}, url = {url})")]
    StorageUnavailable { scenario_id: String, url: String },

    #[error("{0} unprocessed finding(s) from past runs found in database")]
    UnprocessedFindings(usize),

    #[error("Invalid body error pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid target {scenario_id}: {reason}")]
    InvalidTarget { scenario_id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Findings database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = FuzzError> = std::result::Result<T, E>;
