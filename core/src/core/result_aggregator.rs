use std::fs::File;
use std::io::Write;

use serde::{Deserialize, Serialize};

use super::finding::Finding;
use crate::errors::Result;
use crate::SinkRef;

/// Tallies of one fuzz run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub targets: usize,
    pub requests_sent: usize,
    pub suspicious: usize,
    pub new_findings: usize,
    pub already_known: usize,
}

impl RunSummary {
    pub fn has_new_findings(&self) -> bool {
        self.new_findings > 0
    }
}

/// Counts outcomes as they happen and reports new findings.
pub struct ResultAggregator {
    summary: RunSummary,
    output: Option<File>,
    sink: SinkRef,
}

impl ResultAggregator {
    pub fn new(sink: SinkRef) -> Self {
        Self {
            summary: RunSummary::default(),
            output: None,
            sink,
        }
    }

    /// Also appends every new finding as one JSON line to `path`.
    pub fn with_output(mut self, path: &str) -> Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        self.output = Some(file);
        Ok(self)
    }

    pub fn record_target(&mut self) {
        self.summary.targets += 1;
    }

    pub fn record_request(&mut self) {
        self.summary.requests_sent += 1;
    }

    pub fn record_known(&mut self, finding: &Finding) {
        self.summary.suspicious += 1;
        self.summary.already_known += 1;
        log::debug!("Known finding for {}: {}", finding.scenario_id, finding.summary());
    }

    pub fn record_new(&mut self, finding: &Finding) -> Result<()> {
        self.summary.suspicious += 1;
        self.summary.new_findings += 1;
        self.sink.on_finding(finding);

        if let Some(file) = self.output.as_mut() {
            writeln!(file, "{}", serde_json::to_string(finding)?)?;
        }
        Ok(())
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn finish(self) -> RunSummary {
        self.summary
    }

    pub fn report_summary(summary: &RunSummary, sink: &SinkRef) {
        sink.on_log(
            "phase",
            &format!(
                "[*] {} target(s), {} request(s), {} suspicious response(s)",
                summary.targets, summary.requests_sent, summary.suspicious
            ),
        );
        if summary.has_new_findings() {
            sink.on_log(
                "error",
                &format!(
                    "[!] {} new finding(s) stored, {} already known",
                    summary.new_findings, summary.already_known
                ),
            );
        } else if summary.already_known > 0 {
            sink.on_log(
                "warn",
                &format!("[+] No new findings ({} already known).", summary.already_known),
            );
        } else {
            sink.on_log("success", "[+] No findings.");
        }
    }
}
