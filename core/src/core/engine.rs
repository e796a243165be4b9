use std::sync::Arc;

use log::{debug, info};
use reqwest::Method;
use serde::Serialize;

use crate::core::classifier::{classify, Policy};
use crate::core::collector::ValuePool;
use crate::core::expander::AnomalyExpander;
use crate::core::finding::Finding;
use crate::core::result_aggregator::{ResultAggregator, RunSummary};
use crate::core::store::FindingStore;
use crate::core::target_manager::{Target, TargetManager};
use crate::errors::{FuzzError, Result};
use crate::http::{HttpClient, Outcome, Transport};
use crate::oracle::{MutationOracle, RadamsaOracle, RoundMutations};
use crate::utils::{self, static_catalog::StaticCatalog};
use crate::{FuzzConfig, SinkRef};

/// Request budget of one target, computed without sending anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPlan {
    pub scenario_id: String,
    pub variants_per_round: usize,
    pub dynamic_rounds: usize,
    pub static_rounds: usize,
    pub methods: Vec<String>,
    /// Valid case included
    pub requests: usize,
}

/// Drives injection against every target, one request at a time.
///
/// Per target:
/// 1. Sends the unmodified submission; it must pass the allow-list
/// 2. Collects valid values and asks the oracle for mutation rounds
/// 3. Expands every round (dynamic, then static) into single-field variants
/// 4. Replays each variant under every method and classifies the outcome
/// 5. Stores suspicious outcomes whose fingerprint is not yet known
pub struct FuzzEngine {
    targets: TargetManager,
    transport: Arc<dyn Transport>,
    oracle: Option<Arc<dyn MutationOracle>>,
    catalog: StaticCatalog,
    policy: Policy,
    store: FindingStore,
    sink: SinkRef,
    methods: Vec<Method>,
    anomalies: usize,
    fail_on_unprocessed: bool,
    runner_host: String,
    output: Option<String>,
}

impl FuzzEngine {
    pub fn new(
        targets: TargetManager,
        transport: Arc<dyn Transport>,
        policy: Policy,
        store: FindingStore,
        sink: SinkRef,
    ) -> Self {
        Self {
            targets,
            transport,
            oracle: None,
            catalog: StaticCatalog::empty(),
            policy,
            store,
            sink,
            methods: Vec::new(),
            anomalies: 1,
            fail_on_unprocessed: true,
            runner_host: utils::runner_host(),
            output: None,
        }
    }

    /// Wires the HTTP client, Radamsa, the static catalog, the policy and
    /// the findings store from `config`.
    ///
    /// Radamsa is only looked up when dynamic anomalies are requested.
    pub async fn from_config(config: &FuzzConfig, sink: SinkRef) -> Result<Self> {
        let targets = TargetManager::from_configs(&config.targets)?;
        let policy = Policy::from_config(config)?;
        let client = HttpClient::new(config.timeout(), config.proxy_ref(), &config.parsed_headers())?;
        let store = FindingStore::init(config.database.as_deref())?;

        let mut catalog = StaticCatalog::empty();
        if config.static_anomalies {
            catalog = StaticCatalog::builtin();
            if let Some(path) = &config.static_payloads {
                catalog.extend_from_file(path)?;
            }
        }

        let mut engine = Self::new(targets, Arc::new(client), policy, store, sink)
            .with_catalog(catalog)
            .with_methods(config.parsed_methods()?)
            .with_anomalies(config.anomalies)
            .fail_on_unprocessed(config.fail_on_unprocessed);

        if config.anomalies > 0 {
            let oracle = match &config.radamsa_path {
                Some(path) => RadamsaOracle::new(path).await?,
                None => RadamsaOracle::discover().await?,
            };
            engine = engine.with_oracle(Arc::new(oracle));
        }
        if let Some(path) = &config.output {
            engine = engine.with_output(path.clone());
        }
        Ok(engine)
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn MutationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_catalog(mut self, catalog: StaticCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Methods every variant is replayed under; empty means the target's own.
    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_anomalies(mut self, anomalies: usize) -> Self {
        self.anomalies = anomalies;
        self
    }

    pub fn fail_on_unprocessed(mut self, enabled: bool) -> Self {
        self.fail_on_unprocessed = enabled;
        self
    }

    pub fn with_runner_host(mut self, host: impl Into<String>) -> Self {
        self.runner_host = host.into();
        self
    }

    /// Appends new findings as JSON lines to `path`.
    pub fn with_output(mut self, path: impl Into<String>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn store(&self) -> &FindingStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FindingStore {
        &mut self.store
    }

    pub fn into_store(self) -> FindingStore {
        self.store
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        if self.fail_on_unprocessed {
            let pending = self.store.count_new()?;
            if pending > 0 {
                return Err(FuzzError::UnprocessedFindings(pending));
            }
        }

        let mut aggregator = ResultAggregator::new(Arc::clone(&self.sink));
        if let Some(path) = &self.output {
            aggregator = aggregator.with_output(path)?;
        }

        let targets = std::mem::take(&mut self.targets);
        let result = self.run_targets(&targets, &mut aggregator).await;
        self.targets = targets;
        result?;

        let summary = aggregator.finish();
        ResultAggregator::report_summary(&summary, &self.sink);
        Ok(summary)
    }

    async fn run_targets(&mut self, targets: &TargetManager, aggregator: &mut ResultAggregator) -> Result<()> {
        let total = targets.len();
        for (i, target) in targets.iter().enumerate() {
            self.sink
                .on_progress(&format!("Fuzzing {} ({})", target.scenario_id, target.uri), i + 1, total);
            aggregator.record_target();
            self.fuzz_target(target, aggregator).await?;
        }
        Ok(())
    }

    async fn fuzz_target(&mut self, target: &Target, aggregator: &mut ResultAggregator) -> Result<()> {
        self.check_valid_case(target, aggregator).await?;

        if let Some(oracle) = self.oracle.clone() {
            if self.anomalies > 0 {
                let pool = ValuePool::collect(std::slice::from_ref(&target.valid_submission));
                let set = oracle.mutate(&pool, self.anomalies).await?;
                info!("{}: {} dynamic round(s)", target.scenario_id, set.rounds());
                for i in 0..set.rounds() {
                    let round = set.round(i)?;
                    self.inject_round(target, &round, aggregator).await?;
                }
            }
        }

        let static_rounds: Vec<RoundMutations> = self.catalog.rounds().collect();
        if !static_rounds.is_empty() {
            info!("{}: {} static round(s)", target.scenario_id, static_rounds.len());
        }
        for round in &static_rounds {
            self.inject_round(target, round, aggregator).await?;
        }
        Ok(())
    }

    async fn check_valid_case(&self, target: &Target, aggregator: &mut ResultAggregator) -> Result<()> {
        let request = target.build_request(&target.method, &target.valid_submission, true)?;
        let outcome = self.transport.send(&request).await;
        aggregator.record_request();

        let verdict = classify(&outcome, &self.policy.for_valid_case());
        if verdict.suspicious {
            let raw_response = match &outcome {
                Outcome::Response(response) => format!("status {}\n\n{}", response.status, response.body),
                Outcome::Failure(error) => error.to_string(),
            };
            return Err(FuzzError::ValidCaseFailed {
                scenario_id: target.scenario_id.clone(),
                detail: outcome.describe(),
                raw_response,
            });
        }
        debug!("Valid case for {} passed ({})", target.scenario_id, outcome.describe());
        Ok(())
    }

    async fn inject_round(
        &mut self,
        target: &Target,
        round: &RoundMutations,
        aggregator: &mut ResultAggregator,
    ) -> Result<()> {
        let methods = self.methods_for(target);
        let expander = AnomalyExpander::new(&target.valid_submission, round);

        for injected in &expander {
            let field = injected.field.to_string();
            for method in &methods {
                let request = target.build_request(method, &injected.submission, false)?;
                let outcome = self.transport.send(&request).await;
                aggregator.record_request();

                let verdict = classify(&outcome, &self.policy);
                if !verdict.suspicious {
                    continue;
                }

                let finding = Finding::from_outcome(
                    &target.scenario_id,
                    &field,
                    &request,
                    &outcome,
                    &verdict,
                    &self.runner_host,
                );
                if self.store.add_if_new(finding.clone())? {
                    aggregator.record_new(&finding)?;
                } else {
                    aggregator.record_known(&finding);
                }
            }
        }
        Ok(())
    }

    fn methods_for(&self, target: &Target) -> Vec<Method> {
        if self.methods.is_empty() {
            vec![target.method.clone()]
        } else {
            self.methods.clone()
        }
    }

    /// What `run` would send, per target.
    pub fn dry_run(&self) -> Vec<TargetPlan> {
        let dynamic_rounds = if self.oracle.is_some() { self.anomalies } else { 0 };
        let static_rounds = self.catalog.len();

        self.targets
            .iter()
            .map(|target| {
                let methods = self.methods_for(target);
                let variants_per_round = AnomalyExpander::variant_count(&target.valid_submission);
                TargetPlan {
                    scenario_id: target.scenario_id.clone(),
                    variants_per_round,
                    dynamic_rounds,
                    static_rounds,
                    requests: 1 + variants_per_round * (dynamic_rounds + static_rounds) * methods.len(),
                    methods: methods.iter().map(Method::to_string).collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::submission::SubmissionType;
    use crate::core::target_manager::TargetConfig;
    use crate::http::client::VALID_CASE_HEADER;
    use crate::http::{HttpRequest, HttpResponse, TransportError, TransportErrorKind};
    use crate::tests_support::{FailingOracle, FixedOracle, FnTransport, RecordingSink};

    fn targets(kind: SubmissionType, raw: &str) -> TargetManager {
        TargetManager::from_configs(&[TargetConfig {
            scenario_id: "get-item".to_string(),
            method: "GET".to_string(),
            uri: "http://localhost:8080/item".to_string(),
            submission_type: kind,
            valid_submission: raw.to_string(),
        }])
        .unwrap()
    }

    fn status(code: u16) -> Outcome {
        Outcome::Response(HttpResponse {
            status: code,
            headers: Vec::new(),
            body: String::new(),
            final_url: None,
        })
    }

    fn is_valid_case(request: &HttpRequest) -> bool {
        request.headers.contains_key(VALID_CASE_HEADER)
    }

    #[tokio::test]
    async fn test_injected_500_is_stored_once_and_known_on_rerun() {
        let transport = FnTransport::new(|req: &HttpRequest| {
            if is_valid_case(req) {
                status(200)
            } else {
                status(500)
            }
        });
        let policy = Policy::new([], [500], &[]).unwrap();

        let mut engine = FuzzEngine::new(
            targets(SubmissionType::QueryParams, "id=1337"),
            transport.clone(),
            policy,
            FindingStore::in_memory(),
            RecordingSink::new_ref(),
        )
        .with_oracle(Arc::new(FixedOracle(b"' OR 1=1".to_vec())))
        .with_methods(vec![Method::GET])
        .with_anomalies(1);

        let summary = engine.run().await.unwrap();
        // valid case + key rename + value
        assert_eq!(summary.requests_sent, 3);
        assert_eq!(summary.suspicious, 2);
        assert_eq!(summary.new_findings, 1);
        assert_eq!(summary.already_known, 1);

        let stored = engine.store().new_findings().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].scenario_id, "get-item");
        assert_eq!(stored[0].response_status, "500");

        let sent = transport.sent();
        assert_eq!(sent[2].url.query(), Some("id=%27+OR+1%3D1"));

        engine.store_mut().mark_all_processed().unwrap();
        let rerun = engine.run().await.unwrap();
        assert_eq!(rerun.new_findings, 0);
        assert_eq!(rerun.already_known, 2);
        assert_eq!(engine.store().count_new().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_every_variant_is_replayed_under_every_method() {
        let transport = FnTransport::new(|_: &HttpRequest| status(200));
        let mut engine = FuzzEngine::new(
            targets(SubmissionType::Json, r#"{"a":1,"b":[1,2]}"#),
            transport.clone(),
            Policy::new([200], [], &[]).unwrap(),
            FindingStore::in_memory(),
            RecordingSink::new_ref(),
        )
        .with_catalog(StaticCatalog::from_payloads(["x", "y"]))
        .with_methods(vec![Method::GET, Method::POST]);

        let plan = engine.dry_run();
        assert_eq!(plan[0].variants_per_round, 5);
        assert_eq!(plan[0].requests, 1 + 5 * 2 * 2);

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.requests_sent, plan[0].requests);
        assert_eq!(summary.suspicious, 0);

        let posts = transport.sent().iter().filter(|r| r.method == Method::POST).count();
        assert_eq!(posts, 10);
    }

    #[tokio::test]
    async fn test_failed_valid_case_aborts_before_injection() {
        let transport = FnTransport::new(|_: &HttpRequest| status(503));
        let mut engine = FuzzEngine::new(
            targets(SubmissionType::QueryParams, "id=1"),
            transport.clone(),
            Policy::new([200], [], &[]).unwrap(),
            FindingStore::in_memory(),
            RecordingSink::new_ref(),
        )
        .with_catalog(StaticCatalog::builtin());

        let err = engine.run().await.unwrap_err();
        match err {
            FuzzError::ValidCaseFailed { scenario_id, detail, .. } => {
                assert_eq!(scenario_id, "get-item");
                assert_eq!(detail, "status 503");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_a_finding() {
        let transport = FnTransport::new(|req: &HttpRequest| {
            if is_valid_case(req) {
                status(200)
            } else {
                Outcome::Failure(TransportError::new(TransportErrorKind::Timeout, "deadline elapsed"))
            }
        });
        let mut engine = FuzzEngine::new(
            targets(SubmissionType::UrlEncodedForm, "a=1"),
            transport,
            Policy::new([200], [], &[]).unwrap(),
            FindingStore::in_memory(),
            RecordingSink::new_ref(),
        )
        .with_catalog(StaticCatalog::from_payloads(["x"]));

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.new_findings, 1);
        let stored = engine.store().new_findings().unwrap();
        assert!(stored[0].timed_out);
        assert_eq!(stored[0].response_status, "");
    }

    #[tokio::test]
    async fn test_oracle_failure_is_fatal() {
        let transport = FnTransport::new(|_: &HttpRequest| status(200));
        let mut engine = FuzzEngine::new(
            targets(SubmissionType::QueryParams, "id=1"),
            transport,
            Policy::default(),
            FindingStore::in_memory(),
            RecordingSink::new_ref(),
        )
        .with_oracle(Arc::new(FailingOracle));

        assert!(matches!(engine.run().await, Err(FuzzError::MutationOracle { .. })));
    }

    #[tokio::test]
    async fn test_suspicious_outcome_without_store_is_fatal() {
        let transport = FnTransport::new(|req: &HttpRequest| {
            if is_valid_case(req) {
                status(200)
            } else {
                status(500)
            }
        });
        let mut engine = FuzzEngine::new(
            targets(SubmissionType::QueryParams, "id=1"),
            transport,
            Policy::new([200], [], &[]).unwrap(),
            FindingStore::disabled(),
            RecordingSink::new_ref(),
        )
        .with_catalog(StaticCatalog::from_payloads(["x"]));

        match engine.run().await {
            Err(FuzzError::StorageUnavailable { scenario_id, url }) => {
                assert_eq!(scenario_id, "get-item");
                assert!(url.starts_with("http://localhost:8080/item"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    fn config_with_target() -> FuzzConfig {
        FuzzConfig {
            database: Some(":memory:".to_string()),
            anomalies: 0,
            methods: vec!["GET".to_string()],
            targets: vec![TargetConfig {
                scenario_id: "search".to_string(),
                method: "GET".to_string(),
                uri: "http://localhost/search".to_string(),
                submission_type: SubmissionType::QueryParams,
                valid_submission: "q=shoes;page=1".to_string(),
            }],
            ..FuzzConfig::default()
        }
    }

    #[tokio::test]
    async fn test_from_config_plans_static_rounds() {
        let engine = FuzzEngine::from_config(&config_with_target(), RecordingSink::new_ref())
            .await
            .unwrap();
        assert!(engine.store().is_enabled());

        let plan = engine.dry_run();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].dynamic_rounds, 0);
        assert_eq!(plan[0].static_rounds, StaticCatalog::builtin().len());
        // two keys, one value each
        assert_eq!(plan[0].variants_per_round, 4);
        assert_eq!(plan[0].methods, vec!["GET"]);
    }

    #[tokio::test]
    async fn test_from_config_requires_radamsa_for_dynamic_rounds() {
        let config = FuzzConfig {
            anomalies: 3,
            radamsa_path: Some("/nonexistent/radamsa".to_string()),
            ..config_with_target()
        };
        let result = FuzzEngine::from_config(&config, RecordingSink::new_ref()).await;
        assert!(matches!(result, Err(FuzzError::MutationOracle { .. })));
    }

    #[tokio::test]
    async fn test_from_config_rejects_unreadable_payload_file() {
        let config = FuzzConfig {
            static_payloads: Some("/nonexistent/payloads.txt".to_string()),
            ..config_with_target()
        };
        let result = FuzzEngine::from_config(&config, RecordingSink::new_ref()).await;
        assert!(matches!(result, Err(FuzzError::Config(ref msg)) if msg.contains("/nonexistent/payloads.txt")));
    }

    #[tokio::test]
    async fn test_unprocessed_findings_block_the_run() {
        let transport = FnTransport::new(|_: &HttpRequest| status(200));
        let mut store = FindingStore::in_memory();
        let pending = Finding::from_outcome(
            "old",
            "",
            &HttpRequest::new(
                Method::GET,
                url::Url::parse("http://localhost/").unwrap(),
                Default::default(),
                String::new(),
            ),
            &status(500),
            &Default::default(),
            "h",
        );
        store.add(pending).unwrap();

        let mut engine = FuzzEngine::new(
            targets(SubmissionType::QueryParams, "id=1"),
            transport.clone(),
            Policy::default(),
            store,
            RecordingSink::new_ref(),
        );
        assert!(matches!(engine.run().await, Err(FuzzError::UnprocessedFindings(1))));
        assert!(transport.sent().is_empty());

        let mut engine = engine.fail_on_unprocessed(false);
        assert!(engine.run().await.is_ok());
    }
}
