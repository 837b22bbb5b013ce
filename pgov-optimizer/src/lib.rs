//! Top-level optimization façade. Applies a rewrite strategy to an
//! artifact's text, scores the original and the candidate, records the
//! change through the audit ledger, and persists the optimization outcome.
//! Risky rewrites (high or critical severity) trigger a vault snapshot
//! before the change is recorded.

use chrono::Utc;
use pgov_audit::{classify_severity, AuditError, AuditLedger, ChangeRequest};
use pgov_core::ids::{generate_id, MODEL_PREFIX, OPTIMIZATION_PREFIX};
use pgov_core::{BackupType, ChangeType, OptimizationStatus, OptimizationStrategy, Severity};
use pgov_quality::{AssessmentContext, QualityError, QualityScorer};
use pgov_storage::{GovernanceStore, OptimizationRecord, StorageError, StrategyModelRecord};
use pgov_vault::{BackupVault, VaultError};
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

const STRATEGY_VERSION: i64 = 1;
const BASE_CONFIDENCE: f64 = 0.7;

const LONG_TEXT_WORDS: usize = 80;
const LOW_SUCCESS_RATE: f64 = 0.8;
const SLOW_RESPONSE_SECS: f64 = 3.0;
const HIGH_COST_PER_REQUEST: f64 = 0.1;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("quality error: {0}")]
    Quality(#[from] QualityError),
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Live metrics for the artifact, supplied by the caller. Any field may be
/// absent; the adaptive strategy falls back to the quality strategy when
/// none of its thresholds fire.
#[derive(Debug, Clone, Default)]
pub struct OptimizationContext {
    pub success_rate: Option<f64>,
    pub response_time_secs: Option<f64>,
    pub cost_per_request: Option<f64>,
    pub expected_topics: Vec<String>,
}

impl OptimizationContext {
    fn metric_count(&self) -> usize {
        [
            self.success_rate.is_some(),
            self.response_time_secs.is_some(),
            self.cost_per_request.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    fn assessment_context(&self) -> Option<AssessmentContext> {
        if self.expected_topics.is_empty() {
            None
        } else {
            Some(AssessmentContext {
                expected_topics: self.expected_topics.clone(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub record: OptimizationRecord,
    pub change_id: String,
    pub snapshot_backup_id: Option<String>,
    pub score_before: f64,
    pub score_after: f64,
}

pub type IntegrationHook = Box<dyn Fn(&OptimizationRecord) -> Result<(), String> + Send + Sync>;

struct NamedHook {
    name: String,
    hook: IntegrationHook,
}

/// Deterministic text rewriters. Regexes are compiled once per registry.
struct RewriteEngine {
    filler: Regex,
    space_runs: Regex,
    blank_runs: Regex,
}

impl RewriteEngine {
    fn new() -> Self {
        Self {
            filler: Regex::new(
                r"(?i)\b(please|kindly|very|really|basically|actually|simply|just)\b[ \t]*",
            )
            .expect("valid regex"),
            space_runs: Regex::new(r"[ \t]{2,}").expect("valid regex"),
            blank_runs: Regex::new(r"\n{3,}").expect("valid regex"),
        }
    }

    fn apply(
        &self,
        strategy: OptimizationStrategy,
        text: &str,
        context: &OptimizationContext,
    ) -> String {
        match strategy {
            OptimizationStrategy::Performance | OptimizationStrategy::Cost => {
                self.strip_filler(text)
            }
            OptimizationStrategy::Clarity => self.inject_structure(text),
            OptimizationStrategy::Quality => self.strip_filler(&self.inject_structure(text)),
            OptimizationStrategy::Adaptive => {
                self.apply(resolve_adaptive(context), text, context)
            }
        }
    }

    fn strip_filler(&self, text: &str) -> String {
        let stripped = self.filler.replace_all(text, "");
        let collapsed = self.space_runs.replace_all(&stripped, " ");
        let trimmed = self.blank_runs.replace_all(&collapsed, "\n\n");
        trimmed
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// Long prose without any list or heading structure becomes one bullet
    /// per sentence. Already-structured text passes through untouched.
    fn inject_structure(&self, text: &str) -> String {
        let word_count = text.split_whitespace().count();
        let structured = text.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with('-') || line.starts_with('*') || line.starts_with('#')
        });
        if word_count <= LONG_TEXT_WORDS || structured {
            return text.to_string();
        }
        split_sentences(text)
            .iter()
            .map(|sentence| format!("- {sentence}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pick a concrete strategy from the caller's live metrics.
fn resolve_adaptive(context: &OptimizationContext) -> OptimizationStrategy {
    if context
        .success_rate
        .is_some_and(|rate| rate < LOW_SUCCESS_RATE)
    {
        OptimizationStrategy::Clarity
    } else if context
        .response_time_secs
        .is_some_and(|secs| secs > SLOW_RESPONSE_SECS)
    {
        OptimizationStrategy::Performance
    } else if context
        .cost_per_request
        .is_some_and(|cost| cost > HIGH_COST_PER_REQUEST)
    {
        OptimizationStrategy::Cost
    } else {
        OptimizationStrategy::Quality
    }
}

pub struct OptimizationOrchestrator {
    scorer: QualityScorer,
    ledger: AuditLedger,
    vault: Option<BackupVault>,
    actor_id: String,
    engine: RewriteEngine,
    hooks: Vec<NamedHook>,
}

impl OptimizationOrchestrator {
    pub fn new(scorer: QualityScorer, ledger: AuditLedger, actor_id: impl Into<String>) -> Self {
        Self {
            scorer,
            ledger,
            vault: None,
            actor_id: actor_id.into(),
            engine: RewriteEngine::new(),
            hooks: Vec::new(),
        }
    }

    /// Attach a vault; once attached, high and critical severity rewrites
    /// get a manual snapshot before the change is recorded.
    pub fn with_vault(mut self, vault: BackupVault) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Hooks run in registration order after each optimization is persisted.
    /// A failing hook is logged and skipped; it never fails the optimization.
    pub fn add_hook(
        &mut self,
        name: impl Into<String>,
        hook: IntegrationHook,
    ) {
        self.hooks.push(NamedHook {
            name: name.into(),
            hook,
        });
    }

    /// Ensure every strategy has an active registry row. Idempotent.
    pub fn register_strategies(&self, store: &GovernanceStore) -> Result<(), OptimizerError> {
        let registered: Vec<OptimizationStrategy> = store
            .active_strategy_models()?
            .into_iter()
            .map(|model| model.strategy)
            .collect();
        for strategy in [
            OptimizationStrategy::Performance,
            OptimizationStrategy::Clarity,
            OptimizationStrategy::Cost,
            OptimizationStrategy::Quality,
            OptimizationStrategy::Adaptive,
        ] {
            if registered.contains(&strategy) {
                continue;
            }
            store.insert_strategy_model(&StrategyModelRecord {
                model_id: generate_id(MODEL_PREFIX),
                strategy,
                version: STRATEGY_VERSION,
                created_at: Utc::now(),
                active: true,
            })?;
        }
        Ok(())
    }

    pub fn optimize(
        &self,
        store: &GovernanceStore,
        artifact_id: &str,
        text: &str,
        context: &OptimizationContext,
        strategy: OptimizationStrategy,
    ) -> Result<OptimizationResult, OptimizerError> {
        if artifact_id.trim().is_empty() {
            return Err(OptimizerError::Validation(
                "artifact_id is required".to_string(),
            ));
        }
        if text.trim().is_empty() {
            return Err(OptimizerError::Validation(
                "artifact text is empty".to_string(),
            ));
        }

        let optimized = self.engine.apply(strategy, text, context);
        let assessment_context = context.assessment_context();

        let before = self
            .scorer
            .assess(store, artifact_id, text, assessment_context.as_ref())?;
        let after =
            self.scorer
                .assess(store, artifact_id, &optimized, assessment_context.as_ref())?;

        let severity = classify_severity(ChangeType::Update, Some(text), Some(&optimized));
        let snapshot_backup_id = match (&self.vault, severity) {
            (Some(vault), Severity::High | Severity::Critical) => {
                let backup_id = vault.create_backup(
                    store,
                    BackupType::Manual,
                    Some("pre-optimization snapshot"),
                )?;
                info!(artifact_id, backup_id, "snapshot taken before risky rewrite");
                Some(backup_id)
            }
            _ => None,
        };

        let optimization_id = generate_id(OPTIMIZATION_PREFIX);
        let mut metadata = BTreeMap::new();
        metadata.insert("optimization_id".to_string(), optimization_id.clone());
        metadata.insert("strategy".to_string(), strategy.as_str().to_string());
        let change_id = self.ledger.record_change(
            store,
            ChangeRequest {
                artifact_id: artifact_id.to_string(),
                change_type: Some(ChangeType::Update),
                actor_id: self.actor_id.clone(),
                old_value: Some(text.to_string()),
                new_value: Some(optimized.clone()),
                summary: format!("{} optimization", strategy.as_str()),
                metadata,
            },
        )?;

        // Both estimates derive from the same length-reduction figure.
        let reduction = length_reduction(text, &optimized);
        let record = OptimizationRecord {
            optimization_id,
            artifact_id: artifact_id.to_string(),
            ts: Utc::now(),
            strategy,
            improvement_score: improvement_score(
                text,
                &optimized,
                before.overall_score,
                after.overall_score,
                context,
            ),
            performance_gain: reduction.clamp(0.0, 1.0),
            cost_reduction: (reduction * 0.9).clamp(0.0, 1.0),
            confidence_score: confidence_score(strategy, context),
            status: OptimizationStatus::Completed,
            original_text: text.to_string(),
            optimized_text: optimized,
        };

        store.insert_optimization(&record)?;
        store.record_optimization_metrics(
            artifact_id,
            record.improvement_score,
            record.confidence_score,
            record.ts,
        )?;

        for named in &self.hooks {
            if let Err(err) = (named.hook)(&record) {
                warn!(hook = %named.name, %err, "integration hook failed");
            }
        }

        Ok(OptimizationResult {
            change_id,
            snapshot_backup_id,
            score_before: before.overall_score,
            score_after: after.overall_score,
            record,
        })
    }

    /// Mark an optimization rolled back. The stored artifact content is not
    /// reverted; that remains the caller's responsibility.
    pub fn rollback(
        &self,
        store: &GovernanceStore,
        optimization_id: &str,
    ) -> Result<(), OptimizerError> {
        let record = store.optimization(optimization_id)?.ok_or_else(|| {
            OptimizerError::Validation(format!("unknown optimization: {optimization_id}"))
        })?;
        if record.status == OptimizationStatus::RolledBack {
            return Err(OptimizerError::Validation(format!(
                "optimization already rolled back: {optimization_id}"
            )));
        }
        store.set_optimization_status(optimization_id, OptimizationStatus::RolledBack)?;
        info!(optimization_id, "optimization rolled back");
        Ok(())
    }
}

fn length_reduction(original: &str, optimized: &str) -> f64 {
    if original.is_empty() {
        return 0.0;
    }
    let saved = original.len() as f64 - optimized.len() as f64;
    (saved / original.len() as f64).max(0.0)
}

fn word_reduction(original: &str, optimized: &str) -> f64 {
    let original_words = original.split_whitespace().count();
    if original_words == 0 {
        return 0.0;
    }
    let saved = original_words as f64 - optimized.split_whitespace().count() as f64;
    (saved / original_words as f64).max(0.0)
}

fn improvement_score(
    original: &str,
    optimized: &str,
    score_before: f64,
    score_after: f64,
    context: &OptimizationContext,
) -> f64 {
    let mut bonus = 0.0;
    if context
        .success_rate
        .is_some_and(|rate| rate < LOW_SUCCESS_RATE)
    {
        bonus += 0.05;
    }
    if context
        .response_time_secs
        .is_some_and(|secs| secs > SLOW_RESPONSE_SECS)
    {
        bonus += 0.05;
    }
    if context
        .cost_per_request
        .is_some_and(|cost| cost > HIGH_COST_PER_REQUEST)
    {
        bonus += 0.05;
    }
    let score = 0.35 * length_reduction(original, optimized)
        + 0.25 * word_reduction(original, optimized)
        + 0.40 * (score_after - score_before).max(0.0)
        + bonus;
    score.clamp(0.0, 1.0)
}

fn confidence_score(strategy: OptimizationStrategy, context: &OptimizationContext) -> f64 {
    let data_bonus = context.metric_count() as f64 * 0.05;
    let strategy_adjustment = match strategy {
        // Purely mechanical rewrites.
        OptimizationStrategy::Performance | OptimizationStrategy::Cost => 0.1,
        OptimizationStrategy::Clarity | OptimizationStrategy::Quality => 0.0,
        OptimizationStrategy::Adaptive => -0.05,
    };
    (BASE_CONFIDENCE + data_bonus + strategy_adjustment).clamp(0.0, 1.0)
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgov_core::QualityLevel;
    use pgov_quality::ScorerConfig;
    use pgov_vault::{RetentionPolicy, VaultConfig};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn orchestrator() -> OptimizationOrchestrator {
        OptimizationOrchestrator::new(
            QualityScorer::new(ScorerConfig::default()),
            AuditLedger::with_defaults(),
            "optimizer-bot",
        )
    }

    const WORDY_PROMPT: &str = "Please just summarize the report. \
        Really focus on the key findings and basically keep it short.";

    #[test]
    fn performance_strategy_strips_filler_and_collapses_whitespace() {
        let engine = RewriteEngine::new();
        let rewritten = engine.apply(
            OptimizationStrategy::Performance,
            "Please  just do this.\n\n\n\nReally keep it   short.",
            &OptimizationContext::default(),
        );
        assert_eq!(rewritten, "do this.\n\nkeep it short.");
    }

    #[test]
    fn clarity_strategy_bullets_long_unstructured_text_only() {
        let engine = RewriteEngine::new();
        let long_prose = "The assistant reviews each incoming support ticket carefully. "
            .repeat(12);
        let rewritten = engine.apply(
            OptimizationStrategy::Clarity,
            &long_prose,
            &OptimizationContext::default(),
        );
        assert!(rewritten.starts_with("- "));
        assert!(rewritten.lines().count() >= 10);

        let short = "Summarize the report.";
        assert_eq!(
            engine.apply(
                OptimizationStrategy::Clarity,
                short,
                &OptimizationContext::default()
            ),
            short
        );
    }

    #[test]
    fn adaptive_strategy_follows_context_thresholds() {
        let slow = OptimizationContext {
            response_time_secs: Some(4.5),
            ..Default::default()
        };
        assert_eq!(resolve_adaptive(&slow), OptimizationStrategy::Performance);

        let failing = OptimizationContext {
            success_rate: Some(0.6),
            response_time_secs: Some(4.5),
            ..Default::default()
        };
        assert_eq!(resolve_adaptive(&failing), OptimizationStrategy::Clarity);

        let pricey = OptimizationContext {
            cost_per_request: Some(0.25),
            ..Default::default()
        };
        assert_eq!(resolve_adaptive(&pricey), OptimizationStrategy::Cost);

        assert_eq!(
            resolve_adaptive(&OptimizationContext::default()),
            OptimizationStrategy::Quality
        );
    }

    #[test]
    fn optimize_persists_record_change_and_metrics() {
        let store = GovernanceStore::open_in_memory().expect("open db");
        let orchestrator = orchestrator();

        let result = orchestrator
            .optimize(
                &store,
                "prompt-7",
                WORDY_PROMPT,
                &OptimizationContext::default(),
                OptimizationStrategy::Performance,
            )
            .expect("optimize");

        assert!(result.record.optimized_text.len() < WORDY_PROMPT.len());
        assert!(result.record.improvement_score > 0.0);
        assert!(result.record.improvement_score <= 1.0);
        assert_eq!(result.record.status, OptimizationStatus::Completed);

        let stored = store
            .optimization(&result.record.optimization_id)
            .expect("query")
            .expect("present");
        assert_eq!(stored.strategy, OptimizationStrategy::Performance);

        let change = store
            .change_record(&result.change_id)
            .expect("query")
            .expect("present");
        assert_eq!(change.artifact_id, "prompt-7");
        assert_eq!(
            change.metadata.get("optimization_id"),
            Some(&result.record.optimization_id)
        );

        let metrics = store
            .performance_metrics("prompt-7")
            .expect("query")
            .expect("present");
        assert_eq!(metrics.optimization_count, 1);
    }

    #[test]
    fn empty_text_is_rejected_before_any_side_effect() {
        let store = GovernanceStore::open_in_memory().expect("open db");
        let result = orchestrator().optimize(
            &store,
            "prompt-7",
            "   ",
            &OptimizationContext::default(),
            OptimizationStrategy::Performance,
        );
        assert!(matches!(result, Err(OptimizerError::Validation(_))));
        assert!(store
            .performance_metrics("prompt-7")
            .expect("query")
            .is_none());
    }

    #[test]
    fn risky_rewrite_takes_snapshot_when_vault_attached() {
        let workspace = TempDir::new().expect("temp workspace");
        let source_dir = workspace.path().join("prompts");
        fs::create_dir_all(&source_dir).expect("source dir");
        fs::write(source_dir.join("prompt-7.md"), WORDY_PROMPT).expect("seed file");

        let store = GovernanceStore::open_in_memory().expect("open db");
        let orchestrator = orchestrator().with_vault(BackupVault::new(VaultConfig {
            source_paths: vec![source_dir],
            backup_dir: workspace.path().join("backups"),
            retention: RetentionPolicy::default(),
        }));

        // Text that is almost entirely filler shrinks to nearly nothing,
        // which classifies as a critical-severity rewrite.
        let filler_heavy = format!(
            "{}do it.",
            "Please really very basically actually simply just kindly ".repeat(6)
        );
        let result = orchestrator
            .optimize(
                &store,
                "prompt-7",
                &filler_heavy,
                &OptimizationContext::default(),
                OptimizationStrategy::Performance,
            )
            .expect("optimize");

        let backup_id = result.snapshot_backup_id.expect("snapshot taken");
        assert!(store.backup(&backup_id).expect("query").is_some());
    }

    #[test]
    fn hooks_run_in_order_and_failures_do_not_fail_optimization() {
        let store = GovernanceStore::open_in_memory().expect("open db");
        let mut orchestrator = orchestrator();

        let calls = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&calls);
        orchestrator.add_hook(
            "notify",
            Box::new(move |_record| {
                first.fetch_add(1, Ordering::SeqCst);
                Err("webhook unreachable".to_string())
            }),
        );
        let second = Arc::clone(&calls);
        orchestrator.add_hook(
            "cache-bust",
            Box::new(move |_record| {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        orchestrator
            .optimize(
                &store,
                "prompt-7",
                WORDY_PROMPT,
                &OptimizationContext::default(),
                OptimizationStrategy::Performance,
            )
            .expect("optimize despite failing hook");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rollback_flips_status_once() {
        let store = GovernanceStore::open_in_memory().expect("open db");
        let orchestrator = orchestrator();
        let result = orchestrator
            .optimize(
                &store,
                "prompt-7",
                WORDY_PROMPT,
                &OptimizationContext::default(),
                OptimizationStrategy::Cost,
            )
            .expect("optimize");

        orchestrator
            .rollback(&store, &result.record.optimization_id)
            .expect("rollback");
        let stored = store
            .optimization(&result.record.optimization_id)
            .expect("query")
            .expect("present");
        assert_eq!(stored.status, OptimizationStatus::RolledBack);

        let again = orchestrator.rollback(&store, &result.record.optimization_id);
        assert!(matches!(again, Err(OptimizerError::Validation(_))));

        let unknown = orchestrator.rollback(&store, "opt_0000000000000_deadbeef");
        assert!(matches!(unknown, Err(OptimizerError::Validation(_))));
    }

    #[test]
    fn register_strategies_is_idempotent() {
        let store = GovernanceStore::open_in_memory().expect("open db");
        let orchestrator = orchestrator();
        orchestrator
            .register_strategies(&store)
            .expect("first registration");
        orchestrator
            .register_strategies(&store)
            .expect("second registration");
        assert_eq!(
            store.active_strategy_models().expect("query").len(),
            5
        );
    }

    #[test]
    fn quality_scores_are_written_for_both_versions() {
        let store = GovernanceStore::open_in_memory().expect("open db");
        let result = orchestrator()
            .optimize(
                &store,
                "prompt-7",
                WORDY_PROMPT,
                &OptimizationContext::default(),
                OptimizationStrategy::Performance,
            )
            .expect("optimize");
        assert!(result.score_before >= 0.0 && result.score_before <= 1.0);
        assert!(result.score_after >= 0.0 && result.score_after <= 1.0);

        // The most recent assessment row belongs to the optimized text.
        let latest = store
            .latest_assessment("prompt-7")
            .expect("query")
            .expect("present");
        assert!((latest.overall_score - result.score_after).abs() < 1e-9);
        assert_eq!(latest.level, QualityLevel::from_score(latest.overall_score));
    }
}
