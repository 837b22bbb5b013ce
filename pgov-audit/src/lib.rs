//! Append-only audit ledger for artifact changes. Recording a change runs
//! the registered compliance rules and the impact analysis synchronously and
//! persists everything before returning the change id.

use chrono::{DateTime, Duration, Utc};
use pgov_core::ids::{generate_id, CHANGE_PREFIX};
use pgov_core::{
    similarity_ratio, ChangeType, ComplianceStatus, RollbackComplexity, Severity,
};
use pgov_storage::{
    ChangeRecord, ComplianceRecord, GovernanceStore, ImpactRecord, StorageError,
    UserActivityRecord,
};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

/// The always-affected system entry.
pub const CORE_STORE_SYSTEM: &str = "prompt_store";

const NON_COMPLIANCE_DEADLINE_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// What a rule checks. Rules are data, not code, so the table can grow
/// without touching the engine.
#[derive(Debug, Clone)]
pub enum RuleCheck {
    /// Non-compliant when the pattern matches anywhere in the content.
    ForbiddenPattern(Regex),
    /// Non-compliant when the trimmed content is shorter than the minimum.
    MinLength(usize),
}

#[derive(Debug, Clone)]
pub struct ComplianceRule {
    pub name: String,
    pub check: RuleCheck,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule_name: String,
    pub status: ComplianceStatus,
    pub violation_detail: Option<String>,
}

pub struct ComplianceEngine {
    rules: Vec<ComplianceRule>,
}

impl ComplianceEngine {
    pub fn with_rules(rules: Vec<ComplianceRule>) -> Self {
        Self { rules }
    }

    pub fn with_default_rules() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn add_rule(&mut self, rule: ComplianceRule) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.iter().map(|rule| rule.name.clone()).collect()
    }

    /// Evaluate every registered rule against the content; one outcome per
    /// rule, always.
    pub fn evaluate(&self, content: &str) -> Vec<RuleOutcome> {
        self.rules
            .iter()
            .map(|rule| {
                let violation = match &rule.check {
                    RuleCheck::ForbiddenPattern(pattern) => {
                        pattern.find(content).map(|found| {
                            format!("{}: matched '{}'", rule.detail, truncate(found.as_str(), 40))
                        })
                    }
                    RuleCheck::MinLength(min) => {
                        let trimmed_len = content.trim().chars().count();
                        (trimmed_len < *min).then(|| {
                            format!("{}: {trimmed_len} chars, minimum {min}", rule.detail)
                        })
                    }
                };
                RuleOutcome {
                    rule_name: rule.name.clone(),
                    status: if violation.is_some() {
                        ComplianceStatus::NonCompliant
                    } else {
                        ComplianceStatus::Compliant
                    },
                    violation_detail: violation,
                }
            })
            .collect()
    }
}

pub fn default_rules() -> Vec<ComplianceRule> {
    vec![
        ComplianceRule {
            name: "data_privacy".to_string(),
            check: RuleCheck::ForbiddenPattern(
                Regex::new(
                    r"(?x)
                    [A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}
                    | \b\d{3}-\d{2}-\d{4}\b
                    | \b\d{3}[-.]\d{3}[-.]\d{4}\b
                    ",
                )
                .expect("valid regex"),
            ),
            detail: "personal data pattern".to_string(),
        },
        ComplianceRule {
            name: "security".to_string(),
            check: RuleCheck::ForbiddenPattern(
                Regex::new(r#"(?i)\b(password|passwd|api[_-]?key|secret|token)\s*[:=]\s*\S+"#)
                    .expect("valid regex"),
            ),
            detail: "hardcoded credential".to_string(),
        },
        ComplianceRule {
            name: "content_standards".to_string(),
            check: RuleCheck::ForbiddenPattern(
                Regex::new(r"(?i)\b(click here|free money|act now|guaranteed results)\b")
                    .expect("valid regex"),
            ),
            detail: "disallowed term".to_string(),
        },
        ComplianceRule {
            name: "formatting".to_string(),
            check: RuleCheck::MinLength(10),
            detail: "content too short".to_string(),
        },
    ]
}

#[derive(Debug, Clone)]
pub struct ImpactConfig {
    pub artifact_type_systems: BTreeMap<String, String>,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        let mut artifact_type_systems = BTreeMap::new();
        artifact_type_systems.insert("system_prompt".to_string(), "inference_gateway".to_string());
        artifact_type_systems.insert("template".to_string(), "templating".to_string());
        artifact_type_systems.insert("story".to_string(), "story_pipeline".to_string());
        Self {
            artifact_type_systems,
        }
    }
}

pub struct ImpactAnalyzer {
    config: ImpactConfig,
}

impl ImpactAnalyzer {
    pub fn new(config: ImpactConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, change: &ChangeRecord) -> ImpactRecord {
        let mut score: f64 = match change.severity {
            Severity::Low => 0.1,
            Severity::Medium => 0.3,
            Severity::High => 0.6,
            Severity::Critical => 0.9,
        };
        match change.change_type {
            ChangeType::Delete => score += 0.2,
            ChangeType::Create => score += 0.1,
            _ => {}
        }
        match change.metadata.get("importance").map(String::as_str) {
            Some("critical") => score += 0.2,
            Some("high") => score += 0.1,
            _ => {}
        }
        let impact_score = score.min(1.0);

        let mut affected = BTreeSet::new();
        affected.insert(CORE_STORE_SYSTEM.to_string());
        if let Some(systems) = change.metadata.get("affected_systems") {
            for system in systems.split(',') {
                let system = system.trim();
                if !system.is_empty() {
                    affected.insert(system.to_string());
                }
            }
        }
        if let Some(artifact_type) = change.metadata.get("artifact_type") {
            if let Some(system) = self.config.artifact_type_systems.get(artifact_type) {
                affected.insert(system.clone());
            }
        }

        let rollback_complexity = match change.change_type {
            ChangeType::Delete => RollbackComplexity::High,
            ChangeType::Create => RollbackComplexity::Medium,
            ChangeType::Update if change.old_value.is_some() => RollbackComplexity::Low,
            _ => RollbackComplexity::Medium,
        };

        let mut downtime = match change.severity {
            Severity::Critical => 30,
            Severity::High => 15,
            Severity::Medium => 5,
            Severity::Low => 1,
        };
        if matches!(change.change_type, ChangeType::Delete | ChangeType::Create) {
            downtime += 10;
        }

        ImpactRecord {
            change_id: change.change_id.clone(),
            impact_score,
            affected_systems: affected.into_iter().collect(),
            risk_level: change.severity,
            rollback_complexity,
            estimated_downtime_minutes: downtime,
            recommendations: recommendations_for(change.severity),
        }
    }
}

fn recommendations_for(severity: Severity) -> Vec<String> {
    let full = [
        "schedule a maintenance window",
        "prepare a rollback plan",
        "notify stakeholders before deploying",
        "monitor the artifact after deployment",
    ];
    let keep = match severity {
        Severity::Critical => 4,
        Severity::High => 3,
        Severity::Medium => 2,
        Severity::Low => 1,
    };
    full[full.len() - keep..]
        .iter()
        .map(|item| item.to_string())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ChangeRequest {
    pub artifact_id: String,
    pub change_type: Option<ChangeType>,
    pub actor_id: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub summary: String,
    pub metadata: BTreeMap<String, String>,
}

/// One actor's recent footprint: the activity log plus the full change
/// records they authored.
#[derive(Debug, Clone, Default)]
pub struct ActorActivity {
    pub actions: Vec<UserActivityRecord>,
    pub changes: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditSummary {
    pub total_changes: i64,
    pub changes_by_type: BTreeMap<String, i64>,
    pub changes_by_severity: BTreeMap<String, i64>,
    pub changes_by_actor: BTreeMap<String, i64>,
    pub compliance_breakdown: BTreeMap<String, i64>,
    pub recent_changes: Vec<ChangeRecord>,
    pub pending_review: i64,
    pub non_compliant: i64,
}

pub struct AuditLedger {
    compliance: ComplianceEngine,
    impact: ImpactAnalyzer,
}

impl AuditLedger {
    pub fn new(compliance: ComplianceEngine, impact: ImpactAnalyzer) -> Self {
        Self { compliance, impact }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            ComplianceEngine::with_default_rules(),
            ImpactAnalyzer::new(ImpactConfig::default()),
        )
    }

    pub fn compliance_engine_mut(&mut self) -> &mut ComplianceEngine {
        &mut self.compliance
    }

    /// Record a change: classify severity, persist the record, run every
    /// compliance rule, run impact analysis, append the actor's activity.
    /// All within this one call; the returned id is fully persisted.
    pub fn record_change(
        &self,
        store: &GovernanceStore,
        request: ChangeRequest,
    ) -> Result<String, AuditError> {
        if request.artifact_id.trim().is_empty() {
            warn!(actor_id = %request.actor_id, "change rejected: artifact_id is required");
            return Err(AuditError::Validation("artifact_id is required".to_string()));
        }
        if request.actor_id.trim().is_empty() {
            warn!(artifact_id = %request.artifact_id, "change rejected: actor_id is required");
            return Err(AuditError::Validation("actor_id is required".to_string()));
        }
        let change_type = request.change_type.ok_or_else(|| {
            warn!(artifact_id = %request.artifact_id, "change rejected: change_type is required");
            AuditError::Validation("change_type is required".to_string())
        })?;
        if matches!(change_type, ChangeType::Update)
            && request.new_value.is_none()
        {
            warn!(artifact_id = %request.artifact_id, "change rejected: update requires a new_value");
            return Err(AuditError::Validation(
                "update requires a new_value".to_string(),
            ));
        }

        let severity = classify_severity(
            change_type,
            request.old_value.as_deref(),
            request.new_value.as_deref(),
        );
        let ts = Utc::now();
        let change_id = generate_id(CHANGE_PREFIX);

        let record = ChangeRecord {
            change_id: change_id.clone(),
            artifact_id: request.artifact_id,
            change_type,
            severity,
            actor_id: request.actor_id.clone(),
            ts,
            old_value: request.old_value,
            new_value: request.new_value,
            summary: request.summary,
            compliance_status: ComplianceStatus::PendingReview,
            metadata: request.metadata,
        };
        // One transaction covers the change row, every compliance row, the
        // status flip, the impact row, and the activity entry; a failure
        // midway leaves nothing behind.
        store.with_transaction(|store| {
            store.insert_change_record(&record)?;

            let scanned = record
                .new_value
                .as_deref()
                .or(record.old_value.as_deref())
                .unwrap_or_default();
            let outcomes = self.compliance.evaluate(scanned);
            let mut any_violation = false;
            for outcome in &outcomes {
                let non_compliant = outcome.status == ComplianceStatus::NonCompliant;
                any_violation |= non_compliant;
                if non_compliant {
                    warn!(
                        change_id = %change_id,
                        rule = %outcome.rule_name,
                        "compliance violation recorded"
                    );
                }
                store.insert_compliance_record(&ComplianceRecord {
                    change_id: change_id.clone(),
                    rule_name: outcome.rule_name.clone(),
                    status: outcome.status,
                    violation_detail: outcome.violation_detail.clone(),
                    remediation_required: non_compliant,
                    deadline: non_compliant
                        .then(|| ts + Duration::days(NON_COMPLIANCE_DEADLINE_DAYS)),
                })?;
            }
            let final_status = if any_violation {
                ComplianceStatus::NonCompliant
            } else {
                ComplianceStatus::Compliant
            };
            store.set_change_compliance_status(&change_id, final_status)?;

            let mut persisted = record;
            persisted.compliance_status = final_status;
            store.insert_impact(&self.impact.analyze(&persisted))?;

            store.insert_user_activity(&UserActivityRecord {
                actor_id: persisted.actor_id.clone(),
                change_id: change_id.clone(),
                action: change_type.as_str().to_string(),
                ts,
            })?;

            Ok(change_id.clone())
        })
        .map_err(AuditError::from)
    }

    pub fn change_history(
        &self,
        store: &GovernanceStore,
        artifact_id: &str,
        days: i64,
    ) -> Result<Vec<ChangeRecord>, AuditError> {
        let cutoff = Utc::now() - Duration::days(days);
        Ok(store.changes_for_artifact_since(artifact_id, cutoff)?)
    }

    pub fn user_activity(
        &self,
        store: &GovernanceStore,
        actor_id: &str,
        days: i64,
    ) -> Result<ActorActivity, AuditError> {
        let cutoff = Utc::now() - Duration::days(days);
        Ok(ActorActivity {
            actions: store.user_activity_since(actor_id, cutoff)?,
            changes: store.changes_for_actor_since(actor_id, cutoff)?,
        })
    }

    pub fn audit_summary(
        &self,
        store: &GovernanceStore,
        days: i64,
        recent_limit: usize,
    ) -> Result<AuditSummary, AuditError> {
        let cutoff = Utc::now() - Duration::days(days);
        let changes = store.changes_since(cutoff)?;

        let mut summary = AuditSummary {
            total_changes: changes.len() as i64,
            pending_review: store
                .count_changes_with_status(ComplianceStatus::PendingReview, cutoff)?,
            non_compliant: store
                .count_changes_with_status(ComplianceStatus::NonCompliant, cutoff)?,
            ..AuditSummary::default()
        };
        for change in &changes {
            *summary
                .changes_by_type
                .entry(change.change_type.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .changes_by_severity
                .entry(change.severity.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .changes_by_actor
                .entry(change.actor_id.clone())
                .or_insert(0) += 1;
            *summary
                .compliance_breakdown
                .entry(change.compliance_status.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary.recent_changes = store.recent_changes(recent_limit)?;
        Ok(summary)
    }
}

pub fn classify_severity(
    change_type: ChangeType,
    old_value: Option<&str>,
    new_value: Option<&str>,
) -> Severity {
    match change_type {
        ChangeType::Create | ChangeType::Delete => Severity::High,
        ChangeType::Update => {
            let magnitude = match (old_value, new_value) {
                (Some(old), Some(new)) => 1.0 - similarity_ratio(old, new),
                // Nothing to diff against; treat as a full rewrite.
                _ => 1.0,
            };
            if magnitude < 0.1 {
                Severity::Low
            } else if magnitude < 0.3 {
                Severity::Medium
            } else if magnitude < 0.6 {
                Severity::High
            } else {
                Severity::Critical
            }
        }
        ChangeType::Archive | ChangeType::Restore | ChangeType::Publish | ChangeType::Unpublish => {
            Severity::Medium
        }
        ChangeType::Approve | ChangeType::Reject => Severity::Low,
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgov_storage::GovernanceStore;

    fn ledger() -> AuditLedger {
        AuditLedger::with_defaults()
    }

    fn update_request(artifact_id: &str, old: &str, new: &str) -> ChangeRequest {
        ChangeRequest {
            artifact_id: artifact_id.to_string(),
            change_type: Some(ChangeType::Update),
            actor_id: "editor-1".to_string(),
            old_value: Some(old.to_string()),
            new_value: Some(new.to_string()),
            summary: "edit".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn missing_artifact_id_is_rejected_before_any_side_effect() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let result = ledger().record_change(
            &db,
            ChangeRequest {
                actor_id: "editor-1".to_string(),
                change_type: Some(ChangeType::Create),
                ..ChangeRequest::default()
            },
        );
        assert!(matches!(result, Err(AuditError::Validation(_))));
        assert!(db.recent_changes(10).expect("query").is_empty());
    }

    #[test]
    fn hardcoded_credential_flags_security_rule_and_record() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let change_id = ledger()
            .record_change(
                &db,
                update_request(
                    "prompt-1",
                    "Summarize the incident report in plain language.",
                    "Summarize the incident report. Use password=abc123 to fetch it.",
                ),
            )
            .expect("record change");

        let record = db
            .change_record(&change_id)
            .expect("query")
            .expect("present");
        assert_eq!(record.compliance_status, ComplianceStatus::NonCompliant);

        let rows = db
            .compliance_records_for_change(&change_id)
            .expect("rule rows");
        let security = rows
            .iter()
            .find(|row| row.rule_name == "security")
            .expect("security row");
        assert_eq!(security.status, ComplianceStatus::NonCompliant);
        assert!(security.remediation_required);
        assert!(security.deadline.is_some());
    }

    #[test]
    fn exactly_one_compliance_row_per_registered_rule() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let ledger = ledger();
        let change_id = ledger
            .record_change(
                &db,
                update_request(
                    "prompt-2",
                    "Describe the deployment steps for the staging cluster.",
                    "Describe the deployment steps for the production cluster.",
                ),
            )
            .expect("record change");

        let rows = db
            .compliance_records_for_change(&change_id)
            .expect("rule rows");
        let expected = default_rules()
            .iter()
            .map(|rule| rule.name.clone())
            .collect::<BTreeSet<_>>();
        let seen = rows
            .iter()
            .map(|row| row.rule_name.clone())
            .collect::<BTreeSet<_>>();
        assert_eq!(rows.len(), expected.len());
        assert_eq!(seen, expected);
    }

    #[test]
    fn clean_small_edit_is_low_severity_and_compliant() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let change_id = ledger()
            .record_change(
                &db,
                update_request(
                    "prompt-3",
                    "Summarize the weekly report in three bullet points.",
                    "Summarize the weekly report in four bullet points.",
                ),
            )
            .expect("record change");

        let record = db
            .change_record(&change_id)
            .expect("query")
            .expect("present");
        assert_eq!(record.severity, Severity::Low);
        assert_eq!(record.compliance_status, ComplianceStatus::Compliant);
    }

    #[test]
    fn full_rewrite_is_critical_severity() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let change_id = ledger()
            .record_change(
                &db,
                update_request(
                    "prompt-4",
                    "Summarize the weekly report in three bullet points.",
                    "You are a customer support agent. Greet the user, ask for their order \
                     number, and resolve billing disputes politely.",
                ),
            )
            .expect("record change");

        let record = db
            .change_record(&change_id)
            .expect("query")
            .expect("present");
        assert_eq!(record.severity, Severity::Critical);
    }

    #[test]
    fn delete_impact_is_high_risk_with_hard_rollback() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let change_id = ledger()
            .record_change(
                &db,
                ChangeRequest {
                    artifact_id: "prompt-5".to_string(),
                    change_type: Some(ChangeType::Delete),
                    actor_id: "admin-1".to_string(),
                    old_value: Some("Retired onboarding prompt text.".to_string()),
                    summary: "retire prompt".to_string(),
                    ..ChangeRequest::default()
                },
            )
            .expect("record change");

        let impact = db
            .impact_for_change(&change_id)
            .expect("query")
            .expect("present");
        assert!((impact.impact_score - 0.8).abs() < 1e-9);
        assert_eq!(impact.risk_level, Severity::High);
        assert_eq!(impact.rollback_complexity, RollbackComplexity::High);
        assert_eq!(impact.estimated_downtime_minutes, 25);
        assert!(impact
            .affected_systems
            .contains(&CORE_STORE_SYSTEM.to_string()));
    }

    #[test]
    fn metadata_importance_and_systems_feed_impact() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let mut metadata = BTreeMap::new();
        metadata.insert("importance".to_string(), "critical".to_string());
        metadata.insert(
            "affected_systems".to_string(),
            "search, recommendations".to_string(),
        );
        metadata.insert("artifact_type".to_string(), "template".to_string());

        let change_id = ledger()
            .record_change(
                &db,
                ChangeRequest {
                    artifact_id: "prompt-6".to_string(),
                    change_type: Some(ChangeType::Create),
                    actor_id: "admin-1".to_string(),
                    new_value: Some("New escalation template for support tickets.".to_string()),
                    summary: "new template".to_string(),
                    metadata,
                    ..ChangeRequest::default()
                },
            )
            .expect("record change");

        let impact = db
            .impact_for_change(&change_id)
            .expect("query")
            .expect("present");
        // high base .6 + create .1 + critical importance .2
        assert!((impact.impact_score - 0.9).abs() < 1e-9);
        for system in ["prompt_store", "search", "recommendations", "templating"] {
            assert!(impact.affected_systems.contains(&system.to_string()), "{system}");
        }
    }

    #[test]
    fn audit_summary_aggregates_counts_and_recent_changes() {
        let db = GovernanceStore::open_in_memory().expect("open db");
        let ledger = ledger();
        ledger
            .record_change(
                &db,
                update_request(
                    "prompt-7",
                    "Summarize the weekly report in three bullet points.",
                    "Summarize the weekly report in four bullet points.",
                ),
            )
            .expect("first change");
        ledger
            .record_change(
                &db,
                ChangeRequest {
                    artifact_id: "prompt-8".to_string(),
                    change_type: Some(ChangeType::Create),
                    actor_id: "admin-1".to_string(),
                    new_value: Some("Fresh prompt body with enough length.".to_string()),
                    summary: "new prompt".to_string(),
                    ..ChangeRequest::default()
                },
            )
            .expect("second change");

        let summary = ledger.audit_summary(&db, 7, 1).expect("summary");
        assert_eq!(summary.total_changes, 2);
        assert_eq!(summary.changes_by_type.get("update"), Some(&1));
        assert_eq!(summary.changes_by_type.get("create"), Some(&1));
        assert_eq!(summary.changes_by_actor.get("editor-1"), Some(&1));
        assert_eq!(summary.changes_by_actor.get("admin-1"), Some(&1));
        assert_eq!(summary.compliance_breakdown.get("compliant"), Some(&2));
        assert_eq!(summary.recent_changes.len(), 1);
        assert_eq!(summary.pending_review, 0);
        assert_eq!(summary.non_compliant, 0);

        let history = ledger
            .change_history(&db, "prompt-7", 7)
            .expect("history");
        assert_eq!(history.len(), 1);

        let activity = ledger.user_activity(&db, "admin-1", 7).expect("activity");
        assert_eq!(activity.actions.len(), 1);
        assert_eq!(activity.actions[0].action, "create");
        assert_eq!(activity.changes.len(), 1);
        assert_eq!(activity.changes[0].actor_id, "admin-1");
    }
}
