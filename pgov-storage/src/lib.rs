//! SQLite-backed governance store. One connection per store, migrations
//! gated on `PRAGMA user_version`, RFC3339 text timestamps, JSON text
//! columns for list/map payloads.

use chrono::{DateTime, Utc};
use pgov_core::{
    BackupStatus, BackupType, ChangeType, ComplianceStatus, OptimizationStatus,
    OptimizationStrategy, QualityLevel, RecoveryStatus, RecoveryType, RollbackComplexity,
    Severity, TrendDirection,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const GOVERNANCE_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub change_id: String,
    pub artifact_id: String,
    pub change_type: ChangeType,
    pub severity: Severity,
    pub actor_id: String,
    pub ts: DateTime<Utc>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub summary: String,
    pub compliance_status: ComplianceStatus,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceRecord {
    pub change_id: String,
    pub rule_name: String,
    pub status: ComplianceStatus,
    pub violation_detail: Option<String>,
    pub remediation_required: bool,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImpactRecord {
    pub change_id: String,
    pub impact_score: f64,
    pub affected_systems: Vec<String>,
    pub risk_level: Severity,
    pub rollback_complexity: RollbackComplexity,
    pub estimated_downtime_minutes: i64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserActivityRecord {
    pub actor_id: String,
    pub change_id: String,
    pub action: String,
    pub ts: DateTime<Utc>,
}

/// Per-dimension score detail, stored as JSON inside the assessment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub weight: f64,
    pub rationale: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRecord {
    pub assessment_id: String,
    pub artifact_id: String,
    pub ts: DateTime<Utc>,
    pub overall_score: f64,
    pub level: QualityLevel,
    pub dimensions: BTreeMap<String, DimensionScore>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub priority: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendRecord {
    pub trend_id: String,
    pub artifact_id: String,
    pub ts: DateTime<Utc>,
    pub previous_score: f64,
    pub current_score: f64,
    pub change_pct: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub backup_id: String,
    pub backup_type: BackupType,
    pub ts: DateTime<Utc>,
    pub size_bytes: i64,
    pub checksum: String,
    pub source_paths: Vec<String>,
    pub archive_path: String,
    pub status: BackupStatus,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRecord {
    pub recovery_id: String,
    pub backup_id: String,
    pub recovery_type: RecoveryType,
    pub ts: DateTime<Utc>,
    pub status: RecoveryStatus,
    pub target_paths: Option<Vec<String>>,
    pub files_restored: i64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityCheckRecord {
    pub check_id: String,
    pub ts: DateTime<Utc>,
    pub total_files: i64,
    pub corrupted_files: i64,
    pub missing_files: i64,
    pub checksum_matches: i64,
    pub integrity_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationRecord {
    pub optimization_id: String,
    pub artifact_id: String,
    pub ts: DateTime<Utc>,
    pub strategy: OptimizationStrategy,
    pub original_text: String,
    pub optimized_text: String,
    pub improvement_score: f64,
    pub performance_gain: f64,
    pub cost_reduction: f64,
    pub confidence_score: f64,
    pub status: OptimizationStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyModelRecord {
    pub model_id: String,
    pub strategy: OptimizationStrategy,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceMetricsRecord {
    pub artifact_id: String,
    pub optimization_count: i64,
    pub last_optimized: DateTime<Utc>,
    pub cumulative_improvement: f64,
    pub avg_confidence: f64,
}

pub struct GovernanceStore {
    conn: Connection,
}

impl GovernanceStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > GOVERNANCE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: GOVERNANCE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_governance_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Run `f` inside one transaction. Any error rolls back every write
    /// made through the closure; the commit happens only on `Ok`.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1 LIMIT 1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    // --- change records ---

    pub fn insert_change_record(&self, record: &ChangeRecord) -> Result<(), StorageError> {
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO change_records (
                change_id, artifact_id, change_type, severity, actor_id, ts,
                old_value, new_value, summary, compliance_status, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            params![
                record.change_id,
                record.artifact_id,
                record.change_type.as_str(),
                record.severity.as_str(),
                record.actor_id,
                record.ts.to_rfc3339(),
                record.old_value,
                record.new_value,
                record.summary,
                record.compliance_status.as_str(),
                metadata_json,
            ],
        )?;
        Ok(())
    }

    pub fn set_change_compliance_status(
        &self,
        change_id: &str,
        status: ComplianceStatus,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE change_records SET compliance_status = ?2 WHERE change_id = ?1",
            params![change_id, status.as_str()],
        )?;
        Ok(())
    }

    pub fn change_record(&self, change_id: &str) -> Result<Option<ChangeRecord>, StorageError> {
        let record = self
            .conn
            .query_row(
                &format!("{CHANGE_SELECT} WHERE change_id = ?1"),
                [change_id],
                map_change_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn changes_for_artifact_since(
        &self,
        artifact_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ChangeRecord>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "{CHANGE_SELECT} WHERE artifact_id = ?1 AND ts >= ?2 ORDER BY ts DESC, change_id DESC"
        ))?;
        let rows = statement.query_map(params![artifact_id, cutoff.to_rfc3339()], map_change_row)?;
        collect_rows(rows)
    }

    pub fn changes_for_actor_since(
        &self,
        actor_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ChangeRecord>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "{CHANGE_SELECT} WHERE actor_id = ?1 AND ts >= ?2 ORDER BY ts DESC, change_id DESC"
        ))?;
        let rows = statement.query_map(params![actor_id, cutoff.to_rfc3339()], map_change_row)?;
        collect_rows(rows)
    }

    pub fn changes_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<ChangeRecord>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "{CHANGE_SELECT} WHERE ts >= ?1 ORDER BY ts DESC, change_id DESC"
        ))?;
        let rows = statement.query_map([cutoff.to_rfc3339()], map_change_row)?;
        collect_rows(rows)
    }

    pub fn recent_changes(&self, limit: usize) -> Result<Vec<ChangeRecord>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "{CHANGE_SELECT} ORDER BY ts DESC, change_id DESC LIMIT ?1"
        ))?;
        let rows = statement.query_map([limit as i64], map_change_row)?;
        collect_rows(rows)
    }

    pub fn count_changes_with_status(
        &self,
        status: ComplianceStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM change_records WHERE compliance_status = ?1 AND ts >= ?2",
            params![status.as_str(), cutoff.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- compliance records ---

    pub fn insert_compliance_record(&self, record: &ComplianceRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO compliance_records (
                change_id, rule_name, status, violation_detail, remediation_required, deadline
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(change_id, rule_name) DO UPDATE SET
                status=excluded.status,
                violation_detail=excluded.violation_detail,
                remediation_required=excluded.remediation_required,
                deadline=excluded.deadline
            ",
            params![
                record.change_id,
                record.rule_name,
                record.status.as_str(),
                record.violation_detail,
                i64::from(record.remediation_required),
                record.deadline.map(|value| value.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn compliance_records_for_change(
        &self,
        change_id: &str,
    ) -> Result<Vec<ComplianceRecord>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT change_id, rule_name, status, violation_detail, remediation_required, deadline
            FROM compliance_records
            WHERE change_id = ?1
            ORDER BY rule_name ASC
            ",
        )?;
        let rows = statement.query_map([change_id], |row| {
            let status = parse_enum_col::<ComplianceStatus>(row.get::<_, String>(2)?, 2)?;
            let deadline = row
                .get::<_, Option<String>>(5)?
                .map(|value| timestamp_col(value, 5))
                .transpose()?;
            Ok(ComplianceRecord {
                change_id: row.get(0)?,
                rule_name: row.get(1)?,
                status,
                violation_detail: row.get(3)?,
                remediation_required: row.get::<_, i64>(4)? != 0,
                deadline,
            })
        })?;
        collect_rows(rows)
    }

    // --- change impacts ---

    pub fn insert_impact(&self, record: &ImpactRecord) -> Result<(), StorageError> {
        let affected_json = serde_json::to_string(&record.affected_systems)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let recommendations_json = serde_json::to_string(&record.recommendations)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT OR REPLACE INTO change_impacts (
                change_id, impact_score, affected_systems_json, risk_level,
                rollback_complexity, estimated_downtime_minutes, recommendations_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                record.change_id,
                record.impact_score,
                affected_json,
                record.risk_level.as_str(),
                record.rollback_complexity.as_str(),
                record.estimated_downtime_minutes,
                recommendations_json,
            ],
        )?;
        Ok(())
    }

    pub fn impact_for_change(&self, change_id: &str) -> Result<Option<ImpactRecord>, StorageError> {
        let record = self
            .conn
            .query_row(
                "
                SELECT change_id, impact_score, affected_systems_json, risk_level,
                       rollback_complexity, estimated_downtime_minutes, recommendations_json
                FROM change_impacts
                WHERE change_id = ?1
                ",
                [change_id],
                |row| {
                    let affected_systems =
                        json_col::<Vec<String>>(row.get::<_, String>(2)?, 2)?;
                    let risk_level = parse_enum_col::<Severity>(row.get::<_, String>(3)?, 3)?;
                    let rollback_complexity =
                        parse_enum_col::<RollbackComplexity>(row.get::<_, String>(4)?, 4)?;
                    let recommendations =
                        json_col::<Vec<String>>(row.get::<_, String>(6)?, 6)?;
                    Ok(ImpactRecord {
                        change_id: row.get(0)?,
                        impact_score: row.get(1)?,
                        affected_systems,
                        risk_level,
                        rollback_complexity,
                        estimated_downtime_minutes: row.get(5)?,
                        recommendations,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    // --- user activity ---

    pub fn insert_user_activity(&self, record: &UserActivityRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO user_activity (actor_id, change_id, action, ts)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                record.actor_id,
                record.change_id,
                record.action,
                record.ts.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn user_activity_since(
        &self,
        actor_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UserActivityRecord>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT actor_id, change_id, action, ts
            FROM user_activity
            WHERE actor_id = ?1 AND ts >= ?2
            ORDER BY ts DESC, id DESC
            ",
        )?;
        let rows = statement.query_map(params![actor_id, cutoff.to_rfc3339()], |row| {
            let ts = timestamp_col(row.get::<_, String>(3)?, 3)?;
            Ok(UserActivityRecord {
                actor_id: row.get(0)?,
                change_id: row.get(1)?,
                action: row.get(2)?,
                ts,
            })
        })?;
        collect_rows(rows)
    }

    // --- quality assessments ---

    pub fn insert_assessment(&self, record: &AssessmentRecord) -> Result<(), StorageError> {
        let dimensions_json = serde_json::to_string(&record.dimensions)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let strengths_json = serde_json::to_string(&record.strengths)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let weaknesses_json = serde_json::to_string(&record.weaknesses)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO quality_assessments (
                assessment_id, artifact_id, ts, overall_score, level,
                dimensions_json, strengths_json, weaknesses_json, priority
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                record.assessment_id,
                record.artifact_id,
                record.ts.to_rfc3339(),
                record.overall_score,
                record.level.as_str(),
                dimensions_json,
                strengths_json,
                weaknesses_json,
                record.priority.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_assessment(
        &self,
        artifact_id: &str,
    ) -> Result<Option<AssessmentRecord>, StorageError> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "{ASSESSMENT_SELECT} WHERE artifact_id = ?1 \
                     ORDER BY ts DESC, assessment_id DESC LIMIT 1"
                ),
                [artifact_id],
                map_assessment_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn assessments_for_artifact(
        &self,
        artifact_id: &str,
    ) -> Result<Vec<AssessmentRecord>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "{ASSESSMENT_SELECT} WHERE artifact_id = ?1 ORDER BY ts ASC, assessment_id ASC"
        ))?;
        let rows = statement.query_map([artifact_id], map_assessment_row)?;
        collect_rows(rows)
    }

    // --- quality trends / benchmarks ---

    pub fn insert_trend(&self, record: &TrendRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO quality_trends (
                trend_id, artifact_id, ts, previous_score, current_score, change_pct, direction
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                record.trend_id,
                record.artifact_id,
                record.ts.to_rfc3339(),
                record.previous_score,
                record.current_score,
                record.change_pct,
                record.direction.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn trends_for_artifact(
        &self,
        artifact_id: &str,
    ) -> Result<Vec<TrendRecord>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT trend_id, artifact_id, ts, previous_score, current_score, change_pct, direction
            FROM quality_trends
            WHERE artifact_id = ?1
            ORDER BY ts ASC, trend_id ASC
            ",
        )?;
        let rows = statement.query_map([artifact_id], |row| {
            let ts = timestamp_col(row.get::<_, String>(2)?, 2)?;
            let direction = parse_enum_col::<TrendDirection>(row.get::<_, String>(6)?, 6)?;
            Ok(TrendRecord {
                trend_id: row.get(0)?,
                artifact_id: row.get(1)?,
                ts,
                previous_score: row.get(3)?,
                current_score: row.get(4)?,
                change_pct: row.get(5)?,
                direction,
            })
        })?;
        collect_rows(rows)
    }

    pub fn upsert_benchmark(
        &self,
        dimension: &str,
        target_score: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO quality_benchmarks (dimension, target_score, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(dimension) DO UPDATE SET
                target_score=excluded.target_score,
                updated_at=excluded.updated_at
            ",
            params![dimension, target_score, updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn benchmark(&self, dimension: &str) -> Result<Option<f64>, StorageError> {
        let target = self
            .conn
            .query_row(
                "SELECT target_score FROM quality_benchmarks WHERE dimension = ?1",
                [dimension],
                |row| row.get(0),
            )
            .optional()?;
        Ok(target)
    }

    // --- backups ---

    pub fn insert_backup(&self, record: &BackupRecord) -> Result<(), StorageError> {
        let source_paths_json = serde_json::to_string(&record.source_paths)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO backup_operations (
                backup_id, backup_type, ts, size_bytes, checksum,
                source_paths_json, archive_path, status, description
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                record.backup_id,
                record.backup_type.as_str(),
                record.ts.to_rfc3339(),
                record.size_bytes,
                record.checksum,
                source_paths_json,
                record.archive_path,
                record.status.as_str(),
                record.description,
            ],
        )?;
        Ok(())
    }

    pub fn set_backup_status(
        &self,
        backup_id: &str,
        status: BackupStatus,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE backup_operations SET status = ?2 WHERE backup_id = ?1",
            params![backup_id, status.as_str()],
        )?;
        Ok(())
    }

    pub fn backup(&self, backup_id: &str) -> Result<Option<BackupRecord>, StorageError> {
        let record = self
            .conn
            .query_row(
                &format!("{BACKUP_SELECT} WHERE backup_id = ?1"),
                [backup_id],
                map_backup_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn backups(&self) -> Result<Vec<BackupRecord>, StorageError> {
        let mut statement = self
            .conn
            .prepare(&format!("{BACKUP_SELECT} ORDER BY ts ASC, backup_id ASC"))?;
        let rows = statement.query_map([], map_backup_row)?;
        collect_rows(rows)
    }

    pub fn latest_verified_backup(
        &self,
        backup_type: Option<BackupType>,
    ) -> Result<Option<BackupRecord>, StorageError> {
        let record = match backup_type {
            Some(backup_type) => self
                .conn
                .query_row(
                    &format!(
                        "{BACKUP_SELECT} WHERE status = 'verified' AND backup_type = ?1 \
                         ORDER BY ts DESC, backup_id DESC LIMIT 1"
                    ),
                    [backup_type.as_str()],
                    map_backup_row,
                )
                .optional()?,
            None => self
                .conn
                .query_row(
                    &format!(
                        "{BACKUP_SELECT} WHERE status = 'verified' \
                         ORDER BY ts DESC, backup_id DESC LIMIT 1"
                    ),
                    [],
                    map_backup_row,
                )
                .optional()?,
        };
        Ok(record)
    }

    pub fn delete_backup(&self, backup_id: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM backup_operations WHERE backup_id = ?1",
            [backup_id],
        )?;
        Ok(())
    }

    // --- recoveries ---

    pub fn insert_recovery(&self, record: &RecoveryRecord) -> Result<(), StorageError> {
        let target_paths_json = record
            .target_paths
            .as_ref()
            .map(|paths| {
                serde_json::to_string(paths)
                    .map_err(|err| StorageError::Serialization(err.to_string()))
            })
            .transpose()?;
        self.conn.execute(
            "
            INSERT INTO recovery_operations (
                recovery_id, backup_id, recovery_type, ts, status,
                target_paths_json, files_restored, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                record.recovery_id,
                record.backup_id,
                record.recovery_type.as_str(),
                record.ts.to_rfc3339(),
                record.status.as_str(),
                target_paths_json,
                record.files_restored,
                record.detail,
            ],
        )?;
        Ok(())
    }

    pub fn finish_recovery(
        &self,
        recovery_id: &str,
        status: RecoveryStatus,
        files_restored: i64,
        detail: Option<&str>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            UPDATE recovery_operations
            SET status = ?2, files_restored = ?3, detail = ?4
            WHERE recovery_id = ?1
            ",
            params![recovery_id, status.as_str(), files_restored, detail],
        )?;
        Ok(())
    }

    pub fn recovery(&self, recovery_id: &str) -> Result<Option<RecoveryRecord>, StorageError> {
        let record = self
            .conn
            .query_row(
                "
                SELECT recovery_id, backup_id, recovery_type, ts, status,
                       target_paths_json, files_restored, detail
                FROM recovery_operations
                WHERE recovery_id = ?1
                ",
                [recovery_id],
                |row| {
                    let recovery_type =
                        parse_enum_col::<RecoveryType>(row.get::<_, String>(2)?, 2)?;
                    let ts = timestamp_col(row.get::<_, String>(3)?, 3)?;
                    let status = parse_enum_col::<RecoveryStatus>(row.get::<_, String>(4)?, 4)?;
                    let target_paths = row
                        .get::<_, Option<String>>(5)?
                        .map(|value| json_col::<Vec<String>>(value, 5))
                        .transpose()?;
                    Ok(RecoveryRecord {
                        recovery_id: row.get(0)?,
                        backup_id: row.get(1)?,
                        recovery_type,
                        ts,
                        status,
                        target_paths,
                        files_restored: row.get(6)?,
                        detail: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    // --- integrity checks ---

    pub fn insert_integrity_check(
        &self,
        record: &IntegrityCheckRecord,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO integrity_checks (
                check_id, ts, total_files, corrupted_files, missing_files,
                checksum_matches, integrity_score
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                record.check_id,
                record.ts.to_rfc3339(),
                record.total_files,
                record.corrupted_files,
                record.missing_files,
                record.checksum_matches,
                record.integrity_score,
            ],
        )?;
        Ok(())
    }

    // --- optimizations ---

    pub fn insert_optimization(&self, record: &OptimizationRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO optimizations (
                optimization_id, artifact_id, ts, strategy, original_text, optimized_text,
                improvement_score, performance_gain, cost_reduction, confidence_score, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
            params![
                record.optimization_id,
                record.artifact_id,
                record.ts.to_rfc3339(),
                record.strategy.as_str(),
                record.original_text,
                record.optimized_text,
                record.improvement_score,
                record.performance_gain,
                record.cost_reduction,
                record.confidence_score,
                record.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn set_optimization_status(
        &self,
        optimization_id: &str,
        status: OptimizationStatus,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "UPDATE optimizations SET status = ?2 WHERE optimization_id = ?1",
            params![optimization_id, status.as_str()],
        )?;
        Ok(changes > 0)
    }

    pub fn optimization(
        &self,
        optimization_id: &str,
    ) -> Result<Option<OptimizationRecord>, StorageError> {
        let record = self
            .conn
            .query_row(
                "
                SELECT optimization_id, artifact_id, ts, strategy, original_text, optimized_text,
                       improvement_score, performance_gain, cost_reduction, confidence_score, status
                FROM optimizations
                WHERE optimization_id = ?1
                ",
                [optimization_id],
                |row| {
                    let ts = timestamp_col(row.get::<_, String>(2)?, 2)?;
                    let strategy =
                        parse_enum_col::<OptimizationStrategy>(row.get::<_, String>(3)?, 3)?;
                    let status =
                        parse_enum_col::<OptimizationStatus>(row.get::<_, String>(10)?, 10)?;
                    Ok(OptimizationRecord {
                        optimization_id: row.get(0)?,
                        artifact_id: row.get(1)?,
                        ts,
                        strategy,
                        original_text: row.get(4)?,
                        optimized_text: row.get(5)?,
                        improvement_score: row.get(6)?,
                        performance_gain: row.get(7)?,
                        cost_reduction: row.get(8)?,
                        confidence_score: row.get(9)?,
                        status,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    // --- strategy registry (ml_models) ---

    pub fn insert_strategy_model(&self, record: &StrategyModelRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO ml_models (model_id, strategy, version, created_at, active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                record.model_id,
                record.strategy.as_str(),
                record.version,
                record.created_at.to_rfc3339(),
                i64::from(record.active),
            ],
        )?;
        Ok(())
    }

    pub fn active_strategy_models(&self) -> Result<Vec<StrategyModelRecord>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT model_id, strategy, version, created_at, active
            FROM ml_models
            WHERE active = 1
            ORDER BY strategy ASC, version DESC
            ",
        )?;
        let rows = statement.query_map([], |row| {
            let strategy = parse_enum_col::<OptimizationStrategy>(row.get::<_, String>(1)?, 1)?;
            let created_at = timestamp_col(row.get::<_, String>(3)?, 3)?;
            Ok(StrategyModelRecord {
                model_id: row.get(0)?,
                strategy,
                version: row.get(2)?,
                created_at,
                active: row.get::<_, i64>(4)? != 0,
            })
        })?;
        collect_rows(rows)
    }

    // --- performance metrics ---

    pub fn record_optimization_metrics(
        &self,
        artifact_id: &str,
        improvement: f64,
        confidence: f64,
        ts: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO performance_metrics (
                artifact_id, optimization_count, last_optimized,
                cumulative_improvement, avg_confidence
            ) VALUES (?1, 1, ?2, ?3, ?4)
            ON CONFLICT(artifact_id) DO UPDATE SET
                optimization_count = optimization_count + 1,
                last_optimized = excluded.last_optimized,
                cumulative_improvement = cumulative_improvement + excluded.cumulative_improvement,
                avg_confidence = (avg_confidence * optimization_count + excluded.avg_confidence)
                    / (optimization_count + 1)
            ",
            params![artifact_id, ts.to_rfc3339(), improvement, confidence],
        )?;
        Ok(())
    }

    pub fn performance_metrics(
        &self,
        artifact_id: &str,
    ) -> Result<Option<PerformanceMetricsRecord>, StorageError> {
        let record = self
            .conn
            .query_row(
                "
                SELECT artifact_id, optimization_count, last_optimized,
                       cumulative_improvement, avg_confidence
                FROM performance_metrics
                WHERE artifact_id = ?1
                ",
                [artifact_id],
                |row| {
                    let last_optimized = timestamp_col(row.get::<_, String>(2)?, 2)?;
                    Ok(PerformanceMetricsRecord {
                        artifact_id: row.get(0)?,
                        optimization_count: row.get(1)?,
                        last_optimized,
                        cumulative_improvement: row.get(3)?,
                        avg_confidence: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

const CHANGE_SELECT: &str = "
    SELECT change_id, artifact_id, change_type, severity, actor_id, ts,
           old_value, new_value, summary, compliance_status, metadata_json
    FROM change_records
";

const ASSESSMENT_SELECT: &str = "
    SELECT assessment_id, artifact_id, ts, overall_score, level,
           dimensions_json, strengths_json, weaknesses_json, priority
    FROM quality_assessments
";

const BACKUP_SELECT: &str = "
    SELECT backup_id, backup_type, ts, size_bytes, checksum,
           source_paths_json, archive_path, status, description
    FROM backup_operations
";

fn map_change_row(row: &rusqlite::Row<'_>) -> Result<ChangeRecord, rusqlite::Error> {
    let change_type = parse_enum_col::<ChangeType>(row.get::<_, String>(2)?, 2)?;
    let severity = parse_enum_col::<Severity>(row.get::<_, String>(3)?, 3)?;
    let ts = timestamp_col(row.get::<_, String>(5)?, 5)?;
    let compliance_status = parse_enum_col::<ComplianceStatus>(row.get::<_, String>(9)?, 9)?;
    let metadata = json_col::<BTreeMap<String, String>>(row.get::<_, String>(10)?, 10)?;
    Ok(ChangeRecord {
        change_id: row.get(0)?,
        artifact_id: row.get(1)?,
        change_type,
        severity,
        actor_id: row.get(4)?,
        ts,
        old_value: row.get(6)?,
        new_value: row.get(7)?,
        summary: row.get(8)?,
        compliance_status,
        metadata,
    })
}

fn map_assessment_row(row: &rusqlite::Row<'_>) -> Result<AssessmentRecord, rusqlite::Error> {
    let ts = timestamp_col(row.get::<_, String>(2)?, 2)?;
    let level = parse_enum_col::<QualityLevel>(row.get::<_, String>(4)?, 4)?;
    let dimensions = json_col::<BTreeMap<String, DimensionScore>>(row.get::<_, String>(5)?, 5)?;
    let strengths = json_col::<Vec<String>>(row.get::<_, String>(6)?, 6)?;
    let weaknesses = json_col::<Vec<String>>(row.get::<_, String>(7)?, 7)?;
    let priority = parse_enum_col::<Severity>(row.get::<_, String>(8)?, 8)?;
    Ok(AssessmentRecord {
        assessment_id: row.get(0)?,
        artifact_id: row.get(1)?,
        ts,
        overall_score: row.get(3)?,
        level,
        dimensions,
        strengths,
        weaknesses,
        priority,
    })
}

fn map_backup_row(row: &rusqlite::Row<'_>) -> Result<BackupRecord, rusqlite::Error> {
    let backup_type = parse_enum_col::<BackupType>(row.get::<_, String>(1)?, 1)?;
    let ts = timestamp_col(row.get::<_, String>(2)?, 2)?;
    let source_paths = json_col::<Vec<String>>(row.get::<_, String>(5)?, 5)?;
    let status = parse_enum_col::<BackupStatus>(row.get::<_, String>(7)?, 7)?;
    Ok(BackupRecord {
        backup_id: row.get(0)?,
        backup_type,
        ts,
        size_bytes: row.get(3)?,
        checksum: row.get(4)?,
        source_paths,
        archive_path: row.get(6)?,
        status,
        description: row.get(8)?,
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = Result<T, rusqlite::Error>>,
) -> Result<Vec<T>, StorageError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn timestamp_col(value: String, index: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
}

fn json_col<T: serde::de::DeserializeOwned>(
    value: String,
    index: usize,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(&value).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

fn parse_enum_col<T: std::str::FromStr<Err = String>>(
    value: String,
    index: usize,
) -> Result<T, rusqlite::Error> {
    value.parse::<T>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
        )
    })
}
