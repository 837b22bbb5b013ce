//! Shared contracts for the prompt governance workspace: the enums used
//! across storage and engines, record id generation, content hashing, and
//! the text similarity ratio that drives change severity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub mod ids;

/// Kind of mutation applied to a governed artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Archive,
    Restore,
    Approve,
    Reject,
    Publish,
    Unpublish,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
            ChangeType::Archive => "archive",
            ChangeType::Restore => "restore",
            ChangeType::Approve => "approve",
            ChangeType::Reject => "reject",
            ChangeType::Publish => "publish",
            ChangeType::Unpublish => "unpublish",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "create" => Ok(ChangeType::Create),
            "update" => Ok(ChangeType::Update),
            "delete" => Ok(ChangeType::Delete),
            "archive" => Ok(ChangeType::Archive),
            "restore" => Ok(ChangeType::Restore),
            "approve" => Ok(ChangeType::Approve),
            "reject" => Ok(ChangeType::Reject),
            "publish" => Ok(ChangeType::Publish),
            "unpublish" => Ok(ChangeType::Unpublish),
            other => Err(format!("Unknown change type: {other}")),
        }
    }
}

/// Shared four-step scale used for change severity, impact risk, and
/// remediation priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("Unknown severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    PendingReview,
    UnderInvestigation,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "compliant",
            ComplianceStatus::NonCompliant => "non_compliant",
            ComplianceStatus::PendingReview => "pending_review",
            ComplianceStatus::UnderInvestigation => "under_investigation",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplianceStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "compliant" => Ok(ComplianceStatus::Compliant),
            "non_compliant" | "non-compliant" => Ok(ComplianceStatus::NonCompliant),
            "pending_review" | "pending-review" => Ok(ComplianceStatus::PendingReview),
            "under_investigation" => Ok(ComplianceStatus::UnderInvestigation),
            other => Err(format!("Unknown compliance status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RollbackComplexity {
    Low,
    Medium,
    High,
}

impl RollbackComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackComplexity::Low => "low",
            RollbackComplexity::Medium => "medium",
            RollbackComplexity::High => "high",
        }
    }
}

impl FromStr for RollbackComplexity {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "low" => Ok(RollbackComplexity::Low),
            "medium" => Ok(RollbackComplexity::Medium),
            "high" => Ok(RollbackComplexity::High),
            other => Err(format!("Unknown rollback complexity: {other}")),
        }
    }
}

/// Discretized quality band derived from an overall score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Excellent,
    Good,
    Average,
    Poor,
    Unacceptable,
}

impl QualityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Average => "average",
            QualityLevel::Poor => "poor",
            QualityLevel::Unacceptable => "unacceptable",
        }
    }

    /// Step function over the overall score.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.90 {
            QualityLevel::Excellent
        } else if score >= 0.70 {
            QualityLevel::Good
        } else if score >= 0.50 {
            QualityLevel::Average
        } else if score >= 0.30 {
            QualityLevel::Poor
        } else {
            QualityLevel::Unacceptable
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "excellent" => Ok(QualityLevel::Excellent),
            "good" => Ok(QualityLevel::Good),
            "average" => Ok(QualityLevel::Average),
            "poor" => Ok(QualityLevel::Poor),
            "unacceptable" => Ok(QualityLevel::Unacceptable),
            other => Err(format!("Unknown quality level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Improving => "improving",
            TrendDirection::Declining => "declining",
            TrendDirection::Stable => "stable",
        }
    }
}

impl FromStr for TrendDirection {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "improving" => Ok(TrendDirection::Improving),
            "declining" => Ok(TrendDirection::Declining),
            "stable" => Ok(TrendDirection::Stable),
            other => Err(format!("Unknown trend direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
    Differential,
    Manual,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::Differential => "differential",
            BackupType::Manual => "manual",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            "differential" => Ok(BackupType::Differential),
            "manual" => Ok(BackupType::Manual),
            other => Err(format!("Unknown backup type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Verified,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Verified => "verified",
        }
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "pending" => Ok(BackupStatus::Pending),
            "in_progress" | "in-progress" => Ok(BackupStatus::InProgress),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            "verified" => Ok(BackupStatus::Verified),
            other => Err(format!("Unknown backup status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryType {
    Full,
    Selective,
    PointInTime,
    Rollback,
}

impl RecoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryType::Full => "full",
            RecoveryType::Selective => "selective",
            RecoveryType::PointInTime => "point_in_time",
            RecoveryType::Rollback => "rollback",
        }
    }
}

impl FromStr for RecoveryType {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "full" => Ok(RecoveryType::Full),
            "selective" => Ok(RecoveryType::Selective),
            "point_in_time" | "point-in-time" => Ok(RecoveryType::PointInTime),
            "rollback" => Ok(RecoveryType::Rollback),
            other => Err(format!("Unknown recovery type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RecoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStatus::Pending => "pending",
            RecoveryStatus::InProgress => "in_progress",
            RecoveryStatus::Completed => "completed",
            RecoveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for RecoveryStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "pending" => Ok(RecoveryStatus::Pending),
            "in_progress" | "in-progress" => Ok(RecoveryStatus::InProgress),
            "completed" => Ok(RecoveryStatus::Completed),
            "failed" => Ok(RecoveryStatus::Failed),
            other => Err(format!("Unknown recovery status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationStrategy {
    Performance,
    Clarity,
    Cost,
    Quality,
    Adaptive,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStrategy::Performance => "performance",
            OptimizationStrategy::Clarity => "clarity",
            OptimizationStrategy::Cost => "cost",
            OptimizationStrategy::Quality => "quality",
            OptimizationStrategy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationStrategy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "performance" => Ok(OptimizationStrategy::Performance),
            "clarity" => Ok(OptimizationStrategy::Clarity),
            "cost" => Ok(OptimizationStrategy::Cost),
            "quality" => Ok(OptimizationStrategy::Quality),
            "adaptive" => Ok(OptimizationStrategy::Adaptive),
            other => Err(format!("Unknown optimization strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    Completed,
    RolledBack,
    Failed,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStatus::Completed => "completed",
            OptimizationStatus::RolledBack => "rolled_back",
            OptimizationStatus::Failed => "failed",
        }
    }
}

impl FromStr for OptimizationStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "completed" => Ok(OptimizationStatus::Completed),
            "rolled_back" | "rolled-back" => Ok(OptimizationStatus::RolledBack),
            "failed" => Ok(OptimizationStatus::Failed),
            other => Err(format!("Unknown optimization status: {other}")),
        }
    }
}

/// Hex-encoded SHA-256 of the given bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Similarity ratio in [0,1] between two texts: 1.0 for identical input,
/// 0.0 for no shared content. Normalized Levenshtein over characters.
pub fn similarity_ratio(old: &str, new: &str) -> f64 {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    if old_chars.is_empty() && new_chars.is_empty() {
        return 1.0;
    }
    let max_len = old_chars.len().max(new_chars.len());
    let distance = levenshtein(&old_chars, &new_chars);
    1.0 - (distance as f64 / max_len as f64)
}

fn levenshtein(left: &[char], right: &[char]) -> usize {
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0usize; right.len() + 1];

    for (i, left_char) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_char) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(left_char != right_char);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_roundtrips_through_strings() {
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            let parsed: Severity = severity.as_str().parse().expect("parse severity");
            assert_eq!(parsed, severity);
        }
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn quality_level_is_a_step_function_of_score() {
        assert_eq!(QualityLevel::from_score(0.95), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_score(0.90), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_score(0.70), QualityLevel::Good);
        assert_eq!(QualityLevel::from_score(0.69), QualityLevel::Average);
        assert_eq!(QualityLevel::from_score(0.30), QualityLevel::Poor);
        assert_eq!(QualityLevel::from_score(0.05), QualityLevel::Unacceptable);
    }

    #[test]
    fn similarity_ratio_bounds() {
        assert_eq!(similarity_ratio("", ""), 1.0);
        assert_eq!(similarity_ratio("same text", "same text"), 1.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);

        let near = similarity_ratio("write a summary", "write the summary");
        assert!(near > 0.7 && near < 1.0);

        let far = similarity_ratio("short", "an entirely different and much longer body of text");
        assert!(far < 0.3);
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"governance"),
            sha256_hex(b"governance"),
        );
        assert_eq!(sha256_hex(b"").len(), 64);
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }
}
