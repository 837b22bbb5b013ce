//! A/B experiments over artifact variants: a draft → running → {paused ↔
//! running} → completed | cancelled state machine, stable per-user variant
//! assignment, and an approximate two-sample comparison of recorded quality
//! scores. The engine is self-contained and in-memory; callers log outcomes
//! through the audit ledger if they want durable history.

use chrono::{DateTime, Utc};
use pgov_core::ids::{generate_id, TEST_PREFIX};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Minimum total recorded results before `analyze` will run.
pub const MIN_RESULTS_FOR_ANALYSIS: usize = 10;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown test: {0}")]
    UnknownTest(String),
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: TestStatus, to: TestStatus },
    #[error("insufficient data: {have} results, need {need}")]
    InsufficientData { have: usize, need: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Running => "running",
            TestStatus::Paused => "paused",
            TestStatus::Completed => "completed",
            TestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Completed | TestStatus::Cancelled)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "A" | "a" => Ok(Variant::A),
            "B" | "b" => Ok(Variant::B),
            other => Err(format!("Unknown variant: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentTest {
    pub test_id: String,
    pub name: String,
    pub status: TestStatus,
    pub variant_a: BTreeMap<String, String>,
    pub variant_b: BTreeMap<String, String>,
    pub traffic_split: f64,
    pub target_sample_size: usize,
    pub confidence_level: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateTest {
    pub name: String,
    pub variant_a: BTreeMap<String, String>,
    pub variant_b: BTreeMap<String, String>,
    pub traffic_split: f64,
    pub target_sample_size: usize,
    pub confidence_level: f64,
}

impl Default for CreateTest {
    fn default() -> Self {
        Self {
            name: String::new(),
            variant_a: BTreeMap::new(),
            variant_b: BTreeMap::new(),
            traffic_split: 0.5,
            target_sample_size: 100,
            confidence_level: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentResult {
    pub test_id: String,
    pub variant: Variant,
    pub latency_ms: f64,
    pub token_count: u64,
    pub quality_score: f64,
    pub success: bool,
    pub user_satisfaction: Option<f64>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantStats {
    pub sample_size: usize,
    pub mean_quality: f64,
    pub stdev_quality: f64,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticalResult {
    pub test_id: String,
    pub variant_a: VariantStats,
    pub variant_b: VariantStats,
    pub t_statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub confidence_interval: (f64, f64),
    pub is_significant: bool,
    pub winner: Option<Variant>,
    pub recommendation: String,
}

#[derive(Debug, Clone)]
pub struct TestSummary {
    pub test_id: String,
    pub name: String,
    pub status: TestStatus,
    pub total_results: usize,
    pub results_a: usize,
    pub results_b: usize,
    pub target_sample_size: usize,
    pub progress: f64,
}

#[derive(Default)]
pub struct ExperimentEngine {
    tests: BTreeMap<String, ExperimentTest>,
    results: BTreeMap<String, Vec<ExperimentResult>>,
}

impl ExperimentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_test(&mut self, request: CreateTest) -> Result<String, ExperimentError> {
        if request.name.trim().is_empty() {
            warn!("test rejected: name is required");
            return Err(ExperimentError::Validation("test name is required".to_string()));
        }
        if !(0.0..=1.0).contains(&request.traffic_split) {
            warn!(
                name = %request.name,
                traffic_split = request.traffic_split,
                "test rejected: traffic_split out of range"
            );
            return Err(ExperimentError::Validation(format!(
                "traffic_split must be in [0,1], got {}",
                request.traffic_split
            )));
        }
        if !(0.0..1.0).contains(&request.confidence_level) || request.confidence_level <= 0.0 {
            warn!(
                name = %request.name,
                confidence_level = request.confidence_level,
                "test rejected: confidence_level out of range"
            );
            return Err(ExperimentError::Validation(format!(
                "confidence_level must be in (0,1), got {}",
                request.confidence_level
            )));
        }

        let test_id = generate_id(TEST_PREFIX);
        self.tests.insert(
            test_id.clone(),
            ExperimentTest {
                test_id: test_id.clone(),
                name: request.name,
                status: TestStatus::Draft,
                variant_a: request.variant_a,
                variant_b: request.variant_b,
                traffic_split: request.traffic_split,
                target_sample_size: request.target_sample_size,
                confidence_level: request.confidence_level,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
            },
        );
        self.results.insert(test_id.clone(), Vec::new());
        Ok(test_id)
    }

    pub fn test(&self, test_id: &str) -> Option<&ExperimentTest> {
        self.tests.get(test_id)
    }

    pub fn start(&mut self, test_id: &str) -> Result<(), ExperimentError> {
        let test = self.test_mut(test_id)?;
        match test.status {
            TestStatus::Draft | TestStatus::Paused => {
                test.status = TestStatus::Running;
                if test.started_at.is_none() {
                    test.started_at = Some(Utc::now());
                }
                Ok(())
            }
            from => Err(ExperimentError::InvalidTransition {
                from,
                to: TestStatus::Running,
            }),
        }
    }

    pub fn pause(&mut self, test_id: &str) -> Result<(), ExperimentError> {
        let test = self.test_mut(test_id)?;
        match test.status {
            TestStatus::Running => {
                test.status = TestStatus::Paused;
                Ok(())
            }
            from => Err(ExperimentError::InvalidTransition {
                from,
                to: TestStatus::Paused,
            }),
        }
    }

    pub fn complete(&mut self, test_id: &str) -> Result<(), ExperimentError> {
        let test = self.test_mut(test_id)?;
        match test.status {
            TestStatus::Running | TestStatus::Paused => {
                test.status = TestStatus::Completed;
                test.ended_at = Some(Utc::now());
                Ok(())
            }
            from => Err(ExperimentError::InvalidTransition {
                from,
                to: TestStatus::Completed,
            }),
        }
    }

    pub fn cancel(&mut self, test_id: &str) -> Result<(), ExperimentError> {
        let test = self.test_mut(test_id)?;
        if test.status.is_terminal() {
            return Err(ExperimentError::InvalidTransition {
                from: test.status,
                to: TestStatus::Cancelled,
            });
        }
        test.status = TestStatus::Cancelled;
        test.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Assign a variant. With a user id the assignment is a stable hash of
    /// `(user_id, test_id)`; without one it is uniformly random per call.
    pub fn assign_variant(
        &self,
        test_id: &str,
        user_id: Option<&str>,
    ) -> Result<Variant, ExperimentError> {
        let test = self.test_ref(test_id)?;
        if test.status != TestStatus::Running {
            return Err(ExperimentError::Validation(format!(
                "test {test_id} is not running"
            )));
        }

        let bucket = match user_id {
            Some(user_id) => stable_bucket(user_id, test_id),
            None => rand::random::<f64>() * 100.0,
        };
        if bucket < test.traffic_split * 100.0 {
            Ok(Variant::A)
        } else {
            Ok(Variant::B)
        }
    }

    pub fn record_result(
        &mut self,
        result: ExperimentResult,
    ) -> Result<(), ExperimentError> {
        if !(0.0..=1.0).contains(&result.quality_score) {
            return Err(ExperimentError::Validation(format!(
                "quality_score must be in [0,1], got {}",
                result.quality_score
            )));
        }
        let test = self.test_ref(&result.test_id)?;
        if test.status != TestStatus::Running {
            return Err(ExperimentError::Validation(format!(
                "test {} is not accepting results ({})",
                result.test_id, test.status
            )));
        }
        self.results
            .entry(result.test_id.clone())
            .or_default()
            .push(result);
        Ok(())
    }

    pub fn analyze(&self, test_id: &str) -> Result<StatisticalResult, ExperimentError> {
        let test = self.test_ref(test_id)?;
        let results = self.results.get(test_id).map(Vec::as_slice).unwrap_or(&[]);
        if results.len() < MIN_RESULTS_FOR_ANALYSIS {
            warn!(test_id, have = results.len(), "analysis refused: insufficient data");
            return Err(ExperimentError::InsufficientData {
                have: results.len(),
                need: MIN_RESULTS_FOR_ANALYSIS,
            });
        }

        let stats_a = variant_stats(results, Variant::A);
        let stats_b = variant_stats(results, Variant::B);

        let t_statistic = pooled_t_statistic(&stats_a, &stats_b);
        let p_value = approximate_p_value(t_statistic);
        let effect_size = cohens_d(&stats_a, &stats_b);
        let z = if (test.confidence_level - 0.95).abs() < 1e-9 {
            1.96
        } else {
            1.645
        };
        let standard_error = pooled_standard_error(&stats_a, &stats_b);
        let mean_diff = stats_a.mean_quality - stats_b.mean_quality;
        let confidence_interval = (
            mean_diff - z * standard_error,
            mean_diff + z * standard_error,
        );

        let is_significant = p_value < (1.0 - test.confidence_level);
        let winner = if is_significant {
            Some(if stats_a.mean_quality > stats_b.mean_quality {
                Variant::A
            } else {
                Variant::B
            })
        } else {
            None
        };

        Ok(StatisticalResult {
            test_id: test_id.to_string(),
            recommendation: recommendation(is_significant, effect_size, winner),
            variant_a: stats_a,
            variant_b: stats_b,
            t_statistic,
            p_value,
            effect_size,
            confidence_interval,
            is_significant,
            winner,
        })
    }

    pub fn summarize(&self, test_id: &str) -> Result<TestSummary, ExperimentError> {
        let test = self.test_ref(test_id)?;
        let results = self.results.get(test_id).map(Vec::as_slice).unwrap_or(&[]);
        let results_a = results
            .iter()
            .filter(|result| result.variant == Variant::A)
            .count();
        let progress = if test.target_sample_size > 0 {
            (results.len() as f64 / test.target_sample_size as f64).min(1.0)
        } else {
            0.0
        };
        Ok(TestSummary {
            test_id: test.test_id.clone(),
            name: test.name.clone(),
            status: test.status,
            total_results: results.len(),
            results_a,
            results_b: results.len() - results_a,
            target_sample_size: test.target_sample_size,
            progress,
        })
    }

    fn test_ref(&self, test_id: &str) -> Result<&ExperimentTest, ExperimentError> {
        self.tests
            .get(test_id)
            .ok_or_else(|| ExperimentError::UnknownTest(test_id.to_string()))
    }

    fn test_mut(&mut self, test_id: &str) -> Result<&mut ExperimentTest, ExperimentError> {
        self.tests
            .get_mut(test_id)
            .ok_or_else(|| ExperimentError::UnknownTest(test_id.to_string()))
    }
}

/// Stable bucket in [0,100) for a `(user_id, test_id)` pair.
fn stable_bucket(user_id: &str, test_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(test_id.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 10_000) as f64 / 100.0
}

fn variant_stats(results: &[ExperimentResult], variant: Variant) -> VariantStats {
    let subset: Vec<&ExperimentResult> = results
        .iter()
        .filter(|result| result.variant == variant)
        .collect();
    let sample_size = subset.len();
    if sample_size == 0 {
        return VariantStats {
            sample_size: 0,
            mean_quality: 0.0,
            stdev_quality: 0.0,
            success_rate: 0.0,
            mean_latency_ms: 0.0,
        };
    }
    let mean_quality = subset.iter().map(|r| r.quality_score).sum::<f64>() / sample_size as f64;
    let variance = if sample_size > 1 {
        subset
            .iter()
            .map(|r| (r.quality_score - mean_quality).powi(2))
            .sum::<f64>()
            / (sample_size - 1) as f64
    } else {
        0.0
    };
    VariantStats {
        sample_size,
        mean_quality,
        stdev_quality: variance.sqrt(),
        success_rate: subset.iter().filter(|r| r.success).count() as f64 / sample_size as f64,
        mean_latency_ms: subset.iter().map(|r| r.latency_ms).sum::<f64>() / sample_size as f64,
    }
}

fn pooled_standard_error(a: &VariantStats, b: &VariantStats) -> f64 {
    if a.sample_size == 0 || b.sample_size == 0 {
        return 0.0;
    }
    (a.stdev_quality.powi(2) / a.sample_size as f64
        + b.stdev_quality.powi(2) / b.sample_size as f64)
        .sqrt()
}

fn pooled_t_statistic(a: &VariantStats, b: &VariantStats) -> f64 {
    let standard_error = pooled_standard_error(a, b);
    if standard_error < f64::EPSILON {
        return 0.0;
    }
    (a.mean_quality - b.mean_quality) / standard_error
}

/// Threshold approximation, not a Student's-t CDF inversion.
fn approximate_p_value(t_statistic: f64) -> f64 {
    let t = t_statistic.abs();
    if t > 2.0 {
        0.05
    } else if t > 1.5 {
        0.10
    } else {
        0.50
    }
}

fn cohens_d(a: &VariantStats, b: &VariantStats) -> f64 {
    if a.sample_size < 2 || b.sample_size < 2 {
        return 0.0;
    }
    let pooled_variance = ((a.sample_size - 1) as f64 * a.stdev_quality.powi(2)
        + (b.sample_size - 1) as f64 * b.stdev_quality.powi(2))
        / (a.sample_size + b.sample_size - 2) as f64;
    let pooled_stdev = pooled_variance.sqrt();
    if pooled_stdev < f64::EPSILON {
        return 0.0;
    }
    (a.mean_quality - b.mean_quality) / pooled_stdev
}

fn recommendation(is_significant: bool, effect_size: f64, winner: Option<Variant>) -> String {
    if !is_significant {
        return "No statistically detectable difference yet; keep collecting results."
            .to_string();
    }
    let winner = winner.map(|variant| variant.as_str()).unwrap_or("?");
    let magnitude = effect_size.abs();
    if magnitude >= 0.8 {
        format!("Large effect in favor of variant {winner}; roll it out.")
    } else if magnitude >= 0.5 {
        format!("Moderate effect in favor of variant {winner}; consider rolling it out.")
    } else if magnitude >= 0.2 {
        format!("Small effect in favor of variant {winner}; extend the test before deciding.")
    } else {
        format!("Variant {winner} leads, but the effect is negligible; keep the test running.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_test(engine: &mut ExperimentEngine) -> String {
        let test_id = engine
            .create_test(CreateTest {
                name: "greeting rewrite".to_string(),
                ..CreateTest::default()
            })
            .expect("create test");
        engine.start(&test_id).expect("start test");
        test_id
    }

    fn result(test_id: &str, variant: Variant, quality_score: f64) -> ExperimentResult {
        ExperimentResult {
            test_id: test_id.to_string(),
            variant,
            latency_ms: 120.0,
            token_count: 256,
            quality_score,
            success: true,
            user_satisfaction: None,
            ts: Utc::now(),
        }
    }

    #[test]
    fn state_machine_rejects_invalid_transitions() {
        let mut engine = ExperimentEngine::new();
        let test_id = engine
            .create_test(CreateTest {
                name: "lifecycle".to_string(),
                ..CreateTest::default()
            })
            .expect("create");

        // draft cannot pause or complete
        assert!(matches!(
            engine.pause(&test_id),
            Err(ExperimentError::InvalidTransition { .. })
        ));
        assert!(matches!(
            engine.complete(&test_id),
            Err(ExperimentError::InvalidTransition { .. })
        ));

        engine.start(&test_id).expect("start");
        engine.pause(&test_id).expect("pause");
        engine.start(&test_id).expect("resume");
        engine.complete(&test_id).expect("complete");

        assert!(matches!(
            engine.start(&test_id),
            Err(ExperimentError::InvalidTransition { .. })
        ));
        assert!(matches!(
            engine.cancel(&test_id),
            Err(ExperimentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn user_assignment_is_deterministic_and_stable() {
        let mut engine = ExperimentEngine::new();
        let test_id = running_test(&mut engine);

        for user in ["user-1", "user-2", "analyst@example", "u-999"] {
            let first = engine
                .assign_variant(&test_id, Some(user))
                .expect("assign");
            for _ in 0..10 {
                let again = engine
                    .assign_variant(&test_id, Some(user))
                    .expect("assign again");
                assert_eq!(first, again, "{user}");
            }
        }
    }

    #[test]
    fn traffic_split_extremes_force_a_single_variant() {
        let mut engine = ExperimentEngine::new();
        let all_a = engine
            .create_test(CreateTest {
                name: "all a".to_string(),
                traffic_split: 1.0,
                ..CreateTest::default()
            })
            .expect("create");
        engine.start(&all_a).expect("start");
        let all_b = engine
            .create_test(CreateTest {
                name: "all b".to_string(),
                traffic_split: 0.0,
                ..CreateTest::default()
            })
            .expect("create");
        engine.start(&all_b).expect("start");

        for i in 0..50 {
            let user = format!("user-{i}");
            assert_eq!(
                engine.assign_variant(&all_a, Some(&user)).expect("assign"),
                Variant::A
            );
            assert_eq!(
                engine.assign_variant(&all_b, Some(&user)).expect("assign"),
                Variant::B
            );
        }
    }

    #[test]
    fn analyze_requires_ten_results() {
        let mut engine = ExperimentEngine::new();
        let test_id = running_test(&mut engine);
        for i in 0..9 {
            let variant = if i % 2 == 0 { Variant::A } else { Variant::B };
            engine
                .record_result(result(&test_id, variant, 0.5))
                .expect("record");
        }

        assert!(matches!(
            engine.analyze(&test_id),
            Err(ExperimentError::InsufficientData { have: 9, need: 10 })
        ));
    }

    #[test]
    fn clearly_separated_variants_are_significant_with_b_winning() {
        let mut engine = ExperimentEngine::new();
        let test_id = running_test(&mut engine);

        // A ~ N(0.5, 0.05), B ~ N(0.8, 0.05), n = 30 each; a fixed spread
        // stands in for sampling.
        let offsets = [-0.08, -0.05, -0.03, -0.01, 0.0, 0.01, 0.03, 0.05, 0.08, 0.02];
        for i in 0..30 {
            let offset = offsets[i % offsets.len()];
            engine
                .record_result(result(&test_id, Variant::A, 0.5 + offset))
                .expect("record a");
            engine
                .record_result(result(&test_id, Variant::B, 0.8 + offset))
                .expect("record b");
        }

        let analysis = engine.analyze(&test_id).expect("analyze");
        assert!(analysis.is_significant);
        assert_eq!(analysis.winner, Some(Variant::B));
        assert!(analysis.t_statistic < -2.0);
        assert!((analysis.p_value - 0.05).abs() < 1e-9);
        assert!(analysis.effect_size < -0.8);
        assert!(analysis.recommendation.contains("variant B"));
    }

    #[test]
    fn near_identical_variants_are_not_significant() {
        let mut engine = ExperimentEngine::new();
        let test_id = running_test(&mut engine);
        let offsets = [-0.04, -0.02, 0.0, 0.02, 0.04];
        for i in 0..15 {
            let offset = offsets[i % offsets.len()];
            engine
                .record_result(result(&test_id, Variant::A, 0.6 + offset))
                .expect("record a");
            engine
                .record_result(result(&test_id, Variant::B, 0.6 + offset))
                .expect("record b");
        }

        let analysis = engine.analyze(&test_id).expect("analyze");
        assert!(!analysis.is_significant);
        assert_eq!(analysis.winner, None);
        assert!((analysis.p_value - 0.50).abs() < 1e-9);
    }

    #[test]
    fn results_are_rejected_when_test_is_not_running() {
        let mut engine = ExperimentEngine::new();
        let test_id = running_test(&mut engine);
        engine.pause(&test_id).expect("pause");

        assert!(matches!(
            engine.record_result(result(&test_id, Variant::A, 0.5)),
            Err(ExperimentError::Validation(_))
        ));
        assert!(matches!(
            engine.record_result(result("test_missing", Variant::A, 0.5)),
            Err(ExperimentError::UnknownTest(_))
        ));
    }

    #[test]
    fn summary_tracks_progress_toward_target() {
        let mut engine = ExperimentEngine::new();
        let test_id = engine
            .create_test(CreateTest {
                name: "progress".to_string(),
                target_sample_size: 20,
                ..CreateTest::default()
            })
            .expect("create");
        engine.start(&test_id).expect("start");
        for i in 0..10 {
            let variant = if i < 6 { Variant::A } else { Variant::B };
            engine
                .record_result(result(&test_id, variant, 0.7))
                .expect("record");
        }

        let summary = engine.summarize(&test_id).expect("summary");
        assert_eq!(summary.total_results, 10);
        assert_eq!(summary.results_a, 6);
        assert_eq!(summary.results_b, 4);
        assert!((summary.progress - 0.5).abs() < 1e-9);
    }
}
