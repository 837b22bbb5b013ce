//! Heuristic quality scoring for prompt artifacts. Seven fixed dimensions,
//! each scored in [0,1] by an independent heuristic; the overall score is a
//! fixed-weight sum. Every assessment is persisted, and a trend row compares
//! it to the immediately prior assessment for the same artifact.

use chrono::Utc;
use pgov_core::ids::{generate_id, ASSESSMENT_PREFIX, TREND_PREFIX};
use pgov_core::{QualityLevel, Severity, TrendDirection};
use pgov_storage::{
    AssessmentRecord, DimensionScore, GovernanceStore, StorageError, TrendRecord,
};
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

pub const WEIGHT_CLARITY: f64 = 0.25;
pub const WEIGHT_RELEVANCE: f64 = 0.20;
pub const WEIGHT_COMPLETENESS: f64 = 0.20;
pub const WEIGHT_CONSISTENCY: f64 = 0.15;
pub const WEIGHT_SPECIFICITY: f64 = 0.10;
pub const WEIGHT_STRUCTURE: f64 = 0.05;
pub const WEIGHT_LANGUAGE: f64 = 0.05;

const WEAK_DIMENSION_THRESHOLD: f64 = 0.6;
const STRONG_DIMENSION_THRESHOLD: f64 = 0.75;

const IMPERATIVE_WORDS: &[&str] = &[
    "write", "list", "analyze", "summarize", "describe", "explain", "generate", "create",
    "extract", "classify", "translate", "compare", "identify", "produce", "return",
];

const VAGUE_WORDS: &[&str] = &[
    "some", "various", "stuff", "things", "appropriately", "etc", "somehow", "maybe",
    "generally", "several",
];

const FILLER_PHRASES: &[&str] = &["please kindly", "very very", "as you know", "basically"];

#[derive(Debug, Error)]
pub enum QualityError {
    #[error("artifact text is empty")]
    EmptyText,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Optional caller-supplied context for relevance scoring.
#[derive(Debug, Clone, Default)]
pub struct AssessmentContext {
    pub expected_topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub trend_deadband_pct: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            trend_deadband_pct: 5.0,
        }
    }
}

/// Patterns used by the dimension heuristics, compiled once per scorer.
struct ScorePatterns {
    pronouns: Regex,
    measurable: Regex,
}

impl ScorePatterns {
    fn new() -> Self {
        Self {
            pronouns: Regex::new(r"(?i)\b(it|this|that|they|them)\b").expect("valid regex"),
            measurable: Regex::new(r"(?i)\b(exactly|at least|at most|no more than|between|within)\b")
                .expect("valid regex"),
        }
    }
}

pub struct QualityScorer {
    config: ScorerConfig,
    patterns: ScorePatterns,
}

impl QualityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            patterns: ScorePatterns::new(),
        }
    }

    /// Score `text`, persist the assessment, and update the artifact's trend
    /// against its immediately prior assessment.
    pub fn assess(
        &self,
        store: &GovernanceStore,
        artifact_id: &str,
        text: &str,
        context: Option<&AssessmentContext>,
    ) -> Result<AssessmentRecord, QualityError> {
        if text.trim().is_empty() {
            warn!(artifact_id, "assessment rejected: empty text");
            return Err(QualityError::EmptyText);
        }

        let previous = store.latest_assessment(artifact_id)?;

        let mut dimensions = BTreeMap::new();
        dimensions.insert(
            "clarity".to_string(),
            score_clarity(text, &self.patterns.pronouns),
        );
        dimensions.insert("relevance".to_string(), score_relevance(text, context));
        dimensions.insert("completeness".to_string(), score_completeness(text));
        dimensions.insert("consistency".to_string(), score_consistency(text));
        dimensions.insert(
            "specificity".to_string(),
            score_specificity(text, &self.patterns.measurable),
        );
        dimensions.insert("structure".to_string(), score_structure(text));
        dimensions.insert("language".to_string(), score_language(text));

        let overall_score = dimensions
            .values()
            .map(|dimension| dimension.score * dimension.weight)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        let strengths = dimensions
            .iter()
            .filter(|(_, dimension)| dimension.score >= STRONG_DIMENSION_THRESHOLD)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        let weaknesses = dimensions
            .iter()
            .filter(|(_, dimension)| dimension.score < WEAK_DIMENSION_THRESHOLD)
            .map(|(name, dimension)| format!("{name}: {}", dimension.rationale))
            .collect::<Vec<_>>();

        let record = AssessmentRecord {
            assessment_id: generate_id(ASSESSMENT_PREFIX),
            artifact_id: artifact_id.to_string(),
            ts: Utc::now(),
            overall_score,
            level: QualityLevel::from_score(overall_score),
            dimensions,
            strengths,
            weaknesses: weaknesses.clone(),
            priority: remediation_priority(overall_score, weaknesses.len()),
        };

        store.insert_assessment(&record)?;

        if let Some(previous) = previous {
            let trend = trend_against(&record, &previous, self.config.trend_deadband_pct);
            store.insert_trend(&trend)?;
        }

        Ok(record)
    }

    /// Every assessment recorded for the artifact, oldest first.
    pub fn history(
        &self,
        store: &GovernanceStore,
        artifact_id: &str,
    ) -> Result<Vec<AssessmentRecord>, QualityError> {
        Ok(store.assessments_for_artifact(artifact_id)?)
    }

    /// Set a per-dimension target score used by [`Self::benchmark_gaps`].
    pub fn set_benchmark(
        &self,
        store: &GovernanceStore,
        dimension: &str,
        target_score: f64,
    ) -> Result<(), QualityError> {
        store.upsert_benchmark(dimension, target_score.clamp(0.0, 1.0), Utc::now())?;
        Ok(())
    }

    /// Dimensions of an assessment that fall short of their benchmark
    /// target. Dimensions with no benchmark are skipped.
    pub fn benchmark_gaps(
        &self,
        store: &GovernanceStore,
        assessment: &AssessmentRecord,
    ) -> Result<Vec<String>, QualityError> {
        let mut gaps = Vec::new();
        for (name, dimension) in &assessment.dimensions {
            if let Some(target) = store.benchmark(name)? {
                if dimension.score < target {
                    gaps.push(format!(
                        "{name}: {:.2} below target {:.2}",
                        dimension.score, target
                    ));
                }
            }
        }
        Ok(gaps)
    }
}

fn remediation_priority(overall_score: f64, weak_dimensions: usize) -> Severity {
    if overall_score < 0.5 || weak_dimensions >= 4 {
        Severity::Critical
    } else if overall_score < 0.7 || weak_dimensions >= 2 {
        Severity::High
    } else if overall_score < 0.8 || weak_dimensions >= 1 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn trend_against(
    current: &AssessmentRecord,
    previous: &AssessmentRecord,
    deadband_pct: f64,
) -> TrendRecord {
    let change_pct = if previous.overall_score.abs() > f64::EPSILON {
        (current.overall_score - previous.overall_score) / previous.overall_score * 100.0
    } else {
        0.0
    };
    let direction = if change_pct > deadband_pct {
        TrendDirection::Improving
    } else if change_pct < -deadband_pct {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };
    TrendRecord {
        trend_id: generate_id(TREND_PREFIX),
        artifact_id: current.artifact_id.clone(),
        ts: current.ts,
        previous_score: previous.overall_score,
        current_score: current.overall_score,
        change_pct,
        direction,
    }
}

fn words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

fn sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

fn score_clarity(text: &str, pronoun_pattern: &Regex) -> DimensionScore {
    let words = words(text);
    let word_count = words.len();
    let mut suggestions = Vec::new();

    // Two-word fragments cannot carry an unambiguous instruction.
    if word_count < 10 {
        suggestions.push("expand the instruction beyond a bare verb phrase".to_string());
        return DimensionScore {
            score: 0.4,
            weight: WEIGHT_CLARITY,
            rationale: "too short to be unambiguous".to_string(),
            suggestions,
        };
    }

    let mut score: f64 = 0.5;
    let sentences = sentences(text);
    let avg_sentence_words = word_count as f64 / sentences.len().max(1) as f64;
    if avg_sentence_words <= 18.0 {
        score += 0.25;
    } else if avg_sentence_words <= 28.0 {
        score += 0.10;
    } else {
        score -= 0.15;
        suggestions.push("break long sentences into shorter ones".to_string());
    }

    let lowered = text.to_lowercase();
    if IMPERATIVE_WORDS
        .iter()
        .any(|word| lowered.split_whitespace().any(|token| token.trim_matches(|c: char| !c.is_alphanumeric()) == *word))
    {
        score += 0.15;
    } else {
        suggestions.push("open with an imperative instruction verb".to_string());
    }

    let pronoun_count = pronoun_pattern.find_iter(text).count();
    if pronoun_count as f64 / word_count as f64 > 0.05 {
        score -= 0.20;
        suggestions.push("replace ambiguous pronouns with explicit subjects".to_string());
    }

    DimensionScore {
        score: score.clamp(0.0, 1.0),
        weight: WEIGHT_CLARITY,
        rationale: "sentence length, instruction verbs, pronoun ambiguity".to_string(),
        suggestions,
    }
}

fn score_relevance(text: &str, context: Option<&AssessmentContext>) -> DimensionScore {
    let lowered = text.to_lowercase();
    let mut suggestions = Vec::new();

    if let Some(context) = context {
        if !context.expected_topics.is_empty() {
            let matched = context
                .expected_topics
                .iter()
                .filter(|topic| lowered.contains(&topic.to_lowercase()))
                .count();
            let fraction = matched as f64 / context.expected_topics.len() as f64;
            if fraction < 1.0 {
                suggestions.push("cover all expected topics".to_string());
            }
            return DimensionScore {
                score: (0.3 + 0.7 * fraction).clamp(0.0, 1.0),
                weight: WEIGHT_RELEVANCE,
                rationale: format!(
                    "{matched} of {} expected topics mentioned",
                    context.expected_topics.len()
                ),
                suggestions,
            };
        }
    }

    let mut score: f64 = 0.5;
    if lowered.contains("task") || lowered.contains("goal") || lowered.contains("objective") {
        score += 0.2;
    } else {
        suggestions.push("state the task or goal explicitly".to_string());
    }
    if text.lines().next().map(str::trim).is_some_and(|first| {
        first.ends_with(':') || first.starts_with('#') || first.chars().all(|c| !c.is_lowercase())
    }) {
        score += 0.1;
    }
    if words(text).len() < 5 {
        score -= 0.2;
        suggestions.push("add enough detail to establish the subject".to_string());
    }

    DimensionScore {
        score: score.clamp(0.0, 1.0),
        weight: WEIGHT_RELEVANCE,
        rationale: "task framing and subject detail".to_string(),
        suggestions,
    }
}

fn score_completeness(text: &str) -> DimensionScore {
    let lowered = text.to_lowercase();
    let word_count = words(text).len();
    let mut score: f64 = 0.0;
    let mut suggestions = Vec::new();

    score += (word_count as f64 / 150.0).min(1.0) * 0.3;

    if lowered.contains("context") {
        score += 0.2;
    } else {
        suggestions.push("add a Context section".to_string());
    }
    if lowered.contains("task") {
        score += 0.2;
    } else {
        suggestions.push("add a Task section".to_string());
    }
    if lowered.contains("output") || lowered.contains("format") {
        score += 0.2;
    } else {
        suggestions.push("describe the expected output format".to_string());
    }
    if lowered.contains("example") {
        score += 0.1;
    }

    DimensionScore {
        score: score.clamp(0.0, 1.0),
        weight: WEIGHT_COMPLETENESS,
        rationale: "missing context/task/output-format markers".to_string(),
        suggestions,
    }
}

fn score_consistency(text: &str) -> DimensionScore {
    let mut score: f64 = 0.8;
    let mut suggestions = Vec::new();

    let bullet_styles = text
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            ['-', '*', '+']
                .iter()
                .find(|marker| trimmed.starts_with(**marker))
                .copied()
        })
        .collect::<std::collections::BTreeSet<char>>();
    if bullet_styles.len() > 1 {
        score -= 0.2;
        suggestions.push("use one bullet marker style".to_string());
    }

    let sentences = sentences(text);
    if !sentences.is_empty() {
        let capitalized = sentences
            .iter()
            .filter(|sentence| {
                sentence
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_uppercase() || !c.is_alphabetic())
            })
            .count();
        if (capitalized as f64 / sentences.len() as f64) < 0.7 {
            score -= 0.2;
            suggestions.push("capitalize sentence starts uniformly".to_string());
        }
    }

    if text.contains("\n\n\n") {
        score -= 0.1;
        suggestions.push("collapse runs of blank lines".to_string());
    }
    if text.lines().any(|line| line.ends_with(' ') || line.ends_with('\t')) {
        score -= 0.1;
        suggestions.push("strip trailing whitespace".to_string());
    }

    DimensionScore {
        score: score.clamp(0.0, 1.0),
        weight: WEIGHT_CONSISTENCY,
        rationale: "formatting and capitalization uniformity".to_string(),
        suggestions,
    }
}

fn score_specificity(text: &str, measurable_pattern: &Regex) -> DimensionScore {
    let lowered = text.to_lowercase();
    let mut score: f64 = 0.4;
    let mut suggestions = Vec::new();

    let numeric_tokens = words(text)
        .iter()
        .filter(|token| token.chars().any(|c| c.is_ascii_digit()))
        .count();
    score += 0.15 * (numeric_tokens.min(3) as f64);

    if measurable_pattern.is_match(text) {
        score += 0.1;
    }

    let vague_count = VAGUE_WORDS
        .iter()
        .filter(|word| {
            lowered
                .split_whitespace()
                .any(|token| token.trim_matches(|c: char| !c.is_alphanumeric()) == **word)
        })
        .count();
    if vague_count > 0 {
        score -= 0.1 * (vague_count.min(3) as f64);
        suggestions.push("replace vague quantifiers with concrete bounds".to_string());
    }
    if numeric_tokens == 0 && !measurable_pattern.is_match(text) {
        suggestions.push("quantify expectations (counts, lengths, limits)".to_string());
    }

    DimensionScore {
        score: score.clamp(0.0, 1.0),
        weight: WEIGHT_SPECIFICITY,
        rationale: "no measurable constraints or quantities".to_string(),
        suggestions,
    }
}

fn score_structure(text: &str) -> DimensionScore {
    let mut score: f64 = 0.3;
    let mut suggestions = Vec::new();

    let has_bullets = text.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with('-') || trimmed.starts_with('*') || trimmed.starts_with("1.")
    });
    if has_bullets {
        score += 0.25;
    } else {
        suggestions.push("break requirements into a bulleted list".to_string());
    }

    let has_sections = text.lines().any(|line| {
        let trimmed = line.trim();
        trimmed.starts_with('#') || (trimmed.ends_with(':') && trimmed.len() < 40)
    });
    if has_sections {
        score += 0.25;
    } else {
        suggestions.push("label sections (Context, Task, Output)".to_string());
    }

    if text.split("\n\n").filter(|block| !block.trim().is_empty()).count() > 1 {
        score += 0.2;
    }

    DimensionScore {
        score: score.clamp(0.0, 1.0),
        weight: WEIGHT_STRUCTURE,
        rationale: "no sections, bullets, or paragraph breaks".to_string(),
        suggestions,
    }
}

fn score_language(text: &str) -> DimensionScore {
    let mut score: f64 = 0.8;
    let mut suggestions = Vec::new();
    let lowered = text.to_lowercase();

    let filler_count = FILLER_PHRASES
        .iter()
        .filter(|phrase| lowered.contains(**phrase))
        .count();
    if filler_count > 0 {
        score -= 0.15 * filler_count as f64;
        suggestions.push("remove filler phrases".to_string());
    }

    let shouting = words(text)
        .iter()
        .filter(|token| token.len() > 3 && token.chars().all(|c| c.is_uppercase()))
        .count();
    if shouting > 2 {
        score -= 0.2;
        suggestions.push("avoid all-caps emphasis".to_string());
    }

    if text.contains("!!") || text.contains("??") {
        score -= 0.1;
        suggestions.push("drop repeated punctuation".to_string());
    }

    DimensionScore {
        score: score.clamp(0.0, 1.0),
        weight: WEIGHT_LANGUAGE,
        rationale: "filler phrases or aggressive emphasis".to_string(),
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgov_storage::GovernanceStore;

    const WELL_FORMED_PROMPT: &str = "Context: You are reviewing quarterly sales figures for a \
retail chain with 40 stores across 3 regions. Each store reports weekly revenue, footfall, and \
return rates into a shared warehouse table.

Task: Analyze the attached dataset and identify the 5 stores with the largest quarter-over-quarter \
revenue decline. For each store, list at least 2 plausible contributing factors drawn from the \
footfall and return-rate columns. Compare each declining store against the median store in its \
region. Exclude stores that opened within the last 90 days.

Output: Produce a report with exactly 3 sections.
- Summary: no more than 120 words describing the overall trend.
- Findings: a numbered list, one entry per store, naming the store, the decline percentage, and \
the contributing factors.
- Recommendations: between 3 and 5 concrete actions, each tied to a finding.

Format the report as plain markdown. Write in complete sentences. Return only the report, with \
no preamble. Example heading: \"Findings\".";

    fn store() -> GovernanceStore {
        GovernanceStore::open_in_memory().expect("open db")
    }

    #[test]
    fn dimension_weights_sum_to_one() {
        let total = WEIGHT_CLARITY
            + WEIGHT_RELEVANCE
            + WEIGHT_COMPLETENESS
            + WEIGHT_CONSISTENCY
            + WEIGHT_SPECIFICITY
            + WEIGHT_STRUCTURE
            + WEIGHT_LANGUAGE;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_is_rejected_before_any_side_effect() {
        let db = store();
        let scorer = QualityScorer::new(ScorerConfig::default());
        let result = scorer.assess(&db, "prompt-1", "   \n", None);
        assert!(matches!(result, Err(QualityError::EmptyText)));
        assert!(db.latest_assessment("prompt-1").expect("query").is_none());
    }

    #[test]
    fn bare_verb_phrase_scores_poorly_with_completeness_or_specificity_weakness() {
        let db = store();
        let scorer = QualityScorer::new(ScorerConfig::default());
        let assessment = scorer
            .assess(&db, "prompt-2", "analyze data", None)
            .expect("assess");

        assert!(matches!(
            assessment.level,
            QualityLevel::Poor | QualityLevel::Unacceptable
        ));
        assert!(assessment.weaknesses.iter().any(|weakness| {
            weakness.starts_with("completeness") || weakness.starts_with("specificity")
        }));
        assert_eq!(assessment.priority, Severity::Critical);
    }

    #[test]
    fn structured_prompt_scores_well() {
        let db = store();
        let scorer = QualityScorer::new(ScorerConfig::default());
        let assessment = scorer
            .assess(&db, "prompt-3", WELL_FORMED_PROMPT, None)
            .expect("assess");

        assert!(matches!(
            assessment.level,
            QualityLevel::Good | QualityLevel::Excellent
        ));
        assert!(assessment.overall_score >= 0.70);
        assert!(assessment.strengths.contains(&"completeness".to_string()));
    }

    #[test]
    fn scores_stay_in_unit_interval_and_level_matches_score() {
        let db = store();
        let scorer = QualityScorer::new(ScorerConfig::default());
        for (artifact, text) in [
            ("p-a", "analyze data"),
            ("p-b", WELL_FORMED_PROMPT),
            ("p-c", "IT IS THIS AND THAT!! do some stuff with various things etc"),
        ] {
            let assessment = scorer.assess(&db, artifact, text, None).expect("assess");
            assert!((0.0..=1.0).contains(&assessment.overall_score));
            for dimension in assessment.dimensions.values() {
                assert!((0.0..=1.0).contains(&dimension.score));
            }
            assert_eq!(
                assessment.level,
                QualityLevel::from_score(assessment.overall_score)
            );
        }
    }

    #[test]
    fn second_assessment_writes_an_improving_trend() {
        let db = store();
        let scorer = QualityScorer::new(ScorerConfig::default());
        scorer
            .assess(&db, "prompt-4", "analyze data", None)
            .expect("first assess");
        assert!(db.trends_for_artifact("prompt-4").expect("trends").is_empty());

        scorer
            .assess(&db, "prompt-4", WELL_FORMED_PROMPT, None)
            .expect("second assess");

        let trends = db.trends_for_artifact("prompt-4").expect("trends");
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].direction, TrendDirection::Improving);
        assert!(trends[0].change_pct > 5.0);

        let history = scorer.history(&db, "prompt-4").expect("history");
        assert_eq!(history.len(), 2);
        assert!(history[0].overall_score < history[1].overall_score);
    }

    #[test]
    fn expected_topics_drive_relevance() {
        let context = AssessmentContext {
            expected_topics: vec!["revenue".to_string(), "inventory".to_string()],
        };
        let partial = score_relevance("Task: report revenue by store", Some(&context));
        let full = score_relevance(
            "Task: report revenue and inventory by store",
            Some(&context),
        );
        assert!(full.score > partial.score);
        assert!((full.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pronoun_heavy_text_loses_the_clarity_penalty_exactly_once() {
        let patterns = ScorePatterns::new();
        let vague = score_clarity(
            "Take it and move this so that they can see them properly now.",
            &patterns.pronouns,
        );
        let direct = score_clarity(
            "Take the report and move the summary so reviewers can see the totals properly now.",
            &patterns.pronouns,
        );
        assert!((direct.score - vague.score - 0.20).abs() < 1e-9);
        assert!(vague
            .suggestions
            .iter()
            .any(|suggestion| suggestion.contains("pronouns")));
    }

    #[test]
    fn benchmark_gaps_flag_dimensions_below_target() {
        let db = store();
        let scorer = QualityScorer::new(ScorerConfig::default());
        let assessment = scorer
            .assess(&db, "prompt-5", "analyze data", None)
            .expect("assess");

        assert!(scorer
            .benchmark_gaps(&db, &assessment)
            .expect("gaps")
            .is_empty());

        scorer
            .set_benchmark(&db, "completeness", 0.9)
            .expect("set benchmark");
        let gaps = scorer.benchmark_gaps(&db, &assessment).expect("gaps");
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0].starts_with("completeness:"));
    }
}
