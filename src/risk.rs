use std::fmt;

use serde::Serialize;

use crate::error::InvalidMetricsError;
use crate::models::{StudentMetrics, Subject};

pub const GRADE_WEIGHT: f64 = 0.6;
pub const ATTENDANCE_WEIGHT: f64 = 0.25;
pub const PARTICIPATION_WEIGHT: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Average,
    #[serde(rename = "Below Average")]
    BelowAverage,
    #[serde(rename = "At Risk")]
    AtRisk,
}

impl PerformanceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceLevel::Excellent => "Excellent",
            PerformanceLevel::Good => "Good",
            PerformanceLevel::Average => "Average",
            PerformanceLevel::BelowAverage => "Below Average",
            PerformanceLevel::AtRisk => "At Risk",
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-looking label. `Prediction::AtRisk` sits one band above
/// `PerformanceLevel::AtRisk`; the two are unrelated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Prediction {
    #[serde(rename = "High Achiever")]
    HighAchiever,
    #[serde(rename = "Will Improve")]
    WillImprove,
    #[serde(rename = "Needs Support")]
    NeedsSupport,
    #[serde(rename = "At Risk")]
    AtRisk,
    Critical,
}

impl Prediction {
    pub fn as_str(self) -> &'static str {
        match self {
            Prediction::HighAchiever => "High Achiever",
            Prediction::WillImprove => "Will Improve",
            Prediction::NeedsSupport => "Needs Support",
            Prediction::AtRisk => "At Risk",
            Prediction::Critical => "Critical",
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn is_at_risk(self) -> bool {
        self >= RiskTier::High
    }
}

/// Raw metrics plus everything derived from them. Only [`score`] builds one,
/// so the derived fields always agree with the inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredStudent {
    #[serde(flatten)]
    metrics: StudentMetrics,
    average_grade: f64,
    #[serde(skip)]
    performance_score: f64,
    performance_level: PerformanceLevel,
    prediction: Prediction,
    #[serde(skip)]
    risk_tier: RiskTier,
}

impl ScoredStudent {
    pub fn metrics(&self) -> &StudentMetrics {
        &self.metrics
    }

    pub fn average_grade(&self) -> f64 {
        self.average_grade
    }

    pub fn performance_score(&self) -> f64 {
        self.performance_score
    }

    pub fn performance_level(&self) -> PerformanceLevel {
        self.performance_level
    }

    pub fn prediction(&self) -> Prediction {
        self.prediction
    }

    pub fn risk_tier(&self) -> RiskTier {
        self.risk_tier
    }

    pub fn is_at_risk(&self) -> bool {
        self.risk_tier.is_at_risk()
    }
}

/// Scores one student. Out-of-range input is rejected, never clamped.
pub fn score(metrics: &StudentMetrics) -> Result<ScoredStudent, InvalidMetricsError> {
    metrics.validate()?;

    let total: i32 = metrics.grades.iter().map(|(_, grade)| grade).sum();
    let average_grade = f64::from(total) / Subject::ALL.len() as f64;
    let performance_score = performance_score(
        average_grade,
        metrics.attendance_rate,
        metrics.participation_score,
    );
    let (performance_level, prediction, risk_tier) = classify(performance_score);

    Ok(ScoredStudent {
        metrics: *metrics,
        average_grade,
        performance_score,
        performance_level,
        prediction,
        risk_tier,
    })
}

pub fn performance_score(average_grade: f64, attendance_rate: f64, participation: i32) -> f64 {
    average_grade * GRADE_WEIGHT
        + attendance_rate * ATTENDANCE_WEIGHT
        + f64::from(participation) * PARTICIPATION_WEIGHT
}

/// Maps a performance score onto its band; each lower bound is inclusive.
pub fn classify(performance_score: f64) -> (PerformanceLevel, Prediction, RiskTier) {
    match performance_score {
        s if s >= 90.0 => (
            PerformanceLevel::Excellent,
            Prediction::HighAchiever,
            RiskTier::Low,
        ),
        s if s >= 80.0 => (PerformanceLevel::Good, Prediction::WillImprove, RiskTier::Low),
        s if s >= 70.0 => (
            PerformanceLevel::Average,
            Prediction::NeedsSupport,
            RiskTier::Medium,
        ),
        s if s >= 60.0 => (
            PerformanceLevel::BelowAverage,
            Prediction::AtRisk,
            RiskTier::High,
        ),
        _ => (PerformanceLevel::AtRisk, Prediction::Critical, RiskTier::Critical),
    }
}

/// Advice lines for a scored student, most specific first.
pub fn recommendations(student: &ScoredStudent) -> Vec<String> {
    let metrics = student.metrics();
    let mut advice = Vec::new();

    if metrics.attendance_rate < 80.0 {
        advice.push(
            "Improve attendance rate - current attendance is affecting overall performance"
                .to_string(),
        );
    }

    if metrics.participation_score < 70 {
        advice.push("Increase class participation and engagement".to_string());
    }

    let weak: Vec<&str> = metrics
        .grades
        .iter()
        .filter(|(_, grade)| *grade < 70)
        .map(|(subject, _)| subject.name())
        .collect();
    if !weak.is_empty() {
        advice.push(format!("Focus on improving grades in: {}", weak.join(", ")));
    }

    match student.risk_tier() {
        RiskTier::Critical => advice.push(
            "Immediate intervention required - consider tutoring and additional support"
                .to_string(),
        ),
        RiskTier::High => {
            advice.push("Additional support recommended to prevent further decline".to_string())
        }
        RiskTier::Medium => {
            advice.push("Monitor progress closely and provide targeted assistance".to_string())
        }
        RiskTier::Low => {}
    }

    advice
}
