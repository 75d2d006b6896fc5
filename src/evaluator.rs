use regex::Regex;
use serde::{Deserialize, Serialize};

/// Whether a metric is better when larger or smaller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Higher,
    Lower,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Higher => "higher",
            Direction::Lower => "lower",
        }
    }
}

fn default_direction() -> Direction {
    Direction::Higher
}

/// Caller-supplied instruction for scoring one metric against a run's stdout
#[derive(Debug, Clone, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    /// Regex whose first capture group holds the measured value
    #[serde(default)]
    pub pattern: Option<String>,
    /// The value the caller asserts should hold, e.g. a paper's claimed accuracy
    pub reported: f64,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    /// Non-negative slack applied in the direction favoring the claim
    #[serde(default)]
    pub threshold: f64,
}

/// Outcome of scoring one metric spec against one run
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub name: String,
    pub reported: f64,
    pub measured: f64,
    pub delta: f64,
    pub direction: Direction,
    pub threshold: f64,
    pub pass: bool,
}

/// Extracts the measured value from captured stdout
///
/// Searches the pattern and parses its first capture group as a float.
/// An absent pattern, an invalid pattern, no match, or an unparseable
/// capture all fall back to 0.0: extraction failure is a recorded result,
/// not an error.
pub fn extract_measured(stdout: &str, pattern: Option<&str>) -> f64 {
    let Some(pattern) = pattern else {
        return 0.0;
    };

    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            log::warn!("Invalid metric pattern {pattern:?}: {e}");
            return 0.0;
        }
    };

    re.captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|group| group.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Pass iff the measured value reaches the reported one, with the threshold
/// slack applied in the direction that favors the claim
pub fn judge(measured: f64, spec: &MetricSpec) -> bool {
    match spec.direction {
        Direction::Higher => measured >= spec.reported - spec.threshold,
        Direction::Lower => measured <= spec.reported + spec.threshold,
    }
}

/// Scores one metric spec against a run's captured stdout
pub fn evaluate_metric(stdout: &str, spec: &MetricSpec) -> Verdict {
    let measured = extract_measured(stdout, spec.pattern.as_deref());

    Verdict {
        name: spec.name.clone(),
        reported: spec.reported,
        measured,
        delta: measured - spec.reported,
        direction: spec.direction,
        threshold: spec.threshold,
        pass: judge(measured, spec),
    }
}
