//! The grader's `results/results.json` in the Gradescope format.
//!
//! Decoding is permissive: every field has a named default that applies when
//! the field is missing, `null` or of the wrong type. Only a document that is
//! not a JSON object at all is rejected.

use crate::error::{BridgeError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Per-test verdict as reported by the grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TestOutcome {
    #[serde(default, deserialize_with = "lenient::number")]
    pub score: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub max_score: f64,
    /// Absent, null or unrecognised statuses decode as `None`.
    #[serde(default, deserialize_with = "lenient::status")]
    pub status: Option<TestStatus>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub output: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub visibility: String,
}

impl TestOutcome {
    /// An explicit status decides; otherwise full marks pass.
    pub fn passed(&self) -> bool {
        match self.status {
            Some(TestStatus::Passed) => true,
            Some(TestStatus::Failed) => false,
            None => self.score >= self.max_score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "lenient::text")]
    pub order: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultDocument {
    /// Overall score; `None` means "aggregate the tests".
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "lenient::integer")]
    pub execution_time: i64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub output: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub output_format: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub test_output_format: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub test_name_format: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub visibility: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub stdout_visibility: String,
    #[serde(default)]
    pub extra_data: Value,
    #[serde(default, deserialize_with = "lenient::list")]
    pub tests: Vec<TestOutcome>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl ResultDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        // Derived struct decoding also accepts sequences; only objects qualify.
        let value: Value = serde_json::from_slice(bytes).map_err(BridgeError::MalformedResults)?;
        if !value.is_object() {
            return Err(BridgeError::MalformedResults(serde::de::Error::custom(
                "results document is not a JSON object",
            )));
        }
        serde_json::from_value(value).map_err(BridgeError::MalformedResults)
    }
}

pub fn load_result_document(path: &Path) -> Result<ResultDocument> {
    tracing::info!("Read results from gradescope");
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BridgeError::ResultsNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(BridgeError::io(format!("reading {}", path.display()), e)),
    };
    ResultDocument::parse(&bytes)
}

/// Overall percentage: the ceiling of the override when present, otherwise
/// the ceiling of the achieved share of all test points.
pub fn compute_score(doc: &ResultDocument) -> Result<i64> {
    if let Some(score) = doc.score {
        return Ok(score.ceil() as i64);
    }
    let (achieved, possible) = doc
        .tests
        .iter()
        .fold((0.0_f64, 0.0_f64), |(a, m), t| (a + t.score, m + t.max_score));
    if possible <= 0.0 || !possible.is_finite() {
        return Err(BridgeError::NoGradableTests);
    }
    Ok((100.0 * achieved / possible).ceil() as i64)
}

/// Splits tests into `(passed, failed)`; each test lands in exactly one.
pub fn classify(tests: &[TestOutcome]) -> (Vec<&TestOutcome>, Vec<&TestOutcome>) {
    tests.iter().partition(|t| t.passed())
}

mod lenient {
    use super::{TestStatus, Value};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};

    fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(as_number(&Value::deserialize(d)?).unwrap_or_default())
    }

    pub fn optional_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(as_number(&Value::deserialize(d)?))
    }

    pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(as_number(&Value::deserialize(d)?)
            .map(|n| n as i64)
            .unwrap_or_default())
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        })
    }

    pub fn status<'de, D: Deserializer<'de>>(d: D) -> Result<Option<TestStatus>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "passed" => Some(TestStatus::Passed),
                "failed" => Some(TestStatus::Failed),
                _ => None,
            },
            _ => None,
        })
    }

    /// Elements that still fail to decode are dropped.
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }
}
