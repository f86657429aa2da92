use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One generated multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcmItem {
    pub id: String,
    #[serde(default)]
    pub criterion: String,
    #[serde(default)]
    pub difficulty: String,
    /// Question category chosen at generation time.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub question: String,
    /// Choice text keyed by label, ordered by label.
    pub choices: BTreeMap<String, String>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
}

impl QcmItem {
    /// Text of the choice designated as correct, if the label exists.
    pub fn correct_choice(&self) -> Option<&str> {
        self.choices.get(&self.correct_answer).map(String::as_str)
    }
}
