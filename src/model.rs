//! Survey domain model materialized from the triple store.
//!
//! Groups hold question URIs, never question clones: the flat `questions`
//! collection is the canonical owner and edits there are visible wherever a
//! group references the same URI.

use serde::{Deserialize, Serialize};

/// A named collection of survey questions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub uri: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// URIs of child questions, in encounter order.
    #[serde(default)]
    pub questions: Vec<String>,
}

/// A single survey item with a type code and optional children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub uri: String,
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub variable_cod: String,
    /// LimeSurvey type code ("L" = list/radio, "T" = long text, "Y" = yes/no, ...).
    pub question_type: String,
    /// Kept as the raw string from the result set; parsed only when sorting.
    #[serde(default)]
    pub order: String,
    /// URI of the owning group, absent for orphan questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subquestions: Vec<Subquestion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer_options: Vec<AnswerOption>,
}

/// A child item of array/matrix-style questions. Identity is `id`, unique
/// within the parent question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subquestion {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub order: String,
}

/// A selectable choice with a code and optional scoring value. Identity is
/// `code`, unique within the parent question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub code: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sort_order: String,
    #[serde(default)]
    pub assessment_value: String,
}

/// The materialized model. Rebuilt wholesale on each successful load; a
/// failed load leaves the previous snapshot untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurveyModel {
    pub groups: Vec<Group>,
    pub questions: Vec<Question>,
}

impl SurveyModel {
    /// Questions owned by the given group, in the group's declared order.
    pub fn questions_of<'a>(&'a self, group: &Group) -> Vec<&'a Question> {
        group
            .questions
            .iter()
            .filter_map(|uri| self.questions.iter().find(|q| q.uri == *uri))
            .collect()
    }

    /// Questions with no owning group.
    pub fn orphan_questions(&self) -> Vec<&Question> {
        self.questions
            .iter()
            .filter(|q| q.group_uri.is_none())
            .collect()
    }
}

/// Human-readable label for a LimeSurvey question type code.
pub fn question_type_label(code: &str) -> &'static str {
    match code {
        "L" => "List (radio)",
        "T" => "Long free text",
        "S" => "Short free text",
        "N" => "Numerical input",
        "Y" => "Yes/No",
        "M" => "Multiple choice",
        "F" => "Array",
        "D" => "Date/Time",
        _ => "Unknown type",
    }
}
