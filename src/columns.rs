//! Column classification and role resolution for tabular query results.
//!
//! Result sets come from free-form user-authored queries, so nothing about
//! their shape is guaranteed. Classification decides whether a result set
//! describes groups, questions or both; role resolution picks the concrete
//! column carrying each domain field. Callers may pin roles explicitly; any
//! unmapped role falls back to case-insensitive name sniffing, and every
//! resolution logs which rule fired.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What kind of domain data a result set carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    Groups,
    Questions,
    GroupsAndQuestions,
    Unknown,
}

/// Classify a result set from its column names alone.
///
/// A column counts toward groups when its name contains "group" but not
/// "question"; toward questions when it contains "question". Neither match
/// yields `Unknown`, which callers treat as an abort, not an error.
pub fn classify(columns: &[String]) -> Classification {
    let has_group = columns.iter().any(|c| {
        let c = c.to_lowercase();
        c.contains("group") && !c.contains("question")
    });
    let has_question = columns
        .iter()
        .any(|c| c.to_lowercase().contains("question"));

    match (has_group, has_question) {
        (true, false) => Classification::Groups,
        (false, true) => Classification::Questions,
        (true, true) => Classification::GroupsAndQuestions,
        (false, false) => Classification::Unknown,
    }
}

/// Explicit column-role assignments supplied with a load request. Any role
/// left `None` is inferred heuristically.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RoleMap {
    pub group_uri: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub group_description: Option<String>,
    pub question_uri: Option<String>,
    pub question_id: Option<String>,
    pub question_text: Option<String>,
    pub variable: Option<String>,
    pub question_type: Option<String>,
    pub order: Option<String>,
    pub sub_id: Option<String>,
    pub sub_title: Option<String>,
    pub sub_text: Option<String>,
    pub sub_order: Option<String>,
    pub answer_code: Option<String>,
    pub answer_text: Option<String>,
    pub answer_sort_order: Option<String>,
    pub answer_assessment_value: Option<String>,
}

/// Concrete column names resolved for each role. `None` means the result
/// set has no column for that role; the mapper then applies defaults.
#[derive(Debug, Clone, Default)]
pub struct ResolvedColumns {
    pub group_uri: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub group_description: Option<String>,
    pub question_uri: Option<String>,
    pub question_id: Option<String>,
    pub question_text: Option<String>,
    pub variable: Option<String>,
    pub question_type: Option<String>,
    pub order: Option<String>,
    pub sub_id: Option<String>,
    pub sub_title: Option<String>,
    pub sub_text: Option<String>,
    pub sub_order: Option<String>,
    pub answer_code: Option<String>,
    pub answer_text: Option<String>,
    pub answer_sort_order: Option<String>,
    pub answer_assessment_value: Option<String>,
}

/// Auxiliary child columns are matched by their exact names only; they must
/// never be claimed by the substring heuristics of parent roles.
const AUX_EXACT: &[&str] = &[
    "subqid",
    "subtitle",
    "subquestiontext",
    "suborder",
    "answercode",
    "answertext",
    "answersortorder",
    "answerassessmentvalue",
];

/// Resolve every role against the actual column list.
pub fn resolve(columns: &[String], roles: &RoleMap) -> ResolvedColumns {
    let pick = |role: &str, explicit: &Option<String>, heuristic: &dyn Fn(&str) -> bool| {
        pick_column(columns, role, explicit.as_deref(), heuristic)
    };

    ResolvedColumns {
        group_uri: pick("groupUri", &roles.group_uri, &|c| {
            c == "group" || (c.contains("group") && c.contains("uri"))
        }),
        group_id: pick("groupId", &roles.group_id, &|c| {
            c.contains("groupid") || c == "id"
        }),
        group_name: pick("groupName", &roles.group_name, &|c| {
            c.contains("groupname") || c == "name"
        }),
        group_description: pick("groupDescription", &roles.group_description, &|c| {
            c.contains("groupdesc") || (c.contains("desc") && !c.contains("question"))
        }),
        question_uri: pick("questionUri", &roles.question_uri, &|c| {
            c == "question" || (c.contains("question") && c.contains("uri"))
        }),
        question_id: pick("questionId", &roles.question_id, &|c| {
            c.contains("questionid") || c == "id"
        }),
        question_text: pick("questionText", &roles.question_text, &|c| {
            (c.contains("questiontext") || c == "text") && !AUX_EXACT.contains(&c)
        }),
        variable: pick("variable", &roles.variable, &|c| {
            (c.contains("variable") || c.contains("cod")) && !AUX_EXACT.contains(&c)
        }),
        question_type: pick("questionType", &roles.question_type, &|c| {
            c.contains("type") && c.contains("question")
        }),
        order: pick("order", &roles.order, &|c| {
            c.contains("order") && !AUX_EXACT.contains(&c)
        }),
        sub_id: pick("subId", &roles.sub_id, &|c| c == "subqid"),
        sub_title: pick("subTitle", &roles.sub_title, &|c| c == "subtitle"),
        sub_text: pick("subText", &roles.sub_text, &|c| c == "subquestiontext"),
        sub_order: pick("subOrder", &roles.sub_order, &|c| c == "suborder"),
        answer_code: pick("answerCode", &roles.answer_code, &|c| c == "answercode"),
        answer_text: pick("answerText", &roles.answer_text, &|c| c == "answertext"),
        answer_sort_order: pick("answerSortOrder", &roles.answer_sort_order, &|c| {
            c == "answersortorder"
        }),
        answer_assessment_value: pick(
            "answerAssessmentValue",
            &roles.answer_assessment_value,
            &|c| c == "answerassessmentvalue",
        ),
    }
}

/// Pick one column for a role: explicit assignment first (must exist in the
/// result set), heuristic sniffing otherwise. Returns the column's actual
/// name so row lookups keep the original casing.
fn pick_column(
    columns: &[String],
    role: &str,
    explicit: Option<&str>,
    heuristic: &dyn Fn(&str) -> bool,
) -> Option<String> {
    if let Some(name) = explicit {
        if let Some(found) = columns.iter().find(|c| c.eq_ignore_ascii_case(name)) {
            debug!(role, column = %found, rule = "explicit", "resolved column role");
            return Some(found.clone());
        }
        warn!(
            role,
            column = name,
            "explicitly mapped column not present in result set, falling back to heuristics"
        );
    }

    let found = columns.iter().find(|c| heuristic(&c.to_lowercase()));
    match found {
        Some(c) => {
            debug!(role, column = %c, rule = "heuristic", "resolved column role");
            Some(c.clone())
        }
        None => {
            debug!(role, rule = "unresolved", "no column for role");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn group_columns_only_classify_as_groups() {
        let c = cols(&["group", "groupId", "groupName"]);
        assert_eq!(classify(&c), Classification::Groups);
    }

    #[test]
    fn question_columns_only_classify_as_questions() {
        let c = cols(&["question", "questionText"]);
        assert_eq!(classify(&c), Classification::Questions);
    }

    #[test]
    fn both_kinds_classify_as_combined() {
        let c = cols(&["group", "groupName", "question", "questionText"]);
        assert_eq!(classify(&c), Classification::GroupsAndQuestions);
    }

    #[test]
    fn unrelated_columns_classify_as_unknown() {
        let c = cols(&["subject", "predicate", "object"]);
        assert_eq!(classify(&c), Classification::Unknown);
    }

    #[test]
    fn classification_is_case_insensitive() {
        let c = cols(&["GroupName", "QUESTION"]);
        assert_eq!(classify(&c), Classification::GroupsAndQuestions);
    }

    #[test]
    fn group_token_inside_question_name_does_not_count_as_group() {
        // "questionGroupRef" contains "group" but also "question".
        let c = cols(&["questionGroupRef", "questionText"]);
        assert_eq!(classify(&c), Classification::Questions);
    }

    #[test]
    fn resolves_exact_group_column_before_substring() {
        let c = cols(&["group", "groupUriOld"]);
        let r = resolve(&c, &RoleMap::default());
        assert_eq!(r.group_uri.as_deref(), Some("group"));
    }

    #[test]
    fn resolves_group_uri_by_substring_pair() {
        let c = cols(&["myGroupUri", "groupName"]);
        let r = resolve(&c, &RoleMap::default());
        assert_eq!(r.group_uri.as_deref(), Some("myGroupUri"));
    }

    #[test]
    fn explicit_mapping_overrides_heuristics() {
        let c = cols(&["g", "group"]);
        let roles = RoleMap {
            group_uri: Some("g".to_string()),
            ..Default::default()
        };
        let r = resolve(&c, &roles);
        assert_eq!(r.group_uri.as_deref(), Some("g"));
    }

    #[test]
    fn explicit_mapping_to_missing_column_falls_back() {
        let c = cols(&["group"]);
        let roles = RoleMap {
            group_uri: Some("nosuch".to_string()),
            ..Default::default()
        };
        let r = resolve(&c, &roles);
        assert_eq!(r.group_uri.as_deref(), Some("group"));
    }

    #[test]
    fn order_column_skips_child_order_columns() {
        let c = cols(&["question", "subOrder", "answerSortOrder", "questionOrder"]);
        let r = resolve(&c, &RoleMap::default());
        assert_eq!(r.order.as_deref(), Some("questionOrder"));
        assert_eq!(r.sub_order.as_deref(), Some("subOrder"));
        assert_eq!(r.answer_sort_order.as_deref(), Some("answerSortOrder"));
    }

    #[test]
    fn variable_column_skips_answer_code_column() {
        // "answerCode" contains "cod"; without a real variable column the
        // role must stay unresolved rather than claim the answer codes.
        let c = cols(&["group", "question", "answerCode", "answerText"]);
        let r = resolve(&c, &RoleMap::default());
        assert!(r.variable.is_none());
        assert_eq!(r.answer_code.as_deref(), Some("answerCode"));
    }

    #[test]
    fn question_text_column_skips_subquestion_text_column() {
        let c = cols(&["question", "subquestionText", "subqid"]);
        let r = resolve(&c, &RoleMap::default());
        assert!(r.question_text.is_none());
        assert_eq!(r.sub_text.as_deref(), Some("subquestionText"));
    }

    #[test]
    fn aux_columns_match_exact_names_only() {
        let c = cols(&["question", "subqidExtra"]);
        let r = resolve(&c, &RoleMap::default());
        assert!(r.sub_id.is_none());
    }

    #[test]
    fn resolution_preserves_original_casing() {
        let c = cols(&["GroupName"]);
        let r = resolve(&c, &RoleMap::default());
        assert_eq!(r.group_name.as_deref(), Some("GroupName"));
    }
}
