//! Materialization of tabular query results into the survey domain model.
//!
//! The pipeline is classify → map rows → assemble: column names decide
//! whether the result set carries groups, questions or both, each row then
//! contributes at most one group and one question (deduplicated by URI)
//! plus any child subquestion/answer-option the row describes, and finally
//! children are sorted and questions linked to their owning group.
//!
//! Data gaps are recovered locally: rows without an identity value are
//! skipped, missing fields get defaults, unparseable orders sort as 0. The
//! only reportable failure is a result set whose shape cannot be
//! determined at all; the caller keeps its previous model in that case.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::columns::{self, Classification, ResolvedColumns, RoleMap};
use crate::model::{AnswerOption, Group, Question, Subquestion, SurveyModel};
use crate::sparql::{ResultSet, Row};

/// Behavioral switches for one materialization run.
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    /// Column-role assignments; unmapped roles are inferred by name.
    pub roles: RoleMap,
    /// Whether questions that never co-occur with a group value survive a
    /// combined materialization. The two deployed copies of the old builder
    /// disagreed on this; the switch makes the choice explicit.
    pub keep_orphans: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            roles: RoleMap::default(),
            keep_orphans: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error(
        "cannot determine data type from query columns; the result set needs \
         column names like \"group\", \"groupId\", \"groupName\" for groups \
         or \"question\", \"questionId\", \"questionText\" for questions"
    )]
    UnknownShape,
}

/// A fully assembled replacement snapshot plus how it was interpreted.
#[derive(Debug)]
pub struct Materialized {
    pub classification: Classification,
    pub model: SurveyModel,
}

/// Run the full pipeline over one result set.
pub fn materialize(
    result: &ResultSet,
    options: &MaterializeOptions,
) -> Result<Materialized, MaterializeError> {
    let classification = columns::classify(&result.columns);
    let resolved = columns::resolve(&result.columns, &options.roles);

    let model = match classification {
        Classification::Groups => SurveyModel {
            groups: map_groups(&result.rows, &resolved),
            questions: Vec::new(),
        },
        Classification::Questions => SurveyModel {
            groups: Vec::new(),
            questions: map_questions(&result.rows, &resolved),
        },
        Classification::GroupsAndQuestions => map_combined(&result.rows, &resolved, options),
        Classification::Unknown => return Err(MaterializeError::UnknownShape),
    };

    debug!(
        ?classification,
        groups = model.groups.len(),
        questions = model.questions.len(),
        "materialized result set"
    );

    Ok(Materialized {
        classification,
        model,
    })
}

/// Non-empty cell value for a resolved column, if any.
fn cell<'a>(row: &'a Row, col: &Option<String>) -> Option<&'a str> {
    col.as_deref()
        .and_then(|c| row.get(c))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn cell_or<'a>(row: &'a Row, col: &Option<String>, default: &'a str) -> &'a str {
    cell(row, col).unwrap_or(default)
}

/// Groups-only mapping: one group per distinct URI, first occurrence wins.
fn map_groups(rows: &[Row], cols: &ResolvedColumns) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(uri) = cell(row, &cols.group_uri) else {
            continue;
        };
        if seen.contains_key(uri) {
            continue;
        }

        let group = Group {
            uri: uri.to_string(),
            id: cell(row, &cols.group_id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("G{}", groups.len() + 1)),
            name: cell_or(row, &cols.group_name, "Unnamed Group").to_string(),
            description: cell_or(row, &cols.group_description, "").to_string(),
            questions: Vec::new(),
        };
        seen.insert(uri.to_string(), groups.len());
        groups.push(group);
    }

    groups
}

/// Questions-only mapping: dedup by URI, repeated rows feed the question's
/// subquestion/answer-option lists.
fn map_questions(rows: &[Row], cols: &ResolvedColumns) -> Vec<Question> {
    let mut questions: Vec<Question> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(uri) = cell(row, &cols.question_uri) else {
            continue;
        };

        let idx = *seen.entry(uri.to_string()).or_insert_with(|| {
            let ordinal = questions.len() + 1;
            questions.push(new_question(uri, row, cols, ordinal));
            questions.len() - 1
        });

        collect_children(&mut questions[idx], row, cols);
    }

    sort_children(&mut questions);
    questions
}

/// Combined mapping: rows may carry a group, a question, or both. A
/// question is linked to the first group it co-occurs with, whichever row
/// that happens on; link-up is independent of row order.
fn map_combined(rows: &[Row], cols: &ResolvedColumns, options: &MaterializeOptions) -> SurveyModel {
    let mut groups: Vec<Group> = Vec::new();
    let mut group_idx: HashMap<String, usize> = HashMap::new();
    let mut questions: Vec<Question> = Vec::new();
    let mut question_idx: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let group_uri = cell(row, &cols.group_uri);

        if let Some(uri) = group_uri {
            if !group_idx.contains_key(uri) {
                let group = Group {
                    uri: uri.to_string(),
                    id: cell(row, &cols.group_id)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("G{}", groups.len() + 1)),
                    name: cell_or(row, &cols.group_name, "Unnamed Group").to_string(),
                    description: cell_or(row, &cols.group_description, "").to_string(),
                    questions: Vec::new(),
                };
                group_idx.insert(uri.to_string(), groups.len());
                groups.push(group);
            }
        }

        if let Some(uri) = cell(row, &cols.question_uri) {
            let idx = *question_idx.entry(uri.to_string()).or_insert_with(|| {
                let ordinal = questions.len() + 1;
                questions.push(new_question(uri, row, cols, ordinal));
                questions.len() - 1
            });

            // Link to the owning group the first time the pair appears.
            if let Some(g_uri) = group_uri {
                if questions[idx].group_uri.is_none() {
                    questions[idx].group_uri = Some(g_uri.to_string());
                    let g = &mut groups[group_idx[g_uri]];
                    if !g.questions.iter().any(|q| q == uri) {
                        g.questions.push(uri.to_string());
                    }
                }
            }

            collect_children(&mut questions[idx], row, cols);
        }
    }

    if !options.keep_orphans {
        questions.retain(|q| q.group_uri.is_some());
    }

    sort_children(&mut questions);
    SurveyModel { groups, questions }
}

fn new_question(uri: &str, row: &Row, cols: &ResolvedColumns, ordinal: usize) -> Question {
    Question {
        uri: uri.to_string(),
        id: cell(row, &cols.question_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Q{}", ordinal)),
        text: cell_or(row, &cols.question_text, "Question without text").to_string(),
        variable_cod: cell_or(row, &cols.variable, "").to_string(),
        question_type: cell_or(row, &cols.question_type, "L").to_string(),
        order: cell_or(row, &cols.order, "0").to_string(),
        group_uri: None,
        subquestions: Vec::new(),
        answer_options: Vec::new(),
    }
}

/// Append the row's subquestion/answer-option, deduplicated by child key.
fn collect_children(question: &mut Question, row: &Row, cols: &ResolvedColumns) {
    if let Some(sub_id) = cell(row, &cols.sub_id) {
        if !question.subquestions.iter().any(|s| s.id == sub_id) {
            question.subquestions.push(Subquestion {
                id: sub_id.to_string(),
                title: cell_or(row, &cols.sub_title, "").to_string(),
                text: cell_or(row, &cols.sub_text, "").to_string(),
                order: cell_or(row, &cols.sub_order, "").to_string(),
            });
        }
    }

    if let Some(code) = cell(row, &cols.answer_code) {
        if !question.answer_options.iter().any(|a| a.code == code) {
            question.answer_options.push(AnswerOption {
                code: code.to_string(),
                text: cell_or(row, &cols.answer_text, "").to_string(),
                sort_order: cell_or(row, &cols.answer_sort_order, "").to_string(),
                assessment_value: cell_or(row, &cols.answer_assessment_value, "").to_string(),
            });
        }
    }
}

/// Sort each question's children ascending by numeric order. The sort is
/// stable, so ties keep their first-seen order.
fn sort_children(questions: &mut [Question]) {
    for q in questions.iter_mut() {
        q.subquestions.sort_by_key(|s| parse_order(&s.order));
        q.answer_options.sort_by_key(|a| parse_order(&a.sort_order));
    }
}

/// Leading-integer parse; anything unparseable sorts as 0.
fn parse_order(s: &str) -> i64 {
    let t = s.trim();
    let (sign, rest) = match t.strip_prefix('-') {
        Some(r) => (-1, r),
        None => (1, t.strip_prefix('+').unwrap_or(t)),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse::<i64>().map(|v| sign * v).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rs(columns: &[&str], rows: &[&[(&str, &str)]]) -> ResultSet {
        ResultSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|cells| {
                    cells
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect()
                })
                .collect(),
        }
    }

    fn run(result: &ResultSet) -> Materialized {
        materialize(result, &MaterializeOptions::default()).unwrap()
    }

    #[test]
    fn unknown_shape_is_a_reported_abort() {
        let result = rs(&["s", "p", "o"], &[&[("s", "x")]]);
        let err = materialize(&result, &MaterializeOptions::default()).unwrap_err();
        assert!(err.to_string().contains("cannot determine data type"));
    }

    #[test]
    fn duplicate_group_uris_merge_into_one_record() {
        let result = rs(
            &["group", "groupName"],
            &[
                &[("group", "http://ex/g1"), ("groupName", "First")],
                &[("group", "http://ex/g1"), ("groupName", "Second")],
                &[("group", "http://ex/g2")],
            ],
        );
        let m = run(&result);
        assert_eq!(m.classification, Classification::Groups);
        assert_eq!(m.model.groups.len(), 2);
        // First occurrence wins for parent fields.
        assert_eq!(m.model.groups[0].name, "First");
        assert_eq!(m.model.groups[1].name, "Unnamed Group");
    }

    #[test]
    fn group_row_without_uri_is_skipped() {
        let result = rs(
            &["group", "groupName"],
            &[&[("groupName", "No identity")], &[("group", "http://ex/g1")]],
        );
        let m = run(&result);
        assert_eq!(m.model.groups.len(), 1);
        assert_eq!(m.model.groups[0].id, "G1");
    }

    #[test]
    fn question_row_without_uri_is_dropped() {
        let result = rs(
            &["question", "questionText"],
            &[&[("questionText", "Age?")]],
        );
        let m = run(&result);
        assert!(m.model.questions.is_empty());
    }

    #[test]
    fn question_defaults_apply_for_missing_fields() {
        let result = rs(&["question"], &[&[("question", "http://ex/q1")]]);
        let q = &run(&result).model.questions[0];
        assert_eq!(q.id, "Q1");
        assert_eq!(q.text, "Question without text");
        assert_eq!(q.variable_cod, "");
        assert_eq!(q.question_type, "L");
        assert_eq!(q.order, "0");
        assert!(q.group_uri.is_none());
    }

    #[test]
    fn subquestions_sort_ascending_by_numeric_order() {
        let result = rs(
            &["question", "subQid", "subTitle", "subOrder"],
            &[
                &[("question", "q1"), ("subQid", "s1"), ("subOrder", "2")],
                &[("question", "q1"), ("subQid", "s2"), ("subOrder", "1")],
            ],
        );
        let q = &run(&result).model.questions[0];
        let ids: Vec<&str> = q.subquestions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["s2", "s1"]);
    }

    #[test]
    fn missing_order_sorts_as_zero_with_ties_in_seen_order() {
        let result = rs(
            &["question", "subQid", "subOrder"],
            &[
                &[("question", "q1"), ("subQid", "a"), ("subOrder", "1")],
                &[("question", "q1"), ("subQid", "b")],
                &[("question", "q1"), ("subQid", "c"), ("subOrder", "junk")],
            ],
        );
        let q = &run(&result).model.questions[0];
        let ids: Vec<&str> = q.subquestions.iter().map(|s| s.id.as_str()).collect();
        // b and c both sort as 0 and keep their first-seen order before a.
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[test]
    fn duplicate_child_rows_dedup_by_key() {
        let result = rs(
            &["question", "subQid", "answerCode", "answerText"],
            &[
                &[("question", "q1"), ("subQid", "s1"), ("answerCode", "A1")],
                &[
                    ("question", "q1"),
                    ("subQid", "s1"),
                    ("answerCode", "A1"),
                    ("answerText", "later text is ignored"),
                ],
            ],
        );
        let q = &run(&result).model.questions[0];
        assert_eq!(q.subquestions.len(), 1);
        assert_eq!(q.answer_options.len(), 1);
        assert_eq!(q.answer_options[0].text, "");
    }

    #[test]
    fn answer_options_carry_assessment_values() {
        let result = rs(
            &[
                "question",
                "answerCode",
                "answerText",
                "answerSortOrder",
                "answerAssessmentValue",
            ],
            &[
                &[
                    ("question", "q1"),
                    ("answerCode", "Y"),
                    ("answerText", "Yes"),
                    ("answerSortOrder", "2"),
                    ("answerAssessmentValue", "1"),
                ],
                &[
                    ("question", "q1"),
                    ("answerCode", "N"),
                    ("answerText", "No"),
                    ("answerSortOrder", "1"),
                    ("answerAssessmentValue", "0"),
                ],
            ],
        );
        let q = &run(&result).model.questions[0];
        assert_eq!(q.answer_options[0].code, "N");
        assert_eq!(q.answer_options[1].assessment_value, "1");
    }

    #[test]
    fn combined_row_produces_linked_group_and_question() {
        let result = rs(
            &[
                "group",
                "groupId",
                "groupName",
                "groupDesc",
                "question",
                "questionId",
                "questionText",
                "variable",
                "questionType",
                "order",
            ],
            &[&[
                ("group", "G_uri"),
                ("groupId", "1"),
                ("groupName", "Demographics"),
                ("question", "Q_uri"),
                ("questionId", "1"),
                ("questionText", "Age?"),
                ("variable", "Q1"),
                ("questionType", "N"),
                ("order", "1"),
            ]],
        );
        let m = run(&result);
        assert_eq!(m.classification, Classification::GroupsAndQuestions);

        let g = &m.model.groups[0];
        assert_eq!(g.uri, "G_uri");
        assert_eq!(g.id, "1");
        assert_eq!(g.name, "Demographics");
        assert_eq!(g.questions, vec!["Q_uri".to_string()]);

        let q = &m.model.questions[0];
        assert_eq!(q.group_uri.as_deref(), Some("G_uri"));
        assert_eq!(q.question_type, "N");
        assert_eq!(q.variable_cod, "Q1");
        assert_eq!(q.order, "1");
    }

    #[test]
    fn answer_codes_never_leak_into_the_variable_field() {
        let result = rs(
            &["group", "question", "answerCode", "answerText"],
            &[&[
                ("group", "g1"),
                ("question", "q1"),
                ("answerCode", "A1"),
                ("answerText", "Yes"),
            ]],
        );
        let q = &run(&result).model.questions[0];
        assert_eq!(q.variable_cod, "");
        assert_eq!(q.answer_options[0].code, "A1");
    }

    #[test]
    fn question_seen_before_its_group_still_gets_linked() {
        let result = rs(
            &["group", "question"],
            &[
                &[("question", "q1")],
                &[("group", "g1"), ("question", "q1")],
            ],
        );
        let m = run(&result);
        assert_eq!(m.model.questions[0].group_uri.as_deref(), Some("g1"));
        assert_eq!(m.model.groups[0].questions, vec!["q1".to_string()]);
    }

    #[test]
    fn first_group_pairing_wins_for_a_question() {
        let result = rs(
            &["group", "question"],
            &[
                &[("group", "g1"), ("question", "q1")],
                &[("group", "g2"), ("question", "q1")],
            ],
        );
        let m = run(&result);
        assert_eq!(m.model.questions[0].group_uri.as_deref(), Some("g1"));
        assert_eq!(m.model.groups[1].questions.len(), 0);
    }

    #[test]
    fn orphans_survive_by_default_and_drop_on_request() {
        let result = rs(
            &["group", "question"],
            &[
                &[("group", "g1"), ("question", "q1")],
                &[("question", "q2")],
            ],
        );

        let kept = run(&result);
        assert_eq!(kept.model.questions.len(), 2);
        assert!(kept.model.questions[1].group_uri.is_none());

        let opts = MaterializeOptions {
            keep_orphans: false,
            ..Default::default()
        };
        let dropped = materialize(&result, &opts).unwrap();
        assert_eq!(dropped.model.questions.len(), 1);
        assert_eq!(dropped.model.questions[0].uri, "q1");
    }

    #[test]
    fn combined_rows_aggregate_children_onto_the_question() {
        let result = rs(
            &["group", "question", "subQid", "subOrder"],
            &[
                &[("group", "g1"), ("question", "q1"), ("subQid", "s2"), ("subOrder", "2")],
                &[("group", "g1"), ("question", "q1"), ("subQid", "s1"), ("subOrder", "1")],
            ],
        );
        let m = run(&result);
        assert_eq!(m.model.groups[0].questions.len(), 1);
        let q = &m.model.questions[0];
        assert_eq!(q.subquestions.len(), 2);
        assert_eq!(q.subquestions[0].id, "s1");
    }

    #[test]
    fn materialization_is_idempotent_over_identical_input() {
        let result = rs(
            &["group", "question", "subQid", "subOrder"],
            &[
                &[("group", "g1"), ("question", "q1"), ("subQid", "s1"), ("subOrder", "5")],
                &[("group", "g2"), ("question", "q2")],
            ],
        );
        let a = run(&result).model;
        let b = run(&result).model;
        assert_eq!(a.groups, b.groups);
        assert_eq!(a.questions, b.questions);
    }

    #[test]
    fn parse_order_degrades_to_zero() {
        assert_eq!(parse_order("12"), 12);
        assert_eq!(parse_order(" 7 "), 7);
        assert_eq!(parse_order("-3"), -3);
        assert_eq!(parse_order("3rd"), 3);
        assert_eq!(parse_order(""), 0);
        assert_eq!(parse_order("abc"), 0);
    }

    #[test]
    fn placeholder_ids_follow_insertion_order() {
        let result = rs(
            &["question", "questionText"],
            &[
                &[("question", "q_a"), ("questionText", "A")],
                &[("question", "q_b"), ("questionText", "B")],
            ],
        );
        let m = run(&result);
        assert_eq!(m.model.questions[0].id, "Q1");
        assert_eq!(m.model.questions[1].id, "Q2");
    }
}
