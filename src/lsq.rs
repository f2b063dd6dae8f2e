//! Generation of LimeSurvey `.lsq` question documents.
//!
//! The RemoteControl `import_question` call takes a base64-encoded `.lsq`
//! XML file, so pushing a composed survey means rendering one of these per
//! question. The document layout follows what a LimeSurvey 6 export
//! produces: questions row, optional subquestions, l10n strings, default
//! attributes, optional answers.

use crate::model::Question;

/// Ids the generated document must reference. They come from the survey
/// and group just created on the LimeSurvey side.
#[derive(Debug, Clone, Copy)]
pub struct LsqContext<'a> {
    pub survey_id: i64,
    pub group_id: i64,
    pub question_id: i64,
    pub language: &'a str,
}

const QUESTION_FIELDS: &[&str] = &[
    "qid",
    "parent_qid",
    "sid",
    "gid",
    "type",
    "title",
    "preg",
    "other",
    "mandatory",
    "encrypted",
    "question_order",
    "scale_id",
    "same_default",
    "relevance",
    "question_theme_name",
    "modulename",
    "same_script",
];

const SUBQUESTION_FIELDS: &[&str] = &[
    "qid",
    "parent_qid",
    "sid",
    "gid",
    "type",
    "title",
    "preg",
    "other",
    "mandatory",
    "encrypted",
    "question_order",
    "scale_id",
    "same_default",
    "relevance",
    "question_theme_name",
    "modulename",
    "same_script",
    "id",
    "question",
    "help",
    "script",
    "language",
];

const ANSWER_FIELDS: &[&str] = &[
    "qid",
    "code",
    "answer",
    "sortorder",
    "assessment_value",
    "scale_id",
    "language",
];

/// Attribute rows LimeSurvey expects on every imported question.
const DEFAULT_ATTRIBUTES: &[(&str, &str)] = &[
    ("hidden", "0"),
    ("page_break", "0"),
    ("random_order", "0"),
    ("hide_tip", "0"),
    ("time_limit_action", "1"),
    ("save_as_default", "N"),
];

/// Render the `.lsq` XML document for one question.
pub fn question_lsq(question: &Question, ctx: &LsqContext) -> String {
    let qid = ctx.question_id.to_string();
    let sid = ctx.survey_id.to_string();
    let gid = ctx.group_id.to_string();
    // LimeSurvey type codes are single characters.
    let type_code: String = question.question_type.chars().take(1).collect();
    let type_code = if type_code.is_empty() { "L".to_string() } else { type_code };

    let mut xml = String::with_capacity(4096);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<document>\n");
    elem(&mut xml, "LimeSurveyDocType", "Question");
    elem(&mut xml, "DBVersion", "623");
    xml.push_str(" <languages>\n");
    elem(&mut xml, "language", ctx.language);
    xml.push_str(" </languages>\n");

    // Main question row.
    xml.push_str(" <questions>\n");
    fields(&mut xml, QUESTION_FIELDS);
    xml.push_str("  <rows>\n   <row>\n");
    elem(&mut xml, "qid", &qid);
    elem(&mut xml, "parent_qid", "0");
    elem(&mut xml, "sid", &sid);
    elem(&mut xml, "gid", &gid);
    elem(&mut xml, "type", &type_code);
    elem(&mut xml, "title", &sanitize_title(&question.variable_cod, 'Q'));
    elem(&mut xml, "preg", "");
    elem(&mut xml, "other", "N");
    elem(&mut xml, "mandatory", "N");
    elem(&mut xml, "encrypted", "N");
    elem(&mut xml, "question_order", question.order.trim());
    elem(&mut xml, "scale_id", "0");
    elem(&mut xml, "same_default", "0");
    elem(&mut xml, "relevance", "1");
    elem(&mut xml, "question_theme_name", "");
    elem(&mut xml, "modulename", "");
    elem(&mut xml, "same_script", "0");
    xml.push_str("   </row>\n  </rows>\n </questions>\n");

    if !question.subquestions.is_empty() {
        xml.push_str(" <subquestions>\n");
        fields(&mut xml, SUBQUESTION_FIELDS);
        xml.push_str("  <rows>\n");
        for (idx, sub) in question.subquestions.iter().enumerate() {
            let sub_qid = format!("{}{}", qid, idx + 1);
            xml.push_str("   <row>\n");
            elem(&mut xml, "qid", &sub_qid);
            elem(&mut xml, "parent_qid", &qid);
            elem(&mut xml, "sid", &sid);
            elem(&mut xml, "gid", &gid);
            // Subquestion rows always carry the text type.
            elem(&mut xml, "type", "T");
            elem(&mut xml, "title", &sanitize_title(&sub.title, 'S'));
            elem(&mut xml, "preg", "");
            elem(&mut xml, "other", "N");
            elem(&mut xml, "mandatory", "N");
            elem(&mut xml, "encrypted", "N");
            elem(&mut xml, "question_order", &or_index(&sub.order, idx));
            elem(&mut xml, "scale_id", "0");
            elem(&mut xml, "same_default", "0");
            elem(&mut xml, "relevance", "1");
            elem(&mut xml, "question_theme_name", "");
            elem(&mut xml, "modulename", "");
            elem(&mut xml, "same_script", "0");
            elem(&mut xml, "id", &sub_qid);
            let text = if sub.text.is_empty() { &sub.title } else { &sub.text };
            elem(&mut xml, "question", text);
            elem(&mut xml, "help", "");
            elem(&mut xml, "script", "");
            elem(&mut xml, "language", ctx.language);
            xml.push_str("   </row>\n");
        }
        xml.push_str("  </rows>\n </subquestions>\n");
    }

    // Localized question text.
    xml.push_str(" <question_l10ns>\n");
    fields(&mut xml, &["id", "qid", "question", "help", "script", "language"]);
    xml.push_str("  <rows>\n   <row>\n");
    elem(&mut xml, "id", &qid);
    elem(&mut xml, "qid", &qid);
    elem(&mut xml, "question", &question.text);
    elem(&mut xml, "help", "");
    elem(&mut xml, "script", "");
    elem(&mut xml, "language", ctx.language);
    xml.push_str("   </row>\n  </rows>\n </question_l10ns>\n");

    xml.push_str(" <question_attributes>\n");
    fields(&mut xml, &["qid", "attribute", "value", "language"]);
    xml.push_str("  <rows>\n");
    for (name, value) in DEFAULT_ATTRIBUTES {
        xml.push_str("   <row>\n");
        elem(&mut xml, "qid", "");
        elem(&mut xml, "attribute", name);
        elem(&mut xml, "value", value);
        elem(&mut xml, "language", "");
        xml.push_str("   </row>\n");
    }
    xml.push_str("  </rows>\n </question_attributes>\n");

    if !question.answer_options.is_empty() {
        xml.push_str(" <answers>\n");
        fields(&mut xml, ANSWER_FIELDS);
        xml.push_str("  <rows>\n");
        for (idx, ans) in question.answer_options.iter().enumerate() {
            xml.push_str("   <row>\n");
            elem(&mut xml, "qid", &qid);
            elem(&mut xml, "code", &ans.code);
            elem(&mut xml, "answer", &ans.text);
            elem(&mut xml, "sortorder", &or_index(&ans.sort_order, idx));
            let assessment = if ans.assessment_value.is_empty() {
                "0"
            } else {
                &ans.assessment_value
            };
            elem(&mut xml, "assessment_value", assessment);
            elem(&mut xml, "scale_id", "0");
            elem(&mut xml, "language", ctx.language);
            xml.push_str("   </row>\n");
        }
        xml.push_str("  </rows>\n </answers>\n");
    }

    xml.push_str("</document>\n");
    xml
}

fn fields(xml: &mut String, names: &[&str]) {
    xml.push_str("  <fields>\n");
    for name in names {
        elem(xml, "fieldname", name);
    }
    xml.push_str("  </fields>\n");
}

fn elem(xml: &mut String, name: &str, text: &str) {
    if text.is_empty() {
        xml.push_str(&format!("  <{} />\n", name));
    } else {
        xml.push_str(&format!("  <{}>{}</{}>\n", name, escape(text), name));
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// LimeSurvey titles must match `[a-zA-Z][a-zA-Z0-9_]*`. Invalid characters
/// are stripped and a letter prefix is forced when needed.
fn sanitize_title(raw: &str, prefix: char) -> String {
    let valid = !raw.is_empty()
        && raw.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        return raw.to_string();
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    format!("{}{}", prefix, cleaned)
}

/// Child order fields default to the list position when absent.
fn or_index(order: &str, idx: usize) -> String {
    let t = order.trim();
    if t.is_empty() {
        idx.to_string()
    } else {
        t.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerOption, Subquestion};

    fn question() -> Question {
        Question {
            uri: "http://ex/q1".into(),
            id: "7".into(),
            text: "How old are you?".into(),
            variable_cod: "Q1".into(),
            question_type: "N".into(),
            order: "3".into(),
            group_uri: None,
            subquestions: vec![],
            answer_options: vec![],
        }
    }

    fn ctx() -> LsqContext<'static> {
        LsqContext {
            survey_id: 123456,
            group_id: 9,
            question_id: 42,
            language: "en",
        }
    }

    #[test]
    fn main_question_row_carries_context_ids() {
        let xml = question_lsq(&question(), &ctx());
        assert!(xml.contains("<LimeSurveyDocType>Question</LimeSurveyDocType>"));
        assert!(xml.contains("<qid>42</qid>"));
        assert!(xml.contains("<sid>123456</sid>"));
        assert!(xml.contains("<gid>9</gid>"));
        assert!(xml.contains("<type>N</type>"));
        assert!(xml.contains("<title>Q1</title>"));
        assert!(xml.contains("<question>How old are you?</question>"));
    }

    #[test]
    fn question_text_is_escaped() {
        let mut q = question();
        q.text = "Taller than 1m & <growing>?".into();
        let xml = question_lsq(&q, &ctx());
        assert!(xml.contains("Taller than 1m &amp; &lt;growing&gt;?"));
    }

    #[test]
    fn subquestions_link_to_parent_qid() {
        let mut q = question();
        q.subquestions = vec![Subquestion {
            id: "s1".into(),
            title: "SQ001".into(),
            text: "Left arm".into(),
            order: "1".into(),
        }];
        let xml = question_lsq(&q, &ctx());
        assert!(xml.contains("<subquestions>"));
        assert!(xml.contains("<parent_qid>42</parent_qid>"));
        assert!(xml.contains("<question>Left arm</question>"));
    }

    #[test]
    fn answers_carry_codes_and_assessment_values() {
        let mut q = question();
        q.answer_options = vec![AnswerOption {
            code: "A1".into(),
            text: "Yes".into(),
            sort_order: "1".into(),
            assessment_value: "2".into(),
        }];
        let xml = question_lsq(&q, &ctx());
        assert!(xml.contains("<code>A1</code>"));
        assert!(xml.contains("<assessment_value>2</assessment_value>"));
    }

    #[test]
    fn invalid_titles_are_sanitized() {
        assert_eq!(sanitize_title("Q001", 'Q'), "Q001");
        assert_eq!(sanitize_title("1st", 'Q'), "Q1st");
        assert_eq!(sanitize_title("va r!", 'Q'), "Qvar");
        assert_eq!(sanitize_title("", 'S'), "S");
    }
}
