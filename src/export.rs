//! Export of a selected subset of the model: a survey JSON document and a
//! LimeSurvey-compatible `;`-separated CSV.
//!
//! The selection itself is caller state; both exporters take the chosen
//! groups and questions as input and never touch the installed model.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::model::{Group, Question, SurveyModel};

/// Group as it appears in the exported survey document.
#[derive(Debug, Serialize)]
struct ExportGroup<'a> {
    uri: &'a str,
    id: &'a str,
    name: &'a str,
    description: &'a str,
}

/// Build the downloadable survey JSON document.
pub fn survey_json(title: &str, groups: &[Group], questions: &[Question]) -> serde_json::Value {
    let export_groups: Vec<ExportGroup> = groups
        .iter()
        .map(|g| ExportGroup {
            uri: &g.uri,
            id: &g.id,
            name: &g.name,
            description: &g.description,
        })
        .collect();

    json!({
        "survey_info": {
            "title": title,
            "created": now_iso8601(),
            "source": "GraphDB",
            "format_version": "1.0",
        },
        "groups": export_groups,
        "questions": questions,
    })
}

/// Render the selection as a LimeSurvey structure CSV: one `S` survey row,
/// a `G` row per group followed by its `Q` rows, then standalone questions.
pub fn limesurvey_csv(title: &str, groups: &[Group], questions: &[Question]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());

    wtr.write_record([
        "class", "type/scale", "name", "relevance", "text", "help", "language", "mandatory",
        "other",
    ])?;

    // Survey header row.
    wtr.write_record(["S", "", title, "", "", "", "en", "", ""])?;

    // Resolve group child lists against the selection so Q rows follow
    // each group's declared question order.
    let selection = SurveyModel {
        groups: groups.to_vec(),
        questions: questions.to_vec(),
    };

    for group in groups {
        wtr.write_record([
            "G",
            "",
            group.name.as_str(),
            "1",
            group.description.as_str(),
            "",
            "",
            "",
            "",
        ])?;
        let declared = selection.questions_of(group);
        for question in &declared {
            write_question_row(&mut wtr, question)?;
        }
        // Questions that claim the group but are missing from its list
        // keep their selection order after the declared ones.
        for question in questions.iter().filter(|q| {
            q.group_uri.as_deref() == Some(group.uri.as_str())
                && !declared.iter().any(|d| d.uri == q.uri)
        }) {
            write_question_row(&mut wtr, question)?;
        }
    }

    // Questions outside any selected group go at the end.
    let in_selected_group = |q: &Question| {
        q.group_uri
            .as_deref()
            .map(|u| groups.iter().any(|g| g.uri == u))
            .unwrap_or(false)
            || groups.iter().any(|g| g.questions.contains(&q.uri))
    };
    for question in questions.iter().filter(|q| !in_selected_group(q)) {
        write_question_row(&mut wtr, question)?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e.error()))?;
    Ok(String::from_utf8(data)?)
}

fn write_question_row(wtr: &mut csv::Writer<Vec<u8>>, question: &Question) -> Result<()> {
    let name = if question.variable_cod.is_empty() {
        format!("Q{}", question.id)
    } else {
        question.variable_cod.clone()
    };
    // The importer treats the delimiter as structural even inside text.
    let text = question.text.replace(';', ",");

    wtr.write_record([
        "Q",
        question.question_type.as_str(),
        name.as_str(),
        "1",
        text.as_str(),
        "",
        "en",
        "N",
        "N",
    ])?;
    Ok(())
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ` without a date crate.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86_400);
    let tod = secs.rem_euclid(86_400);

    // Civil date from days since the epoch.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        tod / 3600,
        (tod % 3600) / 60,
        tod % 60
    )
}
