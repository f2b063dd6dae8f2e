//! LimeSurvey RemoteControl client (JSON-RPC over HTTP) and the push
//! orchestration that turns a composed selection into a live survey.

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::LimeSurveySettings;
use crate::lsq::{question_lsq, LsqContext};
use crate::model::{question_type_label, Group, Question};

/// RemoteControl JSON-RPC client. One instance per request; credentials
/// are a snapshot of the settings at call time.
pub struct LimeSurveyClient {
    client: Client,
    settings: LimeSurveySettings,
}

impl LimeSurveyClient {
    pub fn new(settings: LimeSurveySettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    /// Perform one RPC call and unwrap the `result` member.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "method": method,
            "params": params,
            "id": 1,
        });

        debug!(method, url = %self.settings.url, "calling LimeSurvey");

        let resp = self
            .client
            .post(&self.settings.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to connect to LimeSurvey at {}", self.settings.url))?;

        // A disabled RemoteControl API or a wrong URL answers with an HTML
        // error page instead of JSON.
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if content_type.contains("text/html") {
            bail!(
                "LimeSurvey returned HTML instead of JSON; check that the \
                 RemoteControl API is enabled and the URL is correct: {}",
                self.settings.url
            );
        }

        let body: Value = resp
            .json()
            .await
            .context("Invalid JSON response from LimeSurvey")?;

        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            bail!("LimeSurvey API error on {}: {}", method, message);
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Authenticate and obtain a session key. An auth failure comes back
    /// as a successful RPC whose result is `{"status": "..."}`.
    pub async fn get_session_key(&self) -> Result<String> {
        let result = self
            .call(
                "get_session_key",
                json!([self.settings.username, self.settings.password]),
            )
            .await?;

        if let Some(status) = result.get("status").and_then(Value::as_str) {
            bail!("LimeSurvey authentication failed: {}", status);
        }

        match result.as_str() {
            Some(key) if !key.is_empty() && key != "null" => Ok(key.to_string()),
            _ => bail!("Failed to authenticate with LimeSurvey"),
        }
    }

    pub async fn release_session_key(&self, session_key: &str) -> Result<()> {
        self.call("release_session_key", json!([session_key]))
            .await?;
        Ok(())
    }

    /// All surveys visible to the authenticated user.
    pub async fn list_surveys(&self, session_key: &str) -> Result<Value> {
        self.call("list_surveys", json!([session_key])).await
    }

    /// Create a survey in group-by-group format and return its id. The
    /// provisional id is only a suggestion; LimeSurvey picks another one
    /// when it is taken.
    pub async fn add_survey(
        &self,
        session_key: &str,
        title: &str,
        language: &str,
    ) -> Result<i64> {
        let sid = provisional_sid();
        let result = self
            .call("add_survey", json!([session_key, sid, title, language, "G"]))
            .await?;
        let survey_id = as_int(&result)
            .ok_or_else(|| anyhow!("add_survey returned no usable id: {}", result))?;
        info!(survey_id, title, "survey created");
        Ok(survey_id)
    }

    pub async fn add_group(
        &self,
        session_key: &str,
        survey_id: i64,
        title: &str,
        description: &str,
    ) -> Result<i64> {
        let result = self
            .call("add_group", json!([session_key, survey_id, title, description]))
            .await?;
        let group_id =
            as_int(&result).ok_or_else(|| anyhow!("add_group returned no usable id: {}", result))?;
        debug!(group_id, title, "group created");
        Ok(group_id)
    }

    /// Import one question from `.lsq` XML. The result shape varies by
    /// LimeSurvey version: `{"newqid": n}`, `{"qid": n}`, or a bare id.
    pub async fn import_question(
        &self,
        session_key: &str,
        survey_id: i64,
        group_id: i64,
        lsq_xml: &str,
        mandatory: &str,
    ) -> Result<i64> {
        let encoded = BASE64.encode(lsq_xml);
        let result = self
            .call(
                "import_question",
                json!([session_key, survey_id, group_id, encoded, "lsq", mandatory]),
            )
            .await?;

        if let Some(obj) = result.as_object() {
            if obj.get("status").and_then(Value::as_str) == Some("Error") {
                let message = obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error");
                bail!("LimeSurvey import error: {}", message);
            }
            for field in ["newqid", "qid"] {
                if let Some(qid) = obj.get(field).and_then(as_int) {
                    return Ok(qid);
                }
            }
        }

        as_int(&result)
            .ok_or_else(|| anyhow!("Unexpected import_question response: {}", result))
    }

    /// Make the survey available for respondents.
    pub async fn activate_survey(&self, session_key: &str, survey_id: i64) -> Result<Value> {
        let result = self
            .call("activate_survey", json!([session_key, survey_id]))
            .await?;
        info!(survey_id, "survey activated");
        Ok(result)
    }

    /// Admin URL of a survey, derived from the RemoteControl endpoint.
    pub fn survey_url(&self, survey_id: i64) -> String {
        format!(
            "{}/admin/survey/sa/view/surveyid/{}",
            self.settings.url.trim_end_matches("/admin/remotecontrol"),
            survey_id
        )
    }
}

/// Outcome of pushing a composed selection to LimeSurvey. Failures are
/// collected per question instead of aborting the whole push.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub survey_id: i64,
    pub url: String,
    pub imported_questions: usize,
    pub total_questions: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_questions: Vec<String>,
}

/// Create a survey from the selected groups and questions: one LimeSurvey
/// group per selected group, each followed by imports of the questions
/// linked to it. The session key is released even when the push fails.
pub async fn push_survey(
    client: &LimeSurveyClient,
    title: &str,
    groups: &[Group],
    questions: &[Question],
    language: &str,
) -> Result<PushReport> {
    let session_key = client.get_session_key().await?;
    let outcome = push_with_session(client, &session_key, title, groups, questions, language).await;

    if let Err(e) = client.release_session_key(&session_key).await {
        warn!("Failed to release LimeSurvey session key: {}", e);
    }

    outcome
}

async fn push_with_session(
    client: &LimeSurveyClient,
    session_key: &str,
    title: &str,
    groups: &[Group],
    questions: &[Question],
    language: &str,
) -> Result<PushReport> {
    let survey_id = client.add_survey(session_key, title, language).await?;

    let mut imported = 0usize;
    let mut failed: Vec<String> = Vec::new();

    for group in groups {
        let group_id = match client
            .add_group(session_key, survey_id, &group.name, &group.description)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(group = %group.name, "group creation failed: {}", e);
                failed.push(format!("Group '{}': {}", group.name, e));
                continue;
            }
        };

        let group_questions = questions
            .iter()
            .filter(|q| q.group_uri.as_deref() == Some(group.uri.as_str()));

        for (idx, question) in group_questions.enumerate() {
            let ctx = LsqContext {
                survey_id,
                group_id,
                question_id: question.id.parse().unwrap_or(idx as i64 + 1),
                language,
            };
            debug!(
                question = %question.uri,
                kind = question_type_label(&question.question_type),
                "rendering question document"
            );
            let xml = question_lsq(question, &ctx);

            match client
                .import_question(session_key, survey_id, group_id, &xml, "N")
                .await
            {
                Ok(new_qid) => {
                    debug!(new_qid, question = %question.uri, "question imported");
                    imported += 1;
                }
                Err(e) => {
                    let label = if question.variable_cod.is_empty() {
                        question.id.clone()
                    } else {
                        question.variable_cod.clone()
                    };
                    warn!(question = %question.uri, "import failed: {}", e);
                    failed.push(format!("{} (ID:{}): {}", label, question.id, e));
                }
            }
        }
    }

    info!(
        survey_id,
        imported,
        failed = failed.len(),
        "survey push finished"
    );

    Ok(PushReport {
        survey_id,
        url: client.survey_url(survey_id),
        imported_questions: imported,
        total_questions: questions.len(),
        failed_questions: failed,
    })
}

/// Provisional survey id in LimeSurvey's 6-digit range.
fn provisional_sid() -> u32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    100_000 + nanos % 900_000
}

/// Ids arrive as JSON numbers or numeric strings depending on version.
fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
