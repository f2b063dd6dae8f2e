//! GraphDB client: repository management over the REST API plus SPARQL
//! query execution against a repository endpoint.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::GraphDbSettings;
use crate::materialize::{materialize, MaterializeOptions};
use crate::model::{Question, SurveyModel};
use crate::sparql::{ResultSet, SparqlJson};

/// Unified groups+questions query. One row per (group, question) pair;
/// subquestions are filtered out so only main questions attach to groups.
const ALL_GROUPS_QUERY: &str = r#"PREFIX ls: <https://w3id.org/fossr/ontology/limesurvey/>

SELECT ?group ?groupId ?groupName ?groupDescription
       ?question ?questionId ?questionText ?variableCod ?questionType ?questionOrder
WHERE {
    ?group a ls:QuestionGroup .
    OPTIONAL { ?group ls:hasId ?identifier . ?identifier ls:id ?groupId }
    OPTIONAL { ?group ls:hasName ?name . ?name ls:nameText ?groupName }
    OPTIONAL { ?group ls:hasContent ?content . ?content ls:text ?groupDescription }
    OPTIONAL {
        ?question ls:hasGroup ?group .
        FILTER NOT EXISTS { ?question ls:hasParentQuestion ?anyParent }
        OPTIONAL { ?question ls:hasId ?qid . ?qid ls:id ?questionId }
        OPTIONAL { ?question ls:hasContent ?qContent . ?qContent ls:text ?questionText }
        OPTIONAL { ?question ls:hasVariable ?var . ?var ls:variableCod ?variableCod }
        OPTIONAL { ?question ls:hasType ?type . ?type ls:code ?questionType }
        OPTIONAL {
            ?group ls:hasQuestionFlow ?flow .
            ?flow ls:hasQuestionStep ?step .
            ?step ls:hasQuestion ?question .
            ?step ls:questionOrder ?questionOrder .
        }
    }
}
ORDER BY ?groupId ?questionOrder ?questionId"#;

/// Main questions with their subquestions and answer options. Repeated
/// rows per question carry one child each.
const ALL_QUESTIONS_QUERY: &str = r#"PREFIX ls: <https://w3id.org/fossr/ontology/limesurvey/>

SELECT ?question ?questionId ?questionText ?variableCod ?questionType
       ?answerCode ?answerText ?answerSortOrder ?answerAssessmentValue
       ?subQid ?subTitle ?subQuestionText ?subOrder
WHERE {
    ?question a ls:Question .
    FILTER NOT EXISTS { ?question ls:hasParentQuestion ?anyParent }
    OPTIONAL { ?question ls:hasId ?identifier . ?identifier ls:id ?questionId }
    OPTIONAL { ?question ls:hasContent ?content . ?content ls:text ?questionText }
    OPTIONAL { ?question ls:hasVariable ?var . ?var ls:variableCod ?variableCod }
    OPTIONAL { ?question ls:hasType ?type . ?type ls:code ?questionType }
    OPTIONAL {
        ?question ls:hasAnswerOption ?answer .
        OPTIONAL { ?answer ls:componentValue ?answerCode }
        OPTIONAL { ?answer ls:hasContent ?answerContent . ?answerContent ls:text ?answerText }
        OPTIONAL {
            ?answer ls:hasComponentAttribute ?sortAttr .
            ?sortAttr ls:componentName "sortorder" .
            ?sortAttr ls:componentValue ?answerSortOrder .
        }
        OPTIONAL {
            ?answer ls:hasComponentAttribute ?assessAttr .
            ?assessAttr ls:componentName "assessment_value" .
            ?assessAttr ls:componentValue ?answerAssessmentValue .
        }
    }
    OPTIONAL {
        ?subQuestion ls:hasParentQuestion ?question .
        ?subQuestion ls:hasId ?subIdNode .
        ?subIdNode ls:id ?subQid .
        OPTIONAL { ?subQuestion ls:hasVariable ?subVar . ?subVar ls:variableCod ?subTitle }
        OPTIONAL { ?subQuestion ls:hasContent ?subContent . ?subContent ls:text ?subQuestionText }
        OPTIONAL {
            ?subQuestion ls:hasComponentAttribute ?orderAttr .
            ?orderAttr ls:componentName "question_order" .
            ?orderAttr ls:componentValue ?subOrder .
        }
    }
}
ORDER BY ?questionId ?answerSortOrder ?subOrder"#;

/// One entry from `GET /rest/repositories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub repo_type: String,
    #[serde(default)]
    pub location: String,
}

/// Per-class instance count from the connection test.
#[derive(Debug, Clone, Serialize)]
pub struct ClassCount {
    pub class: String,
    pub count: String,
}

/// Repository statistics returned by the connection test.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub repository: String,
    pub total_triples: String,
    pub classes: Vec<ClassCount>,
}

/// GraphDB HTTP client. The base URL and repository come from the caller
/// on every operation; both are runtime-mutable settings.
#[derive(Clone, Default)]
pub struct GraphDbClient {
    client: Client,
}

impl GraphDbClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// List all repositories on a GraphDB instance.
    pub async fn list_repositories(&self, base_url: &str) -> Result<Vec<RepositoryInfo>> {
        let url = format!("{}/rest/repositories", base_url.trim_end_matches('/'));
        debug!("Listing repositories at {}", url);

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to list repositories: {} - {}", status, text));
        }

        Ok(resp.json().await?)
    }

    /// Create a repository from a minimal free-edition config. An existing
    /// repository with the same id is not an error.
    pub async fn create_repository(
        &self,
        base_url: &str,
        repo_id: &str,
        repo_title: Option<&str>,
    ) -> Result<String> {
        let base = base_url.trim_end_matches('/');
        let title = repo_title.unwrap_or(repo_id);

        let config = json!({
            "id": repo_id,
            "title": title,
            "type": "graphdb",
            "params": {
                "ruleset": {"name": "ruleset", "value": "empty"},
                "disable-sameAs": {"name": "disable-sameAs", "value": "true"},
                "check-for-inconsistencies": {"name": "check-for-inconsistencies", "value": "false"},
                "enable-context-index": {"name": "enable-context-index", "value": "true"},
                "enablePredicateList": {"name": "enablePredicateList", "value": "true"},
                "query-timeout": {"name": "query-timeout", "value": "0"},
                "query-limit-results": {"name": "query-limit-results", "value": "0"},
                "base-URL": {"name": "base-URL", "value": format!("http://example.org/graphdb#{}/", repo_id)},
                "defaultNS": {"name": "defaultNS", "value": ""},
                "imports": {"name": "imports", "value": ""},
                "repository-type": {"name": "repository-type", "value": "file-repository"},
                "storage-folder": {"name": "storage-folder", "value": "storage"},
                "entity-index-size": {"name": "entity-index-size", "value": "10000000"},
            }
        });

        let url = format!("{}/rest/repositories", base);
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&config)
            .send()
            .await?;

        match resp.status().as_u16() {
            200 | 201 => {
                info!("Created repository '{}'", repo_id);
                Ok(format!("Repository '{}' created", repo_id))
            }
            409 => Ok(format!("Repository '{}' already exists", repo_id)),
            status => {
                let text = resp.text().await.unwrap_or_default();
                Err(anyhow!(
                    "Failed to create repository '{}': {} - {}",
                    repo_id,
                    status,
                    text
                ))
            }
        }
    }

    /// Delete a repository and all its data.
    pub async fn delete_repository(&self, base_url: &str, repo_id: &str) -> Result<()> {
        let url = format!(
            "{}/rest/repositories/{}",
            base_url.trim_end_matches('/'),
            repo_id
        );
        let resp = self.client.delete(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to delete repository '{}': {} - {}",
                repo_id,
                status,
                text
            ));
        }
        info!("Deleted repository '{}'", repo_id);
        Ok(())
    }

    /// Remove all statements, or a single named graph when `context` is
    /// given, via SPARQL UPDATE.
    pub async fn clear_repository(
        &self,
        base_url: &str,
        repo_id: &str,
        context: Option<&str>,
    ) -> Result<()> {
        let update = match context {
            Some(graph) => format!("CLEAR GRAPH <{}>", graph),
            None => "CLEAR ALL".to_string(),
        };
        let url = format!(
            "{}/repositories/{}/statements",
            base_url.trim_end_matches('/'),
            repo_id
        );

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/sparql-update")
            .body(update)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to clear repository '{}': {} - {}",
                repo_id,
                status,
                text
            ));
        }
        info!(repository = repo_id, graph = ?context, "repository cleared");
        Ok(())
    }

    /// Remove every statement whose subject is `subject_uri`. Used for
    /// targeted question/group deletion; whole surveys live in their own
    /// named graph and go through `clear_repository` instead.
    pub async fn delete_subject(
        &self,
        base_url: &str,
        repo_id: &str,
        subject_uri: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repositories/{}/statements",
            base_url.trim_end_matches('/'),
            repo_id
        );

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/sparql-update")
            .body(delete_subject_update(subject_uri))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Failed to delete statements for <{}>: {} - {}",
                subject_uri,
                status,
                text
            ));
        }
        info!(repository = repo_id, subject = subject_uri, "subject deleted");
        Ok(())
    }

    /// Execute a SELECT query and flatten the JSON results into rows.
    pub async fn execute_query(
        &self,
        settings: &GraphDbSettings,
        query: &str,
    ) -> Result<ResultSet> {
        let url = format!(
            "{}/repositories/{}",
            settings.base_url.trim_end_matches('/'),
            settings.repository
        );
        debug!(repository = %settings.repository, "executing SPARQL query");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/sparql-query")
            .header("Accept", "application/sparql-results+json")
            .body(query.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("SPARQL query failed: {} - {}", status, text));
        }

        let doc: SparqlJson = resp.json().await?;
        let result = ResultSet::from_sparql_json(doc);
        debug!(
            columns = result.columns.len(),
            rows = result.rows.len(),
            "query returned"
        );
        Ok(result)
    }

    /// Connection test: total triple count plus instance counts per class.
    pub async fn connection_stats(&self, settings: &GraphDbSettings) -> Result<ConnectionStats> {
        let count = self
            .execute_query(settings, "SELECT (COUNT(*) as ?count) WHERE { ?s ?p ?o }")
            .await?;
        let total_triples = count
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .cloned()
            .unwrap_or_else(|| "0".to_string());

        let classes_query = "SELECT ?class (COUNT(?instance) as ?count) \
                             WHERE { ?instance a ?class } \
                             GROUP BY ?class ORDER BY DESC(?count)";
        let classes = self
            .execute_query(settings, classes_query)
            .await?
            .rows
            .iter()
            .filter_map(|row| {
                Some(ClassCount {
                    class: row.get("class")?.clone(),
                    count: row.get("count").cloned().unwrap_or_else(|| "0".to_string()),
                })
            })
            .collect();

        Ok(ConnectionStats {
            repository: settings.repository.clone(),
            total_triples,
            classes,
        })
    }

    /// Load every group with its main questions, already assembled into a
    /// model. The query shape is fixed, so materialization cannot fail on
    /// classification.
    pub async fn get_all_groups(&self, settings: &GraphDbSettings) -> Result<SurveyModel> {
        let result = self.execute_query(settings, ALL_GROUPS_QUERY).await?;
        let materialized = materialize(&result, &MaterializeOptions::default())
            .map_err(|e| anyhow!("Unexpected groups result shape: {}", e))?;
        Ok(materialized.model)
    }

    /// Load every main question with subquestions and answer options.
    pub async fn get_all_questions(&self, settings: &GraphDbSettings) -> Result<Vec<Question>> {
        let result = self.execute_query(settings, ALL_QUESTIONS_QUERY).await?;
        let materialized = materialize(&result, &MaterializeOptions::default())
            .map_err(|e| anyhow!("Unexpected questions result shape: {}", e))?;
        Ok(materialized.model.questions)
    }
}

/// SPARQL UPDATE removing all statements with the given subject.
fn delete_subject_update(subject_uri: &str) -> String {
    format!("DELETE WHERE {{ <{}> ?p ?o }}", subject_uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{classify, Classification};

    fn vars(query: &str) -> Vec<String> {
        // Pull the projected variables out of the SELECT clause.
        let select = query
            .split("WHERE")
            .next()
            .unwrap()
            .split("SELECT")
            .nth(1)
            .unwrap();
        select
            .split_whitespace()
            .filter_map(|tok| tok.strip_prefix('?'))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn groups_query_materializes_as_combined_shape() {
        assert_eq!(
            classify(&vars(ALL_GROUPS_QUERY)),
            Classification::GroupsAndQuestions
        );
    }

    #[test]
    fn questions_query_materializes_as_questions_shape() {
        assert_eq!(
            classify(&vars(ALL_QUESTIONS_QUERY)),
            Classification::Questions
        );
    }

    #[test]
    fn subject_deletion_targets_only_that_subject() {
        assert_eq!(
            delete_subject_update("http://example.org/question/Q1"),
            "DELETE WHERE { <http://example.org/question/Q1> ?p ?o }"
        );
    }

    #[test]
    fn repository_list_entry_parses_from_rest_payload() {
        let info: RepositoryInfo = serde_json::from_str(
            r#"{"id": "surveys", "title": "Survey data", "type": "graphdb",
                "location": "", "uri": "http://localhost:7200/repositories/surveys"}"#,
        )
        .unwrap();
        assert_eq!(info.id, "surveys");
        assert_eq!(info.repo_type, "graphdb");
    }
}
