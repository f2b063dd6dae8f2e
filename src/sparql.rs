//! SPARQL result handling: flattening `application/sparql-results+json`
//! into the tabular shape the materializer consumes, raw CSV export, and
//! the canned query templates offered to the query editor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One result row: column name → plain string value. Absent bindings
/// (OPTIONAL clauses that did not match) simply have no entry.
pub type Row = HashMap<String, String>;

/// A tabular query result, already stripped of RDF term metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

// Wire types for the SPARQL JSON results format.

#[derive(Debug, Deserialize)]
pub struct SparqlJson {
    pub head: SparqlHead,
    pub results: SparqlBindings,
}

#[derive(Debug, Deserialize)]
pub struct SparqlHead {
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SparqlBindings {
    #[serde(default)]
    pub bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
pub struct SparqlTerm {
    pub value: String,
}

impl ResultSet {
    /// Flatten a parsed SPARQL JSON document. Column order follows
    /// `head.vars`; each binding keeps only the term's `value`.
    pub fn from_sparql_json(doc: SparqlJson) -> Self {
        let rows = doc
            .results
            .bindings
            .into_iter()
            .map(|binding| {
                binding
                    .into_iter()
                    .map(|(var, term)| (var, term.value))
                    .collect()
            })
            .collect();

        ResultSet {
            columns: doc.head.vars,
            rows,
        }
    }

    /// Render as `;`-separated CSV. Values are double-quoted only when they
    /// contain the delimiter, matching the download the query editor offers.
    pub fn to_csv(&self) -> String {
        let mut out = self.columns.join(";");
        out.push('\n');
        for row in &self.rows {
            let line: Vec<String> = self
                .columns
                .iter()
                .map(|col| {
                    let val = row.get(col).map(String::as_str).unwrap_or("");
                    if val.contains(';') {
                        format!("\"{}\"", val)
                    } else {
                        val.to_string()
                    }
                })
                .collect();
            out.push_str(&line.join(";"));
            out.push('\n');
        }
        out
    }
}

/// A predefined query offered in the query editor.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub query: &'static str,
}

/// Canned queries against the LimeSurvey vocabulary.
pub fn query_templates() -> Vec<QueryTemplate> {
    vec![
        QueryTemplate {
            name: "All groups",
            description: "List every question group with id, name and description",
            query: r#"PREFIX ls: <https://w3id.org/fossr/ontology/limesurvey/>

SELECT ?group ?groupId ?groupName ?groupDescription
WHERE {
    ?group a ls:QuestionGroup .
    OPTIONAL { ?group ls:hasId ?identifier . ?identifier ls:id ?groupId }
    OPTIONAL { ?group ls:hasName ?name . ?name ls:nameText ?groupName }
    OPTIONAL { ?group ls:hasContent ?content . ?content ls:text ?groupDescription }
}
ORDER BY ?groupId
LIMIT 100"#,
        },
        QueryTemplate {
            name: "All questions",
            description: "List every question with text, variable and type",
            query: r#"PREFIX ls: <https://w3id.org/fossr/ontology/limesurvey/>

SELECT ?question ?questionId ?questionText ?variableCod ?questionType
WHERE {
    ?question a ls:Question .
    FILTER NOT EXISTS { ?question ls:hasParentQuestion ?parent }
    OPTIONAL { ?question ls:hasId ?identifier . ?identifier ls:id ?questionId }
    OPTIONAL { ?question ls:hasContent ?content . ?content ls:text ?questionText }
    OPTIONAL { ?question ls:hasVariable ?var . ?var ls:variableCod ?variableCod }
    OPTIONAL { ?question ls:hasType ?type . ?type ls:code ?questionType }
}
ORDER BY ?questionId
LIMIT 100"#,
        },
        QueryTemplate {
            name: "Groups with questions",
            description: "Groups joined to their questions, one row per pair",
            query: r#"PREFIX ls: <https://w3id.org/fossr/ontology/limesurvey/>

SELECT ?group ?groupId ?groupName ?question ?questionId ?questionText ?variableCod ?questionType
WHERE {
    ?group a ls:QuestionGroup .
    OPTIONAL { ?group ls:hasId ?gid . ?gid ls:id ?groupId }
    OPTIONAL { ?group ls:hasName ?name . ?name ls:nameText ?groupName }
    OPTIONAL {
        ?question ls:hasGroup ?group .
        FILTER NOT EXISTS { ?question ls:hasParentQuestion ?parent }
        OPTIONAL { ?question ls:hasId ?qid . ?qid ls:id ?questionId }
        OPTIONAL { ?question ls:hasContent ?content . ?content ls:text ?questionText }
        OPTIONAL { ?question ls:hasVariable ?var . ?var ls:variableCod ?variableCod }
        OPTIONAL { ?question ls:hasType ?type . ?type ls:code ?questionType }
    }
}
ORDER BY ?groupId ?questionId
LIMIT 500"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_bindings_to_plain_values() {
        let doc: SparqlJson = serde_json::from_str(
            r#"{
                "head": {"vars": ["group", "groupName"]},
                "results": {"bindings": [
                    {"group": {"type": "uri", "value": "http://ex/g1"},
                     "groupName": {"type": "literal", "value": "Demographics"}},
                    {"group": {"type": "uri", "value": "http://ex/g2"}}
                ]}
            }"#,
        )
        .unwrap();

        let rs = ResultSet::from_sparql_json(doc);
        assert_eq!(rs.columns, vec!["group", "groupName"]);
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0]["groupName"], "Demographics");
        // OPTIONAL that did not match: no entry at all.
        assert!(rs.rows[1].get("groupName").is_none());
    }

    #[test]
    fn csv_quotes_only_on_delimiter() {
        let mut row1 = Row::new();
        row1.insert("a".into(), "plain".into());
        row1.insert("b".into(), "has;semi".into());
        let rs = ResultSet {
            columns: vec!["a".into(), "b".into()],
            rows: vec![row1],
        };
        assert_eq!(rs.to_csv(), "a;b\nplain;\"has;semi\"\n");
    }

    #[test]
    fn csv_fills_missing_cells_with_empty() {
        let rs = ResultSet {
            columns: vec!["a".into(), "b".into()],
            rows: vec![Row::new()],
        };
        assert_eq!(rs.to_csv(), "a;b\n;\n");
    }

    #[test]
    fn templates_cover_both_entity_kinds() {
        let templates = query_templates();
        assert_eq!(templates.len(), 3);
        assert!(templates.iter().any(|t| t.query.contains("ls:QuestionGroup")));
        assert!(templates.iter().any(|t| t.query.contains("a ls:Question")));
    }
}
