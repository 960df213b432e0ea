use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::LazyLock;

use crate::storage::ChunkIndex;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const JUDGE_CRITERIA: &[&str] = &["correctness", "completeness", "relevance", "clarity", "groundedness"];

static JSON_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("valid json regex"));

/// Minimal client for the Anthropic Messages API
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("API key cannot be empty");
        }
        Ok(Self {
            client: Client::builder().build()?,
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: MESSAGES_URL.to_string(),
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Point the client at another Messages-compatible endpoint
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Send a single user message and return the text of the reply
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .context("request to Messages API failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Messages API returned {status}: {body}");
        }

        let body: MessagesResponse = response.json().await.context("unexpected Messages API response")?;
        Ok(body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub file: String,
    pub section: String,
    pub content_preview: String,
}

/// Retrieved context for a question, and the generated answer if a model is configured
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub question: String,
    pub context: String,
    pub answer: Option<String>,
    pub retrieved_chunks: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordEvaluation {
    pub keyword_coverage: f64,
    pub keywords_found: Vec<String>,
    pub keywords_missing: Vec<String>,
    pub answer_length: usize,
}

/// Scores given by the judging model
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JudgeEvaluation {
    Scored {
        scores: serde_json::Map<String, Value>,
        overall: f64,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl JudgeEvaluation {
    pub fn overall(&self) -> f64 {
        match self {
            JudgeEvaluation::Scored { overall, .. } => *overall,
            JudgeEvaluation::Failed { .. } => 0.0,
        }
    }
}

/// Evaluates answers produced from retrieved documentation
pub struct AnswerEvaluator<'a> {
    index: &'a ChunkIndex,
    client: Option<AnthropicClient>,
}

impl<'a> AnswerEvaluator<'a> {
    pub fn new(index: &'a ChunkIndex, client: Option<AnthropicClient>) -> Self {
        Self { index, client }
    }

    pub async fn rag_answer(&self, question: &str, n_results: usize) -> Result<RagAnswer> {
        let hits = self.index.search(question, n_results, None);

        let context = hits
            .iter()
            .map(|hit| format!("[{} - {}]\n{}", hit.meta_str("file"), hit.meta_str("section_header"), hit.document))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let answer = match &self.client {
            Some(client) => {
                let prompt = format!(
                    "Based on the following documentation, answer the question: {question}\n\nDocumentation:\n{context}\n\nPlease provide a clear, concise answer based only on the information provided."
                );
                Some(client.complete(&prompt, 1000).await?)
            }
            None => None,
        };

        let retrieved_chunks = hits
            .iter()
            .map(|hit| RetrievedChunk {
                file: hit.meta_str("file").to_string(),
                section: hit.meta_str("section_header").to_string(),
                content_preview: preview(&hit.document, 200),
            })
            .collect();

        Ok(RagAnswer {
            question: question.to_string(),
            context,
            answer,
            retrieved_chunks,
        })
    }

    /// Ask the judging model to score an answer; failures are reported, not raised
    pub async fn judge(&self, question: &str, answer: &str, context: &str) -> JudgeEvaluation {
        let Some(client) = &self.client else {
            return JudgeEvaluation::Failed {
                error: "No API key provided".to_string(),
                raw: None,
            };
        };

        let prompt = format!(
            "You are evaluating the quality of an AI assistant's answer.\nQuestion: {question}\n\nContext provided to assistant:\n{context}\n\nAssistant's answer:\n{answer}\n\nScore the answer from 1 to 5 on each criterion:\n1. correctness: is it factually correct based on the context?\n2. completeness: does it fully address the question?\n3. relevance: does it stay focused on the question?\n4. clarity: is it well written and easy to understand?\n5. groundedness: is it based only on the provided context?\n\nRespond with a JSON object with the integer fields correctness, completeness, relevance, clarity, groundedness and a string field explanation."
        );

        match client.complete(&prompt, 500).await {
            Ok(response) => parse_judgement(&response),
            Err(e) => JudgeEvaluation::Failed {
                error: format!("{e:#}"),
                raw: None,
            },
        }
    }
}

/// Share of expected keywords that appear in the answer, case-insensitively
pub fn keyword_quality(answer: &str, expected_keywords: &[String]) -> KeywordEvaluation {
    let answer_lower = answer.to_lowercase();
    let (found, missing): (Vec<String>, Vec<String>) = expected_keywords
        .iter()
        .cloned()
        .partition(|kw| answer_lower.contains(&kw.to_lowercase()));

    let keyword_coverage = if expected_keywords.is_empty() {
        1.0
    } else {
        found.len() as f64 / expected_keywords.len() as f64
    };

    KeywordEvaluation {
        keyword_coverage,
        keywords_found: found,
        keywords_missing: missing,
        answer_length: answer.chars().count(),
    }
}

/// Extract the judge's JSON object and average its criterion scores
pub fn parse_judgement(response: &str) -> JudgeEvaluation {
    let Some(m) = JSON_OBJECT_RE.find(response) else {
        return JudgeEvaluation::Failed {
            error: "Could not parse JSON".to_string(),
            raw: Some(response.to_string()),
        };
    };

    let scores = match serde_json::from_str::<Value>(m.as_str()) {
        Ok(Value::Object(scores)) => scores,
        _ => {
            return JudgeEvaluation::Failed {
                error: "Invalid JSON response".to_string(),
                raw: Some(response.to_string()),
            };
        }
    };

    let values: Vec<f64> = JUDGE_CRITERIA
        .iter()
        .filter_map(|criterion| scores.get(*criterion).and_then(Value::as_f64))
        .collect();
    let overall = if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    };

    JudgeEvaluation::Scored { scores, overall }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut preview: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_coverage_is_case_insensitive() {
        let keywords = vec!["HARICA".to_string(), "renew".to_string(), "ACME".to_string()];
        let eval = keyword_quality("Request a certificate from harica and renew it yearly.", &keywords);
        assert!((eval.keyword_coverage - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(eval.keywords_missing, vec!["ACME"]);
        assert_eq!(keyword_quality("anything", &[]).keyword_coverage, 1.0);
    }

    #[test]
    fn judgement_is_parsed_from_surrounding_text() {
        let response = "Here is my evaluation:\n{\"correctness\": 5, \"completeness\": 4, \"relevance\": 5, \"clarity\": 4, \"groundedness\": 2, \"explanation\": \"ok\"}\nThanks";
        let judgement = parse_judgement(response);
        assert!((judgement.overall() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn judgement_without_json_fails() {
        assert!(matches!(parse_judgement("no scores here"), JudgeEvaluation::Failed { .. }));
        assert!(matches!(parse_judgement("{not json}"), JudgeEvaluation::Failed { .. }));
    }

    #[test]
    fn preview_truncates_by_chars() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("ab", 3), "ab");
    }
}
