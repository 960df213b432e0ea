use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A question with the chunks a good retriever should return for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub question: String,
    pub expected_chunks: Vec<String>,
    #[serde(default, alias = "expected_keywords")]
    pub expected_answer_keywords: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "general".to_string()
}

/// Questions used to evaluate retrieval and answers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestDataset {
    pub test_cases: Vec<TestCase>,
}

impl TestDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_test_case(
        &mut self,
        question: &str,
        expected_chunks: &[&str],
        expected_answer_keywords: &[&str],
        category: Option<&str>,
    ) {
        self.test_cases.push(TestCase {
            question: question.to_string(),
            expected_chunks: expected_chunks.iter().map(|s| s.to_string()).collect(),
            expected_answer_keywords: expected_answer_keywords.iter().map(|s| s.to_string()).collect(),
            category: category.map(str::to_string).unwrap_or_else(default_category),
        });
    }

    /// Write the test cases as a JSON array
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.test_cases)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let test_cases = serde_json::from_str(&raw)
            .with_context(|| format!("invalid test dataset {}", path.display()))?;
        Ok(Self { test_cases })
    }

    /// Starter dataset covering SSL certificate renewal
    pub fn sample() -> Self {
        let mut dataset = Self::new();
        dataset.add_test_case(
            "How do I renew SSL certificates?",
            &[
                "infrastructure_ssl_certificates_6",
                "infrastructure_ssl_certificates_0",
                "infrastructure_ssl_certificates_3",
            ],
            &["SSL/TLS", "renew", "HARICA", "certificate"],
            Some("certificates"),
        );
        dataset
    }
}
