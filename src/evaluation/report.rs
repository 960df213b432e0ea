use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use super::answer::{keyword_quality, AnswerEvaluator, AnthropicClient, JudgeEvaluation, KeywordEvaluation, RetrievedChunk};
use super::dataset::TestDataset;
use super::metrics::{DatasetEvaluation, RetrievalEvaluator};
use super::performance::{PerformanceMonitor, PerformanceStats};
use crate::storage::ChunkIndex;

const K_VALUES: &[usize] = &[1, 3, 5];
const REPORTED_METRICS: &[&str] = &["precision@3", "recall@3", "ndcg@3", "mrr"];
const SEARCH_RESULTS: usize = 5;
const CONTEXT_RESULTS: usize = 3;

/// End-to-end result for one test question
#[derive(Debug, Clone, Serialize)]
pub struct AnswerEvaluation {
    pub question: String,
    pub category: String,
    pub answer: Option<String>,
    pub keyword_evaluation: KeywordEvaluation,
    pub llm_judge: JudgeEvaluation,
    pub retrieved_chunks: Vec<RetrievedChunk>,
}

/// What an evaluation run produced
#[derive(Debug)]
pub struct EvaluationSummary {
    pub retrieval: DatasetEvaluation,
    pub answers: Option<Vec<AnswerEvaluation>>,
    pub performance: Option<PerformanceStats>,
    pub files: Vec<PathBuf>,
}

/// Run retrieval, optional answer, and latency evaluation, writing results to `output_dir`
pub async fn run_full_evaluation(
    index: &ChunkIndex,
    dataset: &TestDataset,
    output_dir: &Path,
    client: Option<AnthropicClient>,
) -> Result<EvaluationSummary> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let mut files = Vec::new();

    tracing::info!("Evaluating retrieval quality over {} queries", dataset.test_cases.len());
    let retrieval = RetrievalEvaluator::new(index).evaluate_dataset(dataset, K_VALUES);
    files.push(write_json(output_dir, "retrieval_metrics.json", &retrieval)?);

    let answers = match client {
        Some(client) => {
            tracing::info!("Evaluating end-to-end answer quality");
            let evaluator = AnswerEvaluator::new(index, Some(client));
            let mut answers = Vec::with_capacity(dataset.test_cases.len());

            for case in &dataset.test_cases {
                tracing::info!("Processing: {}", case.question);
                let rag = evaluator.rag_answer(&case.question, CONTEXT_RESULTS).await?;
                let answer_text = rag.answer.clone().unwrap_or_default();
                let keyword_evaluation = keyword_quality(&answer_text, &case.expected_answer_keywords);
                let llm_judge = evaluator.judge(&case.question, &answer_text, &rag.context).await;

                answers.push(AnswerEvaluation {
                    question: case.question.clone(),
                    category: case.category.clone(),
                    answer: rag.answer,
                    keyword_evaluation,
                    llm_judge,
                    retrieved_chunks: rag.retrieved_chunks,
                });
            }

            files.push(write_json(output_dir, "e2e_evaluation.json", &answers)?);
            Some(answers)
        }
        None => {
            tracing::info!("Skipping end-to-end evaluation, no API key provided");
            None
        }
    };

    let mut monitor = PerformanceMonitor::new();
    for case in &dataset.test_cases {
        monitor.measure("search", || index.search(&case.question, SEARCH_RESULTS, None));
    }
    let performance = monitor.statistics();
    let performance_path = output_dir.join("performance_metrics.json");
    monitor.save(&performance_path)?;
    files.push(performance_path);

    let html = render_html_report(&retrieval, answers.as_deref(), performance.as_ref());
    let report_path = output_dir.join("evaluation_report.html");
    fs::write(&report_path, html).with_context(|| format!("failed to write {}", report_path.display()))?;
    files.push(report_path);

    Ok(EvaluationSummary {
        retrieval,
        answers,
        performance,
        files,
    })
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Self-contained HTML page summarising an evaluation
pub fn render_html_report(
    retrieval: &DatasetEvaluation,
    answers: Option<&[AnswerEvaluation]>,
    performance: Option<&PerformanceStats>,
) -> String {
    let mut html = String::from(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>RAG Evaluation Report</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        h1 { color: #333; }
        h2 { color: #666; margin-top: 30px; }
        table { border-collapse: collapse; width: 100%; margin: 20px 0; }
        th, td { border: 1px solid #ddd; padding: 12px; text-align: left; }
        th { background-color: #4CAF50; color: white; }
    </style>
</head>
<body>
    <h1>RAG System Evaluation Report</h1>

    <h2>1. Retrieval Metrics</h2>
    <table>
        <tr><th>Metric</th><th>Mean</th><th>Std Dev</th><th>Min</th><th>Max</th></tr>
"#,
    );

    for name in REPORTED_METRICS {
        if let Some(summary) = retrieval.aggregated_metrics.metrics.get(*name) {
            let _ = writeln!(
                html,
                "        <tr><td>{name}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td></tr>",
                summary.mean, summary.std, summary.min, summary.max
            );
        }
    }
    html.push_str("    </table>\n\n    <h2>2. Performance Metrics</h2>\n    <table>\n        <tr><th>Metric</th><th>Value</th></tr>\n");

    match performance {
        Some(stats) => {
            let _ = writeln!(html, "        <tr><td>Total Queries</td><td>{}</td></tr>", stats.total_calls);
            let _ = writeln!(html, "        <tr><td>Avg Latency</td><td>{:.1}ms</td></tr>", stats.latency.mean * 1000.0);
            let _ = writeln!(html, "        <tr><td>P95 Latency</td><td>{:.1}ms</td></tr>", stats.latency.p95 * 1000.0);
            let _ = writeln!(html, "        <tr><td>Max Latency</td><td>{:.1}ms</td></tr>", stats.latency.max * 1000.0);
        }
        None => html.push_str("        <tr><td>Total Queries</td><td>0</td></tr>\n"),
    }
    html.push_str("    </table>\n");

    if let Some(answers) = answers.filter(|a| !a.is_empty()) {
        html.push_str("\n    <h2>3. Answer Quality</h2>\n    <table>\n        <tr><th>Question</th><th>Keyword Coverage</th><th>LLM Judge Score</th></tr>\n");
        for answer in answers {
            let question: String = answer.question.chars().take(80).collect();
            let _ = writeln!(
                html,
                "        <tr><td>{}</td><td>{:.1}%</td><td>{:.1}/5.0</td></tr>",
                escape_html(&question),
                answer.keyword_evaluation.keyword_coverage * 100.0,
                answer.llm_judge.overall()
            );
        }
        html.push_str("    </table>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}
