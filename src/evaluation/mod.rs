//! Retrieval and answer-quality evaluation of the documentation index.

mod answer;
mod dataset;
mod metrics;
mod performance;
mod report;

pub use answer::{
    keyword_quality, parse_judgement, AnswerEvaluator, AnthropicClient, JudgeEvaluation, KeywordEvaluation,
    RagAnswer, RetrievedChunk, DEFAULT_MODEL,
};
pub use dataset::{TestCase, TestDataset};
pub use metrics::{
    mean_reciprocal_rank, metric_names, ndcg_at_k, precision_at_k, recall_at_k, AggregatedMetrics,
    DatasetEvaluation, MetricSummary, QueryEvaluation, RetrievalEvaluator,
};
pub use performance::{CallMetric, LatencyStats, PerformanceMonitor, PerformanceStats};
pub use report::{render_html_report, run_full_evaluation, AnswerEvaluation, EvaluationSummary};
