use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::dataset::TestDataset;
use crate::storage::ChunkIndex;

/// Fraction of the top-k retrieved ids that are relevant
pub fn precision_at_k(retrieved: &[String], relevant: &[String], k: usize) -> f64 {
    let retrieved_k: HashSet<&String> = retrieved.iter().take(k).collect();
    if retrieved_k.is_empty() {
        return 0.0;
    }
    let relevant: HashSet<&String> = relevant.iter().collect();
    retrieved_k.intersection(&relevant).count() as f64 / retrieved_k.len() as f64
}

/// Fraction of the relevant ids found in the top k
pub fn recall_at_k(retrieved: &[String], relevant: &[String], k: usize) -> f64 {
    let relevant: HashSet<&String> = relevant.iter().collect();
    if relevant.is_empty() {
        return 0.0;
    }
    let retrieved_k: HashSet<&String> = retrieved.iter().take(k).collect();
    retrieved_k.intersection(&relevant).count() as f64 / relevant.len() as f64
}

/// Reciprocal rank of the first relevant id, 0 when none is retrieved
pub fn mean_reciprocal_rank(retrieved: &[String], relevant: &[String]) -> f64 {
    let relevant: HashSet<&String> = relevant.iter().collect();
    retrieved
        .iter()
        .position(|id| relevant.contains(id))
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

/// Normalised discounted cumulative gain over binary relevance
pub fn ndcg_at_k(retrieved: &[String], relevant: &[String], k: usize) -> f64 {
    let dcg = |gains: &[f64]| -> f64 {
        gains
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, gain)| gain / ((i + 2) as f64).log2())
            .sum()
    };

    let relevant: HashSet<&String> = relevant.iter().collect();
    let gains: Vec<f64> = retrieved
        .iter()
        .take(k)
        .map(|id| if relevant.contains(id) { 1.0 } else { 0.0 })
        .collect();
    let ideal = vec![1.0; relevant.len().min(k)];

    let idcg = dcg(&ideal);
    if idcg == 0.0 {
        return 0.0;
    }
    dcg(&gains) / idcg
}

/// Metrics for one evaluated query
#[derive(Debug, Clone, Serialize)]
pub struct QueryEvaluation {
    pub query: String,
    pub category: String,
    pub retrieved: usize,
    pub expected_count: usize,
    /// Metric name (`precision@3`, `mrr`, ...) to value
    pub metrics: BTreeMap<String, f64>,
    pub retrieved_ids: Vec<String>,
    pub expected_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    /// Summary statistics with population standard deviation
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Category to metric name to mean value
    pub by_category: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetEvaluation {
    pub individual_results: Vec<QueryEvaluation>,
    pub aggregated_metrics: AggregatedMetrics,
}

/// Scores the index's ranking against expected chunk ids
pub struct RetrievalEvaluator<'a> {
    index: &'a ChunkIndex,
}

impl<'a> RetrievalEvaluator<'a> {
    pub fn new(index: &'a ChunkIndex) -> Self {
        Self { index }
    }

    pub fn evaluate_query(&self, query: &str, expected_chunks: &[String], k_values: &[usize]) -> QueryEvaluation {
        let max_k = k_values.iter().copied().max().unwrap_or(5);
        let retrieved_ids: Vec<String> = self
            .index
            .search(query, max_k, None)
            .into_iter()
            .map(|hit| hit.id)
            .collect();

        let mut metrics = BTreeMap::new();
        for &k in k_values {
            metrics.insert(format!("precision@{k}"), precision_at_k(&retrieved_ids, expected_chunks, k));
            metrics.insert(format!("recall@{k}"), recall_at_k(&retrieved_ids, expected_chunks, k));
            metrics.insert(format!("ndcg@{k}"), ndcg_at_k(&retrieved_ids, expected_chunks, k));
        }
        metrics.insert("mrr".to_string(), mean_reciprocal_rank(&retrieved_ids, expected_chunks));

        QueryEvaluation {
            query: query.to_string(),
            category: String::new(),
            retrieved: retrieved_ids.len(),
            expected_count: expected_chunks.len(),
            metrics,
            retrieved_ids,
            expected_ids: expected_chunks.to_vec(),
        }
    }

    pub fn evaluate_dataset(&self, dataset: &TestDataset, k_values: &[usize]) -> DatasetEvaluation {
        let individual_results: Vec<QueryEvaluation> = dataset
            .test_cases
            .iter()
            .map(|case| {
                let mut result = self.evaluate_query(&case.question, &case.expected_chunks, k_values);
                result.category = case.category.clone();
                result
            })
            .collect();

        let aggregated_metrics = aggregate(&individual_results, k_values);
        DatasetEvaluation {
            individual_results,
            aggregated_metrics,
        }
    }
}

/// Metric names in report order
pub fn metric_names(k_values: &[usize]) -> Vec<String> {
    ["precision", "recall", "ndcg"]
        .iter()
        .flat_map(|name| k_values.iter().map(move |k| format!("{name}@{k}")))
        .chain(std::iter::once("mrr".to_string()))
        .collect()
}

fn aggregate(results: &[QueryEvaluation], k_values: &[usize]) -> AggregatedMetrics {
    let names = metric_names(k_values);
    let values_of = |results: &[&QueryEvaluation], name: &str| -> Vec<f64> {
        results.iter().filter_map(|r| r.metrics.get(name).copied()).collect()
    };

    let all: Vec<&QueryEvaluation> = results.iter().collect();
    let metrics = names
        .iter()
        .map(|name| (name.clone(), MetricSummary::from_values(&values_of(&all, name))))
        .collect();

    let categories: BTreeSet<&str> = results.iter().map(|r| r.category.as_str()).collect();
    let by_category = categories
        .into_iter()
        .map(|category| {
            let members: Vec<&QueryEvaluation> = results.iter().filter(|r| r.category == category).collect();
            let means = names
                .iter()
                .map(|name| (name.clone(), MetricSummary::from_values(&values_of(&members, name)).mean))
                .collect();
            (category.to_string(), means)
        })
        .collect();

    AggregatedMetrics { metrics, by_category }
}
