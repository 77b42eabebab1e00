// 📊 Aggregator - per (name, region) statistics across periods
//
// total, mean and sample standard deviation (n-1) of the record amounts.
// Output order: total descending, then name, then region.

use crate::enrichment::EnrichedRecord;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStat {
    pub name: String,
    pub region: String,
    pub total: f64,
    pub mean: f64,
    pub stddev: f64,

    /// Records in the group
    #[serde(skip)]
    pub count: usize,
}

impl AggregatedStat {
    fn from_amounts(name: String, region: String, amounts: &[f64]) -> Self {
        let n = amounts.len();
        // + 0.0 folds -0.0 into 0.0 so equal totals compare equal
        let total: f64 = amounts.iter().sum::<f64>() + 0.0;
        let mean = total / n as f64 + 0.0;

        let stddev = if n < 2 {
            0.0
        } else {
            let squared: f64 = amounts.iter().map(|a| (a - mean).powi(2)).sum();
            (squared / (n - 1) as f64).sqrt()
        };

        AggregatedStat {
            name,
            region,
            total,
            mean,
            stddev,
            count: n,
        }
    }
}

/// Group by (name, region) and compute statistics.
///
/// Fails with `AggregationEmpty` when there is nothing to aggregate.
pub fn aggregate(records: &[EnrichedRecord]) -> Result<Vec<AggregatedStat>> {
    if records.is_empty() {
        return Err(PipelineError::AggregationEmpty);
    }

    let mut groups: HashMap<(&str, &str), Vec<f64>> = HashMap::new();
    for record in records {
        groups
            .entry((record.name.as_str(), record.region.as_str()))
            .or_default()
            .push(record.amount);
    }

    let mut stats: Vec<AggregatedStat> = groups
        .into_iter()
        .map(|((name, region), amounts)| {
            AggregatedStat::from_amounts(name.to_string(), region.to_string(), &amounts)
        })
        .collect();

    stats.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.region.cmp(&b.region))
    });

    Ok(stats)
}
