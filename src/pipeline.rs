// 🚰 Pipeline Orchestrator
//
// periods → fetch extract → normalize → accumulate → enrich once →
// aggregate once → persist. A bad period is skipped, never fatal. Only a run
// with zero surviving records fails.

use crate::aggregation::{aggregate, AggregatedStat};
use crate::config::PipelineConfig;
use crate::enrichment::{EnrichedRecord, RegistryEnricher, RegistryRow};
use crate::error::{PipelineError, Result};
use crate::normalizer::{CanonicalExpenseRecord, ExtractNormalizer};
use crate::table::RawTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

// ============================================================================
// COLLABORATOR CONTRACTS
// ============================================================================

/// One reporting period and where its extract lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodDescriptor {
    pub year: String,
    pub quarter: String,
    pub locator: String,
}

impl PeriodDescriptor {
    pub fn new(year: &str, quarter: &str, locator: &str) -> Self {
        PeriodDescriptor {
            year: year.to_string(),
            quarter: quarter.to_string(),
            locator: locator.to_string(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.year, self.quarter)
    }
}

/// Produces the raw table for one period. May fail transiently.
pub trait RawExtractProvider {
    fn fetch(&self, locator: &str) -> Result<RawTable>;
}

/// Produces the entity registry
pub trait RegistryProvider {
    fn fetch(&self) -> Result<Vec<RegistryRow>>;
}

/// Receives the two finished datasets
pub trait PersistenceSink {
    fn write_consolidated(&mut self, records: &[EnrichedRecord]) -> Result<()>;
    fn write_aggregated(&mut self, stats: &[AggregatedStat]) -> Result<()>;
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodStatus {
    Loaded { records: usize },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub year: String,
    pub quarter: String,
    #[serde(flatten)]
    pub status: PeriodStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub periods: Vec<PeriodOutcome>,
    pub records: usize,
    /// Records dropped by the positive-amount rule
    pub non_positive_dropped: usize,
    pub registry_available: bool,
    pub enriched_matched: usize,
    pub groups: usize,
}

impl RunReport {
    fn start() -> Self {
        RunReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            periods: Vec::new(),
            records: 0,
            non_positive_dropped: 0,
            registry_available: false,
            enriched_matched: 0,
            groups: 0,
        }
    }

    pub fn loaded_periods(&self) -> usize {
        self.periods
            .iter()
            .filter(|p| matches!(p.status, PeriodStatus::Loaded { .. }))
            .count()
    }

    pub fn skipped_periods(&self) -> usize {
        self.periods.len() - self.loaded_periods()
    }

    pub fn summary(&self) -> String {
        format!(
            "Run {}: {} periods loaded, {} skipped, {} records, {} matched in registry, {} groups",
            self.run_id,
            self.loaded_periods(),
            self.skipped_periods(),
            self.records,
            self.enriched_matched,
            self.groups
        )
    }
}

/// Both datasets of a successful run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub consolidated: Vec<EnrichedRecord>,
    pub aggregated: Vec<AggregatedStat>,
    pub report: RunReport,
}

impl PipelineOutput {
    pub fn persist(&self, sink: &mut dyn PersistenceSink) -> Result<()> {
        sink.write_consolidated(&self.consolidated)?;
        sink.write_aggregated(&self.aggregated)?;
        Ok(())
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline<'a> {
    config: PipelineConfig,
    normalizer: ExtractNormalizer,
    enricher: RegistryEnricher,
    extracts: &'a dyn RawExtractProvider,
    registry: Option<&'a dyn RegistryProvider>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        extracts: &'a dyn RawExtractProvider,
        registry: Option<&'a dyn RegistryProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let normalizer = ExtractNormalizer::from_config(&config)?;
        let enricher = RegistryEnricher::with_config(config.enrichment.clone());
        Ok(Pipeline {
            config,
            normalizer,
            enricher,
            extracts,
            registry,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all periods in the given order and compute both datasets
    pub fn run(&self, periods: &[PeriodDescriptor]) -> Result<PipelineOutput> {
        let mut report = RunReport::start();
        info!(run_id = %report.run_id, periods = periods.len(), "starting pipeline run");

        let mut accumulator: Vec<CanonicalExpenseRecord> = Vec::new();

        for period in periods {
            let span = info_span!("period", year = %period.year, quarter = %period.quarter);
            let _enter = span.enter();

            let status = match self.load_period(period) {
                Ok(records) => {
                    let count = records.len();
                    accumulator.extend(records);
                    PeriodStatus::Loaded { records: count }
                }
                Err(e) => {
                    warn!(locator = %period.locator, error = %e, "skipping period");
                    PeriodStatus::Skipped {
                        reason: e.to_string(),
                    }
                }
            };

            report.periods.push(PeriodOutcome {
                year: period.year.clone(),
                quarter: period.quarter.clone(),
                status,
            });
        }

        if self.config.validation.positive_only {
            let before = accumulator.len();
            accumulator.retain(|r| r.amount > 0.0);
            report.non_positive_dropped = before - accumulator.len();
            if report.non_positive_dropped > 0 {
                info!(dropped = report.non_positive_dropped, "dropped non-positive amounts");
            }
        }

        if accumulator.is_empty() {
            error!("no records survived across all periods");
            return Err(PipelineError::AggregationEmpty);
        }
        report.records = accumulator.len();

        let registry = self.fetch_registry();
        report.registry_available = registry.is_some();

        let consolidated = self.enricher.enrich(&accumulator, registry.as_deref());
        report.enriched_matched = consolidated.iter().filter(|r| r.matched).count();

        let aggregated = aggregate(&consolidated)?;
        report.groups = aggregated.len();
        report.finished_at = Some(Utc::now());

        info!("{}", report.summary());

        Ok(PipelineOutput {
            consolidated,
            aggregated,
            report,
        })
    }

    /// Run, then hand both datasets to the sink. Nothing is written if the
    /// run fails.
    pub fn run_and_persist(
        &self,
        periods: &[PeriodDescriptor],
        sink: &mut dyn PersistenceSink,
    ) -> Result<PipelineOutput> {
        let output = self.run(periods)?;
        output.persist(sink)?;
        Ok(output)
    }

    fn load_period(&self, period: &PeriodDescriptor) -> Result<Vec<CanonicalExpenseRecord>> {
        let table = self.extracts.fetch(&period.locator)?;
        self.normalizer
            .try_normalize(&table, &period.year, &period.quarter)
    }

    fn fetch_registry(&self) -> Option<Vec<RegistryRow>> {
        let provider = self.registry?;
        match provider.fetch() {
            Ok(rows) => {
                info!(entries = rows.len(), "loaded registry");
                Some(rows)
            }
            Err(e) => {
                let err = match e {
                    PipelineError::RegistryUnavailable(_) => e,
                    other => PipelineError::RegistryUnavailable(other.to_string()),
                };
                warn!(error = %err, "continuing without registry");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Extracts keyed by locator; missing locators fail like a dead link
    struct MemoryExtracts {
        tables: HashMap<String, String>,
    }

    impl MemoryExtracts {
        fn new(entries: &[(&str, &str)]) -> Self {
            MemoryExtracts {
                tables: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl RawExtractProvider for MemoryExtracts {
        fn fetch(&self, locator: &str) -> Result<RawTable> {
            let text = self
                .tables
                .get(locator)
                .ok_or_else(|| PipelineError::fetch(locator, "404 Not Found"))?;
            RawTable::parse(text)
        }
    }

    struct MemoryRegistry(Vec<RegistryRow>);

    impl RegistryProvider for MemoryRegistry {
        fn fetch(&self) -> Result<Vec<RegistryRow>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenRegistry;

    impl RegistryProvider for BrokenRegistry {
        fn fetch(&self) -> Result<Vec<RegistryRow>> {
            Err(PipelineError::fetch("Relatorio_cadop.csv", "connection refused"))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        consolidated: Vec<EnrichedRecord>,
        aggregated: Vec<AggregatedStat>,
        writes: usize,
    }

    impl PersistenceSink for RecordingSink {
        fn write_consolidated(&mut self, records: &[EnrichedRecord]) -> Result<()> {
            self.consolidated = records.to_vec();
            self.writes += 1;
            Ok(())
        }

        fn write_aggregated(&mut self, stats: &[AggregatedStat]) -> Result<()> {
            self.aggregated = stats.to_vec();
            self.writes += 1;
            Ok(())
        }
    }

    const HEADER: &str = "REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_FINAL\n";

    fn extract(rows: &[&str]) -> String {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_end_to_end_two_periods() {
        let q2 = extract(&["111;411;EVENTOS;100,00"]);
        let q1 = extract(&["111;411;EVENTOS;300,00", "111;311;RECEITAS;999,00"]);
        let extracts = MemoryExtracts::new(&[("q2", q2.as_str()), ("q1", q1.as_str())]);
        let registry = MemoryRegistry(vec![RegistryRow::new("111", "Acme", "SP", "Seguradora")]);

        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, Some(&registry)).unwrap();
        let periods = vec![
            PeriodDescriptor::new("2023", "2T", "q2"),
            PeriodDescriptor::new("2023", "1T", "q1"),
        ];
        let output = pipeline.run(&periods).unwrap();

        assert_eq!(output.consolidated.len(), 2);
        assert_eq!(output.consolidated[0].period_quarter, "2T");
        assert_eq!(output.consolidated[1].period_quarter, "1T");

        assert_eq!(output.aggregated.len(), 1);
        let stat = &output.aggregated[0];
        assert_eq!(stat.name, "Acme");
        assert_eq!(stat.region, "SP");
        assert_eq!(stat.total, 400.0);
        assert_eq!(stat.mean, 200.0);
        assert!((stat.stddev - 141.42).abs() < 0.01);

        assert_eq!(output.report.loaded_periods(), 2);
        assert!(output.report.registry_available);
        assert_eq!(output.report.enriched_matched, 2);
    }

    #[test]
    fn test_failed_period_is_skipped() {
        let p2 = extract(&["X;411;EVENTOS;100,00"]);
        let extracts = MemoryExtracts::new(&[("p2", p2.as_str())]);

        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, None).unwrap();
        let periods = vec![
            PeriodDescriptor::new("2024", "1T", "p1-missing"),
            PeriodDescriptor::new("2023", "4T", "p2"),
        ];
        let output = pipeline.run(&periods).unwrap();

        assert_eq!(output.aggregated.len(), 1);
        assert_eq!(output.aggregated[0].total, 100.0);
        assert_eq!(output.aggregated[0].region, "unknown");
        assert_eq!(output.report.skipped_periods(), 1);
        assert!(matches!(
            output.report.periods[0].status,
            PeriodStatus::Skipped { .. }
        ));
    }

    #[test]
    fn test_unusable_table_is_skipped() {
        let good = extract(&["111;411;EVENTOS;1,00"]);
        let extracts = MemoryExtracts::new(&[("bad", "FOO;BAR\n1;2\n"), ("good", good.as_str())]);

        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, None).unwrap();
        let output = pipeline
            .run(&[
                PeriodDescriptor::new("2023", "2T", "bad"),
                PeriodDescriptor::new("2023", "1T", "good"),
            ])
            .unwrap();

        assert_eq!(output.report.skipped_periods(), 1);
        assert_eq!(output.consolidated.len(), 1);
    }

    #[test]
    fn test_no_records_fails_and_writes_nothing() {
        let extracts = MemoryExtracts::new(&[("empty", HEADER)]);
        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, None).unwrap();
        let mut sink = RecordingSink::default();

        let result = pipeline.run_and_persist(
            &[
                PeriodDescriptor::new("2023", "3T", "missing"),
                PeriodDescriptor::new("2023", "2T", "empty"),
            ],
            &mut sink,
        );

        assert!(matches!(result, Err(PipelineError::AggregationEmpty)));
        assert_eq!(sink.writes, 0);
    }

    #[test]
    fn test_zero_periods_fails() {
        let extracts = MemoryExtracts::new(&[]);
        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, None).unwrap();
        assert!(matches!(pipeline.run(&[]), Err(PipelineError::AggregationEmpty)));
    }

    #[test]
    fn test_registry_failure_degrades() {
        let q = extract(&["111;411;EVENTOS;10,00"]);
        let extracts = MemoryExtracts::new(&[("q", q.as_str())]);
        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, Some(&BrokenRegistry)).unwrap();

        let output = pipeline.run(&[PeriodDescriptor::new("2023", "1T", "q")]).unwrap();

        assert!(!output.report.registry_available);
        assert_eq!(output.consolidated[0].region, "unknown");
        assert_eq!(output.consolidated[0].name, "DESCONHECIDO");
    }

    #[test]
    fn test_positive_only_validation() {
        let q = extract(&["111;411;EVENTOS;10,00", "222;411;EVENTOS;0,00", "333;411;EVENTOS;-5,00"]);
        let extracts = MemoryExtracts::new(&[("q", q.as_str())]);
        let mut config = PipelineConfig::default();
        config.validation.positive_only = true;

        let pipeline = Pipeline::new(config, &extracts, None).unwrap();
        let output = pipeline.run(&[PeriodDescriptor::new("2023", "1T", "q")]).unwrap();

        assert_eq!(output.consolidated.len(), 1);
        assert_eq!(output.report.non_positive_dropped, 2);
    }

    #[test]
    fn test_persist_writes_both_datasets() {
        let q = extract(&["111;411;EVENTOS;10,00", "222;411;EVENTOS;20,00"]);
        let extracts = MemoryExtracts::new(&[("q", q.as_str())]);
        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, None).unwrap();
        let mut sink = RecordingSink::default();

        pipeline
            .run_and_persist(&[PeriodDescriptor::new("2023", "1T", "q")], &mut sink)
            .unwrap();

        assert_eq!(sink.writes, 2);
        assert_eq!(sink.consolidated.len(), 2);
        // Both unmatched records share the placeholder name and region
        assert_eq!(sink.aggregated.len(), 1);
        assert_eq!(sink.aggregated[0].total, 30.0);
    }

    #[test]
    fn test_report_serializes() {
        let q = extract(&["111;411;EVENTOS;10,00"]);
        let extracts = MemoryExtracts::new(&[("q", q.as_str())]);
        let pipeline = Pipeline::new(PipelineConfig::default(), &extracts, None).unwrap();
        let output = pipeline
            .run(&[
                PeriodDescriptor::new("2023", "2T", "gone"),
                PeriodDescriptor::new("2023", "1T", "q"),
            ])
            .unwrap();

        let json = serde_json::to_value(&output.report).unwrap();
        assert_eq!(json["periods"][0]["status"], "skipped");
        assert_eq!(json["periods"][1]["status"], "loaded");
        assert_eq!(json["periods"][1]["records"], 1);
    }
}
