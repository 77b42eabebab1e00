// 🏷️ Registry Enricher - left join against the operator registry
//
// Every record comes out the other side, matched or not. Name precedence:
// registry legal name → name printed in the extract → placeholder.

use crate::config::EnrichmentConfig;
use crate::normalizer::CanonicalExpenseRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

// ============================================================================
// REGISTRY ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRow {
    pub entity_id: String,
    pub legal_name: String,
    pub region: String,
    pub modality: String,
    /// Tax identifier (CNPJ). Never used as a join key.
    #[serde(default)]
    pub tax_id: Option<String>,
}

impl RegistryRow {
    pub fn new(entity_id: &str, legal_name: &str, region: &str, modality: &str) -> Self {
        RegistryRow {
            entity_id: entity_id.trim().to_string(),
            legal_name: legal_name.trim().to_string(),
            region: region.trim().to_string(),
            modality: modality.trim().to_string(),
            tax_id: None,
        }
    }

    pub fn with_tax_id(mut self, tax_id: &str) -> Self {
        self.tax_id = Some(tax_id.trim().to_string()).filter(|s| !s.is_empty());
        self
    }
}

// ============================================================================
// ENRICHED RECORD
// ============================================================================

/// Canonical record plus the resolved display name and region.
///
/// Serialized field set: the canonical fields followed by `name` and `region`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub entity_id: Option<String>,
    pub period_year: String,
    pub period_quarter: String,
    pub amount: f64,
    pub raw_name: Option<String>,
    pub name: String,
    pub region: String,

    #[serde(skip)]
    pub modality: Option<String>,
    #[serde(skip)]
    pub tax_id: Option<String>,
    #[serde(skip)]
    pub matched: bool,
}

impl EnrichedRecord {
    fn from_parts(
        record: &CanonicalExpenseRecord,
        registry: Option<&RegistryRow>,
        config: &EnrichmentConfig,
    ) -> Self {
        let name = registry
            .map(|r| r.legal_name.as_str())
            .filter(|n| !n.trim().is_empty())
            .or_else(|| record.raw_name.as_deref().filter(|n| !n.trim().is_empty()))
            .unwrap_or(config.unknown_name.as_str())
            .to_string();

        let region = registry
            .map(|r| r.region.clone())
            .unwrap_or_else(|| config.unknown_region.clone());

        EnrichedRecord {
            entity_id: record.entity_id.clone(),
            period_year: record.period_year.clone(),
            period_quarter: record.period_quarter.clone(),
            amount: record.amount,
            raw_name: record.raw_name.clone(),
            name,
            region,
            modality: registry
                .map(|r| r.modality.clone())
                .filter(|m| !m.is_empty()),
            tax_id: registry.and_then(|r| r.tax_id.clone()),
            matched: registry.is_some(),
        }
    }
}

// ============================================================================
// ENRICHER
// ============================================================================

pub struct RegistryEnricher {
    config: EnrichmentConfig,
}

impl RegistryEnricher {
    pub fn new() -> Self {
        RegistryEnricher {
            config: EnrichmentConfig::default(),
        }
    }

    pub fn with_config(config: EnrichmentConfig) -> Self {
        RegistryEnricher { config }
    }

    /// Left outer join on `entity_id`. Output length and order match input.
    ///
    /// `registry = None` means the registry could not be obtained: the join
    /// is skipped and every record gets the unknown region.
    pub fn enrich(
        &self,
        records: &[CanonicalExpenseRecord],
        registry: Option<&[RegistryRow]>,
    ) -> Vec<EnrichedRecord> {
        let Some(rows) = registry else {
            warn!(records = records.len(), "registry unavailable, skipping join");
            return records
                .iter()
                .map(|r| EnrichedRecord::from_parts(r, None, &self.config))
                .collect();
        };

        let index = build_index(rows);

        let enriched: Vec<EnrichedRecord> = records
            .iter()
            .map(|record| {
                let matched = record
                    .entity_id
                    .as_deref()
                    .and_then(|id| index.get(id.trim()).copied());
                EnrichedRecord::from_parts(record, matched, &self.config)
            })
            .collect();

        let matched = enriched.iter().filter(|r| r.matched).count();
        info!(
            records = enriched.len(),
            matched,
            unmatched = enriched.len() - matched,
            "enriched records against registry"
        );

        enriched
    }
}

impl Default for RegistryEnricher {
    fn default() -> Self {
        Self::new()
    }
}

/// First row per identifier wins
fn build_index(rows: &[RegistryRow]) -> HashMap<&str, &RegistryRow> {
    let mut index: HashMap<&str, &RegistryRow> = HashMap::with_capacity(rows.len());
    for row in rows {
        let key = row.entity_id.trim();
        if key.is_empty() {
            continue;
        }
        if index.contains_key(key) {
            debug!(entity_id = key, "duplicate registry entry ignored");
            continue;
        }
        index.insert(key, row);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, amount: f64) -> CanonicalExpenseRecord {
        CanonicalExpenseRecord::new(id, "2023", "3T", amount)
    }

    fn registry() -> Vec<RegistryRow> {
        vec![
            RegistryRow::new("111", "ACME SAUDE LTDA", "SP", "Medicina de Grupo").with_tax_id("12345678000199"),
            RegistryRow::new("222", "", "RJ", "Cooperativa Médica"),
            RegistryRow::new("111", "SHADOWED DUPLICATE", "MG", ""),
        ]
    }

    #[test]
    fn test_left_join_preserves_cardinality() {
        let records = vec![record("111", 1.0), record("999", 2.0), record("222", 3.0), record("", 4.0)];
        let enriched = RegistryEnricher::new().enrich(&records, Some(registry().as_slice()));

        assert_eq!(enriched.len(), records.len());
        assert_eq!(enriched[1].region, "unknown");
        assert_eq!(enriched[3].region, "unknown");
        assert!(!enriched[1].matched);
        assert_eq!(enriched.iter().map(|r| r.amount).sum::<f64>(), 10.0);
    }

    #[test]
    fn test_registry_name_preferred() {
        let records = vec![record("111", 1.0).with_raw_name("ACME")];
        let enriched = RegistryEnricher::new().enrich(&records, Some(registry().as_slice()));

        assert_eq!(enriched[0].name, "ACME SAUDE LTDA");
        assert_eq!(enriched[0].region, "SP");
        assert_eq!(enriched[0].modality.as_deref(), Some("Medicina de Grupo"));
        assert_eq!(enriched[0].tax_id.as_deref(), Some("12345678000199"));
    }

    #[test]
    fn test_empty_registry_name_falls_back_to_raw_name() {
        let records = vec![record("222", 1.0).with_raw_name("COOP XYZ"), record("222", 1.0)];
        let enriched = RegistryEnricher::new().enrich(&records, Some(registry().as_slice()));

        assert_eq!(enriched[0].name, "COOP XYZ");
        assert_eq!(enriched[0].region, "RJ");
        assert_eq!(enriched[1].name, "DESCONHECIDO");
    }

    #[test]
    fn test_unmatched_keeps_raw_name() {
        let records = vec![record("999", 1.0).with_raw_name("OPERADORA X")];
        let enriched = RegistryEnricher::new().enrich(&records, Some(registry().as_slice()));

        assert_eq!(enriched[0].name, "OPERADORA X");
        assert_eq!(enriched[0].region, "unknown");
    }

    #[test]
    fn test_registry_unavailable_degrades() {
        let records = vec![record("111", 1.0).with_raw_name("ACME"), record("222", 2.0)];
        let enriched = RegistryEnricher::new().enrich(&records, None);

        assert_eq!(enriched.len(), 2);
        assert!(enriched.iter().all(|r| r.region == "unknown" && !r.matched));
        assert_eq!(enriched[0].name, "ACME");
        assert_eq!(enriched[1].name, "DESCONHECIDO");
    }

    #[test]
    fn test_first_duplicate_wins() {
        let enriched = RegistryEnricher::new().enrich(&[record("111", 1.0)], Some(registry().as_slice()));
        assert_eq!(enriched[0].region, "SP");
    }

    #[test]
    fn test_join_key_trimmed() {
        let enriched = RegistryEnricher::new().enrich(&[record(" 111 ", 1.0)], Some(registry().as_slice()));
        assert!(enriched[0].matched);
    }

    #[test]
    fn test_custom_sentinels() {
        let enricher = RegistryEnricher::with_config(EnrichmentConfig {
            unknown_region: "NI".to_string(),
            unknown_name: "N/A".to_string(),
        });
        let enriched = enricher.enrich(&[record("999", 1.0)], Some(&[][..]));
        assert_eq!(enriched[0].region, "NI");
        assert_eq!(enriched[0].name, "N/A");
    }
}
