// 🔄 Extract Normalizer
// One raw extract + one period → canonical expense records.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::parser::{filter_and_parse, AmountSource, FilterPolicy};
use crate::schema::{resolve, Role};
use crate::table::RawTable;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// CANONICAL RECORD
// ============================================================================

/// One expense line, tagged with its reporting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalExpenseRecord {
    /// None when the extract has no identifier column or the cell is blank
    pub entity_id: Option<String>,
    pub period_year: String,
    pub period_quarter: String,
    pub amount: f64,
    pub raw_name: Option<String>,

    #[serde(skip, default = "default_amount_source")]
    pub amount_source: AmountSource,
}

fn default_amount_source() -> AmountSource {
    AmountSource::Parsed
}

impl CanonicalExpenseRecord {
    pub fn new(entity_id: &str, year: &str, quarter: &str, amount: f64) -> Self {
        CanonicalExpenseRecord {
            entity_id: Some(entity_id.to_string()).filter(|s| !s.is_empty()),
            period_year: year.to_string(),
            period_quarter: quarter.to_string(),
            amount,
            raw_name: None,
            amount_source: AmountSource::Parsed,
        }
    }

    /// Builder pattern: add the name printed in the extract
    pub fn with_raw_name(mut self, name: &str) -> Self {
        self.raw_name = Some(name.to_string()).filter(|s| !s.trim().is_empty());
        self
    }

    pub fn had_value(&self) -> bool {
        self.amount_source == AmountSource::Parsed
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct ExtractNormalizer {
    policy: FilterPolicy,
    primary: &'static Encoding,
    fallback: &'static Encoding,
}

impl ExtractNormalizer {
    pub fn new() -> Self {
        ExtractNormalizer {
            policy: FilterPolicy::default(),
            primary: encoding_rs::UTF_8,
            fallback: encoding_rs::WINDOWS_1252,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let (primary, fallback) = config.decoding.encodings()?;
        Ok(ExtractNormalizer {
            policy: FilterPolicy::from(&config.filter),
            primary,
            fallback,
        })
    }

    /// Decode extract bytes with the configured primary/fallback encodings
    pub fn decode(&self, bytes: &[u8]) -> Result<RawTable> {
        RawTable::decode(bytes, self.primary, self.fallback)
    }

    /// Normalize, treating an unusable table as "no records"
    pub fn normalize(&self, table: &RawTable, year: &str, quarter: &str) -> Vec<CanonicalExpenseRecord> {
        match self.try_normalize(table, year, quarter) {
            Ok(records) => records,
            Err(e) => {
                warn!(year, quarter, error = %e, "extract yielded no records");
                Vec::new()
            }
        }
    }

    /// Normalize, reporting an unusable table shape as `SchemaInference`.
    ///
    /// A table is unusable when neither an identifier nor a value column can
    /// be found. Zero surviving rows is not an error.
    pub fn try_normalize(
        &self,
        table: &RawTable,
        year: &str,
        quarter: &str,
    ) -> Result<Vec<CanonicalExpenseRecord>> {
        let roles = resolve(&table.headers);
        debug!(?roles, "resolved column roles");

        if !roles.has(Role::EntityId) && !roles.has(Role::Value) {
            return Err(PipelineError::SchemaInference(format!(
                "no identifier or value column among {:?}",
                table.headers
            )));
        }

        for role in roles.missing() {
            if role != Role::EntityName {
                debug!(role = %role, "column role absent");
            }
        }

        let outcome = filter_and_parse(table, &roles, &self.policy);

        let records: Vec<CanonicalExpenseRecord> = outcome
            .rows
            .into_iter()
            .map(|row| CanonicalExpenseRecord {
                entity_id: row.entity_id,
                period_year: year.to_string(),
                period_quarter: quarter.to_string(),
                amount: row.amount,
                raw_name: row.name,
                amount_source: row.amount_source,
            })
            .collect();

        info!(
            year,
            quarter,
            rows = table.len(),
            records = records.len(),
            dropped = outcome.dropped,
            filtered = outcome.filter_applied,
            "normalized extract"
        );

        Ok(records)
    }
}

impl Default for ExtractNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
