// ANS Expense Pipeline - Core Library
// Normalizes regulatory expense extracts, enriches them against the operator
// registry and aggregates per operator/region across periods.

pub mod error;
pub mod config;
pub mod table;
pub mod schema;       // Column role inference
pub mod parser;       // Row filter + monetary parsing
pub mod normalizer;
pub mod enrichment;
pub mod aggregation;
pub mod pipeline;
pub mod sources;      // Local period/extract/registry collaborators
pub mod output;
pub mod logging;

#[cfg(feature = "sqlite")]
pub mod db;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use config::PipelineConfig;
pub use table::RawTable;
pub use schema::{resolve, Role, RoleMap};
pub use parser::{filter_and_parse, parse_amount, AmountSource, FilterPolicy, ParsedRow};
pub use normalizer::{CanonicalExpenseRecord, ExtractNormalizer};
pub use enrichment::{EnrichedRecord, RegistryEnricher, RegistryRow};
pub use aggregation::{aggregate, AggregatedStat};
pub use pipeline::{
    PeriodDescriptor, PeriodOutcome, PeriodStatus, PersistenceSink, Pipeline, PipelineOutput,
    RawExtractProvider, RegistryProvider, RunReport,
};
pub use sources::{discover_periods, CsvRegistryProvider, DirectoryExtractProvider};
pub use output::CsvSink;

#[cfg(feature = "sqlite")]
pub use db::SqliteSink;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
