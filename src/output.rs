// 💾 CSV sink - the two datasets as `;`-delimited UTF-8 files
//
// One header row per file. Each file is written next to its target and
// renamed into place, so a failed write never leaves a half file behind.
// Optionally each CSV is also packed into a deflated `.zip` of the same stem.

use crate::aggregation::AggregatedStat;
use crate::config::PipelineConfig;
use crate::enrichment::EnrichedRecord;
use crate::error::{PipelineError, Result};
use crate::pipeline::PersistenceSink;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CONSOLIDATED_HEADER: &[&str] = &[
    "entity_id",
    "period_year",
    "period_quarter",
    "amount",
    "raw_name",
    "name",
    "region",
];

pub const AGGREGATED_HEADER: &[&str] = &["name", "region", "total", "mean", "stddev"];

pub struct CsvSink {
    consolidated_path: PathBuf,
    aggregated_path: PathBuf,
    archive: bool,
}

impl CsvSink {
    pub fn new(consolidated_path: PathBuf, aggregated_path: PathBuf) -> Self {
        CsvSink {
            consolidated_path,
            aggregated_path,
            archive: false,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        CsvSink::new(config.consolidated_path(), config.aggregated_path())
            .with_archives(config.output.archive)
    }

    pub fn with_archives(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    /// Archives this sink writes (empty unless archiving is on)
    pub fn archive_paths(&self) -> Vec<PathBuf> {
        if !self.archive {
            return Vec::new();
        }
        vec![
            archive_path(&self.consolidated_path),
            archive_path(&self.aggregated_path),
        ]
    }

    fn write<T: Serialize>(&self, path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
        write_rows(path, header, rows)?;
        if self.archive {
            package_zip(path, &archive_path(path))?;
        }
        Ok(())
    }

    pub fn consolidated_path(&self) -> &Path {
        &self.consolidated_path
    }

    pub fn aggregated_path(&self) -> &Path {
        &self.aggregated_path
    }
}

/// Serialize rows to `path` via a sibling temp file
pub fn write_rows<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut writer = WriterBuilder::new()
            .delimiter(b';')
            .has_headers(!rows.is_empty())
            .from_path(&tmp)?;

        if rows.is_empty() {
            writer.write_record(header)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }

    fs::rename(&tmp, path)?;
    info!(path = %path.display(), rows = rows.len(), "wrote dataset");
    Ok(())
}

/// `consolidado_despesas.csv` → `consolidado_despesas.zip`
pub fn archive_path(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("zip")
}

/// Pack one file into `zip_path` as a single deflated entry named after it
pub fn package_zip(file_path: &Path, zip_path: &Path) -> Result<()> {
    let entry = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::Config(format!("not a file: {}", file_path.display())))?;
    let content = fs::read(file_path)?;

    let mut zip = ZipWriter::new(File::create(zip_path)?);
    let options: FileOptions<'_, ()> =
        FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry, options)?;
    zip.write_all(&content)?;
    zip.finish()?;

    info!(archive = %zip_path.display(), entry, "packed dataset");
    Ok(())
}

impl PersistenceSink for CsvSink {
    fn write_consolidated(&mut self, records: &[EnrichedRecord]) -> Result<()> {
        self.write(&self.consolidated_path, CONSOLIDATED_HEADER, records)
    }

    fn write_aggregated(&mut self, stats: &[AggregatedStat]) -> Result<()> {
        self.write(&self.aggregated_path, AGGREGATED_HEADER, stats)
    }
}
