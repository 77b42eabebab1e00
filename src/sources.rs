// 📂 Local collaborators - period discovery, extract files, registry file
//
// Filesystem stand-ins for the remote collaborators. Downloading and
// unpacking archives happens elsewhere; these read what is already on disk.

use crate::config::PipelineConfig;
use crate::enrichment::RegistryRow;
use crate::error::{PipelineError, Result};
use crate::pipeline::{PeriodDescriptor, RawExtractProvider, RegistryProvider};
use crate::table::RawTable;
use encoding_rs::Encoding;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// PERIOD DISCOVERY
// ============================================================================

/// Find periods under `root/<YYYY>/<entry>` where the entry name carries a
/// quarter marker such as `3T2023`, `2T` or `1Q`. Most recent first, at most
/// `max_periods`.
///
/// Entries may be directories or `.csv` files.
pub fn discover_periods(root: &Path, max_periods: usize) -> Result<Vec<PeriodDescriptor>> {
    let year_re = Regex::new(r"^\d{4}$").map_err(|e| PipelineError::Config(e.to_string()))?;
    let quarter_re =
        Regex::new(r"(?i)([1-4])[TQ]").map_err(|e| PipelineError::Config(e.to_string()))?;

    let mut years: Vec<(String, PathBuf)> = read_dir_sorted(root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?.to_string();
            year_re.is_match(&name).then_some((name, p))
        })
        .collect();
    years.sort_by(|a, b| b.0.cmp(&a.0));

    let mut periods = Vec::new();

    for (year, year_dir) in years {
        if periods.len() >= max_periods {
            break;
        }
        debug!(year = %year, "scanning year directory");

        let mut quarters: Vec<(u8, String, PathBuf)> = read_dir_sorted(&year_dir)?
            .into_iter()
            .filter(|p| p.is_dir() || has_extension(p, "csv"))
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?.to_string();
                let digit = quarter_re.captures(&name)?.get(1)?.as_str().parse::<u8>().ok()?;
                Some((digit, name, p))
            })
            .collect();
        quarters.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        for (digit, _, path) in quarters {
            let quarter = format!("{}T", digit);
            if periods
                .iter()
                .any(|p: &PeriodDescriptor| p.year == year && p.quarter == quarter)
            {
                continue;
            }
            periods.push(PeriodDescriptor::new(&year, &quarter, &path.to_string_lossy()));
            if periods.len() >= max_periods {
                break;
            }
        }
    }

    info!(root = %root.display(), found = periods.len(), "discovered periods");
    Ok(periods)
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    Ok(entries)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(ext))
}

// ============================================================================
// EXTRACT FILES
// ============================================================================

/// Keywords that mark the expense statement among several CSVs
const EXPENSE_FILE_HINTS: &[&str] = &["EVENTOS", "DESPESA", "SINISTRO"];

/// Pick the expense CSV inside an unpacked period directory: a file named
/// after events/expenses/claims if any, otherwise the first CSV found.
pub fn find_expense_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut candidates = Vec::new();
    collect_csv_files(dir, &mut candidates)?;

    let preferred = candidates.iter().find(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .map(|n| {
                let upper = n.to_uppercase();
                EXPENSE_FILE_HINTS.iter().any(|hint| upper.contains(hint))
            })
            .unwrap_or(false)
    });

    Ok(preferred.cloned().or_else(|| candidates.into_iter().next()))
}

fn collect_csv_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for path in read_dir_sorted(dir)? {
        if path.is_dir() {
            collect_csv_files(&path, out)?;
        } else if has_extension(&path, "csv") {
            out.push(path);
        }
    }
    Ok(())
}

/// SHA-256 of the extract bytes, for provenance in the logs
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Reads extracts from local CSV files or unpacked period directories
pub struct DirectoryExtractProvider {
    primary: &'static Encoding,
    fallback: &'static Encoding,
}

impl DirectoryExtractProvider {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let (primary, fallback) = config.decoding.encodings()?;
        Ok(DirectoryExtractProvider { primary, fallback })
    }
}

impl RawExtractProvider for DirectoryExtractProvider {
    fn fetch(&self, locator: &str) -> Result<RawTable> {
        let path = Path::new(locator);

        let file = if path.is_dir() {
            find_expense_file(path)
                .map_err(|e| PipelineError::fetch(locator, e.to_string()))?
                .ok_or_else(|| {
                    PipelineError::SchemaInference(format!("no CSV extract in {}", locator))
                })?
        } else {
            path.to_path_buf()
        };

        let bytes = fs::read(&file).map_err(|e| PipelineError::fetch(locator, e.to_string()))?;
        info!(
            file = %file.display(),
            bytes = bytes.len(),
            sha256 = %fingerprint(&bytes),
            "read extract"
        );

        RawTable::decode(&bytes, self.primary, self.fallback)
    }
}

// ============================================================================
// REGISTRY FILE
// ============================================================================

const REGISTRY_ID_COLUMNS: &[&str] = &["REGISTRO_OPERADORA", "REGISTRO_ANS", "REG_ANS"];
const REGISTRY_NAME_COLUMNS: &[&str] = &["RAZAO_SOCIAL", "RAZAOSOCIAL"];
const REGISTRY_REGION_COLUMNS: &[&str] = &["UF"];
const REGISTRY_MODALITY_COLUMNS: &[&str] = &["MODALIDADE"];
const REGISTRY_TAX_ID_COLUMNS: &[&str] = &["CNPJ"];

/// Reads the operator registry (CADOP report) from a local CSV
pub struct CsvRegistryProvider {
    path: PathBuf,
    primary: &'static Encoding,
    fallback: &'static Encoding,
}

impl CsvRegistryProvider {
    pub fn new(path: &Path, config: &PipelineConfig) -> Result<Self> {
        let (primary, fallback) = config.decoding.encodings()?;
        Ok(CsvRegistryProvider {
            path: path.to_path_buf(),
            primary,
            fallback,
        })
    }
}

fn find_column(table: &RawTable, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        table
            .headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(candidate))
    })
}

fn cell(table: &RawTable, row: usize, col: Option<usize>) -> &str {
    col.and_then(|c| table.cell(row, c)).unwrap_or("")
}

/// Turn a registry table into rows. Rows with a blank identifier are skipped.
pub fn registry_rows(table: &RawTable) -> Result<Vec<RegistryRow>> {
    let id = find_column(table, REGISTRY_ID_COLUMNS).ok_or_else(|| {
        PipelineError::RegistryUnavailable(format!(
            "no registration column among {:?}",
            table.headers
        ))
    })?;
    let name = find_column(table, REGISTRY_NAME_COLUMNS);
    let region = find_column(table, REGISTRY_REGION_COLUMNS);
    let modality = find_column(table, REGISTRY_MODALITY_COLUMNS);
    let tax_id = find_column(table, REGISTRY_TAX_ID_COLUMNS);

    let mut rows = Vec::with_capacity(table.len());
    let mut blank = 0;
    for row in 0..table.len() {
        let entity_id = cell(table, row, Some(id));
        if entity_id.trim().is_empty() {
            blank += 1;
            continue;
        }
        rows.push(
            RegistryRow::new(
                entity_id,
                cell(table, row, name),
                cell(table, row, region),
                cell(table, row, modality),
            )
            .with_tax_id(cell(table, row, tax_id)),
        );
    }

    if blank > 0 {
        warn!(blank, "registry rows without registration number skipped");
    }
    Ok(rows)
}

impl RegistryProvider for CsvRegistryProvider {
    fn fetch(&self) -> Result<Vec<RegistryRow>> {
        let bytes = fs::read(&self.path).map_err(|e| {
            PipelineError::RegistryUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let table = RawTable::decode(&bytes, self.primary, self.fallback)
            .map_err(|e| PipelineError::RegistryUnavailable(e.to_string()))?;
        registry_rows(&table)
    }
}
