// 🧮 Row Filter & Value Parser
//
// Keeps the rows that describe assistance expenses (claims/events) and turns
// pt-BR monetary text ("1.234,56") into numbers.

use crate::config::FilterConfig;
use crate::error::PipelineError;
use crate::schema::{Role, RoleMap};
use crate::table::RawTable;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Whether an amount was read from the extract or filled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmountSource {
    Parsed,
    /// The extract had no value column at all
    Defaulted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub entity_id: Option<String>,
    pub amount: f64,
    pub amount_source: AmountSource,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub rows: Vec<ParsedRow>,
    /// Rows dropped for an unparsable value
    pub dropped: usize,
    /// False when no row matched and everything was kept
    pub filter_applied: bool,
}

/// Which rows count as assistance expenses
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub account_prefix: String,
    /// Uppercase keywords searched in the description
    pub keywords: Vec<String>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy::from(&FilterConfig::default())
    }
}

impl From<&FilterConfig> for FilterPolicy {
    fn from(config: &FilterConfig) -> Self {
        FilterPolicy {
            account_prefix: config.account_prefix.trim().to_string(),
            keywords: config
                .description_keywords
                .iter()
                .map(|k| k.trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

// ============================================================================
// MONETARY PARSING
// ============================================================================

/// Parse pt-BR monetary text: quotes removed, "." thousands separators
/// removed, "," decimal separator turned into ".".
///
/// Returns None for empty, malformed or non-finite input. "-0,00" comes back
/// as plain 0.0.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let normalized = raw
        .replace('"', "")
        .replace('.', "")
        .replace(',', ".");
    let normalized = normalized.trim();

    if normalized.is_empty() {
        return None;
    }

    normalized
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v + 0.0)
}

// ============================================================================
// ROW FILTER
// ============================================================================

struct Columns {
    entity_id: Option<usize>,
    account: Option<usize>,
    description: Option<usize>,
    value: Option<usize>,
    name: Option<usize>,
}

impl Columns {
    fn locate(table: &RawTable, roles: &RoleMap) -> Self {
        let idx = |role: Role| roles.get(role).and_then(|c| table.column_index(c));
        Columns {
            entity_id: idx(Role::EntityId),
            account: idx(Role::AccountCode),
            description: idx(Role::Description),
            value: idx(Role::Value),
            name: idx(Role::EntityName),
        }
    }
}

impl FilterPolicy {
    /// OR of the clauses whose column exists
    fn matches(&self, account: Option<&str>, description: Option<&str>) -> bool {
        if let Some(code) = account {
            if !self.account_prefix.is_empty() && code.trim().starts_with(&self.account_prefix) {
                return true;
            }
        }

        if let Some(text) = description {
            let upper = text.to_uppercase();
            if self.keywords.iter().any(|k| upper.contains(k.as_str())) {
                return true;
            }
        }

        false
    }

    /// Indices of the rows to keep. Falls back to every row when nothing
    /// matches, so a layout without a usable criterion never loses data.
    pub fn select_rows(&self, table: &RawTable, roles: &RoleMap) -> (Vec<usize>, bool) {
        let cols = Columns::locate(table, roles);
        self.select_with(table, &cols)
    }

    fn select_with(&self, table: &RawTable, cols: &Columns) -> (Vec<usize>, bool) {
        let selected: Vec<usize> = (0..table.len())
            .filter(|&row| {
                let account = cols.account.and_then(|c| table.cell(row, c));
                let description = cols.description.and_then(|c| table.cell(row, c));
                self.matches(account, description)
            })
            .collect();

        if selected.is_empty() {
            debug!(rows = table.len(), "no row matched the expense filter, keeping all rows");
            ((0..table.len()).collect(), false)
        } else {
            (selected, true)
        }
    }
}

fn non_empty(cell: Option<&str>) -> Option<String> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Filter the table to expense rows and parse each survivor.
///
/// A row whose value cell does not parse is dropped with a warning. When the
/// table has no value column every row gets 0.0 marked `Defaulted`.
pub fn filter_and_parse(table: &RawTable, roles: &RoleMap, policy: &FilterPolicy) -> ParseOutcome {
    let cols = Columns::locate(table, roles);
    let (selected, filter_applied) = policy.select_with(table, &cols);

    let mut outcome = ParseOutcome {
        filter_applied,
        ..ParseOutcome::default()
    };

    for row in selected {
        let (amount, amount_source) = match cols.value {
            Some(c) => {
                let raw = table.cell(row, c).unwrap_or("");
                match parse_amount(raw) {
                    Some(v) => (v, AmountSource::Parsed),
                    None => {
                        let err = PipelineError::RowParse {
                            line: table.line_number(row),
                            message: format!("unparsable amount {:?}", raw),
                        };
                        warn!(error = %err, "dropping row");
                        outcome.dropped += 1;
                        continue;
                    }
                }
            }
            None => (0.0, AmountSource::Defaulted),
        };

        outcome.rows.push(ParsedRow {
            entity_id: non_empty(cols.entity_id.and_then(|c| table.cell(row, c))),
            amount,
            amount_source,
            name: non_empty(cols.name.and_then(|c| table.cell(row, c))),
        });
    }

    outcome
}
