// 📐 Schema Resolver - column names → canonical roles
//
// Extracts drift in naming and ordering between periods. Roles are resolved
// from an ordered rule table: exact names first, then keyword substrings.

use crate::table::clean_header;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// ROLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Registration number of the regulated entity
    EntityId,
    AccountCode,
    Description,
    Value,
    /// Legal name, only present in some extract layouts
    EntityName,
}

impl Role {
    pub fn name(&self) -> &str {
        match self {
            Role::EntityId => "entity-identifier",
            Role::AccountCode => "account-code",
            Role::Description => "description",
            Role::Value => "value",
            Role::EntityName => "entity-name",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// RULE TABLE
// ============================================================================

pub struct RoleRule {
    pub role: Role,
    /// Compared case-insensitively against the cleaned column name
    pub exact: &'static [&'static str],
    /// Matched against the uppercased column name
    pub keywords: &'static [&'static str],
}

/// Evaluation order matters: a column claimed by an earlier rule is not
/// offered to later ones.
pub const ROLE_RULES: &[RoleRule] = &[
    RoleRule {
        role: Role::EntityId,
        exact: &["REG_ANS", "REGISTRO_ANS", "REGISTRO_OPERADORA"],
        keywords: &["REG", "ANS"],
    },
    RoleRule {
        role: Role::AccountCode,
        exact: &["CD_CONTA_CONTABIL"],
        keywords: &["CONTA"],
    },
    RoleRule {
        role: Role::Description,
        exact: &["DESCRICAO"],
        keywords: &["DESCRI"],
    },
    RoleRule {
        role: Role::Value,
        exact: &["VL_SALDO_FINAL"],
        keywords: &["VALOR", "SALDO"],
    },
    RoleRule {
        role: Role::EntityName,
        exact: &["RAZAO_SOCIAL", "RAZAOSOCIAL", "NOME_OPERADORA"],
        keywords: &[],
    },
];

// ============================================================================
// ROLE MAP
// ============================================================================

/// Role → original column name. Absent roles have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleMap {
    columns: BTreeMap<Role, String>,
}

impl RoleMap {
    pub fn get(&self, role: Role) -> Option<&str> {
        self.columns.get(&role).map(|s| s.as_str())
    }

    pub fn has(&self, role: Role) -> bool {
        self.columns.contains_key(&role)
    }

    pub fn insert(&mut self, role: Role, column: &str) {
        self.columns.insert(role, column.to_string());
    }

    pub fn missing(&self) -> Vec<Role> {
        ROLE_RULES
            .iter()
            .map(|rule| rule.role)
            .filter(|role| !self.has(*role))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Map column names to roles.
///
/// Pure: the same column sequence always yields the same map. Returned
/// column names are the cleaned forms (trimmed, quotes removed).
pub fn resolve<S: AsRef<str>>(column_names: &[S]) -> RoleMap {
    let cleaned: Vec<String> = column_names.iter().map(|c| clean_header(c.as_ref())).collect();
    let mut claimed = vec![false; cleaned.len()];
    let mut map = RoleMap::default();

    for rule in ROLE_RULES {
        if let Some(idx) = match_rule(rule, &cleaned, &claimed) {
            claimed[idx] = true;
            map.insert(rule.role, &cleaned[idx]);
        }
    }

    map
}

fn match_rule(rule: &RoleRule, columns: &[String], claimed: &[bool]) -> Option<usize> {
    let free = |idx: &usize| !claimed[*idx];

    // Priority 1: exact canonical name, in candidate order
    for candidate in rule.exact {
        if let Some(idx) = (0..columns.len())
            .filter(free)
            .find(|&idx| columns[idx].eq_ignore_ascii_case(candidate))
        {
            return Some(idx);
        }
    }

    // Priority 2: keyword substring, first column in header order
    (0..columns.len()).filter(free).find(|&idx| {
        let upper = columns[idx].to_uppercase();
        rule.keywords.iter().any(|keyword| upper.contains(keyword))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_canonical_layout() {
        let map = resolve(&[
            "DATA",
            "REG_ANS",
            "CD_CONTA_CONTABIL",
            "DESCRICAO",
            "VL_SALDO_INICIAL",
            "VL_SALDO_FINAL",
        ]);

        assert_eq!(map.get(Role::EntityId), Some("REG_ANS"));
        assert_eq!(map.get(Role::AccountCode), Some("CD_CONTA_CONTABIL"));
        assert_eq!(map.get(Role::Description), Some("DESCRICAO"));
        // Exact match beats the earlier SALDO substring hit
        assert_eq!(map.get(Role::Value), Some("VL_SALDO_FINAL"));
        assert_eq!(map.get(Role::EntityName), None);
    }

    #[test]
    fn test_exact_match_is_case_insensitive_and_cleaned() {
        let map = resolve(&[" \"reg_ans\" ", "\"vl_saldo_final\""]);
        assert_eq!(map.get(Role::EntityId), Some("reg_ans"));
        assert_eq!(map.get(Role::Value), Some("vl_saldo_final"));
    }

    #[test]
    fn test_substring_fallback() {
        let map = resolve(&["CODIGO_REGISTRO", "CONTA", "DESCRICAO_CONTA_X", "VALOR_TRIMESTRE"]);

        assert_eq!(map.get(Role::EntityId), Some("CODIGO_REGISTRO"));
        assert_eq!(map.get(Role::AccountCode), Some("CONTA"));
        assert_eq!(map.get(Role::Description), Some("DESCRICAO_CONTA_X"));
        assert_eq!(map.get(Role::Value), Some("VALOR_TRIMESTRE"));
    }

    #[test]
    fn test_claimed_column_not_reused() {
        // "REG_SALDO" would satisfy both identifier and value keywords
        let map = resolve(&["REG_SALDO", "OUTRO"]);
        assert_eq!(map.get(Role::EntityId), Some("REG_SALDO"));
        assert_eq!(map.get(Role::Value), None);
    }

    #[test]
    fn test_absent_roles() {
        let map = resolve(&["FOO", "BAR"]);
        assert!(map.is_empty());
        assert_eq!(map.missing().len(), ROLE_RULES.len());
    }

    #[test]
    fn test_entity_name_exact_only() {
        let map = resolve(&["REG_ANS", "RazaoSocial", "NOME_FANTASIA"]);
        assert_eq!(map.get(Role::EntityName), Some("RazaoSocial"));

        let map = resolve(&["REG_ANS", "RAZAO"]);
        assert_eq!(map.get(Role::EntityName), None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let columns = vec!["VL_SALDO_INICIAL", "REGISTRO", "ANS_CODE", "VALOR"];
        assert_eq!(resolve(&columns), resolve(&columns));
        assert_eq!(resolve(&columns).get(Role::EntityId), Some("REGISTRO"));
        assert_eq!(resolve(&columns).get(Role::Value), Some("VL_SALDO_INICIAL"));
    }
}
