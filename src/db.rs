// 🗄️ SQLite sink - load both datasets into relational tables
//
// Tables are replaced on every import (latest run wins). Each dataset is
// written inside its own SQL transaction.

use crate::aggregation::AggregatedStat;
use crate::enrichment::EnrichedRecord;
use crate::error::Result;
use crate::pipeline::PersistenceSink;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub struct SqliteSink {
    conn: Connection,
    run_id: String,
    consolidated_rows: usize,
}

impl SqliteSink {
    pub fn open(path: &Path, run_id: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, run_id)
    }

    pub fn open_in_memory(run_id: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, run_id)
    }

    fn with_connection(conn: Connection, run_id: &str) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteSink {
            conn,
            run_id: run_id.to_string(),
            consolidated_rows: 0,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            imported_at TEXT NOT NULL,
            consolidated_rows INTEGER NOT NULL,
            aggregated_rows INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

impl PersistenceSink for SqliteSink {
    fn write_consolidated(&mut self, records: &[EnrichedRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(
            "DROP TABLE IF EXISTS operadoras;
             CREATE TABLE operadoras (
                registro_ans TEXT PRIMARY KEY,
                razao_social TEXT NOT NULL,
                uf TEXT NOT NULL,
                modalidade TEXT,
                cnpj TEXT
             );
             DROP TABLE IF EXISTS despesas_consolidadas;
             CREATE TABLE despesas_consolidadas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                registro_ans TEXT,
                ano TEXT NOT NULL,
                trimestre TEXT NOT NULL,
                valor_despesas REAL NOT NULL,
                razao_social TEXT NOT NULL,
                uf TEXT NOT NULL
             );
             CREATE INDEX idx_despesas_registro ON despesas_consolidadas(registro_ans);",
        )?;

        // First record per registration number describes the operator
        let mut operators: BTreeMap<&str, &EnrichedRecord> = BTreeMap::new();
        for record in records {
            if let Some(id) = record.entity_id.as_deref() {
                operators.entry(id).or_insert(record);
            }
        }

        {
            let mut insert_operator = tx.prepare(
                "INSERT INTO operadoras (registro_ans, razao_social, uf, modalidade, cnpj)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (id, record) in &operators {
                insert_operator.execute(params![
                    id,
                    record.name,
                    record.region,
                    record.modality,
                    record.tax_id,
                ])?;
            }

            let mut insert_expense = tx.prepare(
                "INSERT INTO despesas_consolidadas (registro_ans, ano, trimestre, valor_despesas, razao_social, uf)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                insert_expense.execute(params![
                    record.entity_id,
                    record.period_year,
                    record.period_quarter,
                    record.amount,
                    record.name,
                    record.region,
                ])?;
            }
        }

        tx.commit()?;
        self.consolidated_rows = records.len();
        info!(rows = records.len(), operators = operators.len(), "imported consolidated expenses");
        Ok(())
    }

    fn write_aggregated(&mut self, stats: &[AggregatedStat]) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(
            "DROP TABLE IF EXISTS despesas_agregadas;
             CREATE TABLE despesas_agregadas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                razao_social TEXT NOT NULL,
                uf TEXT NOT NULL,
                total_despesas REAL NOT NULL,
                media_trimestral REAL NOT NULL,
                desvio_padrao REAL NOT NULL
             );",
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO despesas_agregadas (razao_social, uf, total_despesas, media_trimestral, desvio_padrao)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stat in stats {
                insert.execute(params![stat.name, stat.region, stat.total, stat.mean, stat.stddev])?;
            }
        }

        tx.execute(
            "INSERT INTO import_runs (run_id, imported_at, consolidated_rows, aggregated_rows)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                self.run_id,
                Utc::now().to_rfc3339(),
                self.consolidated_rows as i64,
                stats.len() as i64,
            ],
        )?;

        tx.commit()?;
        info!(rows = stats.len(), "imported aggregated expenses");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::aggregate;
    use crate::enrichment::{RegistryEnricher, RegistryRow};
    use crate::normalizer::CanonicalExpenseRecord;
    use crate::pipeline::PipelineOutput;

    fn enriched() -> Vec<EnrichedRecord> {
        let records = vec![
            CanonicalExpenseRecord::new("111", "2023", "2T", 100.0),
            CanonicalExpenseRecord::new("111", "2023", "1T", 300.0),
            CanonicalExpenseRecord::new("", "2023", "1T", 5.0),
        ];
        let registry = vec![RegistryRow::new("111", "Acme", "SP", "Seguradora").with_tax_id("123")];
        RegistryEnricher::new().enrich(&records, Some(registry.as_slice()))
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_import_both_datasets() {
        let records = enriched();
        let stats = aggregate(&records).unwrap();
        let mut sink = SqliteSink::open_in_memory("run-1").unwrap();

        sink.write_consolidated(&records).unwrap();
        sink.write_aggregated(&stats).unwrap();

        let conn = sink.connection();
        assert_eq!(count(conn, "despesas_consolidadas"), 3);
        assert_eq!(count(conn, "operadoras"), 1);
        assert_eq!(count(conn, "despesas_agregadas"), 2);

        let (name, cnpj): (String, Option<String>) = conn
            .query_row(
                "SELECT razao_social, cnpj FROM operadoras WHERE registro_ans = '111'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "Acme");
        assert_eq!(cnpj.as_deref(), Some("123"));

        let total: f64 = conn
            .query_row(
                "SELECT total_despesas FROM despesas_agregadas WHERE razao_social = 'Acme'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(total, 400.0);

        let (run_id, rows): (String, i64) = conn
            .query_row("SELECT run_id, consolidated_rows FROM import_runs", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(run_id, "run-1");
        assert_eq!(rows, 3);
    }

    #[test]
    fn test_reimport_replaces_tables() {
        let records = enriched();
        let stats = aggregate(&records).unwrap();
        let mut sink = SqliteSink::open_in_memory("run-2").unwrap();

        let output = PipelineOutput {
            consolidated: records,
            aggregated: stats,
            report: serde_json::from_value(serde_json::json!({
                "run_id": "run-2",
                "started_at": "2024-01-01T00:00:00Z",
                "finished_at": null,
                "periods": [],
                "records": 3,
                "non_positive_dropped": 0,
                "registry_available": true,
                "enriched_matched": 2,
                "groups": 2
            }))
            .unwrap(),
        };
        output.persist(&mut sink).unwrap();
        output.persist(&mut sink).unwrap();

        let conn = sink.connection();
        assert_eq!(count(conn, "despesas_consolidadas"), 3);
        assert_eq!(count(conn, "despesas_agregadas"), 2);
        assert_eq!(count(conn, "import_runs"), 2);
    }
}
