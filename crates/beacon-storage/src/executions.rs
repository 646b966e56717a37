//! Execution log repository.
//!
//! Records are append-only: there is no update or delete path.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension;

use beacon_core::error::BeaconError;
use beacon_core::{EngineStats, ExecutionId, ExecutionRecord, ExecutionStatus, RuleId};

use crate::db::{datetime_from_millis, Database};

const EXECUTION_COLUMNS: &str = "id, rule_id, triggered_by, trigger_data, status, result,
     error_message, executed_at, processing_time_ms, attempts";

/// Filters for querying the execution log. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFilters {
    pub rule_id: Option<RuleId>,
    pub status: Option<ExecutionStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ExecutionFilters {
    fn default() -> Self {
        Self {
            rule_id: None,
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl ExecutionFilters {
    fn where_clause(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(rule_id) = self.rule_id {
            clauses.push("rule_id = ?");
            params.push(Box::new(rule_id.to_string()));
        }
        if let Some(status) = self.status {
            clauses.push("status = ?");
            params.push(Box::new(status.to_string()));
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        (sql, params)
    }
}

/// Repository for execution records.
pub struct ExecutionRepository {
    db: Arc<Database>,
}

impl ExecutionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn save(&self, record: &ExecutionRecord) -> Result<(), BeaconError> {
        let trigger_data = serde_json::to_string(&record.trigger_data)?;
        let result = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO execution_records (id, rule_id, triggered_by, trigger_data, status,
                    result, error_message, executed_at, processing_time_ms, attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    record.id.to_string(),
                    record.rule_id.to_string(),
                    record.triggered_by,
                    trigger_data,
                    record.status.to_string(),
                    result,
                    record.error_message,
                    record.executed_at.timestamp_millis(),
                    record.processing_time_ms as i64,
                    record.attempts,
                ],
            )
            .map_err(|e| BeaconError::Storage(format!("Failed to save execution: {}", e)))?;
            Ok(())
        })
    }

    pub fn get(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, BeaconError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM execution_records WHERE id = ?1",
                EXECUTION_COLUMNS
            );
            let result = conn
                .query_row(&sql, rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_record(row))
                })
                .optional()
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            match result {
                Some(record) => Ok(Some(record?)),
                None => Ok(None),
            }
        })
    }

    /// Query the log, newest first.
    pub fn query(&self, filters: &ExecutionFilters) -> Result<Vec<ExecutionRecord>, BeaconError> {
        let (where_sql, mut params_vec) = filters.where_clause();
        params_vec.push(Box::new(filters.limit as i64));
        params_vec.push(Box::new(filters.offset as i64));
        let sql = format!(
            "SELECT {} FROM execution_records {}
             ORDER BY executed_at DESC, rowid DESC
             LIMIT ? OFFSET ?",
            EXECUTION_COLUMNS, where_sql
        );

        self.db.with_conn(|conn| {
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| BeaconError::Storage(format!("Execution query prepare: {}", e)))?;
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| Ok(row_to_record(row)))
                .map_err(|e| BeaconError::Storage(format!("Execution query: {}", e)))?;

            let mut records = Vec::new();
            for row in rows {
                let record = row.map_err(|e| BeaconError::Storage(e.to_string()))??;
                records.push(record);
            }
            Ok(records)
        })
    }

    /// Number of records matching the filters, ignoring limit and offset.
    pub fn count(&self, filters: &ExecutionFilters) -> Result<u64, BeaconError> {
        let (where_sql, params_vec) = filters.where_clause();
        let sql = format!("SELECT COUNT(*) FROM execution_records {}", where_sql);
        self.db.with_conn(|conn| {
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();
            let count: i64 = conn
                .query_row(&sql, params_refs.as_slice(), |row| row.get(0))
                .map_err(|e| BeaconError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Admission times of a rule's non-skipped records after `since`,
    /// oldest first.
    pub fn admitted_since(
        &self,
        rule_id: RuleId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, BeaconError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT executed_at FROM execution_records
                     WHERE rule_id = ?1 AND status != 'skipped' AND executed_at > ?2
                     ORDER BY executed_at ASC",
                )
                .map_err(|e| BeaconError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![rule_id.to_string(), since.timestamp_millis()],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(|e| BeaconError::Storage(e.to_string()))?;

            let mut times = Vec::new();
            for row in rows {
                let ms = row.map_err(|e| BeaconError::Storage(e.to_string()))?;
                times.push(datetime_from_millis(ms)?);
            }
            Ok(times)
        })
    }

    /// Aggregate statistics over rules and the execution log.
    ///
    /// `total_executions` and `executions_last_24h` count admitted
    /// executions only; skips are reported separately.
    pub fn stats(&self, now: DateTime<Utc>) -> Result<EngineStats, BeaconError> {
        let day_ago = (now - Duration::hours(24)).timestamp_millis();
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM action_rules),
                    (SELECT COALESCE(SUM(is_active), 0) FROM action_rules),
                    COALESCE(SUM(status != 'skipped'), 0),
                    COALESCE(SUM(status != 'skipped' AND executed_at > ?1), 0),
                    COALESCE(SUM(status = 'success'), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    COALESCE(SUM(status = 'skipped'), 0)
                 FROM execution_records",
                rusqlite::params![day_ago],
                |row| {
                    Ok(EngineStats {
                        total_rules: row.get::<_, i64>(0)? as u64,
                        active_rules: row.get::<_, i64>(1)? as u64,
                        total_executions: row.get::<_, i64>(2)? as u64,
                        executions_last_24h: row.get::<_, i64>(3)? as u64,
                        successful: row.get::<_, i64>(4)? as u64,
                        failed: row.get::<_, i64>(5)? as u64,
                        skipped: row.get::<_, i64>(6)? as u64,
                    })
                },
            )
            .map_err(|e| BeaconError::Storage(format!("Stats query: {}", e)))
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ExecutionRecord, BeaconError> {
    let get_err = |e: rusqlite::Error| BeaconError::Storage(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let rule_id: String = row.get(1).map_err(get_err)?;
    let trigger_data: String = row.get(3).map_err(get_err)?;
    let status: String = row.get(4).map_err(get_err)?;
    let result: Option<String> = row.get(5).map_err(get_err)?;
    let executed_at: i64 = row.get(7).map_err(get_err)?;
    let processing_time_ms: i64 = row.get(8).map_err(get_err)?;

    Ok(ExecutionRecord {
        id: id
            .parse()
            .map_err(|e| BeaconError::Storage(format!("Invalid UUID: {}", e)))?,
        rule_id: rule_id
            .parse()
            .map_err(|e| BeaconError::Storage(format!("Invalid UUID: {}", e)))?,
        triggered_by: row.get(2).map_err(get_err)?,
        trigger_data: serde_json::from_str(&trigger_data)?,
        status: status.parse().map_err(BeaconError::Storage)?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        error_message: row.get(6).map_err(get_err)?,
        executed_at: datetime_from_millis(executed_at)?,
        processing_time_ms: processing_time_ms.max(0) as u64,
        attempts: row.get(9).map_err(get_err)?,
    })
}
