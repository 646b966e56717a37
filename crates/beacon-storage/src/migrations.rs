//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use beacon_core::error::BeaconError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), BeaconError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| BeaconError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| BeaconError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: rules_and_executions");
    }

    Ok(())
}

/// Version 1: rules and the execution log.
///
/// Timestamps are epoch milliseconds. Execution records carry no foreign
/// key so the audit trail outlives rule deletion.
fn apply_v1(conn: &Connection) -> Result<(), BeaconError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS action_rules (
            id                      TEXT PRIMARY KEY NOT NULL,
            name                    TEXT NOT NULL,
            description             TEXT,
            is_active               INTEGER NOT NULL DEFAULT 1,
            trigger_type            TEXT NOT NULL,
            trigger_conditions      TEXT NOT NULL DEFAULT '{}',
            action_type             TEXT NOT NULL,
            action_config           TEXT NOT NULL DEFAULT '{}',
            cooldown_minutes        INTEGER NOT NULL DEFAULT 0,
            max_executions_per_day  INTEGER NOT NULL DEFAULT 100
                                    CHECK (max_executions_per_day >= 1),
            performer_filter        TEXT NOT NULL DEFAULT 'both'
                                    CHECK (performer_filter IN ('user_only', 'contacts_only', 'both')),
            instance_filter_type    TEXT NOT NULL DEFAULT 'all'
                                    CHECK (instance_filter_type IN ('all', 'include', 'exclude')),
            selected_instances      TEXT NOT NULL DEFAULT '[]',
            last_executed_at        INTEGER,
            total_executions        INTEGER NOT NULL DEFAULT 0,
            created_at              INTEGER NOT NULL,
            updated_at              INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_action_rules_active
            ON action_rules (is_active, created_at ASC);

        CREATE TABLE IF NOT EXISTS execution_records (
            id                  TEXT PRIMARY KEY NOT NULL,
            rule_id             TEXT NOT NULL,
            triggered_by        TEXT NOT NULL,
            trigger_data        TEXT NOT NULL,
            status              TEXT NOT NULL
                                CHECK (status IN ('success', 'failed', 'skipped')),
            result              TEXT,
            error_message       TEXT,
            executed_at         INTEGER NOT NULL,
            processing_time_ms  INTEGER NOT NULL DEFAULT 0,
            attempts            INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_execution_records_rule_time
            ON execution_records (rule_id, executed_at DESC);

        CREATE INDEX IF NOT EXISTS idx_execution_records_status
            ON execution_records (status, executed_at DESC);

        CREATE INDEX IF NOT EXISTS idx_execution_records_time
            ON execution_records (executed_at DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'rules_and_executions');
        ",
    )
    .map_err(|e| BeaconError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
