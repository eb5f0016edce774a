use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use skein_core::dag::Dag;
use skein_core::error::{Result, SkeinError};
use skein_core::types::{RunStatus, WorkflowRecord, WorkflowRun};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        app_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        dag TEXT NOT NULL,
        flow_path TEXT,
        category TEXT,
        channel TEXT,
        audience_type TEXT,
        signature TEXT,
        signature_name TEXT,
        deleted INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_workflows_app ON workflows(app_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_app_name
        ON workflows(app_id, name);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_app_signature
        ON workflows(app_id, signature);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_workflows_app_signature_name
        ON workflows(app_id, signature_name);

    CREATE TABLE IF NOT EXISTS workflow_runs (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        external_job_id TEXT,
        status TEXT NOT NULL,
        inputs TEXT NOT NULL,
        result TEXT,
        error TEXT,
        started_at TEXT,
        completed_at TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_workflow_runs_workflow ON workflow_runs(workflow_id);
    CREATE INDEX IF NOT EXISTS idx_workflow_runs_status ON workflow_runs(status);
";

const WORKFLOW_COLUMNS: &str = "id, app_id, name, description, dag, flow_path, category, \
     channel, audience_type, signature, signature_name, deleted, created_at, updated_at";

const RUN_COLUMNS: &str = "id, workflow_id, external_job_id, status, inputs, result, error, \
     started_at, completed_at, created_at";

/// SQLite-backed persistence for workflows and their runs.
pub struct WorkflowStore {
    conn: Mutex<Connection>,
}

impl WorkflowStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SkeinError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Workflow store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| SkeinError::Database(e.to_string()))
    }

    /// Insert a workflow. A concurrent insert of the same `(app_id,
    /// signature)` pair turns into an update of the winning row; callers that
    /// care re-read by signature afterwards.
    pub fn insert_workflow(&self, record: &WorkflowRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflows (id, app_id, name, description, dag, flow_path, category, \
             channel, audience_type, signature, signature_name, deleted, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
             ON CONFLICT(app_id, signature) DO UPDATE SET \
                 description = excluded.description, \
                 dag = excluded.dag, \
                 updated_at = excluded.updated_at",
            params![
                record.id,
                record.app_id,
                record.name,
                record.description,
                serde_json::to_string(&record.dag)?,
                record.flow_path,
                record.category,
                record.channel,
                record.audience_type,
                record.signature,
                record.signature_name,
                record.deleted as i64,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn find_workflow(&self, id: &str) -> Result<Option<WorkflowRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM workflows WHERE id = ?1 AND deleted = 0",
                    WORKFLOW_COLUMNS
                ),
                params![id],
                read_workflow,
            )
            .optional()
            .map_err(db_err)?;
        row.map(WorkflowRow::into_record).transpose()
    }

    pub fn find_by_name(&self, app_id: &str, name: &str) -> Result<Option<WorkflowRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM workflows WHERE app_id = ?1 AND name = ?2 AND deleted = 0",
                    WORKFLOW_COLUMNS
                ),
                params![app_id, name],
                read_workflow,
            )
            .optional()
            .map_err(db_err)?;
        row.map(WorkflowRow::into_record).transpose()
    }

    pub fn find_by_signature(
        &self,
        app_id: &str,
        signature: &str,
    ) -> Result<Option<WorkflowRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM workflows \
                     WHERE app_id = ?1 AND signature = ?2 AND deleted = 0",
                    WORKFLOW_COLUMNS
                ),
                params![app_id, signature],
                read_workflow,
            )
            .optional()
            .map_err(db_err)?;
        row.map(WorkflowRow::into_record).transpose()
    }

    /// Update a workflow's definition. A `None` description keeps the stored
    /// one.
    pub fn update_workflow(
        &self,
        id: &str,
        description: Option<&str>,
        dag: &Dag,
    ) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE workflows SET \
                     description = COALESCE(?2, description), \
                     dag = ?3, \
                     updated_at = ?4 \
                 WHERE id = ?1 AND deleted = 0",
                params![
                    id,
                    description,
                    serde_json::to_string(dag)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(SkeinError::NotFound(format!("workflow {}", id)));
        }
        Ok(())
    }

    /// Signature names already taken under an app, for collision-free naming.
    pub fn list_signature_names(&self, app_id: &str) -> Result<HashSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT signature_name FROM workflows \
                 WHERE app_id = ?1 AND signature_name IS NOT NULL",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![app_id], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut names = HashSet::new();
        for row in rows {
            names.insert(row.map_err(db_err)?);
        }
        Ok(names)
    }

    pub fn delete_workflow(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE workflows SET deleted = 1, updated_at = ?2 \
                 WHERE id = ?1 AND deleted = 0",
                params![id, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(SkeinError::NotFound(format!("workflow {}", id)));
        }
        Ok(())
    }

    pub fn insert_run(&self, run: &WorkflowRun) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflow_runs (id, workflow_id, external_job_id, status, inputs, \
             result, error, started_at, completed_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.id,
                run.workflow_id,
                run.external_job_id,
                run.status.as_str(),
                serde_json::to_string(&run.inputs)?,
                run.result.as_ref().map(Value::to_string),
                run.error,
                run.started_at.map(|t| t.to_rfc3339()),
                run.completed_at.map(|t| t.to_rfc3339()),
                run.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<WorkflowRun>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM workflow_runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                read_run,
            )
            .optional()
            .map_err(db_err)?;
        row.map(RunRow::into_run).transpose()
    }

    /// Runs the poller still has to reconcile.
    pub fn list_active_runs(&self) -> Result<Vec<WorkflowRun>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM workflow_runs \
                 WHERE status IN ('queued', 'running') \
                 ORDER BY created_at ASC",
                RUN_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([], read_run).map_err(db_err)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(db_err)?.into_run()?);
        }
        Ok(runs)
    }

    pub fn list_runs(
        &self,
        workflow_id: Option<&str>,
        status: Option<RunStatus>,
    ) -> Result<Vec<WorkflowRun>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM workflow_runs \
                 WHERE (?1 IS NULL OR workflow_id = ?1) \
                   AND (?2 IS NULL OR status = ?2) \
                 ORDER BY created_at DESC",
                RUN_COLUMNS
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![workflow_id, status.map(|s| s.as_str())], read_run)
            .map_err(db_err)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(db_err)?.into_run()?);
        }
        Ok(runs)
    }

    pub fn mark_run_running(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE workflow_runs SET status = 'running', started_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Move a run to a terminal state, recording the outcome and the
    /// completion timestamp.
    pub fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE workflow_runs SET status = ?2, result = ?3, error = ?4, completed_at = ?5 \
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                result.map(Value::to_string),
                error,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: rusqlite::Error) -> SkeinError {
    SkeinError::Database(e.to_string())
}

struct WorkflowRow {
    id: String,
    app_id: String,
    name: String,
    description: Option<String>,
    dag: String,
    flow_path: Option<String>,
    category: Option<String>,
    channel: Option<String>,
    audience_type: Option<String>,
    signature: Option<String>,
    signature_name: Option<String>,
    deleted: i64,
    created_at: String,
    updated_at: String,
}

fn read_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        id: row.get(0)?,
        app_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        dag: row.get(4)?,
        flow_path: row.get(5)?,
        category: row.get(6)?,
        channel: row.get(7)?,
        audience_type: row.get(8)?,
        signature: row.get(9)?,
        signature_name: row.get(10)?,
        deleted: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl WorkflowRow {
    fn into_record(self) -> Result<WorkflowRecord> {
        Ok(WorkflowRecord {
            id: self.id,
            app_id: self.app_id,
            name: self.name,
            description: self.description,
            dag: serde_json::from_str(&self.dag)?,
            flow_path: self.flow_path,
            category: self.category,
            channel: self.channel,
            audience_type: self.audience_type,
            signature: self.signature,
            signature_name: self.signature_name,
            deleted: self.deleted != 0,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

struct RunRow {
    id: String,
    workflow_id: String,
    external_job_id: Option<String>,
    status: String,
    inputs: String,
    result: Option<String>,
    error: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
}

fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        external_job_id: row.get(2)?,
        status: row.get(3)?,
        inputs: row.get(4)?,
        result: row.get(5)?,
        error: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl RunRow {
    fn into_run(self) -> Result<WorkflowRun> {
        let status = RunStatus::parse(&self.status).ok_or_else(|| {
            SkeinError::Database(format!("unknown run status: {}", self.status))
        })?;
        Ok(WorkflowRun {
            id: self.id,
            workflow_id: self.workflow_id,
            external_job_id: self.external_job_id,
            status,
            inputs: serde_json::from_str(&self.inputs)?,
            result: self
                .result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            error: self.error,
            started_at: self.started_at.as_deref().and_then(parse_opt_timestamp),
            completed_at: self.completed_at.as_deref().and_then(parse_opt_timestamp),
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
