//! SQLite record store
//!
//! File-based or in-memory storage using SQLite. Foreign keys are enforced
//! (`PRAGMA foreign_keys = ON`): function → benchmark / get-started plans
//! cascade, dataset joins restrict, a function's default dataset is set to
//! NULL when the dataset goes away. The delete guards for families and
//! datasets are also checked explicitly so the error names what still
//! references the row.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::domain::models::*;
use crate::domain::ports::{FunctionFilter, RecordStore};
use crate::domain::snapshot::*;
use crate::error::{Result, StorageError};

const FAMILY: &str = "function_family";
const FUNCTION: &str = "function_impl";
const BENCHMARK: &str = "benchmark";
const DATASET: &str = "dataset";
const GET_STARTED: &str = "get_started";
const DEV: &str = "dev";
const PIPELINE: &str = "pipeline";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS function_family (
        id INTEGER PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        description TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dataset (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        description TEXT,
        download_url TEXT,
        created_at INTEGER NOT NULL,
        UNIQUE (name, version)
    );

    CREATE TABLE IF NOT EXISTS function_impl (
        id INTEGER PRIMARY KEY,
        family_id INTEGER NOT NULL REFERENCES function_family(id) ON DELETE RESTRICT,
        real_name TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        api_level TEXT NOT NULL CHECK (api_level IN ('high', 'low')),
        network BOOLEAN NOT NULL,
        gpu BOOLEAN NOT NULL,
        signature_html TEXT,
        description_html TEXT,
        default_dataset_id INTEGER REFERENCES dataset(id) ON DELETE SET NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_function_listing
        ON function_impl(family_id, api_level, network, gpu);

    CREATE TABLE IF NOT EXISTS benchmark (
        id INTEGER PRIMARY KEY,
        function_impl_id INTEGER NOT NULL UNIQUE REFERENCES function_impl(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description_html TEXT NOT NULL DEFAULT '',
        highlighted BOOLEAN NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_benchmark_highlighted
        ON benchmark(highlighted, created_at);

    CREATE TABLE IF NOT EXISTS benchmark_dataset (
        benchmark_id INTEGER NOT NULL REFERENCES benchmark(id) ON DELETE CASCADE,
        dataset_id INTEGER NOT NULL REFERENCES dataset(id) ON DELETE RESTRICT,
        PRIMARY KEY (benchmark_id, dataset_id)
    );

    CREATE TABLE IF NOT EXISTS get_started (
        id INTEGER PRIMARY KEY,
        function_impl_id INTEGER NOT NULL UNIQUE REFERENCES function_impl(id) ON DELETE CASCADE,
        goal TEXT NOT NULL,
        priority INTEGER,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dev (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        description_html TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pipeline (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        description_html TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pipeline_dataset (
        pipeline_id INTEGER NOT NULL REFERENCES pipeline(id) ON DELETE CASCADE,
        dataset_id INTEGER NOT NULL REFERENCES dataset(id) ON DELETE RESTRICT,
        PRIMARY KEY (pipeline_id, dataset_id)
    );
";

const FAMILY_COLUMNS: &str = "id, slug, display_name, description, created_at";
const FUNCTION_COLUMNS: &str = "id, family_id, real_name, summary, api_level, network, gpu, \
     signature_html, description_html, default_dataset_id, created_at";
const BENCHMARK_COLUMNS: &str =
    "id, function_impl_id, title, description_html, highlighted, created_at";
const DATASET_COLUMNS: &str = "id, name, version, description, download_url, created_at";
const GET_STARTED_COLUMNS: &str = "id, function_impl_id, goal, priority, created_at";
const ARTICLE_COLUMNS: &str = "id, title, description_html, created_at";

/// SQLite-based [`RecordStore`]
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open (or create) a database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory database (tests, dry runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════════════════════

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn api_level_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<ApiLevel> {
    let raw: String = row.get(idx)?;
    ApiLevel::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn read_family(row: &Row<'_>) -> rusqlite::Result<FunctionFamily> {
    Ok(FunctionFamily {
        id: row.get(0)?,
        slug: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        created_at: timestamp(row.get(4)?),
    })
}

fn read_function(row: &Row<'_>) -> rusqlite::Result<FunctionImpl> {
    Ok(FunctionImpl {
        id: row.get(0)?,
        family_id: row.get(1)?,
        real_name: row.get(2)?,
        summary: row.get(3)?,
        api_level: api_level_at(row, 4)?,
        network: row.get(5)?,
        gpu: row.get(6)?,
        signature_html: row.get(7)?,
        description_html: row.get(8)?,
        default_dataset_id: row.get(9)?,
        created_at: timestamp(row.get(10)?),
    })
}

fn read_benchmark(row: &Row<'_>) -> rusqlite::Result<Benchmark> {
    Ok(Benchmark {
        id: row.get(0)?,
        function_impl_id: row.get(1)?,
        title: row.get(2)?,
        description_html: row.get(3)?,
        highlighted: row.get(4)?,
        created_at: timestamp(row.get(5)?),
    })
}

fn read_dataset(row: &Row<'_>) -> rusqlite::Result<Dataset> {
    Ok(Dataset {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        description: row.get(3)?,
        download_url: row.get(4)?,
        created_at: timestamp(row.get(5)?),
    })
}

fn read_get_started(row: &Row<'_>) -> rusqlite::Result<GetStarted> {
    Ok(GetStarted {
        id: row.get(0)?,
        function_impl_id: row.get(1)?,
        goal: row.get(2)?,
        priority: row.get(3)?,
        created_at: timestamp(row.get(4)?),
    })
}

fn read_article(row: &Row<'_>) -> rusqlite::Result<DevArticle> {
    Ok(DevArticle {
        id: row.get(0)?,
        title: row.get(1)?,
        description_html: row.get(2)?,
        created_at: timestamp(row.get(3)?),
    })
}

fn read_pipeline(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        title: row.get(1)?,
        description_html: row.get(2)?,
        created_at: timestamp(row.get(3)?),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Query helpers (shared by reads and the commit path)
// ═══════════════════════════════════════════════════════════════════════════

fn require<T>(value: Option<T>, entity: &str, id: i64) -> Result<T> {
    value.ok_or_else(|| StorageError::not_found(entity, id))
}

fn ensure_exists(conn: &Connection, table: &str, id: i64) -> Result<()> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", table),
            params![id],
            |_| Ok(()),
        )
        .optional()?;
    require(found, table, id)
}

fn id_list(conn: &Connection, sql: &str, id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn get_one<T>(
    conn: &Connection,
    sql: &str,
    id: i64,
    read: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params![id], read).optional()?)
}

fn get_all<T>(
    conn: &Connection,
    sql: &str,
    read: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn get_function(conn: &Connection, id: FunctionId) -> Result<Option<FunctionImpl>> {
    get_one(
        conn,
        &format!("SELECT {} FROM function_impl WHERE id = ?1", FUNCTION_COLUMNS),
        id,
        read_function,
    )
}

fn datasets_where(conn: &Connection, join_sql: &str, id: i64) -> Result<Vec<Dataset>> {
    let sql = format!(
        "SELECT {} FROM dataset WHERE id IN ({}) ORDER BY name, id",
        DATASET_COLUMNS, join_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![id], read_dataset)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn dataset_usage(conn: &Connection, id: DatasetId) -> Result<DatasetUsage> {
    let benchmarks: i64 = conn.query_row(
        "SELECT COUNT(*) FROM benchmark_dataset WHERE dataset_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let pipelines: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pipeline_dataset WHERE dataset_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(DatasetUsage {
        benchmarks: benchmarks as usize,
        pipelines: pipelines as usize,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════════════════════

fn family_snapshot(conn: &Connection, id: FamilyId) -> Result<Option<FamilySnapshot>> {
    let row = get_one(
        conn,
        &format!("SELECT {} FROM function_family WHERE id = ?1", FAMILY_COLUMNS),
        id,
        read_family,
    )?;
    let Some(family) = row else {
        return Ok(None);
    };
    let function_ids = id_list(
        conn,
        "SELECT id FROM function_impl WHERE family_id = ?1 ORDER BY id",
        id,
    )?;
    Ok(Some(FamilySnapshot {
        id: family.id,
        slug: family.slug,
        display_name: family.display_name,
        description: family.description,
        function_ids,
    }))
}

fn function_snapshot(conn: &Connection, id: FunctionId) -> Result<Option<FunctionSnapshot>> {
    let sql = format!(
        "SELECT {},
            EXISTS (SELECT 1 FROM get_started g WHERE g.function_impl_id = function_impl.id),
            COALESCE((SELECT b.highlighted FROM benchmark b
                      WHERE b.function_impl_id = function_impl.id), 0)
         FROM function_impl WHERE id = ?1",
        FUNCTION_COLUMNS
    );
    let row = conn
        .query_row(&sql, params![id], |row| {
            let f = read_function(row)?;
            Ok(FunctionSnapshot {
                id: f.id,
                family_id: f.family_id,
                real_name: f.real_name,
                summary: f.summary,
                api_level: f.api_level,
                network: f.network,
                gpu: f.gpu,
                signature_html: f.signature_html,
                description_html: f.description_html,
                default_dataset_id: f.default_dataset_id,
                has_get_started: row.get(11)?,
                benchmark_highlighted: row.get(12)?,
                sibling_ids: Vec::new(),
            })
        })
        .optional()?;
    let Some(mut snapshot) = row else {
        return Ok(None);
    };
    snapshot.sibling_ids = id_list(
        conn,
        "SELECT s.id FROM function_impl s, function_impl f
         WHERE f.id = ?1 AND s.family_id = f.family_id AND s.id != f.id
         ORDER BY s.id",
        id,
    )?;
    Ok(Some(snapshot))
}

fn benchmark_snapshot(conn: &Connection, id: BenchmarkId) -> Result<Option<BenchmarkSnapshot>> {
    let row = get_one(
        conn,
        &format!("SELECT {} FROM benchmark WHERE id = ?1", BENCHMARK_COLUMNS),
        id,
        read_benchmark,
    )?;
    let Some(benchmark) = row else {
        return Ok(None);
    };
    let dataset_ids = id_list(
        conn,
        "SELECT dataset_id FROM benchmark_dataset WHERE benchmark_id = ?1 ORDER BY dataset_id",
        id,
    )?;
    Ok(Some(BenchmarkSnapshot {
        id: benchmark.id,
        function_impl_id: benchmark.function_impl_id,
        title: benchmark.title,
        description_html: benchmark.description_html,
        highlighted: benchmark.highlighted,
        dataset_ids,
    }))
}

fn dataset_snapshot(conn: &Connection, id: DatasetId) -> Result<Option<DatasetSnapshot>> {
    let row = get_one(
        conn,
        &format!("SELECT {} FROM dataset WHERE id = ?1", DATASET_COLUMNS),
        id,
        read_dataset,
    )?;
    let Some(dataset) = row else {
        return Ok(None);
    };
    let used_by_functions = id_list(
        conn,
        "SELECT function_impl_id FROM benchmark
             WHERE id IN (SELECT benchmark_id FROM benchmark_dataset WHERE dataset_id = ?1)
         UNION
         SELECT id FROM function_impl WHERE default_dataset_id = ?1
         ORDER BY 1",
        id,
    )?;
    let used_by_pipelines = id_list(
        conn,
        "SELECT pipeline_id FROM pipeline_dataset WHERE dataset_id = ?1 ORDER BY pipeline_id",
        id,
    )?;
    Ok(Some(DatasetSnapshot {
        id: dataset.id,
        name: dataset.name,
        version: dataset.version,
        description: dataset.description,
        download_url: dataset.download_url,
        used_by_functions,
        used_by_pipelines,
    }))
}

fn get_started_snapshot(conn: &Connection, id: PlanId) -> Result<Option<GetStartedSnapshot>> {
    let row = get_one(
        conn,
        &format!("SELECT {} FROM get_started WHERE id = ?1", GET_STARTED_COLUMNS),
        id,
        read_get_started,
    )?;
    Ok(row.map(|plan| GetStartedSnapshot {
        id: plan.id,
        function_impl_id: plan.function_impl_id,
        goal: plan.goal,
        priority: plan.priority,
    }))
}

fn article_snapshot(conn: &Connection, id: ArticleId) -> Result<Option<ArticleSnapshot>> {
    let row = get_one(
        conn,
        &format!("SELECT {} FROM dev WHERE id = ?1", ARTICLE_COLUMNS),
        id,
        read_article,
    )?;
    Ok(row.map(|article| ArticleSnapshot {
        id: article.id,
        title: article.title,
        description_html: article.description_html,
    }))
}

fn pipeline_snapshot(conn: &Connection, id: PipelineId) -> Result<Option<PipelineSnapshot>> {
    let row = get_one(
        conn,
        &format!("SELECT {} FROM pipeline WHERE id = ?1", ARTICLE_COLUMNS),
        id,
        read_pipeline,
    )?;
    let Some(pipeline) = row else {
        return Ok(None);
    };
    let dataset_ids = id_list(
        conn,
        "SELECT dataset_id FROM pipeline_dataset WHERE pipeline_id = ?1 ORDER BY dataset_id",
        id,
    )?;
    Ok(Some(PipelineSnapshot {
        id: pipeline.id,
        title: pipeline.title,
        description_html: pipeline.description_html,
        dataset_ids,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════
// Commit path
// ═══════════════════════════════════════════════════════════════════════════

fn validate_function_draft(conn: &Connection, draft: &FunctionDraft) -> Result<()> {
    ensure_exists(conn, FAMILY, draft.family_id)?;
    if let Some(dataset_id) = draft.default_dataset_id {
        ensure_exists(conn, DATASET, dataset_id)?;
    }
    Ok(())
}

fn replace_dataset_links(
    conn: &Connection,
    join_table: &str,
    owner_column: &str,
    owner_id: i64,
    dataset_ids: &[DatasetId],
) -> Result<()> {
    let unique: BTreeSet<DatasetId> = dataset_ids.iter().copied().collect();
    for dataset_id in &unique {
        ensure_exists(conn, DATASET, *dataset_id)?;
    }
    conn.execute(
        &format!("DELETE FROM {} WHERE {} = ?1", join_table, owner_column),
        params![owner_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} ({}, dataset_id) VALUES (?1, ?2)",
        join_table, owner_column
    ))?;
    for dataset_id in unique {
        stmt.execute(params![owner_id, dataset_id])?;
    }
    Ok(())
}

fn write_function(
    conn: &Connection,
    id: Option<FunctionId>,
    draft: &FunctionDraft,
) -> Result<FunctionId> {
    match id {
        Some(id) if get_function(conn, id)?.is_some() => {
            conn.execute(
                "UPDATE function_impl SET family_id = ?2, real_name = ?3, summary = ?4,
                     api_level = ?5, network = ?6, gpu = ?7, signature_html = ?8,
                     description_html = ?9, default_dataset_id = ?10
                 WHERE id = ?1",
                params![
                    id,
                    draft.family_id,
                    draft.real_name,
                    draft.summary,
                    draft.api_level.as_str(),
                    draft.network,
                    draft.gpu,
                    draft.signature_html,
                    draft.description_html,
                    draft.default_dataset_id,
                ],
            )?;
            Ok(id)
        }
        _ => {
            conn.execute(
                "INSERT INTO function_impl (id, family_id, real_name, summary, api_level, network,
                     gpu, signature_html, description_html, default_dataset_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    draft.family_id,
                    draft.real_name,
                    draft.summary,
                    draft.api_level.as_str(),
                    draft.network,
                    draft.gpu,
                    draft.signature_html,
                    draft.description_html,
                    draft.default_dataset_id,
                    now_millis(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

fn apply_change(conn: &Connection, change: EntityChange) -> Result<MutationEvent> {
    use EntityChange as C;
    use EntitySnapshot as S;

    let entity = change.entity();
    match change {
        // ── families ────────────────────────────────────────────────────────
        C::CreateFamily(new) => {
            let d = &new.draft;
            conn.execute(
                "INSERT INTO function_family (id, slug, display_name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new.id, d.slug, d.display_name, d.description, now_millis()],
            )?;
            let id = conn.last_insert_rowid();
            let post = require(family_snapshot(conn, id)?, FAMILY, id)?;
            Ok(MutationEvent::created(entity, S::Family(post)))
        }
        C::UpdateFamily { id, draft } => {
            let pre = require(family_snapshot(conn, id)?, FAMILY, id)?;
            conn.execute(
                "UPDATE function_family SET slug = ?2, display_name = ?3, description = ?4
                 WHERE id = ?1",
                params![id, draft.slug, draft.display_name, draft.description],
            )?;
            let post = require(family_snapshot(conn, id)?, FAMILY, id)?;
            Ok(MutationEvent::updated(entity, S::Family(pre), S::Family(post)))
        }
        C::DeleteFamily { id } => {
            let pre = require(family_snapshot(conn, id)?, FAMILY, id)?;
            if !pre.function_ids.is_empty() {
                return Err(StorageError::still_referenced(
                    FAMILY,
                    id,
                    format!("{} function(s)", pre.function_ids.len()),
                ));
            }
            conn.execute("DELETE FROM function_family WHERE id = ?1", params![id])?;
            Ok(MutationEvent::deleted(entity, S::Family(pre)))
        }

        // ── functions ───────────────────────────────────────────────────────
        C::CreateFunction(new) => {
            validate_function_draft(conn, &new.draft)?;
            if let Some(id) = new.id {
                if get_function(conn, id)?.is_some() {
                    return Err(StorageError::constraint(format!(
                        "{} {} already exists",
                        FUNCTION, id
                    )));
                }
            }
            let id = write_function(conn, new.id, &new.draft)?;
            let post = require(function_snapshot(conn, id)?, FUNCTION, id)?;
            Ok(MutationEvent::created(entity, S::Function(post)))
        }
        C::UpdateFunction { id, draft } => {
            let pre = require(function_snapshot(conn, id)?, FUNCTION, id)?;
            validate_function_draft(conn, &draft)?;
            write_function(conn, Some(id), &draft)?;
            let post = require(function_snapshot(conn, id)?, FUNCTION, id)?;
            Ok(MutationEvent::function_updated(pre, post))
        }
        C::ReassignFamily { id, family_id } => {
            let pre = require(function_snapshot(conn, id)?, FUNCTION, id)?;
            ensure_exists(conn, FAMILY, family_id)?;
            conn.execute(
                "UPDATE function_impl SET family_id = ?2 WHERE id = ?1",
                params![id, family_id],
            )?;
            let post = require(function_snapshot(conn, id)?, FUNCTION, id)?;
            Ok(MutationEvent::function_updated(pre, post))
        }
        C::DeleteFunction { id } => {
            let pre = require(function_snapshot(conn, id)?, FUNCTION, id)?;
            conn.execute("DELETE FROM function_impl WHERE id = ?1", params![id])?;
            Ok(MutationEvent::deleted(entity, S::Function(pre)))
        }

        // ── benchmarks ──────────────────────────────────────────────────────
        C::CreateBenchmark(new) => {
            let d = &new.draft;
            ensure_exists(conn, FUNCTION, d.function_impl_id)?;
            conn.execute(
                "INSERT INTO benchmark (id, function_impl_id, title, description_html,
                     highlighted, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.id,
                    d.function_impl_id,
                    d.title,
                    d.description_html,
                    d.highlighted,
                    now_millis()
                ],
            )?;
            let id = conn.last_insert_rowid();
            let post = require(benchmark_snapshot(conn, id)?, BENCHMARK, id)?;
            Ok(MutationEvent::created(entity, S::Benchmark(post)))
        }
        C::UpdateBenchmark { id, draft } => {
            let pre = require(benchmark_snapshot(conn, id)?, BENCHMARK, id)?;
            ensure_exists(conn, FUNCTION, draft.function_impl_id)?;
            conn.execute(
                "UPDATE benchmark SET function_impl_id = ?2, title = ?3, description_html = ?4,
                     highlighted = ?5
                 WHERE id = ?1",
                params![
                    id,
                    draft.function_impl_id,
                    draft.title,
                    draft.description_html,
                    draft.highlighted
                ],
            )?;
            let post = require(benchmark_snapshot(conn, id)?, BENCHMARK, id)?;
            Ok(MutationEvent::updated(entity, S::Benchmark(pre), S::Benchmark(post)))
        }
        C::SetBenchmarkDatasets {
            benchmark_id,
            dataset_ids,
        } => {
            let pre = require(benchmark_snapshot(conn, benchmark_id)?, BENCHMARK, benchmark_id)?;
            replace_dataset_links(
                conn,
                "benchmark_dataset",
                "benchmark_id",
                benchmark_id,
                &dataset_ids,
            )?;
            let post = require(benchmark_snapshot(conn, benchmark_id)?, BENCHMARK, benchmark_id)?;
            Ok(MutationEvent::updated(entity, S::Benchmark(pre), S::Benchmark(post)))
        }
        C::DeleteBenchmark { id } => {
            let pre = require(benchmark_snapshot(conn, id)?, BENCHMARK, id)?;
            conn.execute("DELETE FROM benchmark WHERE id = ?1", params![id])?;
            Ok(MutationEvent::deleted(entity, S::Benchmark(pre)))
        }

        // ── datasets ────────────────────────────────────────────────────────
        C::CreateDataset(new) => {
            let d = &new.draft;
            conn.execute(
                "INSERT INTO dataset (id, name, version, description, download_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![new.id, d.name, d.version, d.description, d.download_url, now_millis()],
            )?;
            let id = conn.last_insert_rowid();
            let post = require(dataset_snapshot(conn, id)?, DATASET, id)?;
            Ok(MutationEvent::created(entity, S::Dataset(post)))
        }
        C::UpdateDataset { id, draft } => {
            let pre = require(dataset_snapshot(conn, id)?, DATASET, id)?;
            conn.execute(
                "UPDATE dataset SET name = ?2, version = ?3, description = ?4, download_url = ?5
                 WHERE id = ?1",
                params![id, draft.name, draft.version, draft.description, draft.download_url],
            )?;
            let post = require(dataset_snapshot(conn, id)?, DATASET, id)?;
            Ok(MutationEvent::updated(entity, S::Dataset(pre), S::Dataset(post)))
        }
        C::DeleteDataset { id } => {
            let pre = require(dataset_snapshot(conn, id)?, DATASET, id)?;
            let usage = dataset_usage(conn, id)?;
            if usage.is_referenced() {
                return Err(StorageError::still_referenced(DATASET, id, usage));
            }
            conn.execute("DELETE FROM dataset WHERE id = ?1", params![id])?;
            Ok(MutationEvent::deleted(entity, S::Dataset(pre)))
        }

        // ── get-started plans ───────────────────────────────────────────────
        C::CreateGetStarted(new) => {
            let d = &new.draft;
            ensure_exists(conn, FUNCTION, d.function_impl_id)?;
            conn.execute(
                "INSERT INTO get_started (id, function_impl_id, goal, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new.id, d.function_impl_id, d.goal, d.priority, now_millis()],
            )?;
            let id = conn.last_insert_rowid();
            let post = require(get_started_snapshot(conn, id)?, GET_STARTED, id)?;
            Ok(MutationEvent::created(entity, S::GetStarted(post)))
        }
        C::UpdateGetStarted { id, draft } => {
            let pre = require(get_started_snapshot(conn, id)?, GET_STARTED, id)?;
            ensure_exists(conn, FUNCTION, draft.function_impl_id)?;
            conn.execute(
                "UPDATE get_started SET function_impl_id = ?2, goal = ?3, priority = ?4
                 WHERE id = ?1",
                params![id, draft.function_impl_id, draft.goal, draft.priority],
            )?;
            let post = require(get_started_snapshot(conn, id)?, GET_STARTED, id)?;
            Ok(MutationEvent::updated(entity, S::GetStarted(pre), S::GetStarted(post)))
        }
        C::DeleteGetStarted { id } => {
            let pre = require(get_started_snapshot(conn, id)?, GET_STARTED, id)?;
            conn.execute("DELETE FROM get_started WHERE id = ?1", params![id])?;
            Ok(MutationEvent::deleted(entity, S::GetStarted(pre)))
        }

        // ── dev articles ────────────────────────────────────────────────────
        C::CreateArticle(new) => {
            conn.execute(
                "INSERT INTO dev (id, title, description_html, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![new.id, new.draft.title, new.draft.description_html, now_millis()],
            )?;
            let id = conn.last_insert_rowid();
            let post = require(article_snapshot(conn, id)?, DEV, id)?;
            Ok(MutationEvent::created(entity, S::Article(post)))
        }
        C::UpdateArticle { id, draft } => {
            let pre = require(article_snapshot(conn, id)?, DEV, id)?;
            conn.execute(
                "UPDATE dev SET title = ?2, description_html = ?3 WHERE id = ?1",
                params![id, draft.title, draft.description_html],
            )?;
            let post = require(article_snapshot(conn, id)?, DEV, id)?;
            Ok(MutationEvent::updated(entity, S::Article(pre), S::Article(post)))
        }
        C::DeleteArticle { id } => {
            let pre = require(article_snapshot(conn, id)?, DEV, id)?;
            conn.execute("DELETE FROM dev WHERE id = ?1", params![id])?;
            Ok(MutationEvent::deleted(entity, S::Article(pre)))
        }

        // ── pipelines ───────────────────────────────────────────────────────
        C::CreatePipeline(new) => {
            conn.execute(
                "INSERT INTO pipeline (id, title, description_html, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![new.id, new.draft.title, new.draft.description_html, now_millis()],
            )?;
            let id = conn.last_insert_rowid();
            let post = require(pipeline_snapshot(conn, id)?, PIPELINE, id)?;
            Ok(MutationEvent::created(entity, S::Pipeline(post)))
        }
        C::UpdatePipeline { id, draft } => {
            let pre = require(pipeline_snapshot(conn, id)?, PIPELINE, id)?;
            conn.execute(
                "UPDATE pipeline SET title = ?2, description_html = ?3 WHERE id = ?1",
                params![id, draft.title, draft.description_html],
            )?;
            let post = require(pipeline_snapshot(conn, id)?, PIPELINE, id)?;
            Ok(MutationEvent::updated(entity, S::Pipeline(pre), S::Pipeline(post)))
        }
        C::SetPipelineDatasets {
            pipeline_id,
            dataset_ids,
        } => {
            let pre = require(pipeline_snapshot(conn, pipeline_id)?, PIPELINE, pipeline_id)?;
            replace_dataset_links(
                conn,
                "pipeline_dataset",
                "pipeline_id",
                pipeline_id,
                &dataset_ids,
            )?;
            let post = require(pipeline_snapshot(conn, pipeline_id)?, PIPELINE, pipeline_id)?;
            Ok(MutationEvent::updated(entity, S::Pipeline(pre), S::Pipeline(post)))
        }
        C::DeletePipeline { id } => {
            let pre = require(pipeline_snapshot(conn, id)?, PIPELINE, id)?;
            conn.execute("DELETE FROM pipeline WHERE id = ?1", params![id])?;
            Ok(MutationEvent::deleted(entity, S::Pipeline(pre)))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RecordStore
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn commit(&self, change: EntityChange) -> Result<MutationEvent> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        // Dropping `tx` on error rolls the transaction back
        let event = apply_change(&tx, change)?;
        tx.commit()?;

        debug!(
            entity = %event.entity,
            kind = %event.kind,
            id = ?event.entity_id(),
            "Committed mutation"
        );
        Ok(event)
    }

    async fn get_family(&self, id: FamilyId) -> Result<Option<FunctionFamily>> {
        let conn = self.conn.lock();
        get_one(
            &conn,
            &format!("SELECT {} FROM function_family WHERE id = ?1", FAMILY_COLUMNS),
            id,
            read_family,
        )
    }

    async fn list_families(&self) -> Result<Vec<FunctionFamily>> {
        let conn = self.conn.lock();
        get_all(
            &conn,
            &format!(
                "SELECT {} FROM function_family ORDER BY display_name, id",
                FAMILY_COLUMNS
            ),
            read_family,
        )
    }

    async fn get_function(&self, id: FunctionId) -> Result<Option<FunctionImpl>> {
        let conn = self.conn.lock();
        get_function(&conn, id)
    }

    async fn list_functions(&self, filter: FunctionFilter) -> Result<Vec<FunctionImpl>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM function_impl
             WHERE family_id = ?1
               AND (?2 IS NULL OR api_level = ?2)
               AND (?3 IS NULL OR network = ?3)
               AND (?4 IS NULL OR gpu = ?4)
             ORDER BY real_name, id",
            FUNCTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    filter.family_id,
                    filter.api_level.map(|l| l.as_str()),
                    filter.network,
                    filter.gpu
                ],
                read_function,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn list_all_functions(&self) -> Result<Vec<FunctionImpl>> {
        let conn = self.conn.lock();
        get_all(
            &conn,
            &format!("SELECT {} FROM function_impl ORDER BY id", FUNCTION_COLUMNS),
            read_function,
        )
    }

    async fn benchmark_for_function(&self, function_id: FunctionId) -> Result<Option<Benchmark>> {
        let conn = self.conn.lock();
        get_one(
            &conn,
            &format!(
                "SELECT {} FROM benchmark WHERE function_impl_id = ?1",
                BENCHMARK_COLUMNS
            ),
            function_id,
            read_benchmark,
        )
    }

    async fn list_highlighted_benchmarks(&self) -> Result<Vec<Benchmark>> {
        let conn = self.conn.lock();
        get_all(
            &conn,
            &format!(
                "SELECT {} FROM benchmark WHERE highlighted = 1
                 ORDER BY created_at DESC, id DESC",
                BENCHMARK_COLUMNS
            ),
            read_benchmark,
        )
    }

    async fn get_dataset(&self, id: DatasetId) -> Result<Option<Dataset>> {
        let conn = self.conn.lock();
        get_one(
            &conn,
            &format!("SELECT {} FROM dataset WHERE id = ?1", DATASET_COLUMNS),
            id,
            read_dataset,
        )
    }

    async fn datasets_for_benchmark(&self, benchmark_id: BenchmarkId) -> Result<Vec<Dataset>> {
        let conn = self.conn.lock();
        datasets_where(
            &conn,
            "SELECT dataset_id FROM benchmark_dataset WHERE benchmark_id = ?1",
            benchmark_id,
        )
    }

    async fn datasets_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Dataset>> {
        let conn = self.conn.lock();
        datasets_where(
            &conn,
            "SELECT dataset_id FROM pipeline_dataset WHERE pipeline_id = ?1",
            pipeline_id,
        )
    }

    async fn dataset_usage(&self, id: DatasetId) -> Result<DatasetUsage> {
        let conn = self.conn.lock();
        dataset_usage(&conn, id)
    }

    async fn list_get_started(&self) -> Result<Vec<GetStarted>> {
        let conn = self.conn.lock();
        // SQLite sorts NULL before any integer
        get_all(
            &conn,
            &format!(
                "SELECT {} FROM get_started ORDER BY priority ASC, id ASC",
                GET_STARTED_COLUMNS
            ),
            read_get_started,
        )
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<DevArticle>> {
        let conn = self.conn.lock();
        get_one(
            &conn,
            &format!("SELECT {} FROM dev WHERE id = ?1", ARTICLE_COLUMNS),
            id,
            read_article,
        )
    }

    async fn list_articles(&self) -> Result<Vec<DevArticle>> {
        let conn = self.conn.lock();
        get_all(
            &conn,
            &format!(
                "SELECT {} FROM dev ORDER BY created_at DESC, id DESC",
                ARTICLE_COLUMNS
            ),
            read_article,
        )
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        let conn = self.conn.lock();
        get_one(
            &conn,
            &format!("SELECT {} FROM pipeline WHERE id = ?1", ARTICLE_COLUMNS),
            id,
            read_pipeline,
        )
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let conn = self.conn.lock();
        get_all(
            &conn,
            &format!(
                "SELECT {} FROM pipeline ORDER BY created_at DESC, id DESC",
                ARTICLE_COLUMNS
            ),
            read_pipeline,
        )
    }
}
