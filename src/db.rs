//! SQLite database with Diesel ORM
//!
//! Stores the subject ingestion registry and the append-only log of
//! analysis runs. Schema is created on open with raw SQL.

use crate::schema::*;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// Subject status
// ============================================================================

/// Ingestion state of one subject, advanced by the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Preprocessed,
    FreesurferProcessing,
    FreesurferCompleted,
    FreesurferFailed,
    UpdateTableProcessing,
    UpdateTableCompleted,
    UpdateTableFailed,
}

impl SubjectStatus {
    pub const ALL: [SubjectStatus; 7] = [
        SubjectStatus::Preprocessed,
        SubjectStatus::FreesurferProcessing,
        SubjectStatus::FreesurferCompleted,
        SubjectStatus::FreesurferFailed,
        SubjectStatus::UpdateTableProcessing,
        SubjectStatus::UpdateTableCompleted,
        SubjectStatus::UpdateTableFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Preprocessed => "preprocessed",
            SubjectStatus::FreesurferProcessing => "freesurfer_processing",
            SubjectStatus::FreesurferCompleted => "freesurfer_completed",
            SubjectStatus::FreesurferFailed => "freesurfer_failed",
            SubjectStatus::UpdateTableProcessing => "update_table_processing",
            SubjectStatus::UpdateTableCompleted => "update_table_completed",
            SubjectStatus::UpdateTableFailed => "update_table_failed",
        }
    }

    /// Subjects a stage may be (re)started from.
    pub fn eligible_for_recon_all(&self) -> bool {
        matches!(
            self,
            SubjectStatus::Preprocessed | SubjectStatus::FreesurferFailed
        )
    }

    pub fn eligible_for_update_table(&self) -> bool {
        matches!(
            self,
            SubjectStatus::FreesurferCompleted | SubjectStatus::UpdateTableFailed
        )
    }
}

impl FromStr for SubjectStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SubjectStatus::ALL
            .iter()
            .find(|v| v.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown subject status '{}'", s))
    }
}

impl std::fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable subject
#[derive(Insertable)]
#[diesel(table_name = subjects)]
pub struct NewSubject<'a> {
    pub subject_id: &'a str,
    pub file_name: &'a str,
    pub status: &'a str,
}

/// Queryable subject (database record)
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = subjects)]
pub struct Subject {
    pub subject_id: String,
    pub file_name: String,
    pub status: String,
}

impl Subject {
    pub fn status(&self) -> Result<SubjectStatus> {
        self.status
            .parse()
            .map_err(|e: String| DbError::Connection(e))
    }
}

/// Insertable analysis-run row
#[derive(Insertable)]
#[diesel(table_name = analysis_results)]
pub struct NewAnalysisRow<'a> {
    pub analysis_name: &'a str,
    pub selected_subjects: &'a str,
    pub selected_feature: &'a str,
    pub selected_statistical: &'a str,
    pub results: Option<&'a str>,
    pub status: &'a str,
    pub timestamp: &'a str,
}

/// Queryable analysis-run row
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = analysis_results)]
pub struct AnalysisRow {
    pub id: i32,
    pub analysis_name: String,
    pub selected_subjects: String,
    pub selected_feature: String,
    pub selected_statistical: String,
    pub results: Option<String>,
    pub status: String,
    pub timestamp: String,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

/// Error type for database operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    Pool(diesel::r2d2::Error),
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "Connection error: {}", msg),
            DbError::Query(e) => write!(f, "Query error: {}", e),
            DbError::Pool(e) => write!(f, "Pool error: {}", e),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        DbError::Query(e)
    }
}

impl From<diesel::r2d2::Error> for DbError {
    fn from(e: diesel::r2d2::Error) -> Self {
        DbError::Pool(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl Database {
    /// Open database at the given path, creating the schema if needed
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS subjects (
                subject_id TEXT PRIMARY KEY NOT NULL,
                file_name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'preprocessed'
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                analysis_name TEXT NOT NULL,
                selected_subjects TEXT NOT NULL,
                selected_feature TEXT NOT NULL,
                selected_statistical TEXT NOT NULL,
                results TEXT,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_subjects_status ON subjects(status)")
            .execute(&mut conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_subjects_file_name ON subjects(file_name)",
        )
        .execute(&mut conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_status ON analysis_results(status)",
        )
        .execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Subjects
    // ========================================================================

    /// Register a newly arrived scan file as a subject
    pub fn insert_subject(&self, subject_id: &str, file_name: &str) -> Result<()> {
        let mut conn = self.get_conn()?;

        let new_subject = NewSubject {
            subject_id,
            file_name,
            status: SubjectStatus::Preprocessed.as_str(),
        };

        diesel::insert_into(subjects::table)
            .values(&new_subject)
            .execute(&mut conn)?;

        Ok(())
    }

    pub fn subject_by_id(&self, id: &str) -> Result<Option<Subject>> {
        let mut conn = self.get_conn()?;

        let subject = subjects::table
            .filter(subjects::subject_id.eq(id))
            .first::<Subject>(&mut conn)
            .optional()?;

        Ok(subject)
    }

    pub fn subject_by_file_name(&self, file_name: &str) -> Result<Option<Subject>> {
        let mut conn = self.get_conn()?;

        let subject = subjects::table
            .filter(subjects::file_name.eq(file_name))
            .first::<Subject>(&mut conn)
            .optional()?;

        Ok(subject)
    }

    /// All subjects, newest ids first (admin listing order)
    pub fn all_subjects(&self) -> Result<Vec<Subject>> {
        let mut conn = self.get_conn()?;

        let rows = subjects::table
            .order(subjects::subject_id.desc())
            .load::<Subject>(&mut conn)?;

        Ok(rows)
    }

    /// Subjects currently in any of the given statuses
    pub fn subjects_with_status(&self, statuses: &[SubjectStatus]) -> Result<Vec<Subject>> {
        let mut conn = self.get_conn()?;
        let wanted: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();

        let rows = subjects::table
            .filter(subjects::status.eq_any(wanted))
            .order(subjects::subject_id.asc())
            .load::<Subject>(&mut conn)?;

        Ok(rows)
    }

    pub fn update_subject_status(&self, id: &str, status: SubjectStatus) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::update(subjects::table.filter(subjects::subject_id.eq(id)))
            .set(subjects::status.eq(status.as_str()))
            .execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Analysis runs
    // ========================================================================

    /// Append one finished (or failed) run to the log
    pub fn insert_analysis(&self, row: &NewAnalysisRow) -> Result<i64> {
        let mut conn = self.get_conn()?;

        diesel::insert_into(analysis_results::table)
            .values(row)
            .execute(&mut conn)?;

        let id: i32 = diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>(
            "last_insert_rowid()",
        ))
        .first(&mut conn)?;

        Ok(id as i64)
    }

    /// All logged runs, newest first
    pub fn all_analyses(&self) -> Result<Vec<AnalysisRow>> {
        let mut conn = self.get_conn()?;

        let rows = analysis_results::table
            .order(analysis_results::id.desc())
            .load::<AnalysisRow>(&mut conn)?;

        Ok(rows)
    }

    // ========================================================================
    // Summaries
    // ========================================================================

    /// Get summary statistics for the admin overview
    pub fn get_summary(&self) -> Result<DbSummary> {
        let mut conn = self.get_conn()?;

        let subject_count: i64 = subjects::table.count().get_result(&mut conn)?;
        let analysis_count: i64 = analysis_results::table.count().get_result(&mut conn)?;

        let subject_statuses: Vec<String> =
            subjects::table.select(subjects::status).load(&mut conn)?;
        let analysis_statuses: Vec<String> = analysis_results::table
            .select(analysis_results::status)
            .load(&mut conn)?;
        let analysis_tests: Vec<String> = analysis_results::table
            .select(analysis_results::selected_statistical)
            .load(&mut conn)?;

        Ok(DbSummary {
            subject_count: subject_count as i32,
            analysis_count: analysis_count as i32,
            subject_status_counts: count_by(subject_statuses),
            analysis_status_counts: count_by(analysis_statuses),
            statistical_test_counts: count_by(analysis_tests),
        })
    }
}

fn count_by(values: Vec<String>) -> BTreeMap<String, i32> {
    let mut counts = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
}

/// Summary statistics from the database
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbSummary {
    pub subject_count: i32,
    pub analysis_count: i32,
    pub subject_status_counts: BTreeMap<String, i32>,
    pub analysis_status_counts: BTreeMap<String, i32>,
    pub statistical_test_counts: BTreeMap<String, i32>,
}
