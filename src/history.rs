//! File-backed analysis history
//!
//! Every run is one JSON record in the analyses directory, written with
//! status=running when dispatched and rewritten in place when the run
//! finishes. A flattened text rendering is emitted next to the record at
//! completion. Filenames are `{name}-{feature}-{test}-{timestamp}.json`;
//! one record per filename, single-writer discipline assumed.

use crate::analysis::{ResultMap, StatTest, TestOutcome};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// ============================================================================
// Run status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Failed,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
        }
    }

    /// Status marker shown in the history list
    pub fn glyph(&self) -> &'static str {
        match self {
            RunStatus::Completed => "✓",
            RunStatus::Running => "▶",
            RunStatus::Failed => "✗",
            RunStatus::NotStarted => "○",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// One persisted analysis: request, lifecycle state and (once finished)
/// the per-region results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub name: String,
    pub timestamp: String,
    pub cohort: Vec<String>,
    pub feature: String,
    pub test: StatTest,
    pub apply_fdr: bool,
    #[serde(default)]
    pub results: Option<ResultMap>,
    pub status: RunStatus,
    #[serde(default)]
    pub timestamp_ended: Option<String>,
}

/// Display name shown in the UI and stored in the DB log
pub fn display_name(name: &str, feature: &str, test: StatTest, timestamp: &str) -> String {
    format!("{} - {} - {} - {}", name, feature, test, timestamp)
}

/// Record filename derived from the request; collisions require an
/// identical name+feature+test+timestamp and overwrite in place.
pub fn record_filename(name: &str, feature: &str, test: StatTest, timestamp: &str) -> String {
    let compact: String = timestamp
        .chars()
        .filter(|c| *c != '-' && *c != ':')
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();
    format!("{}-{}-{}-{}.json", name, feature, test, compact)
}

/// One row of the history selector
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub label: String,
    pub filename: String,
    pub status: RunStatus,
}

// ============================================================================
// Store
// ============================================================================

/// Error type for history operations
#[derive(Debug)]
pub enum HistoryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    NotFound(String),
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::Io(e) => write!(f, "I/O error: {}", e),
            HistoryError::Json(e) => write!(f, "serialization error: {}", e),
            HistoryError::NotFound(name) => write!(f, "no analysis record '{}'", name),
        }
    }
}

impl std::error::Error for HistoryError {}

impl From<std::io::Error> for HistoryError {
    fn from(e: std::io::Error) -> Self {
        HistoryError::Io(e)
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Append-only log of analysis records keyed by generated filename
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn record_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    fn text_path(&self, filename: &str) -> PathBuf {
        self.dir.join(Path::new(filename).with_extension("txt"))
    }

    /// Persist a freshly dispatched record (status=running).
    pub fn begin(&self, record: &AnalysisRecord, filename: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.record_path(filename);
        if path.exists() {
            log::warn!("Overwriting existing analysis record {}", filename);
        }
        fs::write(&path, serde_json::to_vec_pretty(record)?)?;
        log::info!("Saved analysis record {} ({})", filename, record.status);
        Ok(())
    }

    /// Merge results and final status into an existing record, rewrite it
    /// and emit the text rendering. Returns the merged record.
    pub fn complete(
        &self,
        filename: &str,
        results: Option<ResultMap>,
        status: RunStatus,
    ) -> Result<AnalysisRecord> {
        let mut record = self.load(filename)?;
        record.results = results;
        record.status = status;
        record.timestamp_ended =
            Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());

        fs::write(self.record_path(filename), serde_json::to_vec_pretty(&record)?)?;
        self.write_text(filename, &record)?;
        log::info!("Saved analysis results to {} ({})", filename, status);
        Ok(record)
    }

    pub fn load(&self, filename: &str) -> Result<AnalysisRecord> {
        let path = self.record_path(filename);
        if !path.exists() {
            return Err(HistoryError::NotFound(filename.to_string()));
        }
        let data = fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// All stored records, newest first by file creation time.
    ///
    /// Unreadable records are skipped with a warning so one corrupt file
    /// does not hide the rest of the history.
    pub fn list(&self) -> Result<Vec<HistoryEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let meta = entry.metadata()?;
            let stamp = meta.created().or_else(|_| meta.modified())?;
            files.push((path, stamp));
        }
        files.sort_by(|a, b| b.1.cmp(&a.1));

        let mut entries = Vec::with_capacity(files.len());
        for (path, _) in files {
            let filename = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            match self.load(&filename) {
                Ok(record) => entries.push(HistoryEntry {
                    label: format!("{} {}", record.status.glyph(), record.name),
                    status: record.status,
                    filename,
                }),
                Err(e) => {
                    log::warn!("Error loading analysis record {}: {}", filename, e);
                }
            }
        }
        Ok(entries)
    }

    fn write_text(&self, filename: &str, record: &AnalysisRecord) -> Result<()> {
        let mut out = fs::File::create(self.text_path(filename))?;
        writeln!(out, "name: {}", record.name)?;
        writeln!(out, "timestamp: {}", record.timestamp)?;
        writeln!(out, "cohort: {}", record.cohort.join(","))?;
        writeln!(out, "feature: {}", record.feature)?;
        writeln!(out, "test: {}", record.test)?;
        writeln!(out, "apply_fdr: {}", record.apply_fdr)?;
        writeln!(out, "status: {}", record.status)?;
        writeln!(
            out,
            "timestamp_ended: {}",
            record.timestamp_ended.as_deref().unwrap_or("")
        )?;
        if let Some(results) = &record.results {
            writeln!(out, "results:")?;
            for (region, result) in results {
                write!(out, "  {}: ", region)?;
                match result.outcome {
                    TestOutcome::Pearson { r, p } | TestOutcome::Spearman { r, p } => {
                        write!(out, "r={:.6} p={:.6}", r, p)?;
                    }
                    TestOutcome::TTest { t, p } => write!(out, "t={:.6} p={:.6}", t, p)?,
                    TestOutcome::Anova { f, p } => write!(out, "f={:.6} p={:.6}", f, p)?,
                    TestOutcome::Neutral { p } => write!(out, "p={:.6}", p)?,
                }
                if let Some(adj) = result.adjusted {
                    write!(
                        out,
                        " p_adjusted={:.6} significant={}",
                        adj.p_adjusted, adj.significant
                    )?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Adjusted, RegionResult};
    use std::collections::BTreeMap;

    fn sample_record(status: RunStatus) -> AnalysisRecord {
        AnalysisRecord {
            name: "AgeStudy - age - pearson - 2024-01-01 10:00:00".to_string(),
            timestamp: "2024-01-01 10:00:00".to_string(),
            cohort: vec!["sub-01".to_string(), "sub-02".to_string()],
            feature: "age".to_string(),
            test: StatTest::Pearson,
            apply_fdr: true,
            results: None,
            status,
            timestamp_ended: None,
        }
    }

    fn sample_results() -> ResultMap {
        let mut results = BTreeMap::new();
        results.insert(
            "Left-Hippocampus".to_string(),
            RegionResult {
                outcome: TestOutcome::Pearson { r: 0.524, p: 0.476 },
                adjusted: Some(Adjusted { p_adjusted: 0.476, significant: false }),
            },
        );
        results.insert(
            "Brain-Stem".to_string(),
            RegionResult {
                outcome: TestOutcome::Neutral { p: 1.0 },
                adjusted: None,
            },
        );
        results
    }

    // ==========================================================================
    // LIFECYCLE TESTS
    // ==========================================================================

    #[test]
    fn test_begin_then_complete_single_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());
        let filename =
            record_filename("AgeStudy", "age", StatTest::Pearson, "2024-01-01 10:00:00");

        store.begin(&sample_record(RunStatus::Running), &filename).unwrap();
        let merged = store
            .complete(&filename, Some(sample_results()), RunStatus::Completed)
            .unwrap();

        assert_eq!(merged.status, RunStatus::Completed);
        assert_eq!(merged.results, Some(sample_results()));
        assert!(merged.timestamp_ended.is_some());

        // Exactly one record for the filename
        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, filename);
        assert!(entries[0].label.starts_with("✓ "));

        // Text rendering sits next to the record
        let text = std::fs::read_to_string(
            tmp.path().join(filename.replace(".json", ".txt")),
        )
        .unwrap();
        assert!(text.contains("status: completed"));
        assert!(text.contains("Left-Hippocampus"));
    }

    #[test]
    fn test_rerun_overwrites_by_filename() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());
        let filename =
            record_filename("AgeStudy", "age", StatTest::Pearson, "2024-01-01 10:00:00");

        store.begin(&sample_record(RunStatus::Running), &filename).unwrap();
        store
            .complete(&filename, None, RunStatus::Failed)
            .unwrap();

        // Re-dispatch under the identical generated name
        store.begin(&sample_record(RunStatus::Running), &filename).unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.load(&filename).unwrap().status, RunStatus::Running);
    }

    #[test]
    fn test_load_round_trips_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());
        let filename =
            record_filename("AgeStudy", "age", StatTest::Pearson, "2024-01-01 10:00:00");

        let mut record = sample_record(RunStatus::Completed);
        record.results = Some(sample_results());
        record.timestamp_ended = Some("2024-01-01 10:00:21".to_string());
        store.begin(&record, &filename).unwrap();

        let restored = store.load(&filename).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_complete_without_begin_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());
        assert!(matches!(
            store.complete("missing.json", None, RunStatus::Completed),
            Err(HistoryError::NotFound(_))
        ));
    }

    // ==========================================================================
    // LISTING TESTS
    // ==========================================================================

    #[test]
    fn test_list_newest_first_with_glyphs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());

        let first = record_filename("First", "age", StatTest::Pearson, "2024-01-01 10:00:00");
        store.begin(&sample_record(RunStatus::Running), &first).unwrap();
        store.complete(&first, None, RunStatus::Failed).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(30));

        let second = record_filename("Second", "age", StatTest::Pearson, "2024-01-01 11:00:00");
        store.begin(&sample_record(RunStatus::Running), &second).unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].filename, second);
        assert_eq!(entries[0].status, RunStatus::Running);
        assert!(entries[0].label.starts_with("▶ "));
        assert!(entries[1].label.starts_with("✗ "));
    }

    #[test]
    fn test_list_skips_unreadable_records() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(tmp.path());

        let good = record_filename("Good", "age", StatTest::Pearson, "2024-01-01 10:00:00");
        store.begin(&sample_record(RunStatus::Running), &good).unwrap();
        std::fs::write(tmp.path().join("broken.json"), b"not json").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, good);
    }

    // ==========================================================================
    // NAMING TESTS
    // ==========================================================================

    #[test]
    fn test_filename_shape() {
        let filename =
            record_filename("AgeStudy", "age", StatTest::TTest, "2024-01-01 10:00:00");
        assert_eq!(filename, "AgeStudy-age-t-test-20240101_100000.json");

        let label = display_name("AgeStudy", "age", StatTest::TTest, "2024-01-01 10:00:00");
        assert_eq!(label, "AgeStudy - age - t-test - 2024-01-01 10:00:00");
    }
}
