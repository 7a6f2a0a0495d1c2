//! FreeSurfer pipeline stages
//!
//! Wraps the external FreeSurfer tools as two stages per subject: full
//! reconstruction (`recon-all`) and summary-table update
//! (`asegstats2table` / `aparcstats2table`). Each invocation owns its
//! subject's status transitions and drops a sentinel outcome file under
//! the run directory when it finishes, so completion is observable
//! without polling the status column.

use crate::db::{Database, DbError, SubjectStatus};
use crate::settings::Settings;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Error type for pipeline operations
#[derive(Debug)]
pub enum PipelineError {
    Io(std::io::Error),
    Csv(csv::Error),
    Db(DbError),
    SubjectNotFound(String),
    WrongStatus { subject: String, status: String },
    CommandFailed { command: String, stdout: String, stderr: String },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Io(e) => write!(f, "I/O error: {}", e),
            PipelineError::Csv(e) => write!(f, "CSV error: {}", e),
            PipelineError::Db(e) => write!(f, "database error: {}", e),
            PipelineError::SubjectNotFound(name) => {
                write!(f, "subject with file name '{}' not found", name)
            }
            PipelineError::WrongStatus { subject, status } => {
                write!(f, "subject '{}' is in status '{}'", subject, status)
            }
            PipelineError::CommandFailed { command, stdout, .. } => {
                // FreeSurfer reports its errors on stdout
                write!(f, "command failed: {} with error: {}", command, stdout)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e)
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Csv(e)
    }
}

impl From<DbError> for PipelineError {
    fn from(e: DbError) -> Self {
        PipelineError::Db(e)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// The two external pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReconAll,
    UpdateTable,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ReconAll => "recon_all",
            Stage::UpdateTable => "update_table",
        }
    }
}

// ============================================================================
// Job
// ============================================================================

/// One subject's FreeSurfer invocation context
pub struct FreeSurferJob<'a> {
    settings: &'a Settings,
    file_name: String,
    subject_name: String,
    input_path: PathBuf,
}

impl<'a> FreeSurferJob<'a> {
    pub fn new(settings: &'a Settings, file_name: &str) -> Self {
        // Strip every suffix for the FreeSurfer subject id
        let subject_name = file_name
            .split('.')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(file_name)
            .to_string();
        FreeSurferJob {
            input_path: settings.data_dir.join(file_name),
            file_name: file_name.to_string(),
            subject_name,
            settings,
        }
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    /// Environment preamble sourced before every FreeSurfer command
    fn command_prefix(&self) -> String {
        format!(
            "export FREESURFER_HOME={} && export SUBJECTS_DIR={} && source {} && ",
            self.settings.freesurfer_home.display(),
            self.settings.subjects_dir.display(),
            self.settings.freesurfer_env_file.display()
        )
    }

    fn run_command(&self, command: &str) -> Result<(String, String)> {
        log::info!("Running command: {} for subject {}", command, self.subject_name);
        let output = Command::new("sh").arg("-c").arg(command).output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok((stdout, stderr))
        } else {
            log::error!(
                "Command failed with status {:?}, stderr: {}",
                output.status.code(),
                stderr
            );
            Err(PipelineError::CommandFailed { command: command.to_string(), stdout, stderr })
        }
    }

    /// Full cortical reconstruction for this subject
    pub fn run_recon_all(&self) -> Result<()> {
        let command = format!(
            "{}recon-all -i {} -s {} -all",
            self.command_prefix(),
            self.input_path.display(),
            self.subject_name
        );
        self.run_command(&command)?;
        log::info!("recon-all completed for subject {}", self.subject_name);
        Ok(())
    }

    /// Regenerate the three wide tables and merge them into the standing CSVs
    pub fn update_freesurfer_tables(&self) -> Result<()> {
        let table_commands: [(&str, &Path, &str); 3] = [
            ("asegstats2table", &self.settings.aseg_csv, "--meas volume "),
            ("aparcstats2table --hemi lh", &self.settings.aparc_lh_csv, ""),
            ("aparcstats2table --hemi rh", &self.settings.aparc_rh_csv, ""),
        ];

        for (base, table_path, meas_flag) in table_commands {
            let staging = tempfile::Builder::new()
                .prefix("braindash-table-")
                .suffix(".csv")
                .tempfile()?;
            let command = format!(
                "{}{} --subjects {} {}--delimiter comma --tablefile {}",
                self.command_prefix(),
                base,
                self.subject_name,
                meas_flag,
                staging.path().display()
            );
            self.run_command(&command)?;
            merge_table(table_path, staging.path())?;
            log::info!(
                "Updated table {} with subject {}",
                table_path.display(),
                self.subject_name
            );
        }
        Ok(())
    }

    /// Explicit completion signal for this stage, alongside the status column
    fn write_sentinel(&self, stage: Stage, ok: bool, detail: &str) {
        let sentinel = serde_json::json!({
            "subject": self.subject_name,
            "file_name": self.file_name,
            "stage": stage.as_str(),
            "ok": ok,
            "finished_at": chrono::Local::now().to_rfc3339(),
            "detail": detail,
        });
        let path = self
            .settings
            .pipeline_dir
            .join(format!("{}.{}.json", self.subject_name, stage.as_str()));
        if let Err(e) = fs::write(&path, sentinel.to_string()) {
            log::warn!("Could not write stage sentinel {}: {}", path.display(), e);
        }
    }
}

// ============================================================================
// Table merging
// ============================================================================

/// Merge a freshly generated wide table into the standing one.
///
/// The existing file is backed up with a timestamp; rows whose subject id
/// (first column) appears in the new table are replaced; columns are the
/// union, existing order first. A missing or empty standing table is
/// simply replaced by the new one.
pub fn merge_table(existing: &Path, new: &Path) -> Result<()> {
    if let Some(parent) = existing.parent() {
        fs::create_dir_all(parent)?;
    }

    let standing = existing.exists() && fs::metadata(existing)?.len() > 0;
    if !standing {
        fs::copy(new, existing)?;
        return Ok(());
    }

    let date_str = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let backup = existing.with_file_name(format!(
        "{}_backup_{}.csv",
        existing.file_stem().and_then(|s| s.to_str()).unwrap_or("table"),
        date_str
    ));
    fs::copy(existing, &backup)?;
    log::info!("Backup created: {}", backup.display());

    let (old_headers, old_rows) = read_csv(existing)?;
    let (new_headers, new_rows) = read_csv(new)?;

    // Union of columns, existing order first
    let mut headers = old_headers.clone();
    for h in &new_headers {
        if !headers.contains(h) {
            headers.push(h.clone());
        }
    }

    let new_ids: Vec<&String> = new_rows.iter().filter_map(|r| r.first()).collect();

    let mut writer = csv::Writer::from_path(existing)?;
    writer.write_record(&headers)?;
    for row in &old_rows {
        if row.first().map(|id| new_ids.contains(&id)).unwrap_or(false) {
            continue;
        }
        writer.write_record(align_row(row, &old_headers, &headers))?;
    }
    for row in &new_rows {
        writer.write_record(align_row(row, &new_headers, &headers))?;
    }
    writer.flush().map_err(PipelineError::Io)?;
    Ok(())
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|v| v.to_string()).collect());
    }
    Ok((headers, rows))
}

fn align_row(row: &[String], from: &[String], to: &[String]) -> Vec<String> {
    to.iter()
        .map(|col| {
            from.iter()
                .position(|c| c == col)
                .and_then(|idx| row.get(idx))
                .cloned()
                .unwrap_or_default()
        })
        .collect()
}

// ============================================================================
// Stage driver
// ============================================================================

/// Run one stage for the subject registered under `file_name`, owning the
/// status transitions around the external command.
pub fn run_stage(
    settings: &Settings,
    db: &Database,
    file_name: &str,
    stage: Stage,
) -> Result<()> {
    let subject = db
        .subject_by_file_name(file_name)?
        .ok_or_else(|| PipelineError::SubjectNotFound(file_name.to_string()))?;
    let job = FreeSurferJob::new(settings, file_name);

    match stage {
        Stage::ReconAll => {
            log::info!("Starting FreeSurfer processing for subject {}", subject.subject_id);
            db.update_subject_status(&subject.subject_id, SubjectStatus::FreesurferProcessing)?;

            match job.run_recon_all() {
                Ok(()) => {
                    db.update_subject_status(
                        &subject.subject_id,
                        SubjectStatus::FreesurferCompleted,
                    )?;
                    job.write_sentinel(stage, true, "");
                    Ok(())
                }
                Err(e) => {
                    log::error!(
                        "FreeSurfer processing failed for subject {}: {}",
                        subject.subject_id,
                        e
                    );
                    db.update_subject_status(
                        &subject.subject_id,
                        SubjectStatus::FreesurferFailed,
                    )?;
                    job.write_sentinel(stage, false, &e.to_string());
                    Err(e)
                }
            }
        }
        Stage::UpdateTable => {
            let status = subject.status()?;
            if !status.eligible_for_update_table() {
                log::error!(
                    "Cannot update tables: subject {} status is '{}'",
                    subject.subject_id,
                    status
                );
                return Err(PipelineError::WrongStatus {
                    subject: subject.subject_id,
                    status: status.as_str().to_string(),
                });
            }

            log::info!("Starting FreeSurfer table update for subject {}", subject.subject_id);
            db.update_subject_status(&subject.subject_id, SubjectStatus::UpdateTableProcessing)?;

            match job.update_freesurfer_tables() {
                Ok(()) => {
                    db.update_subject_status(
                        &subject.subject_id,
                        SubjectStatus::UpdateTableCompleted,
                    )?;
                    job.write_sentinel(stage, true, "");
                    Ok(())
                }
                Err(e) => {
                    log::error!(
                        "Updating FreeSurfer tables failed for subject {}: {}",
                        subject.subject_id,
                        e
                    );
                    db.update_subject_status(
                        &subject.subject_id,
                        SubjectStatus::UpdateTableFailed,
                    )?;
                    job.write_sentinel(stage, false, &e.to_string());
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, content: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    // ==========================================================================
    // TABLE MERGE TESTS
    // ==========================================================================

    #[test]
    fn test_merge_into_missing_table_copies() {
        let tmp = tempfile::tempdir().unwrap();
        let existing = tmp.path().join("aseg_volumes.csv");
        let new = tmp.path().join("staging.csv");
        write_file(&new, "id,Left-Hippocampus\nsub-01,3000\n");

        merge_table(&existing, &new).unwrap();
        let merged = fs::read_to_string(&existing).unwrap();
        assert!(merged.contains("sub-01,3000"));
    }

    #[test]
    fn test_merge_replaces_rows_for_same_subject() {
        let tmp = tempfile::tempdir().unwrap();
        let existing = tmp.path().join("aseg_volumes.csv");
        let new = tmp.path().join("staging.csv");
        write_file(&existing, "id,Left-Hippocampus\nsub-01,3000\nsub-02,3100\n");
        write_file(&new, "id,Left-Hippocampus\nsub-02,3150\n");

        merge_table(&existing, &new).unwrap();
        let merged = fs::read_to_string(&existing).unwrap();

        assert!(merged.contains("sub-01,3000"));
        assert!(merged.contains("sub-02,3150"));
        assert!(!merged.contains("sub-02,3100"));

        // One timestamped backup of the previous table
        let backups: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("_backup_"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_merge_takes_column_union() {
        let tmp = tempfile::tempdir().unwrap();
        let existing = tmp.path().join("aseg_volumes.csv");
        let new = tmp.path().join("staging.csv");
        write_file(&existing, "id,A\nsub-01,1\n");
        write_file(&new, "id,B\nsub-02,2\n");

        merge_table(&existing, &new).unwrap();
        let merged = fs::read_to_string(&existing).unwrap();

        assert!(merged.starts_with("id,A,B"));
        assert!(merged.contains("sub-01,1,"));
        assert!(merged.contains("sub-02,,2"));
    }

    // ==========================================================================
    // JOB TESTS
    // ==========================================================================

    #[test]
    fn test_subject_name_strips_all_suffixes() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::with_root(tmp.path()).unwrap();

        assert_eq!(
            FreeSurferJob::new(&settings, "sub-01.nii.gz").subject_name(),
            "sub-01"
        );
        assert_eq!(FreeSurferJob::new(&settings, "sub-01").subject_name(), "sub-01");
    }

    #[test]
    fn test_failed_command_carries_output() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::with_root(tmp.path()).unwrap();
        let job = FreeSurferJob::new(&settings, "sub-01.nii");

        let err = job.run_command("echo boom && exit 3").unwrap_err();
        match err {
            PipelineError::CommandFailed { stdout, .. } => {
                assert!(stdout.contains("boom"));
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_update_table_requires_completed_reconstruction() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::with_root(tmp.path()).unwrap();
        let db = Database::open_at(&settings.db_path).unwrap();
        db.insert_subject("sub-01", "sub-01.nii").unwrap();

        let err = run_stage(&settings, &db, "sub-01.nii", Stage::UpdateTable).unwrap_err();
        assert!(matches!(err, PipelineError::WrongStatus { .. }));

        // Status untouched by the rejected stage
        let subject = db.subject_by_id("sub-01").unwrap().unwrap();
        assert_eq!(subject.status().unwrap(), SubjectStatus::Preprocessed);
    }

    #[test]
    fn test_unknown_subject_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::with_root(tmp.path()).unwrap();
        let db = Database::open_at(&settings.db_path).unwrap();

        let err = run_stage(&settings, &db, "ghost.nii", Stage::ReconAll).unwrap_err();
        assert!(matches!(err, PipelineError::SubjectNotFound(_)));
    }
}
