//! Folder watcher: scan-and-register daemon
//!
//! Registers every regular file arriving in the data folder as a subject
//! (id = file stem, status = preprocessed). Runs either as a one-shot
//! scan or as a rescan loop on a fixed interval; already-registered file
//! names are skipped, so rescanning is idempotent.

use crate::db::{Database, DbError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Default seconds between rescans
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Error type for watcher operations
#[derive(Debug)]
pub enum WatchError {
    MissingFolder(PathBuf),
    Db(DbError),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::MissingFolder(path) => {
                write!(f, "folder {} does not exist", path.display())
            }
            WatchError::Db(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for WatchError {}

impl From<DbError> for WatchError {
    fn from(e: DbError) -> Self {
        WatchError::Db(e)
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// Register one arrived file; returns whether a subject was created.
pub fn register_file(db: &Database, path: &Path) -> Result<bool> {
    let file_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Ok(false),
    };
    if file_name.starts_with('.') {
        return Ok(false);
    }

    if db.subject_by_file_name(file_name)?.is_some() {
        log::debug!("File {} already registered, skipping", file_name);
        return Ok(false);
    }

    // Subject id is the file name with every suffix stripped, matching the
    // FreeSurfer subject naming used by the pipeline stages
    let subject_id = file_name
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(file_name);

    match db.insert_subject(subject_id, file_name) {
        Ok(()) => {
            log::info!("Subject {} created for file {}", subject_id, file_name);
            Ok(true)
        }
        Err(e) => {
            // Two files mapping to one stem collide on the primary key
            log::error!("Could not register file {}: {}", file_name, e);
            Ok(false)
        }
    }
}

/// Scan the folder once, registering every new file. Returns the number of
/// subjects created.
pub fn scan_folder(db: &Database, folder: &Path) -> Result<usize> {
    if !folder.is_dir() {
        return Err(WatchError::MissingFolder(folder.to_path_buf()));
    }

    let mut created = 0;
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if register_file(db, entry.path())? {
            created += 1;
        }
    }
    Ok(created)
}

/// Watch the folder: process existing files first, then rescan on the
/// interval until the process is stopped. With `once`, exit after the
/// initial scan.
pub fn watch(db: &Database, folder: &Path, interval_secs: u64, once: bool) -> Result<()> {
    log::info!(
        "Watching folder {} (processing existing files first), interval {} seconds",
        folder.display(),
        interval_secs
    );

    let created = scan_folder(db, folder)?;
    log::info!("Initial scan registered {} subject(s)", created);

    if once {
        log::info!("Processed existing files, exiting (--once)");
        return Ok(());
    }

    loop {
        std::thread::sleep(Duration::from_secs(interval_secs.max(1)));
        match scan_folder(db, folder) {
            Ok(0) => {}
            Ok(n) => log::info!("Registered {} new subject(s)", n),
            Err(e) => log::error!("Rescan failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SubjectStatus;
    use std::fs;

    fn touch(path: &Path) {
        fs::File::create(path).unwrap();
    }

    #[test]
    fn test_scan_registers_new_files_once() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open_at(tmp.path().join("test.sqlite3")).unwrap();
        let data = tmp.path().join("data");
        fs::create_dir(&data).unwrap();

        touch(&data.join("sub-01.nii"));
        touch(&data.join("sub-02.nii.gz"));
        touch(&data.join(".hidden.nii"));
        fs::create_dir(data.join("nested")).unwrap();

        assert_eq!(scan_folder(&db, &data).unwrap(), 2);
        // Idempotent on rescan
        assert_eq!(scan_folder(&db, &data).unwrap(), 0);

        let subject = db.subject_by_file_name("sub-02.nii.gz").unwrap().unwrap();
        assert_eq!(subject.subject_id, "sub-02");
        assert_eq!(subject.status().unwrap(), SubjectStatus::Preprocessed);
        assert!(db.subject_by_file_name(".hidden.nii").unwrap().is_none());
    }

    #[test]
    fn test_new_arrivals_picked_up_by_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open_at(tmp.path().join("test.sqlite3")).unwrap();
        let data = tmp.path().join("data");
        fs::create_dir(&data).unwrap();

        assert_eq!(scan_folder(&db, &data).unwrap(), 0);
        touch(&data.join("sub-03.nii"));
        assert_eq!(scan_folder(&db, &data).unwrap(), 1);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open_at(tmp.path().join("test.sqlite3")).unwrap();

        assert!(matches!(
            scan_folder(&db, &tmp.path().join("absent")),
            Err(WatchError::MissingFolder(_))
        ));
    }
}
