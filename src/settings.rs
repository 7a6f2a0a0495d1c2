//! Process-wide configuration
//!
//! Every entry point builds one `Settings` from the environment and passes it
//! down explicitly; components never reach for globals. Paths default to a
//! `runs/` tree under the project root and are created on construction.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default dashboard port (override with `BRAINDASH_PORT_APP`)
pub const DEFAULT_PORT_APP: u16 = 5006;
/// Default admin port (override with `BRAINDASH_PORT_ADMIN`)
pub const DEFAULT_PORT_ADMIN: u16 = 5000;

/// Subject columns that are never offered as analysis features
pub const NON_FILTER_COLUMNS: &[&str] = &["subject_id", "file_name", "status"];

/// Resolved configuration for one process
#[derive(Debug, Clone)]
pub struct Settings {
    pub port_app: u16,
    pub port_admin: u16,

    /// Root of the working tree; everything below lives under `<root>/runs`
    pub project_root: PathBuf,
    /// FreeSurfer installation (recon-all, *stats2table)
    pub freesurfer_home: PathBuf,
    /// Environment script sourced before every FreeSurfer command
    pub freesurfer_env_file: PathBuf,
    /// FreeSurfer SUBJECTS_DIR
    pub subjects_dir: PathBuf,
    /// Incoming scan files watched for registration
    pub data_dir: PathBuf,

    pub run_dir: PathBuf,
    pub db_path: PathBuf,
    pub analyses_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config_dir: PathBuf,
    pub pipeline_dir: PathBuf,

    /// Per-subject characteristics CSV (first column = file name)
    pub characteristics_csv: PathBuf,
    /// FreeSurfer wide tables assembled by the table-update stage
    pub aseg_csv: PathBuf,
    pub aparc_lh_csv: PathBuf,
    pub aparc_rh_csv: PathBuf,
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var_os(key).map(PathBuf::from).unwrap_or(default)
}

fn env_port(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Build settings from the environment, creating the run directories.
    pub fn from_env() -> io::Result<Self> {
        let project_root = env_path(
            "BRAINDASH_ROOT",
            env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        );
        let mut settings = Self::defaults(&project_root);

        settings.port_app = env_port("BRAINDASH_PORT_APP", DEFAULT_PORT_APP);
        settings.port_admin = env_port("BRAINDASH_PORT_ADMIN", DEFAULT_PORT_ADMIN);
        settings.freesurfer_home =
            env_path("FREESURFER_HOME", settings.freesurfer_home);
        settings.freesurfer_env_file =
            env_path("FREESURFER_ENV_FILE", settings.freesurfer_env_file);
        settings.data_dir = env_path("BRAINDASH_DATA_DIR", settings.data_dir);
        let subjects_dir = env_path("SUBJECTS_DIR", settings.subjects_dir);
        settings.aseg_csv = subjects_dir.join("aseg_volumes.csv");
        settings.aparc_lh_csv = subjects_dir.join("aparc_lh.csv");
        settings.aparc_rh_csv = subjects_dir.join("aparc_rh.csv");
        settings.subjects_dir = subjects_dir;

        settings.ensure_dirs()?;
        Ok(settings)
    }

    /// Build settings rooted at an explicit directory with pure defaults,
    /// ignoring the environment (tests use a temp dir).
    pub fn with_root<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let settings = Self::defaults(root.as_ref());
        settings.ensure_dirs()?;
        Ok(settings)
    }

    fn defaults(root: &Path) -> Self {
        let project_root = root.to_path_buf();
        let run_dir = project_root.join("runs");
        let db_dir = run_dir.join("instance");
        let subjects_dir = run_dir.join("freesurfer_output");
        let config_dir = run_dir.join("config");

        Settings {
            port_app: DEFAULT_PORT_APP,
            port_admin: DEFAULT_PORT_ADMIN,
            freesurfer_home: PathBuf::from("/usr/local/freesurfer"),
            freesurfer_env_file: PathBuf::from("/usr/local/freesurfer/FreeSurferEnv.sh"),
            data_dir: run_dir.join("data"),
            db_path: db_dir.join("brain_data.sqlite3"),
            analyses_dir: run_dir.join("analyses"),
            logs_dir: run_dir.join("logs"),
            pipeline_dir: run_dir.join("pipeline"),
            characteristics_csv: config_dir.join("subject_features.csv"),
            aseg_csv: subjects_dir.join("aseg_volumes.csv"),
            aparc_lh_csv: subjects_dir.join("aparc_lh.csv"),
            aparc_rh_csv: subjects_dir.join("aparc_rh.csv"),
            subjects_dir,
            config_dir,
            run_dir,
            project_root,
        }
    }

    fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [
            &self.run_dir,
            &self.analyses_dir,
            &self.logs_dir,
            &self.config_dir,
            &self.pipeline_dir,
            &self.data_dir,
            &self.subjects_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
