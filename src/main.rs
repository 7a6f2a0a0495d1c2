use braindash::db::Database;
use braindash::pipeline::{self, Stage};
use braindash::settings::Settings;
use braindash::{admin, serve, watch};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "braindash")]
#[command(author, version, about = "Neuroimaging cohort analysis dashboard")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the interactive analysis dashboard
    Serve {
        /// Port to listen on (default from BRAINDASH_PORT_APP)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Start the admin / ingestion panel
    Admin {
        /// Port to listen on (default from BRAINDASH_PORT_ADMIN)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Watch the data folder and register arriving scan files
    Watch {
        /// Folder to watch (default: the configured data directory)
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Seconds between rescans
        #[arg(long, default_value_t = watch::DEFAULT_INTERVAL_SECS)]
        interval: u64,

        /// Process existing files once and exit
        #[arg(long)]
        once: bool,
    },

    /// Run FreeSurfer processing for a registered subject
    Pipeline {
        /// File name to process
        #[arg(long)]
        file_name: String,

        /// Run the recon-all stage
        #[arg(long)]
        recon_all: bool,

        /// Run the summary-table update stage
        #[arg(long)]
        update_table: bool,
    },

    /// Database inspection
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// List all registered subjects
    Subjects,

    /// List all logged analysis runs
    Analyses,

    /// Create a backup of the database
    Backup {
        /// Output path for backup (default: brain_data_backup_<timestamp>.sqlite3)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to initialize settings: {}", e);
            std::process::exit(1);
        }
    };

    match Args::parse().command {
        Command::Serve { port } => {
            if let Some(port) = port {
                settings.port_app = port;
            }
            if let Err(e) = serve::start(settings) {
                eprintln!("Server error: {}", e);
                std::process::exit(1);
            }
        }

        Command::Admin { port } => {
            if let Some(port) = port {
                settings.port_admin = port;
            }
            if let Err(e) = admin::start(settings) {
                eprintln!("Admin server error: {}", e);
                std::process::exit(1);
            }
        }

        Command::Watch { folder, interval, once } => {
            let folder = folder.unwrap_or_else(|| settings.data_dir.clone());
            let db = open_db(&settings);
            if let Err(e) = watch::watch(&db, &folder, interval, once) {
                eprintln!("Watcher error: {}", e);
                std::process::exit(1);
            }
        }

        Command::Pipeline { file_name, recon_all, update_table } => {
            if !recon_all && !update_table {
                eprintln!("Nothing to do: pass --recon-all and/or --update-table");
                std::process::exit(1);
            }
            let db = open_db(&settings);
            if recon_all {
                if let Err(e) = pipeline::run_stage(&settings, &db, &file_name, Stage::ReconAll) {
                    eprintln!("recon-all failed for {}: {}", file_name, e);
                    std::process::exit(1);
                }
            }
            if update_table {
                if let Err(e) =
                    pipeline::run_stage(&settings, &db, &file_name, Stage::UpdateTable)
                {
                    eprintln!("Table update failed for {}: {}", file_name, e);
                    std::process::exit(1);
                }
            }
        }

        Command::Db { action } => handle_db_action(&settings, action),
    }
}

fn open_db(settings: &Settings) -> Database {
    match Database::open_at(&settings.db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    }
}

fn handle_db_action(settings: &Settings, action: DbAction) {
    match action {
        DbAction::Subjects => {
            let db = open_db(settings);
            match db.all_subjects() {
                Ok(subjects) => {
                    if subjects.is_empty() {
                        println!("No subjects registered.");
                    } else {
                        println!("{:<20} {:<26} {}", "SUBJECT", "STATUS", "FILE");
                        println!("{}", "-".repeat(70));
                        for s in subjects {
                            println!("{:<20} {:<26} {}", s.subject_id, s.status, s.file_name);
                        }
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        DbAction::Analyses => {
            let db = open_db(settings);
            match db.all_analyses() {
                Ok(rows) => {
                    if rows.is_empty() {
                        println!("No analyses logged.");
                    } else {
                        println!(
                            "{:<5} {:<10} {:<10} {:<10} {}",
                            "ID", "STATUS", "FEATURE", "TEST", "NAME"
                        );
                        println!("{}", "-".repeat(70));
                        for row in rows {
                            println!(
                                "{:<5} {:<10} {:<10} {:<10} {}",
                                row.id,
                                row.status,
                                row.selected_feature,
                                row.selected_statistical,
                                row.analysis_name
                            );
                        }
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        DbAction::Backup { output } => {
            let db_path = &settings.db_path;
            if !db_path.exists() {
                eprintln!("No database found at {}", db_path.display());
                return;
            }

            let backup_path = output.unwrap_or_else(|| {
                let timestamp = Local::now().format("%Y%m%d_%H%M%S");
                PathBuf::from(format!("brain_data_backup_{}.sqlite3", timestamp))
            });

            match std::fs::copy(db_path, &backup_path) {
                Ok(bytes) => {
                    println!("Backup created: {} ({} bytes)", backup_path.display(), bytes);
                }
                Err(e) => {
                    eprintln!("Failed to create backup: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
