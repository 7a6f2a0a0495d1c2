//! Admin / ingestion HTTP server
//!
//! `braindash admin` → subject registry overview, analysis log and the
//! pipeline launch buttons. Pipeline actions spawn this binary's own
//! `pipeline` / `watch` subcommands as fire-and-forget children; their
//! outcome is observed later through the subject status column and the
//! stage sentinel files.

use crate::db::{Database, Subject, SubjectStatus};
use crate::loaders::ColumnSpec;
use crate::serve::{content_type, respond_json, ApiResponse};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tiny_http::{Method, Request, Response, Server};

const ADMIN_HTML: &str = include_str!("admin.html");

// ============================================================================
// Payloads
// ============================================================================

#[derive(Serialize)]
struct SubjectView {
    subject_id: String,
    file_name: String,
    status: String,
    characteristics: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct SubjectsPayload {
    subjects: Vec<SubjectView>,
    char_columns: Vec<String>,
    column_specs: BTreeMap<String, ColumnSpec>,
    eligible_recon_all: Vec<String>,
    eligible_update_table: Vec<String>,
}

#[derive(Deserialize)]
struct PipelineForm {
    action: String,
    #[serde(default)]
    subject_id: Option<String>,
}

#[derive(Serialize)]
struct Flash {
    message: String,
    category: &'static str,
}

#[derive(Deserialize)]
struct DownloadQuery {
    file: String,
}

// ============================================================================
// Admin state
// ============================================================================

pub struct AdminApp {
    settings: Settings,
    db: Database,
}

impl AdminApp {
    pub fn new(settings: Settings) -> io::Result<Self> {
        let db = Database::open_at(&settings.db_path)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(AdminApp { settings, db })
    }

    fn subjects_payload(&self) -> Result<SubjectsPayload, String> {
        let subjects = self.db.all_subjects().map_err(|e| e.to_string())?;

        let (char_columns, by_file) =
            match read_characteristics(&self.settings.characteristics_csv) {
                Ok(parsed) => parsed,
                Err(e) => {
                    // Fall back to the registry-only view
                    log::warn!(
                        "Could not load characteristics from {}: {}",
                        self.settings.characteristics_csv.display(),
                        e
                    );
                    (Vec::new(), HashMap::new())
                }
            };

        let views: Vec<SubjectView> = subjects
            .iter()
            .map(|s| SubjectView {
                subject_id: s.subject_id.clone(),
                file_name: s.file_name.clone(),
                status: s.status.clone(),
                characteristics: merge_characteristics(s, &char_columns, &by_file),
            })
            .collect();

        let mut column_specs = BTreeMap::new();
        column_specs.insert("status".to_string(), status_spec(&subjects));
        for column in &char_columns {
            let raw: Vec<&str> = views
                .iter()
                .filter_map(|v| v.characteristics.get(column))
                .map(|s| s.as_str())
                .filter(|s| !s.is_empty())
                .collect();
            column_specs.insert(column.clone(), infer_spec(&raw));
        }

        let eligible = |pred: fn(&SubjectStatus) -> bool| -> Vec<String> {
            subjects
                .iter()
                .filter(|s| s.status().map(|st| pred(&st)).unwrap_or(false))
                .map(|s| s.subject_id.clone())
                .collect()
        };

        Ok(SubjectsPayload {
            subjects: views,
            char_columns,
            column_specs,
            eligible_recon_all: eligible(SubjectStatus::eligible_for_recon_all),
            eligible_update_table: eligible(SubjectStatus::eligible_for_update_table),
        })
    }

    // ========================================================================
    // Pipeline dispatch
    // ========================================================================

    fn dispatch_pipeline(&self, form: &PipelineForm) -> Result<String, String> {
        match form.action.as_str() {
            "recon_all" | "update_table" => {
                let subject_id = form
                    .subject_id
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| "No subject selected".to_string())?;
                let subject = self
                    .db
                    .subject_by_id(subject_id)
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("Subject '{}' not found", subject_id))?;

                let args = pipeline_args(&form.action, &subject.file_name);
                let pid = self.spawn_child(&args)?;
                Ok(format!(
                    "Started {} for subject '{}', file name {}, PID: {}.",
                    form.action, subject.subject_id, subject.file_name, pid
                ))
            }
            "update_db" => {
                let args = watch_args(&self.settings.data_dir);
                let pid = self.spawn_child(&args)?;
                Ok(format!("Database update started from data folder, PID: {}.", pid))
            }
            other => Err(format!("Unknown action '{}'", other)),
        }
    }

    /// Fire-and-forget child running this same binary; no join, outcome is
    /// observed via the subject status column.
    fn spawn_child(&self, args: &[String]) -> Result<u32, String> {
        let exe = std::env::current_exe().map_err(|e| e.to_string())?;
        let child = Command::new(&exe)
            .args(args)
            .env("BRAINDASH_ROOT", &self.settings.project_root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                log::error!("Failed to spawn {:?} {:?}: {}", exe, args, e);
                e.to_string()
            })?;
        log::info!("Started child {:?} {:?}, PID: {}", exe, args, child.id());
        Ok(child.id())
    }

    fn download(&self, file: &str) -> Result<std::fs::File, String> {
        // Result files are confined to the analyses directory
        if file.contains('/') || file.contains('\\') || file.contains("..") {
            return Err("Invalid file name".to_string());
        }
        let path = self.settings.analyses_dir.join(file);
        if !path.is_file() {
            return Err(format!("No result file '{}'", file));
        }
        std::fs::File::open(&path).map_err(|e| e.to_string())
    }
}

/// Arguments of the pipeline child process
fn pipeline_args(action: &str, file_name: &str) -> Vec<String> {
    let stage_flag = if action == "recon_all" { "--recon-all" } else { "--update-table" };
    vec![
        "pipeline".to_string(),
        "--file-name".to_string(),
        file_name.to_string(),
        stage_flag.to_string(),
    ]
}

/// Arguments of the one-shot ingestion child process
fn watch_args(data_dir: &Path) -> Vec<String> {
    vec![
        "watch".to_string(),
        "--folder".to_string(),
        data_dir.to_string_lossy().to_string(),
        "--once".to_string(),
    ]
}

// ============================================================================
// Characteristics merging
// ============================================================================

type CharacteristicsRows = HashMap<String, Vec<String>>;

fn read_characteristics(path: &Path) -> Result<(Vec<String>, CharacteristicsRows), String> {
    if !path.exists() {
        return Ok((Vec::new(), HashMap::new()));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| e.to_string())?;
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    // First column is the file-name key
    let columns: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();

    let mut by_file = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let key = record.get(0).unwrap_or("").to_string();
        let values = record.iter().skip(1).map(|v| v.trim().to_string()).collect();
        by_file.insert(key, values);
    }
    Ok((columns, by_file))
}

fn merge_characteristics(
    subject: &Subject,
    columns: &[String],
    by_file: &CharacteristicsRows,
) -> BTreeMap<String, String> {
    let row = by_file.get(&subject.file_name);
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let value = row.and_then(|r| r.get(idx)).cloned().unwrap_or_default();
            (col.clone(), value)
        })
        .collect()
}

fn status_spec(subjects: &[Subject]) -> ColumnSpec {
    let mut choices: Vec<String> = subjects.iter().map(|s| s.status.clone()).collect();
    choices.sort();
    choices.dedup();
    ColumnSpec::Categorical { choices }
}

fn infer_spec(values: &[&str]) -> ColumnSpec {
    if values.is_empty() {
        return ColumnSpec::Text;
    }
    let numeric: Vec<f64> = values.iter().filter_map(|v| v.parse().ok()).collect();
    if numeric.len() == values.len() {
        ColumnSpec::Numeric {
            min: numeric.iter().copied().reduce(f64::min),
            max: numeric.iter().copied().reduce(f64::max),
        }
    } else {
        let mut choices: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        choices.sort();
        choices.dedup();
        ColumnSpec::Categorical { choices }
    }
}

// ============================================================================
// Server loop
// ============================================================================

/// Start the admin server
pub fn start(settings: Settings) -> io::Result<()> {
    let port = settings.port_admin;
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    let app = AdminApp::new(settings)?;

    eprintln!("\n\x1b[1;32m🧠 Braindash Admin\x1b[0m");
    eprintln!("   http://localhost:{}\n", port);

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&app, request) {
            log::error!("Request error: {}", e);
        }
    }

    Ok(())
}

fn handle_request(app: &AdminApp, mut request: Request) -> io::Result<()> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/");
    let query = url.split('?').nth(1).unwrap_or("");
    let method = request.method().clone();

    match (&method, path) {
        (&Method::Get, "/") => {
            let response = Response::from_string(ADMIN_HTML)
                .with_header(content_type("text/html"));
            request.respond(response)
        }

        (&Method::Get, "/api/overview") => match app.db.get_summary() {
            Ok(summary) => respond_json(request, 200, &ApiResponse::success(summary)),
            Err(e) => respond_json(request, 500, &ApiResponse::failure(e.to_string())),
        },

        (&Method::Get, "/api/subjects") => match app.subjects_payload() {
            Ok(payload) => respond_json(request, 200, &ApiResponse::success(payload)),
            Err(e) => respond_json(request, 500, &ApiResponse::failure(e)),
        },

        (&Method::Get, "/api/analyses") => match app.db.all_analyses() {
            Ok(rows) => respond_json(request, 200, &ApiResponse::success(rows)),
            Err(e) => respond_json(request, 500, &ApiResponse::failure(e.to_string())),
        },

        (&Method::Get, "/api/download") => {
            match serde_urlencoded::from_str::<DownloadQuery>(query) {
                Ok(params) => match app.download(&params.file) {
                    Ok(file) => {
                        let response = Response::from_file(file)
                            .with_header(content_type("application/octet-stream"));
                        request.respond(response)
                    }
                    Err(e) => respond_json(request, 404, &ApiResponse::failure(e)),
                },
                Err(e) => respond_json(request, 422, &ApiResponse::failure(e.to_string())),
            }
        }

        (&Method::Post, "/api/pipeline") => {
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body)?;
            let form: PipelineForm = match serde_urlencoded::from_str(&body)
                .or_else(|_| serde_json::from_str(&body))
            {
                Ok(form) => form,
                Err(e) => {
                    return respond_json(
                        request,
                        422,
                        &ApiResponse::failure(format!("Bad pipeline request: {}", e)),
                    )
                }
            };

            match app.dispatch_pipeline(&form) {
                Ok(message) => respond_json(
                    request,
                    200,
                    &ApiResponse::success(Flash { message, category: "success" }),
                ),
                Err(message) => {
                    log::error!("Pipeline dispatch failed: {}", message);
                    respond_json(request, 422, &ApiResponse::failure(message))
                }
            }
        }

        _ => {
            let response = Response::from_string("Not found").with_status_code(404);
            request.respond(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(tmp: &Path) -> AdminApp {
        let settings = Settings::with_root(tmp).unwrap();
        let db = Database::open_at(&settings.db_path).unwrap();
        db.insert_subject("sub-01", "sub-01.nii").unwrap();
        db.insert_subject("sub-02", "sub-02.nii").unwrap();
        db.update_subject_status("sub-02", SubjectStatus::FreesurferCompleted)
            .unwrap();

        let mut f = std::fs::File::create(&settings.characteristics_csv).unwrap();
        f.write_all(b"scan,age,sex\nsub-01.nii,20,M\nsub-02.nii,30,F\n")
            .unwrap();

        AdminApp::new(settings).unwrap()
    }

    #[test]
    fn test_subjects_payload_merges_and_classifies() {
        let tmp = tempfile::tempdir().unwrap();
        let app = fixture(tmp.path());

        let payload = app.subjects_payload().unwrap();
        assert_eq!(payload.subjects.len(), 2);
        assert_eq!(payload.char_columns, vec!["age", "sex"]);

        // Newest ids first
        assert_eq!(payload.subjects[0].subject_id, "sub-02");
        assert_eq!(payload.subjects[0].characteristics["age"], "30");

        assert_eq!(payload.eligible_recon_all, vec!["sub-01"]);
        assert_eq!(payload.eligible_update_table, vec!["sub-02"]);

        assert!(matches!(
            payload.column_specs["age"],
            ColumnSpec::Numeric { min: Some(min), .. } if min == 20.0
        ));
        assert!(matches!(
            payload.column_specs["sex"],
            ColumnSpec::Categorical { .. }
        ));
    }

    #[test]
    fn test_subjects_payload_without_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let app = fixture(tmp.path());
        std::fs::remove_file(&app.settings.characteristics_csv).unwrap();

        let payload = app.subjects_payload().unwrap();
        assert!(payload.char_columns.is_empty());
        assert_eq!(payload.subjects.len(), 2);
    }

    #[test]
    fn test_pipeline_child_arguments() {
        assert_eq!(
            pipeline_args("recon_all", "sub-01.nii"),
            vec!["pipeline", "--file-name", "sub-01.nii", "--recon-all"]
        );
        assert_eq!(
            pipeline_args("update_table", "sub-01.nii"),
            vec!["pipeline", "--file-name", "sub-01.nii", "--update-table"]
        );
        let args = watch_args(Path::new("/data"));
        assert_eq!(args, vec!["watch", "--folder", "/data", "--once"]);
    }

    #[test]
    fn test_dispatch_rejects_unknown_subject_and_action() {
        let tmp = tempfile::tempdir().unwrap();
        let app = fixture(tmp.path());

        let missing = PipelineForm {
            action: "recon_all".to_string(),
            subject_id: Some("ghost".to_string()),
        };
        assert!(app.dispatch_pipeline(&missing).is_err());

        let unselected = PipelineForm { action: "recon_all".to_string(), subject_id: None };
        assert!(app.dispatch_pipeline(&unselected).is_err());

        let unknown = PipelineForm { action: "explode".to_string(), subject_id: None };
        assert!(app.dispatch_pipeline(&unknown).is_err());
    }

    #[test]
    fn test_download_is_confined_to_analyses_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let app = fixture(tmp.path());

        std::fs::write(app.settings.analyses_dir.join("run.txt"), b"ok").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), b"no").unwrap();

        assert!(app.download("run.txt").is_ok());
        assert!(app.download("../secret.txt").is_err());
        assert!(app.download("/etc/passwd").is_err());
        assert!(app.download("missing.txt").is_err());
    }
}
