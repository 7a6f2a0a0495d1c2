//! Dashboard HTTP server
//!
//! `braindash serve` → starts the cohort-analysis dashboard, opens the
//! browser, serves the embedded UI and the JSON API behind it.
//!
//! The server owns the per-session snapshots (feature table, region-volume
//! table), the history store and the DB handle. Dispatching an analysis is
//! the only offloaded operation: validation happens on the request, the
//! computation runs on a worker thread, and the record's persisted status
//! is the completion signal the UI polls. There is no cancellation once a
//! run is dispatched.

use crate::analysis::{self, StatTest, TestOutcome};
use crate::atlas::{self, DisplayMetric};
use crate::db::{Database, NewAnalysisRow};
use crate::history::{display_name, record_filename, AnalysisRecord, HistoryStore, RunStatus};
use crate::loaders::{ColumnSpec, FeatureTable, FeatureVector, RegionTable};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};

// Embed the UI directly in the binary
const UI_HTML: &str = include_str!("ui.html");

#[derive(Serialize)]
pub(crate) struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn success(data: T) -> Self {
        Self { ok: true, data: Some(data), error: None }
    }
}

impl ApiResponse<()> {
    pub(crate) fn failure(message: String) -> Self {
        Self { ok: false, data: None, error: Some(message) }
    }
}

// ============================================================================
// Request / response payloads
// ============================================================================

#[derive(Deserialize, Debug)]
pub struct AnalyzeParams {
    pub name: String,
    #[serde(default)]
    pub cohort: Vec<String>,
    #[serde(default)]
    pub feature: String,
    #[serde(default)]
    pub test: String,
    #[serde(default = "default_true")]
    pub apply_fdr: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
pub struct AnalyzeAccepted {
    pub filename: String,
    pub name: String,
    pub status: RunStatus,
}

#[derive(Serialize)]
struct FeatureInfo {
    name: String,
    spec: ColumnSpec,
}

#[derive(Serialize)]
struct ContextPayload {
    features: Vec<FeatureInfo>,
    tests: Vec<&'static str>,
    metrics: BTreeMap<&'static str, Vec<&'static str>>,
    subjects: Vec<String>,
    regions: Vec<String>,
}

#[derive(Serialize)]
struct ProjectionPoint {
    region: String,
    coords: [f64; 3],
    value: f64,
}

#[derive(Serialize)]
struct ProjectionPayload {
    metric: &'static str,
    apply_fdr: bool,
    values: BTreeMap<String, f64>,
    points: Vec<ProjectionPoint>,
    surface: BTreeMap<String, u32>,
}

#[derive(Serialize)]
struct RegionDataPayload {
    region: String,
    feature: String,
    numeric: bool,
    subjects: Vec<String>,
    feature_values: Vec<serde_json::Value>,
    volumes: Vec<f64>,
    r: Option<f64>,
    p: Option<f64>,
}

#[derive(Deserialize)]
struct FileQuery {
    file: String,
}

#[derive(Deserialize)]
struct ProjectionQuery {
    file: String,
    #[serde(default = "default_metric")]
    metric: String,
}

fn default_metric() -> String {
    "p-value".to_string()
}

#[derive(Deserialize)]
struct RegionQuery {
    file: String,
    region: String,
}

// ============================================================================
// Dashboard state
// ============================================================================

/// Everything one dashboard session works against
pub struct Dashboard {
    settings: Settings,
    db: Database,
    history: HistoryStore,
    features: FeatureTable,
    regions: RegionTable,
}

impl Dashboard {
    /// Load the session snapshots and open the stores.
    pub fn new(settings: Settings) -> io::Result<Self> {
        let db = Database::open_at(&settings.db_path)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let features = FeatureTable::load(&db, &settings.characteristics_csv)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let regions = RegionTable::load(
            &settings.aseg_csv,
            &settings.aparc_lh_csv,
            &settings.aparc_rh_csv,
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let history = HistoryStore::new(&settings.analyses_dir);

        log::info!(
            "Dashboard loaded: {} subjects, {} features, {} regions",
            features.subject_ids().len(),
            features.feature_columns().len(),
            regions.regions().len()
        );

        Ok(Dashboard { settings, db, history, features, regions })
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    fn context(&self) -> ContextPayload {
        let features = self
            .features
            .feature_columns()
            .into_iter()
            .filter_map(|name| {
                let spec = self.features.column_spec(&name).ok()?;
                Some(FeatureInfo { name, spec })
            })
            .collect();

        let metrics = StatTest::ALL
            .iter()
            .map(|test| {
                (
                    test.as_str(),
                    atlas::metrics_for_test(*test)
                        .into_iter()
                        .map(|m| m.as_str())
                        .collect(),
                )
            })
            .collect();

        ContextPayload {
            features,
            tests: StatTest::ALL.iter().map(|t| t.as_str()).collect(),
            metrics,
            subjects: self.features.subject_ids().to_vec(),
            regions: self.regions.regions().to_vec(),
        }
    }

    /// Worker side: compute, then persist the terminal state. The record's
    /// stored status is the real completion signal.
    fn finish_analysis(&self, filename: &str, record: AnalysisRecord) {
        let outcome = analysis::run(
            &record.cohort,
            &record.feature,
            record.test,
            record.apply_fdr,
            &self.features,
            &self.regions,
        );

        let (results, status) = match outcome {
            Ok(results) if !results.is_empty() => (Some(results), RunStatus::Completed),
            Ok(_) => {
                log::error!("Analysis produced an empty result mapping");
                (None, RunStatus::Failed)
            }
            Err(e) => {
                log::error!("=== Analysis failed: {} ===", e);
                (None, RunStatus::Failed)
            }
        };

        if let Err(e) = self.history.complete(filename, results, status) {
            log::error!("Could not persist analysis record {}: {}", filename, e);
            return;
        }
        if status == RunStatus::Completed {
            log::info!("=== Analysis completed successfully ===");
        }

        let results_txt = self
            .settings
            .analyses_dir
            .join(filename)
            .with_extension("txt")
            .to_string_lossy()
            .to_string();
        let subjects = record.cohort.join(",");
        let row = NewAnalysisRow {
            analysis_name: &record.name,
            selected_subjects: &subjects,
            selected_feature: &record.feature,
            selected_statistical: record.test.as_str(),
            results: Some(&results_txt),
            status: status.as_str(),
            timestamp: &record.timestamp,
        };
        if let Err(e) = self.db.insert_analysis(&row) {
            log::error!("Failed to update analysis row in DB: {}", e);
        }
    }

    // ========================================================================
    // Read-side payloads
    // ========================================================================

    fn projection(&self, query: &ProjectionQuery) -> Result<ProjectionPayload, String> {
        let record = self.history.load(&query.file).map_err(|e| e.to_string())?;
        let results = record
            .results
            .as_ref()
            .ok_or_else(|| format!("analysis '{}' has no results", record.name))?;
        let metric: DisplayMetric = query.metric.parse()?;

        let values = atlas::project(results, metric, record.apply_fdr);

        // Regions without coordinates are excluded from point views
        let points = values
            .iter()
            .filter_map(|(region, value)| {
                atlas::coordinates_for_region(region).map(|coords| ProjectionPoint {
                    region: region.clone(),
                    coords,
                    value: *value,
                })
            })
            .collect();

        // Unmapped regions carry index 0 and contribute no mesh intensity
        let surface = values
            .keys()
            .map(|region| (region.clone(), atlas::destrieux_index(region)))
            .collect();

        Ok(ProjectionPayload {
            metric: metric.as_str(),
            apply_fdr: record.apply_fdr,
            values,
            points,
            surface,
        })
    }

    fn region_data(&self, query: &RegionQuery) -> Result<RegionDataPayload, String> {
        let record = self.history.load(&query.file).map_err(|e| e.to_string())?;
        let volumes = self
            .regions
            .values(&record.cohort, &query.region)
            .map_err(|e| e.to_string())?;
        let values = self
            .features
            .values(&record.cohort, &record.feature)
            .map_err(|e| e.to_string())?;

        let (numeric, feature_values) = match &values {
            FeatureVector::Numeric(v) => {
                (true, v.iter().map(|x| serde_json::json!(x)).collect())
            }
            FeatureVector::Categorical(v) => {
                (false, v.iter().map(|s| serde_json::json!(s)).collect())
            }
        };

        let (r, p) = match record
            .results
            .as_ref()
            .and_then(|results| results.get(&query.region))
        {
            Some(result) => match result.outcome {
                TestOutcome::Pearson { r, p } | TestOutcome::Spearman { r, p } => {
                    (Some(r), Some(p))
                }
                other => (None, Some(other.p())),
            },
            None => (None, None),
        };

        Ok(RegionDataPayload {
            region: query.region.clone(),
            feature: record.feature,
            numeric,
            subjects: record.cohort,
            feature_values,
            volumes,
            r,
            p,
        })
    }
}

// ============================================================================
// Controller: idle -> running -> completed/failed
// ============================================================================

/// Validate a request and dispatch the run. Any rejection leaves no trace;
/// acceptance persists the running record before returning.
pub fn start_analysis(
    dashboard: &Arc<Dashboard>,
    params: AnalyzeParams,
) -> Result<AnalyzeAccepted, String> {
    log::info!("=== Starting new analysis ===");

    let name = sanitize_name(&params.name);
    if name.is_empty() {
        return Err("Please provide a name for the analysis".to_string());
    }
    if params.cohort.is_empty() {
        return Err("Please select subjects for analysis".to_string());
    }
    if params.feature.is_empty() {
        return Err("Please select a feature for analysis".to_string());
    }
    let test: StatTest = params
        .test
        .parse()
        .map_err(|_| "Please select a statistical test for analysis".to_string())?;

    let values = dashboard
        .features
        .values(&params.cohort, &params.feature)
        .map_err(|e| e.to_string())?;
    if !analysis::is_valid_test(&values, test) {
        return Err(format!(
            "Statistical test '{}' is not valid for feature '{}'",
            test, params.feature
        ));
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let analysis_name = display_name(&name, &params.feature, test, &timestamp);
    let filename = record_filename(&name, &params.feature, test, &timestamp);
    log::info!("Analysis name: {}", analysis_name);
    log::info!("Filename: {}", filename);

    let record = AnalysisRecord {
        name: analysis_name.clone(),
        timestamp,
        cohort: params.cohort,
        feature: params.feature,
        test,
        apply_fdr: params.apply_fdr,
        results: None,
        status: RunStatus::Running,
        timestamp_ended: None,
    };
    dashboard
        .history
        .begin(&record, &filename)
        .map_err(|e| e.to_string())?;

    let state = Arc::clone(dashboard);
    let worker_filename = filename.clone();
    std::thread::spawn(move || state.finish_analysis(&worker_filename, record));

    Ok(AnalyzeAccepted {
        filename,
        name: analysis_name,
        status: RunStatus::Running,
    })
}

/// Analysis names keep only alphanumeric characters
pub fn sanitize_name(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

// ============================================================================
// Server loop
// ============================================================================

/// Start server, open browser, serve UI
pub fn start(settings: Settings) -> io::Result<()> {
    let port = settings.port_app;
    let addr = format!("127.0.0.1:{}", port);
    let server = Server::http(&addr)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    let dashboard = Arc::new(Dashboard::new(settings)?);

    let url = format!("http://localhost:{}", port);
    eprintln!("\n\x1b[1;32m🧠 Braindash\x1b[0m");
    eprintln!("   {}\n", url);

    // Open browser
    let _ = open::that(&url);

    // Handle requests
    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&dashboard, request) {
            log::error!("Request error: {}", e);
        }
    }

    Ok(())
}

fn handle_request(dashboard: &Arc<Dashboard>, mut request: Request) -> io::Result<()> {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/");
    let query = url.split('?').nth(1).unwrap_or("");
    let method = request.method().clone();

    match (&method, path) {
        // Serve embedded UI
        (&Method::Get, "/") => {
            let response = Response::from_string(UI_HTML)
                .with_header(content_type("text/html"));
            request.respond(response)
        }

        (&Method::Get, "/api/context") => {
            respond_json(request, 200, &ApiResponse::success(dashboard.context()))
        }

        (&Method::Get, "/api/history") => match dashboard.history().list() {
            Ok(entries) => respond_json(request, 200, &ApiResponse::success(entries)),
            Err(e) => respond_json(request, 500, &ApiResponse::failure(e.to_string())),
        },

        (&Method::Get, "/api/analysis") => {
            match serde_urlencoded::from_str::<FileQuery>(query) {
                Ok(params) => match dashboard.history().load(&params.file) {
                    Ok(record) => respond_json(request, 200, &ApiResponse::success(record)),
                    Err(e) => respond_json(request, 404, &ApiResponse::failure(e.to_string())),
                },
                Err(e) => respond_json(request, 422, &ApiResponse::failure(e.to_string())),
            }
        }

        // Controller entry: validate and dispatch
        (&Method::Post, "/api/analyze") => {
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body)?;
            let params: AnalyzeParams = match serde_json::from_str(&body) {
                Ok(params) => params,
                Err(e) => {
                    return respond_json(request, 422, &ApiResponse::failure(e.to_string()))
                }
            };

            match start_analysis(dashboard, params) {
                Ok(accepted) => respond_json(request, 200, &ApiResponse::success(accepted)),
                Err(message) => {
                    log::warn!("Analysis rejected: {}", message);
                    respond_json(request, 422, &ApiResponse::failure(message))
                }
            }
        }

        (&Method::Get, "/api/projection") => {
            match serde_urlencoded::from_str::<ProjectionQuery>(query) {
                Ok(params) => match dashboard.projection(&params) {
                    Ok(payload) => respond_json(request, 200, &ApiResponse::success(payload)),
                    Err(e) => respond_json(request, 422, &ApiResponse::failure(e)),
                },
                Err(e) => respond_json(request, 422, &ApiResponse::failure(e.to_string())),
            }
        }

        (&Method::Get, "/api/regiondata") => {
            match serde_urlencoded::from_str::<RegionQuery>(query) {
                Ok(params) => match dashboard.region_data(&params) {
                    Ok(payload) => respond_json(request, 200, &ApiResponse::success(payload)),
                    Err(e) => respond_json(request, 422, &ApiResponse::failure(e)),
                },
                Err(e) => respond_json(request, 422, &ApiResponse::failure(e.to_string())),
            }
        }

        // 404
        _ => {
            let response = Response::from_string("Not found").with_status_code(404);
            request.respond(response)
        }
    }
}

pub(crate) fn content_type(value: &str) -> Header {
    Header::from_bytes(&b"Content-Type"[..], value.as_bytes()).unwrap()
}

pub(crate) fn respond_json<T: Serialize>(
    request: Request,
    status: u16,
    body: &ApiResponse<T>,
) -> io::Result<()> {
    let json = serde_json::to_string(body)?;
    let response = Response::from_string(json)
        .with_header(content_type("application/json"))
        .with_status_code(status);
    request.respond(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SubjectStatus;
    use std::io::Write;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn write_file(path: &Path, content: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    /// Settings + seeded stores for a runnable dashboard
    fn fixture(tmp: &Path) -> Arc<Dashboard> {
        let settings = Settings::with_root(tmp).unwrap();

        let db = Database::open_at(&settings.db_path).unwrap();
        for id in ["sub-01", "sub-02", "sub-03", "sub-04"] {
            db.insert_subject(id, &format!("{}.nii", id)).unwrap();
            db.update_subject_status(id, SubjectStatus::UpdateTableCompleted)
                .unwrap();
        }

        write_file(
            &settings.characteristics_csv,
            "scan,age,sex\n\
             sub-01.nii,20,M\n\
             sub-02.nii,30,F\n\
             sub-03.nii,40,M\n\
             sub-04.nii,50,F\n",
        );
        write_file(
            &settings.aseg_csv,
            "Measure:volume,Left-Hippocampus\n\
             sub-01.nii,3000\n\
             sub-02.nii,3100\n\
             sub-03.nii,2950\n\
             sub-04.nii,3200\n",
        );

        Arc::new(Dashboard::new(settings).unwrap())
    }

    fn cohort() -> Vec<String> {
        ["sub-01", "sub-02", "sub-03", "sub-04"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn wait_for_terminal_status(dashboard: &Dashboard, filename: &str) -> AnalysisRecord {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let record = dashboard.history().load(filename).unwrap();
            if record.status != RunStatus::Running {
                return record;
            }
            assert!(Instant::now() < deadline, "analysis never finished");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // ==========================================================================
    // CONTROLLER STATE MACHINE TESTS
    // ==========================================================================

    #[test]
    fn test_dispatch_runs_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let dashboard = fixture(tmp.path());

        let accepted = start_analysis(&dashboard, AnalyzeParams {
                name: "Age Study!".to_string(),
                cohort: cohort(),
                feature: "age".to_string(),
                test: "pearson".to_string(),
                apply_fdr: true,
            })
            .unwrap();
        assert_eq!(accepted.status, RunStatus::Running);
        // Name sanitized to alphanumeric
        assert!(accepted.name.starts_with("AgeStudy - age - pearson - "));

        let record = wait_for_terminal_status(&dashboard, &accepted.filename);
        assert_eq!(record.status, RunStatus::Completed);
        let results = record.results.unwrap();
        assert!(results.contains_key("Left-Hippocampus"));
        assert!(results["Left-Hippocampus"].adjusted.is_some());

        // The finished run lands in the DB log
        let rows = dashboard.db.all_analyses().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "completed");
        assert_eq!(rows[0].selected_subjects, cohort().join(","));
    }

    #[test]
    fn test_rejections_leave_no_state() {
        let tmp = tempfile::tempdir().unwrap();
        let dashboard = fixture(tmp.path());

        let attempts = [
            AnalyzeParams {
                name: "!!!".to_string(), // empty once sanitized
                cohort: cohort(),
                feature: "age".to_string(),
                test: "pearson".to_string(),
                apply_fdr: false,
            },
            AnalyzeParams {
                name: "Study".to_string(),
                cohort: vec![],
                feature: "age".to_string(),
                test: "pearson".to_string(),
                apply_fdr: false,
            },
            AnalyzeParams {
                name: "Study".to_string(),
                cohort: cohort(),
                feature: "".to_string(),
                test: "pearson".to_string(),
                apply_fdr: false,
            },
            AnalyzeParams {
                name: "Study".to_string(),
                cohort: cohort(),
                feature: "age".to_string(),
                test: "".to_string(),
                apply_fdr: false,
            },
            // Invalid test for a categorical feature
            AnalyzeParams {
                name: "Study".to_string(),
                cohort: cohort(),
                feature: "sex".to_string(),
                test: "pearson".to_string(),
                apply_fdr: false,
            },
        ];

        for params in attempts {
            assert!(start_analysis(&dashboard, params).is_err());
        }

        assert!(dashboard.history().list().unwrap().is_empty());
        assert!(dashboard.db.all_analyses().unwrap().is_empty());
    }

    #[test]
    fn test_failed_run_is_recorded_as_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let dashboard = fixture(tmp.path());

        // sub-05 is not in the region table, the per-region lookup fails
        let db = Database::open_at(&dashboard.settings.db_path).unwrap();
        db.insert_subject("sub-05", "sub-05.nii").unwrap();
        db.update_subject_status("sub-05", SubjectStatus::UpdateTableCompleted)
            .unwrap();
        write_file(
            &dashboard.settings.characteristics_csv,
            "scan,age\nsub-01.nii,20\nsub-02.nii,30\nsub-03.nii,40\nsub-04.nii,50\nsub-05.nii,60\n",
        );
        let dashboard = Arc::new(Dashboard::new(dashboard.settings.clone()).unwrap());

        let mut cohort = cohort();
        cohort.push("sub-05".to_string());
        let accepted = start_analysis(&dashboard, AnalyzeParams {
                name: "Doomed".to_string(),
                cohort,
                feature: "age".to_string(),
                test: "pearson".to_string(),
                apply_fdr: false,
            })
            .unwrap();

        let record = wait_for_terminal_status(&dashboard, &accepted.filename);
        assert_eq!(record.status, RunStatus::Failed);
        assert!(record.results.is_none());

        let rows = dashboard.db.all_analyses().unwrap();
        assert_eq!(rows[0].status, "failed");
    }

    #[test]
    fn test_loaded_record_restores_request_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        let dashboard = fixture(tmp.path());

        let accepted = start_analysis(&dashboard, AnalyzeParams {
                name: "Round".to_string(),
                cohort: cohort(),
                feature: "sex".to_string(),
                test: "t-test".to_string(),
                apply_fdr: true,
            })
            .unwrap();
        let finished = wait_for_terminal_status(&dashboard, &accepted.filename);

        let restored = dashboard.history().load(&accepted.filename).unwrap();
        assert_eq!(restored, finished);
        assert_eq!(restored.cohort, cohort());
        assert_eq!(restored.test, StatTest::TTest);
        assert!(restored.apply_fdr);
    }

    // ==========================================================================
    // READ-SIDE TESTS
    // ==========================================================================

    #[test]
    fn test_projection_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let dashboard = fixture(tmp.path());

        let accepted = start_analysis(&dashboard, AnalyzeParams {
                name: "Proj".to_string(),
                cohort: cohort(),
                feature: "age".to_string(),
                test: "pearson".to_string(),
                apply_fdr: false,
            })
            .unwrap();
        wait_for_terminal_status(&dashboard, &accepted.filename);

        let payload = dashboard
            .projection(&ProjectionQuery {
                file: accepted.filename.clone(),
                metric: "r-value".to_string(),
            })
            .unwrap();

        assert_eq!(payload.metric, "r-value");
        assert!((payload.values["Left-Hippocampus"] - 0.524).abs() < 1e-3);
        // Left-Hippocampus has atlas coordinates, so it appears as a point
        assert_eq!(payload.points.len(), 1);
        assert_eq!(payload.points[0].coords, [-28.0, -18.0, -16.0]);
        assert_eq!(payload.surface["Left-Hippocampus"], 0);
    }

    #[test]
    fn test_region_data_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let dashboard = fixture(tmp.path());

        let accepted = start_analysis(&dashboard, AnalyzeParams {
                name: "Data".to_string(),
                cohort: cohort(),
                feature: "age".to_string(),
                test: "pearson".to_string(),
                apply_fdr: false,
            })
            .unwrap();
        wait_for_terminal_status(&dashboard, &accepted.filename);

        let payload = dashboard
            .region_data(&RegionQuery {
                file: accepted.filename.clone(),
                region: "Left-Hippocampus".to_string(),
            })
            .unwrap();

        assert!(payload.numeric);
        assert_eq!(payload.volumes, vec![3000.0, 3100.0, 2950.0, 3200.0]);
        assert!(payload.r.is_some());
        assert!(payload.p.unwrap() <= 1.0);
    }

    // ==========================================================================
    // NAME SANITIZATION TESTS
    // ==========================================================================

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Age Study 2024!"), "AgeStudy2024");
        assert_eq!(sanitize_name("___"), "");
        assert_eq!(sanitize_name("plain"), "plain");
    }
}
