//! Braindash - neuroimaging cohort analysis dashboard
//!
//! Braindash lets a researcher pick a cohort of subjects, correlate a
//! demographic or clinical feature against per-region brain volumes
//! produced by an external FreeSurfer pipeline, and explore the results
//! on brain renderings, with an admin panel for ingestion status and
//! pipeline launches, and a folder watcher that registers arriving scans.
//!
//! # Overview
//!
//! Subjects enter through the watched data folder and advance through the
//! FreeSurfer stages (`recon-all`, then summary-table update); once their
//! wide tables are assembled they become selectable in the dashboard.
//! Running an analysis validates the request, persists a running record,
//! computes one statistic per anatomical region on a worker thread, and
//! rewrites the record as completed or failed; the history list restores
//! any prior run without recomputation.
//!
//! # Statistical tests
//!
//! | Test | Feature requirement | Region result |
//! |----------|--------------------------------|---------------|
//! | pearson | numeric | `r`, `p` |
//! | spearman | numeric | `r`, `p` |
//! | t-test | exactly 2 distinct values | `t`, `p` |
//! | anova | ≥3 distinct categorical values | `f`, `p` |
//!
//! Optional Benjamini-Hochberg correction adjusts p-values across all
//! regions of one run and flags significant regions at α = 0.05.
//!
//! # Quick Start
//!
//! ```no_run
//! use braindash::analysis::{self, StatTest};
//! use braindash::db::Database;
//! use braindash::loaders::{FeatureTable, RegionTable};
//! use braindash::settings::Settings;
//!
//! let settings = Settings::from_env()?;
//! let db = Database::open_at(&settings.db_path)?;
//! let features = FeatureTable::load(&db, &settings.characteristics_csv)?;
//! let regions = RegionTable::load(
//!     &settings.aseg_csv,
//!     &settings.aparc_lh_csv,
//!     &settings.aparc_rh_csv,
//! )?;
//!
//! let cohort: Vec<String> = features.subject_ids().to_vec();
//! let results = analysis::run(&cohort, "age", StatTest::Pearson, true, &features, &regions)?;
//! for (region, result) in &results {
//!     println!("{}: {:?}", region, result);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! - [`analysis`]: validation and the per-region statistical runner
//! - [`history`]: file-backed analysis records with lifecycle status
//! - [`serve`]: dashboard server and controller
//! - [`admin`]: ingestion panel and pipeline dispatch
//! - [`pipeline`]: FreeSurfer stage invocations and table merging

pub mod admin;
pub mod analysis;
pub mod atlas;
pub mod db;
pub mod history;
pub mod loaders;
pub mod pipeline;
pub mod schema;
pub mod serve;
pub mod settings;
pub mod stats;
pub mod watch;

pub use analysis::{Adjusted, RegionResult, StatTest, TestOutcome};
pub use db::{Database, DbSummary, Subject, SubjectStatus};
pub use history::{AnalysisRecord, HistoryStore, RunStatus};
pub use loaders::{FeatureTable, RegionTable};
pub use settings::Settings;
