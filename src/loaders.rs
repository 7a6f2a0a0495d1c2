//! Tabular snapshots for analysis
//!
//! Two read-only tables are assembled per session: the feature table
//! (subject registry joined with the characteristics CSV on file name) and
//! the region-volume table (the three FreeSurfer wide tables concatenated
//! column-wise). Missing or empty source CSVs yield empty tables so a
//! cohort without FreeSurfer outputs still loads.

use crate::db::{Database, DbError, SubjectStatus};
use crate::settings::NON_FILTER_COLUMNS;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Error type for table loading and access
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Csv(csv::Error),
    Db(DbError),
    UnknownFeature(String),
    UnknownRegion(String),
    UnknownSubject(String),
    MissingValue { subject: String, column: String },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "I/O error: {}", e),
            LoadError::Csv(e) => write!(f, "CSV error: {}", e),
            LoadError::Db(e) => write!(f, "database error: {}", e),
            LoadError::UnknownFeature(name) => write!(f, "unknown feature '{}'", name),
            LoadError::UnknownRegion(name) => write!(f, "unknown region '{}'", name),
            LoadError::UnknownSubject(id) => write!(f, "unknown subject '{}'", id),
            LoadError::MissingValue { subject, column } => {
                write!(f, "subject '{}' has no value for '{}'", subject, column)
            }
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<csv::Error> for LoadError {
    fn from(e: csv::Error) -> Self {
        LoadError::Csv(e)
    }
}

impl From<DbError> for LoadError {
    fn from(e: DbError) -> Self {
        LoadError::Db(e)
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;

// ============================================================================
// Feature table
// ============================================================================

/// One feature column, typed by whole-column parse
#[derive(Debug, Clone)]
pub enum FeatureColumn {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

/// Cohort-aligned values of one feature
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureVector {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl FeatureVector {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FeatureVector::Numeric(_))
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureVector::Numeric(v) => v.len(),
            FeatureVector::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct values
    pub fn distinct_count(&self) -> usize {
        match self {
            FeatureVector::Numeric(v) => {
                let mut seen: Vec<u64> = v.iter().map(|x| x.to_bits()).collect();
                seen.sort_unstable();
                seen.dedup();
                seen.len()
            }
            FeatureVector::Categorical(v) => {
                let mut seen: Vec<&String> = v.iter().collect();
                seen.sort();
                seen.dedup();
                seen.len()
            }
        }
    }

    /// Distinct values in first-appearance order, as display strings
    pub fn distinct_values(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        match self {
            FeatureVector::Numeric(v) => {
                for x in v {
                    let s = format_number(*x);
                    if !out.contains(&s) {
                        out.push(s);
                    }
                }
            }
            FeatureVector::Categorical(v) => {
                for s in v {
                    if !out.contains(s) {
                        out.push(s.clone());
                    }
                }
            }
        }
        out
    }

    /// Display string of the value at `idx`, used as a group key
    pub fn display_at(&self, idx: usize) -> String {
        match self {
            FeatureVector::Numeric(v) => format_number(v[idx]),
            FeatureVector::Categorical(v) => v[idx].clone(),
        }
    }
}

fn format_number(x: f64) -> String {
    if x == x.trunc() && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        format!("{}", x)
    }
}

/// UI-facing description of one feature column
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnSpec {
    Text,
    Numeric { min: Option<f64>, max: Option<f64> },
    Categorical { choices: Vec<String> },
}

/// Subject characteristics: registry columns plus the characteristics CSV
#[derive(Debug, Clone)]
pub struct FeatureTable {
    subjects: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<String>,
    data: HashMap<String, FeatureColumn>,
}

impl FeatureTable {
    /// Load analysis-ready subjects and join the characteristics CSV.
    ///
    /// Only subjects whose FreeSurfer tables have been assembled
    /// (`update_table_completed`) take part in analyses.
    pub fn load(db: &Database, characteristics_csv: &Path) -> Result<Self> {
        let rows = db.subjects_with_status(&[SubjectStatus::UpdateTableCompleted])?;

        let subjects: Vec<String> = rows.iter().map(|s| s.subject_id.clone()).collect();
        let index: HashMap<String, usize> = subjects
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut columns = vec!["file_name".to_string(), "status".to_string()];
        let mut data = HashMap::new();
        data.insert(
            "file_name".to_string(),
            FeatureColumn::Categorical(rows.iter().map(|s| Some(s.file_name.clone())).collect()),
        );
        data.insert(
            "status".to_string(),
            FeatureColumn::Categorical(rows.iter().map(|s| Some(s.status.clone())).collect()),
        );

        let mut table = FeatureTable { subjects, index, columns: Vec::new(), data };

        match table.join_characteristics(characteristics_csv, &rows, &mut columns) {
            Ok(()) => {}
            Err(e) => {
                log::warn!(
                    "Could not load characteristics from {}: {}",
                    characteristics_csv.display(),
                    e
                );
            }
        }

        table.columns = columns;
        Ok(table)
    }

    fn join_characteristics(
        &mut self,
        path: &Path,
        rows: &[crate::db::Subject],
        columns: &mut Vec<String>,
    ) -> Result<()> {
        if !path.exists() || fs::metadata(path)?.len() == 0 {
            return Ok(());
        }

        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Ok(());
        }

        // First column is the file-name key whatever its header says
        let char_columns: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();
        let mut by_file: HashMap<String, Vec<String>> = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let key = record.get(0).unwrap_or("").to_string();
            let values: Vec<String> =
                record.iter().skip(1).map(|v| v.trim().to_string()).collect();
            by_file.insert(key, values);
        }

        for (col_idx, col) in char_columns.iter().enumerate() {
            if columns.contains(col) {
                continue;
            }
            let raw: Vec<Option<String>> = rows
                .iter()
                .map(|s| {
                    by_file
                        .get(&s.file_name)
                        .and_then(|vals| vals.get(col_idx))
                        .filter(|v| !v.is_empty())
                        .cloned()
                })
                .collect();
            columns.push(col.clone());
            self.data.insert(col.clone(), type_column(raw));
        }
        Ok(())
    }

    pub fn subject_ids(&self) -> &[String] {
        &self.subjects
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    /// Columns offered as analysis features (registry columns excluded)
    pub fn feature_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !NON_FILTER_COLUMNS.contains(&c.as_str()))
            .cloned()
            .collect()
    }

    /// Values of `feature` over `cohort`, in cohort order
    pub fn values(&self, cohort: &[String], feature: &str) -> Result<FeatureVector> {
        let column = self
            .data
            .get(feature)
            .ok_or_else(|| LoadError::UnknownFeature(feature.to_string()))?;

        match column {
            FeatureColumn::Numeric(values) => {
                let mut out = Vec::with_capacity(cohort.len());
                for id in cohort {
                    out.push(self.cell(values, id, feature)?);
                }
                Ok(FeatureVector::Numeric(out))
            }
            FeatureColumn::Categorical(values) => {
                let mut out = Vec::with_capacity(cohort.len());
                for id in cohort {
                    out.push(self.cell(values, id, feature)?);
                }
                Ok(FeatureVector::Categorical(out))
            }
        }
    }

    fn cell<T: Clone>(&self, values: &[Option<T>], id: &str, column: &str) -> Result<T> {
        let idx = self
            .index
            .get(id)
            .copied()
            .ok_or_else(|| LoadError::UnknownSubject(id.to_string()))?;
        values[idx].clone().ok_or_else(|| LoadError::MissingValue {
            subject: id.to_string(),
            column: column.to_string(),
        })
    }

    /// Range / choice description for UI filter widgets
    pub fn column_spec(&self, name: &str) -> Result<ColumnSpec> {
        let column = self
            .data
            .get(name)
            .ok_or_else(|| LoadError::UnknownFeature(name.to_string()))?;

        Ok(match column {
            FeatureColumn::Numeric(values) => {
                let present: Vec<f64> = values.iter().flatten().copied().collect();
                ColumnSpec::Numeric {
                    min: present.iter().copied().reduce(f64::min),
                    max: present.iter().copied().reduce(f64::max),
                }
            }
            FeatureColumn::Categorical(values) => {
                let mut choices: Vec<String> = values.iter().flatten().cloned().collect();
                choices.sort();
                choices.dedup();
                ColumnSpec::Categorical { choices }
            }
        })
    }
}

/// A column is numeric when every present value parses as a number
fn type_column(raw: Vec<Option<String>>) -> FeatureColumn {
    let all_numeric = raw
        .iter()
        .flatten()
        .all(|v| v.parse::<f64>().map(|x| x.is_finite()).unwrap_or(false));
    let any_present = raw.iter().any(|v| v.is_some());

    if all_numeric && any_present {
        FeatureColumn::Numeric(
            raw.into_iter()
                .map(|v| v.and_then(|s| s.parse().ok()))
                .collect(),
        )
    } else {
        FeatureColumn::Categorical(raw)
    }
}

// ============================================================================
// Region-volume table
// ============================================================================

/// Per-subject scalar volumes for every named brain region
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: Vec<String>,
    // region -> subject -> volume
    values: HashMap<String, HashMap<String, f64>>,
}

impl RegionTable {
    /// Assemble the combined table from the three FreeSurfer wide CSVs.
    ///
    /// Files are concatenated column-wise on the subject key (first column);
    /// duplicate region columns keep the first occurrence. Missing or empty
    /// files contribute nothing.
    pub fn load(aseg: &Path, aparc_lh: &Path, aparc_rh: &Path) -> Result<Self> {
        let mut table = RegionTable::default();
        for path in [aseg, aparc_lh, aparc_rh] {
            table.merge_wide_csv(path)?;
        }
        Ok(table)
    }

    fn merge_wide_csv(&mut self, path: &Path) -> Result<()> {
        if !path.exists() || fs::metadata(path)?.len() == 0 {
            log::warn!("Region table source missing or empty: {}", path.display());
            return Ok(());
        }

        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.len() < 2 {
            return Ok(());
        }

        let region_names: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();
        let fresh: Vec<bool> = region_names
            .iter()
            .map(|r| !self.values.contains_key(r))
            .collect();
        for (region, is_fresh) in region_names.iter().zip(&fresh) {
            if *is_fresh {
                self.regions.push(region.clone());
                self.values.insert(region.clone(), HashMap::new());
            }
        }

        for record in reader.records() {
            let record = record?;
            let subject = match record.get(0) {
                Some(s) if !s.is_empty() => subject_key(s),
                _ => continue,
            };
            for (col_idx, region) in region_names.iter().enumerate() {
                if !fresh[col_idx] {
                    continue;
                }
                if let Some(value) = record.get(col_idx + 1).and_then(|v| v.trim().parse().ok()) {
                    self.values
                        .get_mut(region)
                        .expect("region column registered above")
                        .insert(subject.clone(), value);
                }
            }
        }
        Ok(())
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Volumes of `region` over `cohort`, in cohort order
    pub fn values(&self, cohort: &[String], region: &str) -> Result<Vec<f64>> {
        let by_subject = self
            .values
            .get(region)
            .ok_or_else(|| LoadError::UnknownRegion(region.to_string()))?;

        cohort
            .iter()
            .map(|id| {
                by_subject
                    .get(id)
                    .copied()
                    .ok_or_else(|| LoadError::MissingValue {
                        subject: id.clone(),
                        column: region.to_string(),
                    })
            })
            .collect()
    }
}

/// FreeSurfer table keys carry the scan file name; subjects are keyed by stem
fn subject_key(raw: &str) -> String {
    match raw.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => raw.to_string(),
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

    fn seeded_db(tmp: &Path) -> Database {
        let db = Database::open_at(tmp.join("test.sqlite3")).unwrap();
        for id in ["sub-01", "sub-02", "sub-03"] {
            db.insert_subject(id, &format!("{}.nii", id)).unwrap();
            db.update_subject_status(id, SubjectStatus::UpdateTableCompleted)
                .unwrap();
        }
        // Not table-ready, must not appear in the feature table
        db.insert_subject("sub-04", "sub-04.nii").unwrap();
        db
    }

    // ==========================================================================
    // FEATURE TABLE TESTS
    // ==========================================================================

    #[test]
    fn test_feature_table_joins_on_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let db = seeded_db(tmp.path());

        let csv_path = tmp.path().join("features.csv");
        write_file(
            &csv_path,
            "scan,age,sex\nsub-01.nii,20,M\nsub-02.nii,30,F\nsub-03.nii,40,M\n",
        );

        let table = FeatureTable::load(&db, &csv_path).unwrap();
        assert_eq!(table.subject_ids(), &["sub-01", "sub-02", "sub-03"]);
        assert_eq!(table.feature_columns(), vec!["age", "sex"]);

        let cohort = vec!["sub-02".to_string(), "sub-01".to_string()];
        let ages = table.values(&cohort, "age").unwrap();
        assert_eq!(ages, FeatureVector::Numeric(vec![30.0, 20.0]));

        let sexes = table.values(&cohort, "sex").unwrap();
        assert_eq!(
            sexes,
            FeatureVector::Categorical(vec!["F".to_string(), "M".to_string()])
        );
    }

    #[test]
    fn test_feature_table_without_characteristics_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let db = seeded_db(tmp.path());

        let table = FeatureTable::load(&db, &tmp.path().join("absent.csv")).unwrap();
        assert_eq!(table.subject_ids().len(), 3);
        assert!(table.feature_columns().is_empty());
        assert!(table.has_feature("status"));
    }

    #[test]
    fn test_mixed_column_is_categorical() {
        let tmp = tempfile::tempdir().unwrap();
        let db = seeded_db(tmp.path());

        let csv_path = tmp.path().join("features.csv");
        write_file(
            &csv_path,
            "scan,group\nsub-01.nii,1\nsub-02.nii,control\nsub-03.nii,2\n",
        );

        let table = FeatureTable::load(&db, &csv_path).unwrap();
        let cohort: Vec<String> = table.subject_ids().to_vec();
        assert!(!table.values(&cohort, "group").unwrap().is_numeric());
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let db = seeded_db(tmp.path());

        let csv_path = tmp.path().join("features.csv");
        write_file(&csv_path, "scan,age\nsub-01.nii,20\nsub-02.nii,30\n");

        let table = FeatureTable::load(&db, &csv_path).unwrap();
        let cohort = vec!["sub-03".to_string()];
        assert!(matches!(
            table.values(&cohort, "age"),
            Err(LoadError::MissingValue { .. })
        ));
    }

    #[test]
    fn test_column_specs() {
        let tmp = tempfile::tempdir().unwrap();
        let db = seeded_db(tmp.path());

        let csv_path = tmp.path().join("features.csv");
        write_file(
            &csv_path,
            "scan,age,sex\nsub-01.nii,20,M\nsub-02.nii,30,F\nsub-03.nii,40,M\n",
        );
        let table = FeatureTable::load(&db, &csv_path).unwrap();

        match table.column_spec("age").unwrap() {
            ColumnSpec::Numeric { min, max } => {
                assert_eq!(min, Some(20.0));
                assert_eq!(max, Some(40.0));
            }
            other => panic!("expected numeric spec, got {:?}", other),
        }
        match table.column_spec("sex").unwrap() {
            ColumnSpec::Categorical { choices } => {
                assert_eq!(choices, vec!["F".to_string(), "M".to_string()]);
            }
            other => panic!("expected categorical spec, got {:?}", other),
        }
    }

    #[test]
    fn test_distinct_values_preserve_first_appearance_order() {
        let v = FeatureVector::Categorical(vec![
            "M".to_string(),
            "F".to_string(),
            "M".to_string(),
        ]);
        assert_eq!(v.distinct_count(), 2);
        assert_eq!(v.distinct_values(), vec!["M".to_string(), "F".to_string()]);
    }

    // ==========================================================================
    // REGION TABLE TESTS
    // ==========================================================================

    #[test]
    fn test_region_table_concatenates_and_dedups() {
        let tmp = tempfile::tempdir().unwrap();
        let aseg = tmp.path().join("aseg_volumes.csv");
        let lh = tmp.path().join("aparc_lh.csv");
        let rh = tmp.path().join("aparc_rh.csv");

        write_file(
            &aseg,
            "Measure:volume,Left-Hippocampus,eTIV\nsub-01.nii,3000,1500000\nsub-02.nii,3100,1400000\n",
        );
        // eTIV repeats; first occurrence wins
        write_file(
            &lh,
            "lh.aparc.area,lh_precentral,eTIV\nsub-01.nii,8000,99\nsub-02.nii,8100,99\n",
        );
        write_file(&rh, "rh.aparc.area,rh_precentral\nsub-01.nii,7900\nsub-02.nii,8050\n");

        let table = RegionTable::load(&aseg, &lh, &rh).unwrap();
        assert_eq!(
            table.regions(),
            &["Left-Hippocampus", "eTIV", "lh_precentral", "rh_precentral"]
        );

        let cohort = vec!["sub-01".to_string(), "sub-02".to_string()];
        assert_eq!(
            table.values(&cohort, "eTIV").unwrap(),
            vec![1500000.0, 1400000.0]
        );
        assert_eq!(
            table.values(&cohort, "rh_precentral").unwrap(),
            vec![7900.0, 8050.0]
        );
    }

    #[test]
    fn test_region_table_tolerates_missing_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty.csv");
        write_file(&empty, "");

        let table = RegionTable::load(
            &tmp.path().join("absent_a.csv"),
            &empty,
            &tmp.path().join("absent_b.csv"),
        )
        .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_region_values_error_on_unknown() {
        let tmp = tempfile::tempdir().unwrap();
        let aseg = tmp.path().join("aseg.csv");
        write_file(&aseg, "Measure:volume,Left-Hippocampus\nsub-01.nii,3000\n");

        let table = RegionTable::load(
            &aseg,
            &tmp.path().join("absent.csv"),
            &tmp.path().join("absent.csv"),
        )
        .unwrap();

        let cohort = vec!["sub-01".to_string()];
        assert!(matches!(
            table.values(&cohort, "Right-Hippocampus"),
            Err(LoadError::UnknownRegion(_))
        ));
        assert!(matches!(
            table.values(&["sub-09".to_string()], "Left-Hippocampus"),
            Err(LoadError::MissingValue { .. })
        ));
    }
}
