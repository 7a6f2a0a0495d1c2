//! Statistical analysis runner
//!
//! Maps one cohort + feature + test to a per-region result mapping. The
//! runner validates its inputs, computes every region independently (in
//! parallel), optionally applies Benjamini-Hochberg adjustment across all
//! region p-values, and fails as a unit: callers get either the complete
//! mapping or an error, never a partial result.

use crate::loaders::{FeatureTable, FeatureVector, LoadError, RegionTable};
use crate::stats::{self, StatError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// ============================================================================
// Test kinds
// ============================================================================

/// The supported statistical tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatTest {
    Pearson,
    Spearman,
    #[serde(rename = "t-test")]
    TTest,
    Anova,
}

impl StatTest {
    pub const ALL: [StatTest; 4] = [
        StatTest::Pearson,
        StatTest::Spearman,
        StatTest::TTest,
        StatTest::Anova,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatTest::Pearson => "pearson",
            StatTest::Spearman => "spearman",
            StatTest::TTest => "t-test",
            StatTest::Anova => "anova",
        }
    }
}

impl FromStr for StatTest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        StatTest::ALL
            .iter()
            .find(|t| t.as_str() == lower)
            .copied()
            .ok_or_else(|| format!("unknown statistical test '{}'", s))
    }
}

impl std::fmt::Display for StatTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `test` can run against a feature with these values.
///
/// Correlation tests need a numeric feature; the two-group test needs
/// exactly two distinct values; ANOVA needs three or more distinct values
/// of a categorical feature.
pub fn is_valid_test(values: &FeatureVector, test: StatTest) -> bool {
    match test {
        StatTest::Pearson | StatTest::Spearman => values.is_numeric(),
        StatTest::TTest => values.distinct_count() == 2,
        StatTest::Anova => !values.is_numeric() && values.distinct_count() >= 3,
    }
}

// ============================================================================
// Region results
// ============================================================================

/// Raw outcome of one region's test; which statistic is present depends on
/// the test that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "lowercase")]
pub enum TestOutcome {
    Pearson { r: f64, p: f64 },
    Spearman { r: f64, p: f64 },
    #[serde(rename = "t-test")]
    TTest { t: f64, p: f64 },
    Anova { f: f64, p: f64 },
    /// No group structure satisfied the chosen test for this region
    Neutral { p: f64 },
}

impl TestOutcome {
    pub fn p(&self) -> f64 {
        match self {
            TestOutcome::Pearson { p, .. }
            | TestOutcome::Spearman { p, .. }
            | TestOutcome::TTest { p, .. }
            | TestOutcome::Anova { p, .. }
            | TestOutcome::Neutral { p } => *p,
        }
    }
}

/// FDR adjustment attached when the correction step runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjusted {
    pub p_adjusted: f64,
    pub significant: bool,
}

/// One region's full result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionResult {
    #[serde(flatten)]
    pub outcome: TestOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted: Option<Adjusted>,
}

pub type ResultMap = BTreeMap<String, RegionResult>;

// ============================================================================
// Errors
// ============================================================================

/// Failure sentinel of the runner; the caller records status=failed
#[derive(Debug)]
pub enum AnalysisError {
    EmptyCohort,
    EmptyFeature,
    InvalidTest { test: StatTest, feature: String },
    Load(LoadError),
    Region { region: String, source: StatError },
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::EmptyCohort => write!(f, "no subjects selected"),
            AnalysisError::EmptyFeature => write!(f, "no feature selected"),
            AnalysisError::InvalidTest { test, feature } => {
                write!(f, "test '{}' is not valid for feature '{}'", test, feature)
            }
            AnalysisError::Load(e) => write!(f, "{}", e),
            AnalysisError::Region { region, source } => {
                write!(f, "region '{}': {}", region, source)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

impl From<LoadError> for AnalysisError {
    fn from(e: LoadError) -> Self {
        AnalysisError::Load(e)
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Significance threshold of the FDR step
const FDR_ALPHA: f64 = 0.05;

/// Run the chosen test over every region for the cohort.
pub fn run(
    cohort: &[String],
    feature: &str,
    test: StatTest,
    apply_fdr: bool,
    features: &FeatureTable,
    regions: &RegionTable,
) -> Result<ResultMap, AnalysisError> {
    log::info!(
        "Starting statistical analysis: {} subjects, feature '{}', test {}, fdr {}",
        cohort.len(),
        feature,
        test,
        apply_fdr
    );

    if cohort.is_empty() {
        log::error!("Analysis rejected: no subjects selected");
        return Err(AnalysisError::EmptyCohort);
    }
    if feature.is_empty() {
        log::error!("Analysis rejected: no feature selected");
        return Err(AnalysisError::EmptyFeature);
    }

    let values = features.values(cohort, feature)?;
    if !is_valid_test(&values, test) {
        log::error!("Test {} is not valid for feature '{}'", test, feature);
        return Err(AnalysisError::InvalidTest { test, feature: feature.to_string() });
    }

    // Group membership depends only on the feature, compute it once
    let grouping = match test {
        StatTest::TTest | StatTest::Anova => Some(group_indices(&values)),
        _ => None,
    };

    let computed: Result<Vec<(String, TestOutcome)>, AnalysisError> = regions
        .regions()
        .par_iter()
        .map(|region| {
            let volumes = regions.values(cohort, region)?;
            let outcome = region_outcome(test, &values, grouping.as_deref(), &volumes)
                .map_err(|source| AnalysisError::Region { region: region.clone(), source })?;
            Ok((region.clone(), outcome))
        })
        .collect();

    let computed = match computed {
        Ok(c) => c,
        Err(e) => {
            log::error!("Analysis failed: {}", e);
            return Err(e);
        }
    };

    let mut results: ResultMap = computed
        .into_iter()
        .map(|(region, outcome)| (region, RegionResult { outcome, adjusted: None }))
        .collect();

    if apply_fdr {
        let p_values: Vec<f64> = results.values().map(|r| r.outcome.p()).collect();
        let adjusted = stats::benjamini_hochberg(&p_values, FDR_ALPHA);
        let significant = adjusted.iter().filter(|(_, sig)| *sig).count();
        for (result, (p_adjusted, significant)) in results.values_mut().zip(adjusted) {
            result.adjusted = Some(Adjusted { p_adjusted, significant });
        }
        log::info!("FDR correction applied, {} significant regions", significant);
    }

    log::info!("Analysis completed for {} regions", results.len());
    Ok(results)
}

/// Indices of each feature group, in first-appearance order of the values
fn group_indices(values: &FeatureVector) -> Vec<Vec<usize>> {
    let labels = values.distinct_values();
    labels
        .iter()
        .map(|label| {
            (0..values.len())
                .filter(|&i| values.display_at(i) == *label)
                .collect()
        })
        .collect()
}

fn region_outcome(
    test: StatTest,
    values: &FeatureVector,
    grouping: Option<&[Vec<usize>]>,
    volumes: &[f64],
) -> Result<TestOutcome, StatError> {
    match test {
        StatTest::Pearson | StatTest::Spearman => {
            let x = match values {
                FeatureVector::Numeric(x) => x,
                // Ruled out by is_valid_test
                FeatureVector::Categorical(_) => return Ok(TestOutcome::Neutral { p: 1.0 }),
            };
            match test {
                StatTest::Pearson => {
                    let (r, p) = stats::pearson(x, volumes)?;
                    Ok(TestOutcome::Pearson { r, p })
                }
                _ => {
                    let (r, p) = stats::spearman(x, volumes)?;
                    Ok(TestOutcome::Spearman { r, p })
                }
            }
        }
        StatTest::TTest | StatTest::Anova => {
            let grouping = grouping.expect("grouping precomputed for group tests");
            let groups: Vec<Vec<f64>> = grouping
                .iter()
                .map(|idx| idx.iter().map(|&i| volumes[i]).collect())
                .collect();

            if test == StatTest::TTest && groups.len() == 2 {
                if groups.iter().any(|g| g.len() < 2) {
                    // A singleton group cannot carry a two-sample test
                    return Ok(TestOutcome::Neutral { p: 1.0 });
                }
                let (t, p) = stats::t_test(&groups[0], &groups[1])?;
                Ok(TestOutcome::TTest { t, p })
            } else if test == StatTest::Anova && groups.len() > 2 {
                let (f, p) = stats::one_way_anova(&groups)?;
                Ok(TestOutcome::Anova { f, p })
            } else {
                Ok(TestOutcome::Neutral { p: 1.0 })
            }
        }
    }
}
