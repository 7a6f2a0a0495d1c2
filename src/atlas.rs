//! Static region lookup tables and display projection
//!
//! Region names follow FreeSurfer conventions: aseg structures like
//! `Left-Hippocampus`, aparc areas like `lh_precentral`. The MNI
//! coordinates are approximate structure centers for the glass-brain
//! views; the Destrieux indices drive the surface mesh views. Lookup
//! misses are `None`/0, never errors: unmapped regions are simply
//! excluded from coordinate views and contribute zero mesh intensity.

use crate::analysis::{ResultMap, StatTest, TestOutcome};
use std::collections::BTreeMap;
use std::str::FromStr;

// ============================================================================
// Display metrics
// ============================================================================

/// Scalar projected out of a region result for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DisplayMetric {
    #[serde(rename = "p-value")]
    PValue,
    #[serde(rename = "r-value")]
    RValue,
    #[serde(rename = "t-value")]
    TValue,
    #[serde(rename = "f-value")]
    FValue,
}

impl DisplayMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMetric::PValue => "p-value",
            DisplayMetric::RValue => "r-value",
            DisplayMetric::TValue => "t-value",
            DisplayMetric::FValue => "f-value",
        }
    }
}

impl FromStr for DisplayMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p-value" => Ok(DisplayMetric::PValue),
            "r-value" => Ok(DisplayMetric::RValue),
            "t-value" => Ok(DisplayMetric::TValue),
            "f-value" => Ok(DisplayMetric::FValue),
            other => Err(format!("unknown display metric '{}'", other)),
        }
    }
}

impl std::fmt::Display for DisplayMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics that make sense for the given test
pub fn metrics_for_test(test: StatTest) -> Vec<DisplayMetric> {
    match test {
        StatTest::Pearson | StatTest::Spearman => {
            vec![DisplayMetric::PValue, DisplayMetric::RValue]
        }
        StatTest::TTest => vec![DisplayMetric::PValue, DisplayMetric::TValue],
        StatTest::Anova => vec![DisplayMetric::PValue, DisplayMetric::FValue],
    }
}

/// Project the per-region results to one scalar per region.
///
/// p-values render as -log10 (the adjusted value when the record was run
/// with FDR correction); effect statistics a test did not produce are 0.
pub fn project(results: &ResultMap, metric: DisplayMetric, apply_fdr: bool) -> BTreeMap<String, f64> {
    results
        .iter()
        .map(|(region, result)| {
            let value = match metric {
                DisplayMetric::PValue => {
                    let p = if apply_fdr {
                        result.adjusted.map(|a| a.p_adjusted).unwrap_or(1.0)
                    } else {
                        result.outcome.p()
                    };
                    -p.max(f64::MIN_POSITIVE).log10()
                }
                DisplayMetric::RValue => match result.outcome {
                    TestOutcome::Pearson { r, .. } | TestOutcome::Spearman { r, .. } => r,
                    _ => 0.0,
                },
                DisplayMetric::TValue => match result.outcome {
                    TestOutcome::TTest { t, .. } => t,
                    _ => 0.0,
                },
                DisplayMetric::FValue => match result.outcome {
                    TestOutcome::Anova { f, .. } => f,
                    _ => 0.0,
                },
            };
            (region.clone(), value)
        })
        .collect()
}

// ============================================================================
// MNI coordinates
// ============================================================================

/// Approximate MNI center coordinates per region
const REGION_COORDINATES: &[(&str, [f64; 3])] = &[
    // Subcortical structures (bilateral)
    ("Left-Hippocampus", [-28.0, -18.0, -16.0]),
    ("Right-Hippocampus", [28.0, -18.0, -16.0]),
    ("Left-Amygdala", [-24.0, -6.0, -18.0]),
    ("Right-Amygdala", [24.0, -6.0, -18.0]),
    ("Left-Thalamus", [-11.0, -18.0, 8.0]),
    ("Right-Thalamus", [11.0, -18.0, 8.0]),
    ("Left-Caudate", [-13.0, 12.0, 9.0]),
    ("Right-Caudate", [13.0, 12.0, 9.0]),
    ("Left-Putamen", [-25.0, 0.0, 0.0]),
    ("Right-Putamen", [25.0, 0.0, 0.0]),
    ("Left-Pallidum", [-18.0, -4.0, -2.0]),
    ("Right-Pallidum", [18.0, -4.0, -2.0]),
    ("Left-Accumbens-area", [-9.0, 9.0, -8.0]),
    ("Right-Accumbens-area", [9.0, 9.0, -8.0]),
    // Cerebellum
    ("Left-Cerebellum-Cortex", [-20.0, -60.0, -40.0]),
    ("Right-Cerebellum-Cortex", [20.0, -60.0, -40.0]),
    // Brain stem
    ("Brain-Stem", [0.0, -24.0, -30.0]),
    // Lobe centers
    ("Frontal", [0.0, 30.0, 40.0]),
    ("Left-Frontal", [-30.0, 30.0, 40.0]),
    ("Right-Frontal", [30.0, 30.0, 40.0]),
    ("Temporal", [50.0, -20.0, -10.0]),
    ("Left-Temporal", [-50.0, -20.0, -10.0]),
    ("Right-Temporal", [50.0, -20.0, -10.0]),
    ("Parietal", [30.0, -50.0, 50.0]),
    ("Left-Parietal", [-30.0, -50.0, 50.0]),
    ("Right-Parietal", [30.0, -50.0, 50.0]),
    ("Occipital", [15.0, -85.0, 15.0]),
    ("Left-Occipital", [-15.0, -85.0, 15.0]),
    ("Right-Occipital", [15.0, -85.0, 15.0]),
    // Selected aparc areas
    ("lh_superiorfrontal", [-15.0, 35.0, 40.0]),
    ("rh_superiorfrontal", [15.0, 35.0, 40.0]),
    ("lh_precentral", [-40.0, -6.0, 50.0]),
    ("rh_precentral", [40.0, -6.0, 50.0]),
    ("lh_postcentral", [-40.0, -25.0, 50.0]),
    ("rh_postcentral", [40.0, -25.0, 50.0]),
    ("lh_superiortemporal", [-55.0, -20.0, 5.0]),
    ("rh_superiortemporal", [55.0, -20.0, 5.0]),
    ("lh_inferiorparietal", [-45.0, -55.0, 45.0]),
    ("rh_inferiorparietal", [45.0, -55.0, 45.0]),
    ("lh_precuneus", [-10.0, -65.0, 40.0]),
    ("rh_precuneus", [10.0, -65.0, 40.0]),
];

/// MNI coordinates for a region, if the atlas knows it
pub fn coordinates_for_region(region: &str) -> Option<[f64; 3]> {
    REGION_COORDINATES
        .iter()
        .find(|(name, _)| *name == region)
        .map(|(_, coords)| *coords)
}

// ============================================================================
// Destrieux surface indices
// ============================================================================

/// aseg summary measures that have no surface location
const SUMMARY_MEASURES: &[&str] = &[
    "BrainSegVol",
    "BrainSegVolNotVent",
    "eTIV",
    "lhCortexVol",
    "rhCortexVol",
    "CortexVol",
    "lhCerebralWhiteMatterVol",
    "rhCerebralWhiteMatterVol",
    "CerebralWhiteMatterVol",
    "SubCortGrayVol",
    "TotalGrayVol",
    "SupraTentorialVol",
    "SupraTentorialVolNotVent",
    "MaskVol",
    "BrainSegVol-to-eTIV",
    "MaskVol-to-eTIV",
    "lhSurfaceHoles",
    "rhSurfaceHoles",
    "SurfaceHoles",
    "EstimatedTotalIntraCranialVol",
];

/// Destrieux index of a left-hemisphere aparc label (0 = unmapped).
///
/// Destrieux has 74 regions per hemisphere; left occupies indices 1-73 and
/// the right hemisphere is the left index plus 74.
fn destrieux_left_index(label: &str) -> u32 {
    match label {
        // Frontal lobe
        "lh_superiorfrontal" => 28,
        "lh_rostralmiddlefrontal" => 27,
        "lh_caudalmiddlefrontal" => 27,
        "lh_parsopercularis" => 24,
        "lh_parstriangularis" => 26,
        "lh_parsorbitalis" => 25,
        "lh_lateralorbitofrontal" => 36,
        "lh_medialorbitofrontal" => 43,
        "lh_precentral" => 41,
        "lh_paracentral" => 17,
        "lh_frontalpole" => 19,
        // Parietal lobe
        "lh_superiorparietal" => 39,
        "lh_inferiorparietal" => 37,
        "lh_supramarginal" => 38,
        "lh_postcentral" => 40,
        "lh_precuneus" => 42,
        // Temporal lobe
        "lh_superiortemporal" => 46,
        "lh_middletemporal" => 50,
        "lh_inferiortemporal" => 49,
        "lh_bankssts" => 45,
        "lh_fusiform" => 33,
        "lh_transversetemporal" => 45,
        "lh_entorhinal" => 21,
        "lh_temporalpole" => 47,
        "lh_parahippocampal" => 35,
        // Occipital lobe
        "lh_lateraloccipital" => 31,
        "lh_lingual" => 34,
        "lh_cuneus" => 23,
        "lh_pericalcarine" => 32,
        // Cingulate
        "lh_rostralanteriorcingulate" => 20,
        "lh_caudalanteriorcingulate" => 20,
        "lh_posteriorcingulate" => 22,
        "lh_isthmuscingulate" => 22,
        // Insula
        "lh_insula" => 29,
        _ => 0,
    }
}

/// Destrieux surface index for any region label (0 = unmapped)
pub fn destrieux_index(region: &str) -> u32 {
    if SUMMARY_MEASURES.contains(&region) {
        return 0;
    }
    if let Some(rest) = region.strip_prefix("rh_") {
        let left = destrieux_left_index(&format!("lh_{}", rest));
        return if left == 0 { 0 } else { left + 74 };
    }
    destrieux_left_index(region)
}
