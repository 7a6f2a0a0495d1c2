//! Statistical tests over cohort vectors
//!
//! Implements the four supported tests (Pearson, Spearman, two-sample t,
//! one-way ANOVA) and Benjamini-Hochberg adjustment. Each test returns the
//! statistic together with a two-sided p-value from the matching statrs
//! distribution. Degenerate inputs (too few samples, zero variance, NaN)
//! are errors rather than NaN results, so callers never persist NaN.

use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

/// Error type for statistical computations
#[derive(Debug, Clone, PartialEq)]
pub enum StatError {
    TooFewSamples { needed: usize, got: usize },
    LengthMismatch { x: usize, y: usize },
    ZeroVariance,
    NonFinite,
    Distribution(String),
}

impl std::fmt::Display for StatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatError::TooFewSamples { needed, got } => {
                write!(f, "too few samples: needed {}, got {}", needed, got)
            }
            StatError::LengthMismatch { x, y } => {
                write!(f, "input length mismatch: {} vs {}", x, y)
            }
            StatError::ZeroVariance => write!(f, "zero variance in input"),
            StatError::NonFinite => write!(f, "non-finite value in input"),
            StatError::Distribution(msg) => write!(f, "distribution error: {}", msg),
        }
    }
}

impl std::error::Error for StatError {}

pub type Result<T> = std::result::Result<T, StatError>;

fn check_finite(xs: &[f64]) -> Result<()> {
    if xs.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(StatError::NonFinite)
    }
}

pub fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sum_sq_dev(xs: &[f64], m: f64) -> f64 {
    xs.iter().map(|v| (v - m) * (v - m)).sum()
}

/// Two-sided p-value of a t statistic with `df` degrees of freedom
fn two_sided_t_pvalue(t: f64, df: f64) -> Result<f64> {
    let dist =
        StudentsT::new(0.0, 1.0, df).map_err(|e| StatError::Distribution(e.to_string()))?;
    Ok((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
}

// ============================================================================
// Correlation tests
// ============================================================================

/// Pearson correlation coefficient with two-sided p-value
///
/// The p-value uses the exact t transform `t = r*sqrt((n-2)/(1-r^2))`
/// against Student's t with n-2 degrees of freedom.
pub fn pearson(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    if x.len() != y.len() {
        return Err(StatError::LengthMismatch { x: x.len(), y: y.len() });
    }
    if x.len() < 3 {
        return Err(StatError::TooFewSamples { needed: 3, got: x.len() });
    }
    check_finite(x)?;
    check_finite(y)?;

    let n = x.len() as f64;
    let mx = mean(x);
    let my = mean(y);

    let mut cov = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        cov += (a - mx) * (b - my);
    }
    let var_x = sum_sq_dev(x, mx);
    let var_y = sum_sq_dev(y, my);
    if var_x == 0.0 || var_y == 0.0 {
        return Err(StatError::ZeroVariance);
    }

    let r = (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0);

    // Perfectly collinear data has an unbounded t statistic
    if (1.0 - r * r) <= f64::EPSILON {
        return Ok((r, 0.0));
    }

    let df = n - 2.0;
    let t = r * (df / (1.0 - r * r)).sqrt();
    let p = two_sided_t_pvalue(t, df)?;
    Ok((r, p))
}

/// Spearman rank correlation: Pearson over average ranks
pub fn spearman(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    if x.len() != y.len() {
        return Err(StatError::LengthMismatch { x: x.len(), y: y.len() });
    }
    check_finite(x)?;
    check_finite(y)?;
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Average ranks (1-based); ties receive the mean of their rank span
pub fn average_ranks(xs: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..xs.len()).collect();
    order.sort_by(|&a, &b| xs[a].partial_cmp(&xs[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0; xs.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && xs[order[j + 1]] == xs[order[i]] {
            j += 1;
        }
        // Ranks i+1..=j+1 share one tied value
        let rank = (i + 1 + j + 1) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

// ============================================================================
// Group tests
// ============================================================================

/// Two-sample Student's t-test (pooled variance, two-sided)
pub fn t_test(a: &[f64], b: &[f64]) -> Result<(f64, f64)> {
    if a.len() < 2 || b.len() < 2 {
        return Err(StatError::TooFewSamples { needed: 2, got: a.len().min(b.len()) });
    }
    check_finite(a)?;
    check_finite(b)?;

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (ma, mb) = (mean(a), mean(b));
    let df = na + nb - 2.0;

    let pooled_var = (sum_sq_dev(a, ma) + sum_sq_dev(b, mb)) / df;
    if pooled_var == 0.0 {
        return Err(StatError::ZeroVariance);
    }

    let t = (ma - mb) / (pooled_var * (1.0 / na + 1.0 / nb)).sqrt();
    let p = two_sided_t_pvalue(t, df)?;
    Ok((t, p))
}

/// One-way ANOVA F-test across `groups`
pub fn one_way_anova(groups: &[Vec<f64>]) -> Result<(f64, f64)> {
    if groups.len() < 2 {
        return Err(StatError::TooFewSamples { needed: 2, got: groups.len() });
    }
    for g in groups {
        if g.is_empty() {
            return Err(StatError::TooFewSamples { needed: 1, got: 0 });
        }
        check_finite(g)?;
    }

    let n_total: usize = groups.iter().map(|g| g.len()).sum();
    let k = groups.len();
    let df_within = n_total.checked_sub(k).unwrap_or(0);
    if df_within == 0 {
        return Err(StatError::TooFewSamples { needed: k + 1, got: n_total });
    }

    let grand: f64 = groups.iter().flatten().sum::<f64>() / n_total as f64;

    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for g in groups {
        let m = mean(g);
        ss_between += g.len() as f64 * (m - grand) * (m - grand);
        ss_within += sum_sq_dev(g, m);
    }

    let ms_within = ss_within / df_within as f64;
    if ms_within == 0.0 {
        return Err(StatError::ZeroVariance);
    }
    let ms_between = ss_between / (k - 1) as f64;
    let f_stat = ms_between / ms_within;

    let dist = FisherSnedecor::new((k - 1) as f64, df_within as f64)
        .map_err(|e| StatError::Distribution(e.to_string()))?;
    let p = (1.0 - dist.cdf(f_stat)).clamp(0.0, 1.0);
    Ok((f_stat, p))
}

// ============================================================================
// Multiple-comparison correction
// ============================================================================

/// Benjamini-Hochberg step-up FDR adjustment
///
/// Returns `(p_adjusted, significant)` aligned with the input order;
/// `significant` is `p_adjusted <= alpha`. Deterministic in the full set
/// of p-values, independent of input order.
pub fn benjamini_hochberg(p_values: &[f64], alpha: f64) -> Vec<(f64, bool)> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Raw step-up values, then enforce monotonicity from the largest p down
    let mut adjusted_sorted: Vec<f64> = order
        .iter()
        .enumerate()
        .map(|(rank, &idx)| (p_values[idx] * m as f64 / (rank + 1) as f64).min(1.0))
        .collect();
    for i in (0..m.saturating_sub(1)).rev() {
        adjusted_sorted[i] = adjusted_sorted[i].min(adjusted_sorted[i + 1]);
    }

    let mut out = vec![(1.0, false); m];
    for (rank, &idx) in order.iter().enumerate() {
        let adj = adjusted_sorted[rank];
        out[idx] = (adj, adj <= alpha);
    }
    out
}
