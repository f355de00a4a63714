//! First-digit (Benford's Law) analysis of the amounts attached to a claim.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::claims::Claim;

/// Expected share of each leading digit 1..=9.
pub const BENFORD_DISTRIBUTION: [f64; 9] = [
    0.301, 0.176, 0.125, 0.097, 0.079, 0.067, 0.058, 0.051, 0.046,
];

/// Largest mean absolute deviation a first-digit distribution can reach, used to normalise.
const MAX_MAD: f64 = 0.22;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenfordConfig {
    /// Amounts required before the test is meaningful.
    pub min_sample: usize,
    pub p_value_threshold: f64,
    pub deviation_threshold: f64,
}

impl Default for BenfordConfig {
    fn default() -> Self {
        Self {
            min_sample: 10,
            p_value_threshold: 0.05,
            deviation_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitShare {
    pub digit: u8,
    pub observed: f64,
    pub expected: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenfordAnalysis {
    pub is_anomalous: bool,
    /// Normalised mean absolute deviation in `[0, 1]`.
    pub deviation_score: f64,
    pub p_value: f64,
    pub chi_square: f64,
    pub sample_size: usize,
    pub message: String,
    /// Empty when the sample was too small to test.
    pub digit_distribution: Vec<DigitShare>,
}

/// Observed vs expected percentages, ready for a bar chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenfordChart {
    pub digits: Vec<u8>,
    pub observed: Vec<f64>,
    pub expected: Vec<f64>,
    pub x_label: String,
    pub y_label: String,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct BenfordAnalyzer {
    config: BenfordConfig,
}

impl BenfordAnalyzer {
    pub fn new(config: BenfordConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BenfordConfig {
        &self.config
    }

    /// Claim amount, line items, historical and related amounts; non-positive values dropped.
    pub fn amounts(claim: &Claim) -> Vec<f64> {
        std::iter::once(claim.claim_amount)
            .chain(claim.line_items.iter().map(|item| item.amount))
            .chain(claim.historical_amounts.iter().copied())
            .chain(claim.related_amounts.iter().copied())
            .filter(|amount| amount.is_finite() && *amount > 0.0)
            .collect()
    }

    #[instrument(name = "benford_analyze", skip(self, claim), fields(claim_id = %claim.claim_id))]
    pub fn analyze(&self, claim: &Claim) -> BenfordAnalysis {
        self.analyze_amounts(&Self::amounts(claim))
    }

    pub fn analyze_amounts(&self, amounts: &[f64]) -> BenfordAnalysis {
        let digits: Vec<u8> = amounts.iter().filter_map(|a| leading_digit(*a)).collect();
        if digits.len() < self.config.min_sample {
            debug!(sample = digits.len(), "too few amounts for benford test");
            return BenfordAnalysis {
                is_anomalous: false,
                deviation_score: 0.0,
                p_value: 1.0,
                chi_square: 0.0,
                sample_size: digits.len(),
                message: "Insufficient data for Benford analysis".into(),
                digit_distribution: Vec::new(),
            };
        }

        let observed = distribution(&digits);
        let chi_square = chi_square_statistic(&observed);
        let p_value = chi_square_survival_df8(chi_square);
        let deviation_score = deviation_score(&observed);
        let is_anomalous = p_value < self.config.p_value_threshold
            || deviation_score > self.config.deviation_threshold;

        BenfordAnalysis {
            is_anomalous,
            deviation_score: round4(deviation_score),
            p_value: round4(p_value),
            chi_square: round4(chi_square),
            sample_size: digits.len(),
            message: message(is_anomalous, deviation_score).into(),
            digit_distribution: observed
                .iter()
                .zip(BENFORD_DISTRIBUTION)
                .enumerate()
                .map(|(idx, (observed, expected))| DigitShare {
                    digit: idx as u8 + 1,
                    observed: round4(*observed),
                    expected,
                })
                .collect(),
        }
    }

    pub fn chart(&self, amounts: &[f64]) -> BenfordChart {
        let digits: Vec<u8> = amounts
            .iter()
            .filter(|a| a.is_finite() && **a > 0.0)
            .filter_map(|a| leading_digit(*a))
            .collect();
        let observed = distribution(&digits);
        BenfordChart {
            digits: (1..=9).collect(),
            observed: observed.iter().map(|share| round4(share * 100.0)).collect(),
            expected: BENFORD_DISTRIBUTION
                .iter()
                .map(|share| round4(share * 100.0))
                .collect(),
            x_label: "Leading Digit".into(),
            y_label: "Frequency (%)".into(),
            title: "Benford's Law Analysis".into(),
        }
    }
}

/// First significant digit of a positive amount.
pub fn leading_digit(amount: f64) -> Option<u8> {
    if !amount.is_finite() || amount == 0.0 {
        return None;
    }
    // Scientific notation always starts with the first significant digit.
    let formatted = format!("{:e}", amount.abs());
    formatted
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .filter(|d| *d > 0)
        .map(|d| d as u8)
}

fn distribution(digits: &[u8]) -> [f64; 9] {
    let mut counts = [0usize; 9];
    for digit in digits {
        counts[usize::from(*digit - 1)] += 1;
    }
    let total = digits.len();
    let mut shares = [0.0; 9];
    if total > 0 {
        for (share, count) in shares.iter_mut().zip(counts) {
            *share = count as f64 / total as f64;
        }
    }
    shares
}

/// Pearson statistic over percentage-scaled shares.
fn chi_square_statistic(observed: &[f64; 9]) -> f64 {
    observed
        .iter()
        .zip(BENFORD_DISTRIBUTION)
        .map(|(observed, expected)| {
            let o = observed * 100.0;
            let e = expected * 100.0;
            (o - e).powi(2) / e
        })
        .sum()
}

/// Upper tail of the chi-square distribution with 8 degrees of freedom.
fn chi_square_survival_df8(x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for i in 1..4 {
        term *= half / i as f64;
        sum += term;
    }
    ((-half).exp() * sum).clamp(0.0, 1.0)
}

fn deviation_score(observed: &[f64; 9]) -> f64 {
    let mad = observed
        .iter()
        .zip(BENFORD_DISTRIBUTION)
        .map(|(observed, expected)| (observed - expected).abs())
        .sum::<f64>()
        / 9.0;
    (mad / MAX_MAD).min(1.0)
}

fn message(is_anomalous: bool, deviation: f64) -> &'static str {
    if !is_anomalous {
        "Amount distribution follows Benford's Law - no anomalies detected"
    } else if deviation > 0.5 {
        "CRITICAL: Significant deviation from Benford's Law detected - high probability of data manipulation"
    } else if deviation > 0.3 {
        "WARNING: Notable deviation from Benford's Law - amounts may be fabricated or estimated"
    } else {
        "NOTICE: Minor deviation from Benford's Law detected - warrants further review"
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
