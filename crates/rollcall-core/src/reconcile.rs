//! Proxy-attendance detection.
//!
//! Compares the number of distinct identities a scan observed with the
//! headcount an external estimator derived from a classroom photo. More
//! broadcasting identities than people in the room suggests someone is
//! broadcasting on behalf of an absent student.
//!
//! Only an overcount is flagged. An undercount (students without a working
//! radio, phones left in bags) is reported through `delta` but the verdict
//! stays [`Verdict::Normal`]. There is no tolerance band: a delta of one is
//! already an overcount.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Result, RollcallError};
use crate::payload::Identity;
use crate::scan::ScanReport;

/// Reconciliation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Observed count does not exceed the expected headcount.
    Normal,
    /// More identities observed than people expected.
    Overcount,
}

/// Derived comparison of observed and expected attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "expected_headcount": 10,
    "observed_count": 12,
    "delta": 2,
    "verdict": "overcount"
}))]
pub struct ReconciliationResult {
    /// Headcount supplied by the estimator.
    #[schema(example = 10, minimum = 0)]
    pub expected_headcount: u64,

    /// Distinct identities observed.
    #[schema(example = 12, minimum = 0)]
    pub observed_count: u64,

    /// `observed_count - expected_headcount`; negative for an undercount.
    #[schema(example = 2)]
    pub delta: i64,

    /// Overcount iff `delta > 0`.
    pub verdict: Verdict,
}

/// What the host needs to open a manual proxy review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProxyReviewRequest {
    /// Headcount supplied by the estimator.
    pub expected_headcount: u64,
    /// Distinct identities observed.
    pub observed_count: u64,
    /// Surplus identities.
    pub delta: i64,
}

impl ReconciliationResult {
    /// `true` when the result calls for a proxy review.
    #[must_use]
    pub const fn is_overcount(&self) -> bool {
        matches!(self.verdict, Verdict::Overcount)
    }

    /// Hand-off for the review workflow; `None` unless overcount.
    #[must_use]
    pub const fn review_request(&self) -> Option<ProxyReviewRequest> {
        if self.is_overcount() {
            Some(ProxyReviewRequest {
                expected_headcount: self.expected_headcount,
                observed_count: self.observed_count,
                delta: self.delta,
            })
        } else {
            None
        }
    }
}

/// Compare observed identities with an expected headcount.
///
/// # Errors
///
/// Returns [`RollcallError::InvalidInput`] if `expected_headcount` is negative.
pub fn reconcile(
    expected_headcount: i64,
    observed: &HashSet<Identity>,
) -> Result<ReconciliationResult> {
    let expected = u64::try_from(expected_headcount).map_err(|_| {
        RollcallError::InvalidInput(format!(
            "expected headcount must be non-negative, got {expected_headcount}"
        ))
    })?;
    let observed_count = observed.len() as u64;
    let delta = i128::from(observed_count) - i128::from(expected);
    let delta = i64::try_from(delta).map_err(|_| {
        RollcallError::InvalidInput(format!("headcount delta {delta} out of range"))
    })?;

    Ok(ReconciliationResult {
        expected_headcount: expected,
        observed_count,
        delta,
        verdict: if delta > 0 {
            Verdict::Overcount
        } else {
            Verdict::Normal
        },
    })
}

/// Distinct decoded identities from a finished scan. Devices without a
/// payload are not attendees and are skipped.
#[must_use]
pub fn observed_identities(report: &ScanReport) -> HashSet<Identity> {
    report
        .devices
        .iter()
        .filter_map(|device| device.payload.clone())
        .collect()
}
