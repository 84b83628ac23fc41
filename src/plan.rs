use serde::Serialize;

use crate::error::{GradebookError, Result};

/// Sum an evaluation plan must reach before grades can be entered.
pub const PLAN_TOTAL: i64 = 100;

const MIN_WEIGHT: i64 = 1;
const MAX_WEIGHT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanCheck {
    pub ok: bool,
    pub total: i64,
}

pub fn validate_plan<I>(weights: I) -> PlanCheck
where
    I: IntoIterator<Item = i64>,
{
    let total: i64 = weights.into_iter().sum();
    PlanCheck {
        ok: total == PLAN_TOTAL,
        total,
    }
}

/// Checks a single weight change against the running total of its section.
///
/// `previous_weight` is 0 when the assessment is new. Only the upper bound is
/// enforced here; an under-weighted plan is accepted and keeps grade entry
/// locked until `validate_plan` reports it complete. Returns the new total.
pub fn validate_edit(current_total: i64, previous_weight: i64, new_weight: i64) -> Result<i64> {
    let new_total = current_total - previous_weight + new_weight;
    if new_total > PLAN_TOTAL {
        return Err(GradebookError::PlanTotalExceeded { new_total });
    }
    Ok(new_total)
}

/// Parses a weight typed by the instructor: a whole number of percent in 1..=100.
pub fn parse_weight(raw: &str) -> Result<i64> {
    let out_of_range = || GradebookError::WeightOutOfRange {
        raw: raw.to_string(),
    };
    let w = raw.trim().parse::<i64>().map_err(|_| out_of_range())?;
    if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&w) {
        return Err(out_of_range());
    }
    Ok(w)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// No assessments defined yet.
    Empty,
    Missing(i64),
    Exceeds(i64),
    Complete,
}

impl PlanStatus {
    pub fn of(assessment_count: usize, total: i64) -> Self {
        if assessment_count == 0 {
            PlanStatus::Empty
        } else if total < PLAN_TOTAL {
            PlanStatus::Missing(PLAN_TOTAL - total)
        } else if total > PLAN_TOTAL {
            PlanStatus::Exceeds(total - PLAN_TOTAL)
        } else {
            PlanStatus::Complete
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            PlanStatus::Empty => None,
            PlanStatus::Missing(n) => Some(format!("missing {}%", n)),
            PlanStatus::Exceeds(n) => Some(format!("exceeds by {}%", n)),
            PlanStatus::Complete => Some("complete".to_string()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Empty => "empty",
            PlanStatus::Missing(_) => "missing",
            PlanStatus::Exceeds(_) => "exceeds",
            PlanStatus::Complete => "complete",
        }
    }
}
