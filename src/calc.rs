use std::collections::HashMap;

use crate::model::Assessment;

/// Recorded scores keyed by `(student_id, assessment_id)`.
pub type GradeMap = HashMap<(String, String), f64>;

pub fn grade_key(student_id: &str, assessment_id: &str) -> (String, String) {
    (student_id.to_string(), assessment_id.to_string())
}

pub fn score_for(grades: &GradeMap, student_id: &str, assessment_id: &str) -> Option<f64> {
    grades.get(&grade_key(student_id, assessment_id)).copied()
}

/// Weighted final grade on the 0-20 scale.
///
/// An ungraded assessment contributes 0. The sum is kept unrounded; callers
/// format with [`format_grade`] once, at the edge.
pub fn final_grade(student_id: &str, assessments: &[Assessment], grades: &GradeMap) -> f64 {
    assessments
        .iter()
        .map(|a| {
            let score = score_for(grades, student_id, &a.id).unwrap_or(0.0);
            score * (a.weight as f64) / 100.0
        })
        .sum()
}

/// Two fixed decimals with a `.` separator regardless of locale. Ties round
/// away from zero (`16.125` -> `16.13`).
pub fn format_grade(x: f64) -> String {
    format!("{:.2}", (x * 100.0).round() / 100.0)
}

/// Shortest decimal form of a stored score (`18`, `14.5`).
pub fn format_score(x: f64) -> String {
    x.to_string()
}
