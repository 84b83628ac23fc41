use chrono::NaiveDate;
use serde::Serialize;

use crate::calc::{final_grade, format_grade, format_score, score_for, GradeMap};
use crate::model::{Assessment, Student};
use crate::plan::{validate_plan, PLAN_TOTAL};

pub const FIXED_HEADERS: [&str; 3] = ["Cedula", "Apellido", "Nombre"];
pub const FINAL_HEADER: &str = "Nota Final";

/// What the consolidated sheet can show for the current plan and roster.
/// Derived from the inputs on every call; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConsolidationState {
    #[serde(rename_all = "camelCase")]
    IncompletePlan { total: i64, delta: i64 },
    #[serde(rename_all = "camelCase")]
    Empty {
        missing_students: bool,
        missing_assessments: bool,
    },
    Ready,
}

impl ConsolidationState {
    pub fn classify(student_count: usize, assessments: &[Assessment]) -> Self {
        let check = validate_plan(assessments.iter().map(|a| a.weight));
        if !assessments.is_empty() && !check.ok {
            return ConsolidationState::IncompletePlan {
                total: check.total,
                delta: PLAN_TOTAL - check.total,
            };
        }
        if student_count == 0 || assessments.is_empty() {
            return ConsolidationState::Empty {
                missing_students: student_count == 0,
                missing_assessments: assessments.is_empty(),
            };
        }
        ConsolidationState::Ready
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConsolidationState::Ready)
    }

    pub fn message(&self) -> String {
        match self {
            ConsolidationState::IncompletePlan { total, delta } if *delta > 0 => {
                format!("plan totals {}%: missing {}%", total, delta)
            }
            ConsolidationState::IncompletePlan { total, delta } => {
                format!("plan totals {}%: exceeds by {}%", total, -delta)
            }
            ConsolidationState::Empty {
                missing_students: true,
                missing_assessments: true,
            } => "add students and assessments to start grading".to_string(),
            ConsolidationState::Empty {
                missing_students: true,
                ..
            } => "add students to start grading".to_string(),
            ConsolidationState::Empty { .. } => "add assessments to start grading".to_string(),
            ConsolidationState::Ready => "ready".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedRow {
    pub student_id: String,
    pub cedula: String,
    pub last_name: String,
    pub first_name: String,
    pub scores: Vec<Option<f64>>,
    pub final_grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Consolidation {
    #[serde(flatten)]
    pub state: ConsolidationState,
    pub message: String,
    pub columns: Vec<String>,
    pub rows: Vec<ConsolidatedRow>,
}

/// Student x assessment matrix. Rows are only produced in the ready state.
pub fn consolidate(
    students: &[Student],
    assessments: &[Assessment],
    grades: &GradeMap,
) -> Consolidation {
    let state = ConsolidationState::classify(students.len(), assessments);
    let message = state.message();
    if !state.is_ready() {
        return Consolidation {
            state,
            message,
            columns: Vec::new(),
            rows: Vec::new(),
        };
    }

    let rows = students
        .iter()
        .map(|s| ConsolidatedRow {
            student_id: s.id.clone(),
            cedula: s.cedula.clone(),
            last_name: s.last_name.clone(),
            first_name: s.first_name.clone(),
            scores: assessments
                .iter()
                .map(|a| score_for(grades, &s.id, &a.id))
                .collect(),
            final_grade: format_grade(final_grade(&s.id, assessments, grades)),
        })
        .collect();

    Consolidation {
        state,
        message,
        columns: header_row(assessments),
        rows,
    }
}

pub fn header_row(assessments: &[Assessment]) -> Vec<String> {
    FIXED_HEADERS
        .iter()
        .map(|h| h.to_string())
        .chain(assessments.iter().map(Assessment::column_label))
        .chain(std::iter::once(FINAL_HEADER.to_string()))
        .collect()
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn push_record(out: &mut String, fields: &[String]) {
    let line = fields
        .iter()
        .map(|f| csv_quote(f))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push_str("\r\n");
}

#[derive(Debug, Clone)]
pub struct CsvExport {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub rows: usize,
}

/// Consolidated sheet as UTF-8 CSV.
///
/// Students are written in the order given; ungraded cells are `0`.
pub fn export_csv(
    students: &[Student],
    assessments: &[Assessment],
    grades: &GradeMap,
    section_name: &str,
    date: NaiveDate,
) -> CsvExport {
    let mut out = String::new();
    push_record(&mut out, &header_row(assessments));

    for s in students {
        let mut fields: Vec<String> =
            Vec::with_capacity(FIXED_HEADERS.len() + assessments.len() + 1);
        fields.push(s.cedula.clone());
        fields.push(s.last_name.clone());
        fields.push(s.first_name.clone());
        for a in assessments {
            fields.push(format_score(score_for(grades, &s.id, &a.id).unwrap_or(0.0)));
        }
        fields.push(format_grade(final_grade(&s.id, assessments, grades)));
        push_record(&mut out, &fields);
    }

    CsvExport {
        file_name: export_filename(section_name, date),
        bytes: out.into_bytes(),
        rows: students.len(),
    }
}

/// `notas_<section>_<YYYY-MM-DD>.csv` with each whitespace run in the section
/// name replaced by a single `_`.
pub fn export_filename(section_name: &str, date: NaiveDate) -> String {
    let mut slug = String::with_capacity(section_name.len());
    let mut in_space = false;
    for ch in section_name.chars() {
        if ch.is_whitespace() {
            if !in_space {
                slug.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        match ch {
            '/' | '\\' => slug.push('-'),
            _ => slug.push(ch),
        }
    }
    format!("notas_{}_{}.csv", slug, date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::grade_key;

    fn student(id: &str, first: &str, last: &str, cedula: &str) -> Student {
        Student {
            id: id.to_string(),
            section_id: "sec".to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            cedula: cedula.to_string(),
        }
    }

    fn assessment(id: &str, name: &str, weight: i64) -> Assessment {
        Assessment {
            id: id.to_string(),
            section_id: "sec".to_string(),
            name: name.to_string(),
            weight,
            sort_order: 0,
        }
    }

    /// RFC 4180 reader for checking exports.
    fn parse_csv(text: &str) -> Vec<Vec<String>> {
        let mut records = Vec::new();
        let mut record = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            if in_quotes {
                match ch {
                    '"' if chars.peek() == Some(&'"') => {
                        field.push('"');
                        chars.next();
                    }
                    '"' => in_quotes = false,
                    _ => field.push(ch),
                }
                continue;
            }
            match ch {
                '"' => in_quotes = true,
                ',' => record.push(std::mem::take(&mut field)),
                '\r' => {}
                '\n' => {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                _ => field.push(ch),
            }
        }
        if !field.is_empty() || !record.is_empty() {
            record.push(field);
            records.push(record);
        }
        records
    }

    #[test]
    fn classify_follows_plan_then_roster() {
        let full = vec![assessment("a1", "A", 30), assessment("a2", "B", 30), assessment("a3", "C", 40)];
        let partial = vec![assessment("a1", "A", 30), assessment("a2", "B", 30)];

        assert_eq!(ConsolidationState::classify(3, &full), ConsolidationState::Ready);

        let incomplete = ConsolidationState::classify(3, &partial);
        assert_eq!(
            incomplete,
            ConsolidationState::IncompletePlan {
                total: 60,
                delta: 40
            }
        );
        assert!(incomplete.message().contains("missing 40%"));

        // Plan problems win over an empty roster.
        assert!(matches!(
            ConsolidationState::classify(0, &partial),
            ConsolidationState::IncompletePlan { .. }
        ));
        assert_eq!(
            ConsolidationState::classify(0, &full),
            ConsolidationState::Empty {
                missing_students: true,
                missing_assessments: false
            }
        );
        assert_eq!(
            ConsolidationState::classify(4, &[]),
            ConsolidationState::Empty {
                missing_students: false,
                missing_assessments: true
            }
        );

        let over = vec![assessment("a1", "A", 70), assessment("a2", "B", 40)];
        let state = ConsolidationState::classify(1, &over);
        assert!(state.message().contains("exceeds by 10%"));
    }

    #[test]
    fn consolidate_withholds_rows_until_ready() {
        let students = vec![student("s1", "Ana", "Perez", "V-1")];
        let partial = vec![assessment("a1", "A", 50)];
        let c = consolidate(&students, &partial, &GradeMap::new());
        assert!(c.rows.is_empty());
        assert!(c.columns.is_empty());

        let full = vec![assessment("a1", "A", 60), assessment("a2", "B", 40)];
        let mut grades = GradeMap::new();
        grades.insert(grade_key("s1", "a1"), 18.0);
        grades.insert(grade_key("s1", "a2"), 15.0);
        let c = consolidate(&students, &full, &grades);
        assert!(c.state.is_ready());
        assert_eq!(c.rows.len(), 1);
        assert_eq!(c.rows[0].scores, vec![Some(18.0), Some(15.0)]);
        assert_eq!(c.rows[0].final_grade, "16.80");
        assert_eq!(c.columns.len(), 3 + 2 + 1);
    }

    #[test]
    fn export_layout_and_zero_fill() {
        let students = vec![
            student("s2", "Luis", "Arias", "V-2"),
            student("s1", "Ana", "Perez", "V-1"),
        ];
        let plan = vec![assessment("a1", "Parcial 1", 60), assessment("a2", "Proyecto", 40)];
        let mut grades = GradeMap::new();
        grades.insert(grade_key("s1", "a1"), 18.0);
        grades.insert(grade_key("s1", "a2"), 15.0);
        grades.insert(grade_key("s2", "a2"), 14.5);

        let d = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        let export = export_csv(&students, &plan, &grades, "Programacion II", d);
        assert_eq!(export.file_name, "notas_Programacion_II_2025-11-01.csv");
        assert_eq!(export.rows, 2);
        let text = String::from_utf8(export.bytes).expect("utf8");
        let records = parse_csv(&text);

        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            vec!["Cedula", "Apellido", "Nombre", "Parcial 1 (60%)", "Proyecto (40%)", "Nota Final"]
        );
        // Supplied order is kept.
        assert_eq!(records[1], vec!["V-2", "Arias", "Luis", "0", "14.5", "5.80"]);
        assert_eq!(records[2], vec!["V-1", "Perez", "Ana", "18", "15", "16.80"]);
        for r in &records {
            assert_eq!(r.len(), 3 + plan.len() + 1);
        }
    }

    #[test]
    fn export_quotes_awkward_fields() {
        let students = vec![student("s1", "Ana \"La\" Maria", "Perez, Jr.", "V-1\n2")];
        let plan = vec![assessment("a1", "Taller, grupal", 100)];
        let d = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        let export = export_csv(&students, &plan, &GradeMap::new(), "x", d);
        let text = String::from_utf8(export.bytes).expect("utf8");

        assert!(text.contains("\"Taller, grupal (100%)\""));
        assert!(text.contains("\"Perez, Jr.\""));
        assert!(text.contains("\"Ana \"\"La\"\" Maria\""));

        let records = parse_csv(&text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1][0], "V-1\n2");
        assert_eq!(records[1][1], "Perez, Jr.");
        assert_eq!(records[1][2], "Ana \"La\" Maria");
        assert_eq!(records[1][3], "0");
        assert_eq!(records[1][4], "0.00");
    }

    #[test]
    fn filename_collapses_whitespace() {
        let d = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        assert_eq!(
            export_filename("Programacion II", d),
            "notas_Programacion_II_2025-11-01.csv"
        );
        assert_eq!(
            export_filename("Base  de\tDatos", d),
            "notas_Base_de_Datos_2025-11-01.csv"
        );
        assert_eq!(export_filename(" Fisica ", d), "notas__Fisica__2025-11-01.csv");
    }
}
