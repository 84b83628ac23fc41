use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::calc::{grade_key, GradeMap};
use crate::error::{GradebookError, Result};
use crate::model::{Assessment, Section, Student};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub student_id: String,
    pub assessment_id: String,
    pub score: Option<f64>,
}

/// Persisted grade records: membership reads and upserts keyed on
/// `(student_id, assessment_id)`.
pub trait GradeStore {
    fn fetch_grades(&self, student_ids: &[String]) -> Result<Vec<GradeRecord>>;
    fn upsert_grade(&self, student_id: &str, assessment_id: &str, score: f64) -> Result<()>;
}

pub struct SqliteGradeStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteGradeStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl GradeStore for SqliteGradeStore<'_> {
    fn fetch_grades(&self, student_ids: &[String]) -> Result<Vec<GradeRecord>> {
        let placeholders = std::iter::repeat_n("?", student_ids.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT student_id, assessment_id, score FROM grades WHERE student_id IN ({})",
            placeholders
        );
        let bind_values: Vec<Value> = student_ids
            .iter()
            .map(|id| Value::Text(id.clone()))
            .collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind_values), |r| {
                Ok(GradeRecord {
                    student_id: r.get(0)?,
                    assessment_id: r.get(1)?,
                    score: r.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_grade(&self, student_id: &str, assessment_id: &str, score: f64) -> Result<()> {
        let grade_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO grades(id, student_id, assessment_id, score, updated_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, assessment_id) DO UPDATE SET
                   score = excluded.score,
                   updated_at = excluded.updated_at",
                (&grade_id, student_id, assessment_id, score, &now),
            )
            .map_err(GradebookError::insert("grades"))?;
        Ok(())
    }
}

/// Loads every recorded score for the given roster.
///
/// An empty roster returns an empty map without touching the store. Records
/// that fall outside the 0-20 scale are dropped here rather than at use.
pub fn load_grades<S: GradeStore + ?Sized>(store: &S, student_ids: &[String]) -> Result<GradeMap> {
    let mut grades = GradeMap::new();
    if student_ids.is_empty() {
        return Ok(grades);
    }

    for rec in store.fetch_grades(student_ids)? {
        match rec.score {
            Some(v) if v.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&v) => {
                grades.insert(grade_key(&rec.student_id, &rec.assessment_id), v);
            }
            other => {
                warn!(
                    student_id = %rec.student_id,
                    assessment_id = %rec.assessment_id,
                    score = ?other,
                    "dropping malformed grade record"
                );
            }
        }
    }
    debug!(students = student_ids.len(), grades = grades.len(), "grades loaded");
    Ok(grades)
}

pub fn parse_score(raw: &str) -> Result<f64> {
    let invalid = || GradebookError::InvalidScore {
        raw: raw.to_string(),
    };
    let v = raw.trim().parse::<f64>().map_err(|_| invalid())?;
    if !v.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&v) {
        return Err(invalid());
    }
    // `-0` is stored as plain zero.
    Ok(v + 0.0)
}

/// Validates and stores one score. Nothing is written when the input is
/// rejected; on success the stored value is returned for the caller to merge.
pub fn save_grade<S: GradeStore + ?Sized>(
    store: &S,
    student_id: &str,
    assessment_id: &str,
    raw_input: &str,
) -> Result<f64> {
    let score = parse_score(raw_input)?;
    store.upsert_grade(student_id, assessment_id, score)?;
    debug!(student_id, assessment_id, score, "grade saved");
    Ok(score)
}

fn section_from_row(r: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: r.get(0)?,
        owner_id: r.get(1)?,
        subject_name: r.get(2)?,
        code: r.get(3)?,
        trayecto: r.get(4)?,
        trimestre: r.get(5)?,
        created_at: r.get(6)?,
    })
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        section_id: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        cedula: r.get(4)?,
    })
}

fn assessment_from_row(r: &Row<'_>) -> rusqlite::Result<Assessment> {
    Ok(Assessment {
        id: r.get(0)?,
        section_id: r.get(1)?,
        name: r.get(2)?,
        weight: r.get(3)?,
        sort_order: r.get(4)?,
    })
}

pub fn find_section(conn: &Connection, section_id: &str) -> Result<Section> {
    conn.query_row(
        "SELECT id, owner_id, subject_name, code, trayecto, trimestre, created_at
         FROM sections WHERE id = ?",
        [section_id],
        section_from_row,
    )
    .optional()?
    .ok_or_else(|| GradebookError::not_found("section", section_id))
}

pub fn list_sections(conn: &Connection, owner_id: Option<&str>) -> Result<Vec<Section>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, subject_name, code, trayecto, trimestre, created_at
         FROM sections
         WHERE ?1 IS NULL OR owner_id = ?1
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([owner_id], section_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_student(conn: &Connection, student_id: &str) -> Result<Student> {
    conn.query_row(
        "SELECT id, section_id, first_name, last_name, cedula FROM students WHERE id = ?",
        [student_id],
        student_from_row,
    )
    .optional()?
    .ok_or_else(|| GradebookError::not_found("student", student_id))
}

/// Roster sorted by last name, then first name.
pub fn list_students(conn: &Connection, section_id: &str) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, section_id, first_name, last_name, cedula
         FROM students
         WHERE section_id = ?
         ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE, rowid",
    )?;
    let rows = stmt
        .query_map([section_id], student_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_assessment(conn: &Connection, assessment_id: &str) -> Result<Assessment> {
    conn.query_row(
        "SELECT id, section_id, name, weight, sort_order FROM assessments WHERE id = ?",
        [assessment_id],
        assessment_from_row,
    )
    .optional()?
    .ok_or_else(|| GradebookError::not_found("assessment", assessment_id))
}

/// Evaluation plan in creation order.
pub fn list_assessments(conn: &Connection, section_id: &str) -> Result<Vec<Assessment>> {
    let mut stmt = conn.prepare(
        "SELECT id, section_id, name, weight, sort_order
         FROM assessments
         WHERE section_id = ?
         ORDER BY sort_order, rowid",
    )?;
    let rows = stmt
        .query_map([section_id], assessment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn section_weight_total(conn: &Connection, section_id: &str) -> Result<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(weight), 0) FROM assessments WHERE section_id = ?",
        [section_id],
        |r| r.get(0),
    )?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct RecordingStore {
        fetches: Cell<usize>,
        records: Vec<GradeRecord>,
        writes: RefCell<Vec<(String, String, f64)>>,
    }

    impl GradeStore for RecordingStore {
        fn fetch_grades(&self, _student_ids: &[String]) -> Result<Vec<GradeRecord>> {
            self.fetches.set(self.fetches.get() + 1);
            Ok(self.records.clone())
        }

        fn upsert_grade(&self, student_id: &str, assessment_id: &str, score: f64) -> Result<()> {
            self.writes
                .borrow_mut()
                .push((student_id.to_string(), assessment_id.to_string(), score));
            Ok(())
        }
    }

    #[derive(Default)]
    struct BrokenStore {
        upserts: Cell<usize>,
    }

    impl GradeStore for BrokenStore {
        fn fetch_grades(&self, _student_ids: &[String]) -> Result<Vec<GradeRecord>> {
            Err(GradebookError::Query(rusqlite::Error::InvalidQuery))
        }

        fn upsert_grade(&self, _student_id: &str, _assessment_id: &str, _score: f64) -> Result<()> {
            self.upserts.set(self.upserts.get() + 1);
            Err(GradebookError::insert("grades")(rusqlite::Error::InvalidQuery))
        }
    }

    fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn.execute(
            "INSERT INTO sections(id, owner_id, subject_name, code, trayecto, trimestre, created_at)
             VALUES('sec', 'prof', 'Programacion II', 'P2', 2, 1, '2025-01-01T00:00:00Z')",
            [],
        )
        .expect("section");
        conn.execute(
            "INSERT INTO students(id, section_id, first_name, last_name, cedula)
             VALUES('s1', 'sec', 'Ana', 'Perez', 'V-1'), ('s2', 'sec', 'Luis', 'Arias', 'V-2')",
            [],
        )
        .expect("students");
        conn.execute(
            "INSERT INTO assessments(id, section_id, name, weight, sort_order)
             VALUES('a1', 'sec', 'Parcial', 60, 0), ('a2', 'sec', 'Proyecto', 40, 1)",
            [],
        )
        .expect("assessments");
        conn
    }

    #[test]
    fn empty_roster_skips_the_store() {
        let store = RecordingStore::default();
        let grades = load_grades(&store, &[]).expect("load");
        assert!(grades.is_empty());
        assert_eq!(store.fetches.get(), 0);
    }

    #[test]
    fn malformed_records_are_dropped_at_ingestion() {
        let store = RecordingStore {
            records: vec![
                GradeRecord {
                    student_id: "s1".into(),
                    assessment_id: "a1".into(),
                    score: Some(12.0),
                },
                GradeRecord {
                    student_id: "s1".into(),
                    assessment_id: "a2".into(),
                    score: Some(25.0),
                },
                GradeRecord {
                    student_id: "s2".into(),
                    assessment_id: "a1".into(),
                    score: None,
                },
            ],
            ..Default::default()
        };
        let grades = load_grades(&store, &["s1".to_string(), "s2".to_string()]).expect("load");
        assert_eq!(grades.len(), 1);
        assert_eq!(grades.get(&grade_key("s1", "a1")), Some(&12.0));
    }

    #[test]
    fn rejected_scores_never_reach_the_store() {
        let store = RecordingStore::default();
        for raw in ["21", "-1", "abc", "", "NaN", "inf", "20.01"] {
            assert!(
                matches!(
                    save_grade(&store, "s1", "a1", raw),
                    Err(GradebookError::InvalidScore { .. })
                ),
                "{raw} should be rejected"
            );
        }
        assert!(store.writes.borrow().is_empty());

        assert_eq!(save_grade(&store, "s1", "a1", "14.5").expect("save"), 14.5);
        assert_eq!(save_grade(&store, "s1", "a1", " 0 ").expect("save"), 0.0);
        assert_eq!(save_grade(&store, "s1", "a1", "20").expect("save"), 20.0);
        assert_eq!(store.writes.borrow().len(), 3);
    }

    #[test]
    fn store_failures_surface_as_store_errors() {
        let store = BrokenStore::default();

        let err = load_grades(&store, &["s1".to_string()]).expect_err("fetch fails");
        assert!(err.is_store_failure());
        assert_eq!(err.code(), "db_query_failed");

        let err = save_grade(&store, "s1", "a1", "12").expect_err("upsert fails");
        assert!(err.is_store_failure());
        assert_eq!(err.code(), "db_insert_failed");
        assert_eq!(err.details(), Some(serde_json::json!({ "table": "grades" })));
        assert_eq!(store.upserts.get(), 1);

        // Rejected input never reaches the broken store.
        let err = save_grade(&store, "s1", "a1", "25").expect_err("invalid");
        assert!(!err.is_store_failure());
        assert_eq!(store.upserts.get(), 1);
    }

    #[test]
    fn negative_zero_is_stored_as_zero() {
        let conn = seeded_conn();
        let store = SqliteGradeStore::new(&conn);
        let score = save_grade(&store, "s1", "a1", "-0").expect("save");
        assert!(score.is_sign_positive());
        assert_eq!(crate::calc::format_score(score), "0");

        let grades = load_grades(&store, &["s1".to_string()]).expect("load");
        let stored = grades.get(&grade_key("s1", "a1")).copied().expect("stored");
        assert!(stored.is_sign_positive());
    }

    #[test]
    fn sqlite_upsert_overwrites_instead_of_duplicating() {
        let conn = seeded_conn();
        let store = SqliteGradeStore::new(&conn);
        save_grade(&store, "s1", "a1", "14.5").expect("first");
        save_grade(&store, "s1", "a1", "14.5").expect("again");
        save_grade(&store, "s1", "a2", "9").expect("other key");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM grades", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);

        save_grade(&store, "s1", "a1", "17").expect("overwrite");
        assert!(save_grade(&store, "s1", "a1", "99").is_err());

        let grades = load_grades(&store, &["s1".to_string(), "s2".to_string()]).expect("load");
        assert_eq!(grades.get(&grade_key("s1", "a1")), Some(&17.0));
        assert_eq!(grades.get(&grade_key("s1", "a2")), Some(&9.0));
        assert_eq!(grades.len(), 2);
    }

    #[test]
    fn roster_and_plan_ordering() {
        let conn = seeded_conn();
        let students = list_students(&conn, "sec").expect("students");
        let names: Vec<&str> = students.iter().map(|s| s.last_name.as_str()).collect();
        assert_eq!(names, vec!["Arias", "Perez"]);

        let plan = list_assessments(&conn, "sec").expect("plan");
        let ids: Vec<&str> = plan.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(section_weight_total(&conn, "sec").expect("total"), 100);
        assert_eq!(section_weight_total(&conn, "missing").expect("total"), 0);

        assert!(matches!(
            find_student(&conn, "nope"),
            Err(GradebookError::NotFound { entity: "student", .. })
        ));
    }
}
