use chrono::Local;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::calc::GradeMap;
use crate::consolidation::{consolidate, export_csv, ConsolidationState};
use crate::db;
use crate::error::{GradebookError, Result};
use crate::invalidation::Entity;
use crate::ipc::error::err;
use crate::ipc::helpers::{input_string, mutated, required_str, respond, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::{Assessment, Section, Student};
use crate::plan::validate_plan;
use crate::store::{self, SqliteGradeStore};

const EXPORT_DIR_SETTING: &str = "export.dir";

/// Grades as `[{studentId, assessmentId, score}]`, sorted by key.
fn grades_json(grades: &GradeMap) -> serde_json::Value {
    let mut entries: Vec<_> = grades.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    json!(entries
        .into_iter()
        .map(|((student_id, assessment_id), score)| json!({
            "studentId": student_id,
            "assessmentId": assessment_id,
            "score": score,
        }))
        .collect::<Vec<_>>())
}

struct SectionSheet {
    section: Section,
    students: Vec<Student>,
    assessments: Vec<Assessment>,
    grades: GradeMap,
}

/// Fresh read of everything the consolidated sheet depends on.
fn load_sheet(conn: &Connection, section_id: &str) -> Result<SectionSheet> {
    let section = store::find_section(conn, section_id)?;
    let students = store::list_students(conn, section_id)?;
    let assessments = store::list_assessments(conn, section_id)?;
    let ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();
    let grades = store::load_grades(&SqliteGradeStore::new(conn), &ids)?;
    Ok(SectionSheet {
        section,
        students,
        assessments,
        grades,
    })
}

fn load_section_grades(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    store::find_section(conn, &section_id)?;
    let ids: Vec<String> = store::list_students(conn, &section_id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let grades = store::load_grades(&SqliteGradeStore::new(conn), &ids)?;
    Ok(json!({ "grades": grades_json(&grades) }))
}

fn save_grade(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let assessment_id = required_str(params, "assessmentId")?;
    let raw = input_string(params, "value")?;

    let student = store::find_student(conn, &student_id)?;
    let assessment = store::find_assessment(conn, &assessment_id)?;
    if student.section_id != assessment.section_id {
        return Err(GradebookError::bad_params(
            "student and assessment belong to different sections",
        ));
    }

    // Grade entry stays locked until the plan is exactly complete.
    let plan = store::list_assessments(conn, &assessment.section_id)?;
    let check = validate_plan(plan.iter().map(|a| a.weight));
    if !check.ok {
        return Err(GradebookError::PlanIncomplete { total: check.total });
    }

    let score = store::save_grade(&SqliteGradeStore::new(conn), &student_id, &assessment_id, &raw)?;
    Ok(mutated(
        Entity::Grade,
        json!({
            "studentId": student_id,
            "assessmentId": assessment_id,
            "score": score,
        }),
    ))
}

fn open_consolidation(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let sheet = load_sheet(conn, &section_id)?;
    let consolidation = consolidate(&sheet.students, &sheet.assessments, &sheet.grades);
    Ok(json!({
        "sectionId": sheet.section.id,
        "sectionName": sheet.section.subject_name,
        "assessments": sheet.assessments,
        "consolidation": consolidation,
    }))
}

fn resolve_export_path(
    conn: &Connection,
    workspace: Option<&Path>,
    out_path: Option<&str>,
    file_name: &str,
) -> Result<PathBuf> {
    if let Some(p) = out_path {
        return Ok(PathBuf::from(p));
    }
    if let Some(dir) = db::settings_get_json(conn, EXPORT_DIR_SETTING)?
        .as_ref()
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
    {
        return Ok(Path::new(dir).join(file_name));
    }
    let base = workspace.ok_or_else(|| GradebookError::bad_params("missing outPath"))?;
    Ok(base.join("exports").join(file_name))
}

fn export_consolidation(
    conn: &Connection,
    workspace: Option<&Path>,
    params: &serde_json::Value,
) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let out_path = params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let sheet = load_sheet(conn, &section_id)?;
    let state = ConsolidationState::classify(sheet.students.len(), &sheet.assessments);
    if let ConsolidationState::IncompletePlan { total, .. } = state {
        return Err(GradebookError::PlanIncomplete { total });
    }
    if !state.is_ready() {
        return Err(GradebookError::bad_params(state.message()));
    }

    let export = export_csv(
        &sheet.students,
        &sheet.assessments,
        &sheet.grades,
        &sheet.section.subject_name,
        Local::now().date_naive(),
    );
    let path = resolve_export_path(conn, workspace, out_path, &export.file_name)?;
    let io_err = |source: std::io::Error| GradebookError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(&path, &export.bytes).map_err(io_err)?;

    info!(section_id = %section_id, path = %path.display(), rows = export.rows, "consolidation exported");
    Ok(json!({
        "path": path.to_string_lossy(),
        "fileName": export.file_name,
        "rowsExported": export.rows,
        "columns": 3 + sheet.assessments.len() + 1,
    }))
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(
        req,
        export_consolidation(conn, state.workspace.as_deref(), &req.params),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value> =
        match req.method.as_str() {
            "grades.load" => load_section_grades,
            "grades.save" => save_grade,
            "consolidation.open" => open_consolidation,
            "consolidation.exportCsv" => return Some(handle_export_csv(state, req)),
            _ => return None,
        };
    Some(with_db(state, req, |conn| f(conn, &req.params)))
}
