use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::invalidation::Entity;
use crate::ipc::helpers::{mutated, optional_text, required_i64, required_str, required_text, with_db};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn list_sections(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let owner_id = params.get("ownerId").and_then(|v| v.as_str());

    // Correlated subqueries keep the counts independent of each other.
    let mut count_stmt = conn.prepare(
        "SELECT
           (SELECT COUNT(*) FROM students s WHERE s.section_id = ?1),
           (SELECT COUNT(*) FROM assessments a WHERE a.section_id = ?1),
           (SELECT COALESCE(SUM(a.weight), 0) FROM assessments a WHERE a.section_id = ?1)",
    )?;

    let mut sections = Vec::new();
    for s in store::list_sections(conn, owner_id)? {
        let (student_count, assessment_count, weight_total): (i64, i64, i64) = count_stmt
            .query_row([&s.id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
        let mut v = json!(s);
        v["studentCount"] = json!(student_count);
        v["assessmentCount"] = json!(assessment_count);
        v["weightTotal"] = json!(weight_total);
        sections.push(v);
    }
    Ok(json!({ "sections": sections }))
}

fn get_section(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let section = store::find_section(conn, &section_id)?;
    Ok(json!({ "section": section }))
}

fn create_section(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let owner_id = required_text(params, "ownerId")?;
    let subject_name = required_text(params, "subjectName")?;
    let code = required_text(params, "code")?;
    let trayecto = required_i64(params, "trayecto")?;
    let trimestre = required_i64(params, "trimestre")?;

    let section_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sections(id, owner_id, subject_name, code, trayecto, trimestre, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &section_id,
            &owner_id,
            &subject_name,
            &code,
            trayecto,
            trimestre,
            &created_at,
        ),
    )
    .map_err(GradebookError::insert("sections"))?;

    info!(section_id = %section_id, subject = %subject_name, "section created");
    Ok(mutated(Entity::Section, json!({ "sectionId": section_id })))
}

fn update_section(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let patch = params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| GradebookError::bad_params("missing patch"))?;

    let current = store::find_section(conn, &section_id)?;
    let subject_name = optional_text(patch, "subjectName")?.unwrap_or(current.subject_name);
    let code = optional_text(patch, "code")?.unwrap_or(current.code);
    let trayecto = match patch.get("trayecto") {
        Some(_) => required_i64(patch, "trayecto")?,
        None => current.trayecto,
    };
    let trimestre = match patch.get("trimestre") {
        Some(_) => required_i64(patch, "trimestre")?,
        None => current.trimestre,
    };

    conn.execute(
        "UPDATE sections SET subject_name = ?, code = ?, trayecto = ?, trimestre = ? WHERE id = ?",
        (&subject_name, &code, trayecto, trimestre, &section_id),
    )
    .map_err(GradebookError::update("sections"))?;

    Ok(mutated(Entity::Section, json!({ "sectionId": section_id })))
}

fn delete_section(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    store::find_section(conn, &section_id)?;

    let tx = conn.unchecked_transaction()?;

    // Dependency order: grades and attendance hang off students/assessments.
    tx.execute(
        "DELETE FROM grades
         WHERE student_id IN (SELECT id FROM students WHERE section_id = ?1)
            OR assessment_id IN (SELECT id FROM assessments WHERE section_id = ?1)",
        [&section_id],
    )
    .map_err(GradebookError::delete("grades"))?;
    tx.execute(
        "DELETE FROM attendance
         WHERE student_id IN (SELECT id FROM students WHERE section_id = ?)",
        [&section_id],
    )
    .map_err(GradebookError::delete("attendance"))?;
    tx.execute("DELETE FROM students WHERE section_id = ?", [&section_id])
        .map_err(GradebookError::delete("students"))?;
    tx.execute("DELETE FROM assessments WHERE section_id = ?", [&section_id])
        .map_err(GradebookError::delete("assessments"))?;
    tx.execute("DELETE FROM schedule_blocks WHERE section_id = ?", [&section_id])
        .map_err(GradebookError::delete("schedule_blocks"))?;
    tx.execute("DELETE FROM sections WHERE id = ?", [&section_id])
        .map_err(GradebookError::delete("sections"))?;

    tx.commit()?;
    info!(section_id = %section_id, "section deleted");
    Ok(mutated(Entity::Section, json!({ "sectionId": section_id })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value> =
        match req.method.as_str() {
            "sections.list" => list_sections,
            "sections.get" => get_section,
            "sections.create" => create_section,
            "sections.update" => update_section,
            "sections.delete" => delete_section,
            _ => return None,
        };
    Some(with_db(state, req, |conn| f(conn, &req.params)))
}
