use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::invalidation::Entity;
use crate::ipc::helpers::{mutated, optional_text, required_str, required_text, with_db};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn list_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    store::find_section(conn, &section_id)?;
    let students = store::list_students(conn, &section_id)?;
    Ok(json!({ "students": students }))
}

fn create_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let first_name = required_text(params, "firstName")?;
    let last_name = required_text(params, "lastName")?;
    let cedula = required_text(params, "cedula")?;
    store::find_section(conn, &section_id)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, section_id, first_name, last_name, cedula, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &section_id,
            &first_name,
            &last_name,
            &cedula,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(GradebookError::insert("students"))?;

    info!(section_id = %section_id, student_id = %student_id, "student enrolled");
    Ok(mutated(Entity::Student, json!({ "studentId": student_id })))
}

fn update_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let patch = params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| GradebookError::bad_params("missing patch"))?;

    let current = store::find_student(conn, &student_id)?;
    let first_name = optional_text(patch, "firstName")?.unwrap_or(current.first_name);
    let last_name = optional_text(patch, "lastName")?.unwrap_or(current.last_name);
    let cedula = optional_text(patch, "cedula")?.unwrap_or(current.cedula);

    conn.execute(
        "UPDATE students SET first_name = ?, last_name = ?, cedula = ?, updated_at = ? WHERE id = ?",
        (
            &first_name,
            &last_name,
            &cedula,
            Utc::now().to_rfc3339(),
            &student_id,
        ),
    )
    .map_err(GradebookError::update("students"))?;

    Ok(mutated(Entity::Student, json!({ "studentId": student_id })))
}

fn delete_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    store::find_student(conn, &student_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grades WHERE student_id = ?", [&student_id])
        .map_err(GradebookError::delete("grades"))?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(GradebookError::delete("attendance"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(GradebookError::delete("students"))?;
    tx.commit()?;

    info!(student_id = %student_id, "student removed");
    Ok(mutated(Entity::Student, json!({ "studentId": student_id })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value> =
        match req.method.as_str() {
            "students.list" => list_students,
            "students.create" => create_student,
            "students.update" => update_student,
            "students.delete" => delete_student,
            _ => return None,
        };
    Some(with_db(state, req, |conn| f(conn, &req.params)))
}
