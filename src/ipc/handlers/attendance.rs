use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::invalidation::Entity;
use crate::ipc::helpers::{mutated, required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;
use crate::store;

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| GradebookError::bad_params(format!("invalid date: {}", raw)))
}

fn date_param(params: &serde_json::Value) -> Result<NaiveDate> {
    match params.get("date") {
        None | Some(serde_json::Value::Null) => Ok(Local::now().date_naive()),
        Some(serde_json::Value::String(raw)) => parse_date(raw),
        Some(other) => Err(GradebookError::bad_params(format!("invalid date: {}", other))),
    }
}

fn day_sheet(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let date = date_param(params)?.format("%Y-%m-%d").to_string();
    store::find_section(conn, &section_id)?;

    let students = store::list_students(conn, &section_id)?;
    if students.is_empty() {
        return Ok(json!({ "date": date, "rows": [] }));
    }

    let mut stmt = conn.prepare(
        "SELECT a.student_id, a.status
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE s.section_id = ? AND a.date = ?",
    )?;
    let marked: HashMap<String, String> = stmt
        .query_map((&section_id, &date), |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            // Unknown stored labels read back as unmarked.
            let status = marked
                .get(&s.id)
                .and_then(|raw| AttendanceStatus::parse(raw))
                .map(|st| st.as_str());
            json!({
                "studentId": s.id,
                "displayName": s.display_name(),
                "cedula": s.cedula,
                "status": status,
            })
        })
        .collect();
    Ok(json!({ "date": date, "rows": rows }))
}

fn set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let date = parse_date(&required_str(params, "date")?)?
        .format("%Y-%m-%d")
        .to_string();
    let raw_status = required_str(params, "status")?;
    let status = AttendanceStatus::parse(&raw_status).ok_or_else(|| {
        GradebookError::bad_params(format!(
            "status must be one of {}",
            AttendanceStatus::ALL.map(|s| s.as_str()).join(", ")
        ))
    })?;
    store::find_student(conn, &student_id)?;

    conn.execute(
        "INSERT INTO attendance(id, student_id, date, status)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET status = excluded.status",
        (Uuid::new_v4().to_string(), &student_id, &date, status.as_str()),
    )
    .map_err(GradebookError::insert("attendance"))?;

    debug!(student_id = %student_id, date = %date, status = status.as_str(), "attendance marked");
    Ok(mutated(
        Entity::Attendance,
        json!({ "studentId": student_id, "date": date, "status": status }),
    ))
}

fn summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    store::find_section(conn, &section_id)?;

    let mut stmt = conn.prepare(
        "SELECT a.student_id, a.status, COUNT(*)
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE s.section_id = ?
         GROUP BY a.student_id, a.status",
    )?;
    let mut counts: HashMap<String, HashMap<String, i64>> = HashMap::new();
    let rows = stmt.query_map([&section_id], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
    })?;
    for row in rows {
        let (student_id, status, n) = row?;
        counts.entry(student_id).or_default().insert(status, n);
    }

    let students: Vec<serde_json::Value> = store::list_students(conn, &section_id)?
        .into_iter()
        .map(|s| {
            let per = counts.get(&s.id);
            let mut v = json!({ "studentId": s.id, "displayName": s.display_name() });
            let mut total = 0;
            for st in AttendanceStatus::ALL {
                let n = per.and_then(|m| m.get(st.as_str())).copied().unwrap_or(0);
                total += n;
                v[st.as_str()] = json!(n);
            }
            v["total"] = json!(total);
            v
        })
        .collect();
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value> =
        match req.method.as_str() {
            "attendance.day" => day_sheet,
            "attendance.set" => set_status,
            "attendance.summary" => summary,
            _ => return None,
        };
    Some(with_db(state, req, |conn| f(conn, &req.params)))
}
