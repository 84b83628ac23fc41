use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::invalidation::Entity;
use crate::ipc::helpers::{input_string, mutated, optional_text, required_str, required_text, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::Assessment;
use crate::plan::{parse_weight, validate_edit, validate_plan, PlanStatus};
use crate::store;

pub fn plan_summary(assessments: &[Assessment]) -> serde_json::Value {
    let check = validate_plan(assessments.iter().map(|a| a.weight));
    let status = PlanStatus::of(assessments.len(), check.total);
    json!({
        "total": check.total,
        "ok": check.ok,
        "status": status.as_str(),
        "message": status.message(),
    })
}

fn list_assessments(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    store::find_section(conn, &section_id)?;
    let assessments = store::list_assessments(conn, &section_id)?;
    let plan = plan_summary(&assessments);
    Ok(json!({ "assessments": assessments, "plan": plan }))
}

fn create_assessment(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let name = required_text(params, "name")?;
    let weight = parse_weight(&input_string(params, "weight")?)?;
    store::find_section(conn, &section_id)?;

    let current_total = store::section_weight_total(conn, &section_id)?;
    let new_total = validate_edit(current_total, 0, weight)?;

    let next_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM assessments WHERE section_id = ?",
        [&section_id],
        |r| r.get(0),
    )?;
    let assessment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assessments(id, section_id, name, weight, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&assessment_id, &section_id, &name, weight, next_order),
    )
    .map_err(GradebookError::insert("assessments"))?;

    info!(section_id = %section_id, assessment_id = %assessment_id, weight, new_total, "assessment created");
    Ok(mutated(
        Entity::Assessment,
        json!({ "assessmentId": assessment_id, "planTotal": new_total }),
    ))
}

fn update_assessment(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let assessment_id = required_str(params, "assessmentId")?;
    let name = optional_text(params, "name")?;
    let weight = match params.get("weight") {
        None | Some(serde_json::Value::Null) => None,
        Some(_) => Some(parse_weight(&input_string(params, "weight")?)?),
    };

    let current = store::find_assessment(conn, &assessment_id)?;
    let current_total = store::section_weight_total(conn, &current.section_id)?;
    let new_weight = weight.unwrap_or(current.weight);
    let new_total = validate_edit(current_total, current.weight, new_weight)?;
    let new_name = name.unwrap_or(current.name);

    conn.execute(
        "UPDATE assessments SET name = ?, weight = ? WHERE id = ?",
        (&new_name, new_weight, &assessment_id),
    )
    .map_err(GradebookError::update("assessments"))?;

    debug!(assessment_id = %assessment_id, previous = current.weight, new_weight, new_total, "assessment updated");
    Ok(mutated(
        Entity::Assessment,
        json!({ "assessmentId": assessment_id, "planTotal": new_total }),
    ))
}

fn delete_assessment(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let assessment_id = required_str(params, "assessmentId")?;
    let current = store::find_assessment(conn, &assessment_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grades WHERE assessment_id = ?", [&assessment_id])
        .map_err(GradebookError::delete("grades"))?;
    tx.execute("DELETE FROM assessments WHERE id = ?", [&assessment_id])
        .map_err(GradebookError::delete("assessments"))?;
    tx.commit()?;

    let new_total = store::section_weight_total(conn, &current.section_id)?;
    info!(assessment_id = %assessment_id, new_total, "assessment deleted");
    Ok(mutated(
        Entity::Assessment,
        json!({ "assessmentId": assessment_id, "planTotal": new_total }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value> =
        match req.method.as_str() {
            "assessments.list" => list_assessments,
            "assessments.create" => create_assessment,
            "assessments.update" => update_assessment,
            "assessments.delete" => delete_assessment,
            _ => return None,
        };
    Some(with_db(state, req, |conn| f(conn, &req.params)))
}
