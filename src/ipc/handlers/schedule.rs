use chrono::NaiveTime;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{GradebookError, Result};
use crate::invalidation::Entity;
use crate::ipc::helpers::{mutated, optional_text, required_i64, required_str, required_text, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::ScheduleBlock;
use crate::store;

fn parse_hhmm(params: &serde_json::Value, key: &str) -> Result<NaiveTime> {
    let raw = required_str(params, key)?;
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| GradebookError::bad_params(format!("{} must be HH:MM", key)))
}

fn list_blocks(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    store::find_section(conn, &section_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, section_id, owner_id, weekday, start_time, end_time, room
         FROM schedule_blocks
         WHERE section_id = ?
         ORDER BY weekday, start_time",
    )?;
    let blocks = stmt
        .query_map([&section_id], |r| {
            Ok(ScheduleBlock {
                id: r.get(0)?,
                section_id: r.get(1)?,
                owner_id: r.get(2)?,
                weekday: r.get(3)?,
                start: r.get(4)?,
                end: r.get(5)?,
                room: r.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(json!({ "blocks": blocks }))
}

fn create_block(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let section_id = required_str(params, "sectionId")?;
    let owner_id = required_text(params, "ownerId")?;
    let weekday = required_i64(params, "weekday")?;
    if !(1..=6).contains(&weekday) {
        return Err(GradebookError::bad_params("weekday must be 1..6"));
    }
    let start = parse_hhmm(params, "start")?;
    let end = parse_hhmm(params, "end")?;
    if end <= start {
        return Err(GradebookError::bad_params("end must be after start"));
    }
    let room = optional_text(params, "room")?;
    store::find_section(conn, &section_id)?;

    let block_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedule_blocks(id, section_id, owner_id, weekday, start_time, end_time, room)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &block_id,
            &section_id,
            &owner_id,
            weekday,
            start.format("%H:%M").to_string(),
            end.format("%H:%M").to_string(),
            &room,
        ),
    )
    .map_err(GradebookError::insert("schedule_blocks"))?;

    info!(section_id = %section_id, block_id = %block_id, weekday, "schedule block created");
    Ok(mutated(Entity::ScheduleBlock, json!({ "blockId": block_id })))
}

fn delete_block(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value> {
    let block_id = required_str(params, "blockId")?;
    let n = conn
        .execute("DELETE FROM schedule_blocks WHERE id = ?", [&block_id])
        .map_err(GradebookError::delete("schedule_blocks"))?;
    if n == 0 {
        return Err(GradebookError::not_found("schedule block", block_id));
    }
    Ok(mutated(Entity::ScheduleBlock, json!({ "blockId": block_id })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value> =
        match req.method.as_str() {
            "schedule.list" => list_blocks,
            "schedule.create" => create_block,
            "schedule.delete" => delete_block,
            _ => return None,
        };
    Some(with_db(state, req, |conn| f(conn, &req.params)))
}
