use serde::Serialize;

/// Client-side views that cache store reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum View {
    Sections,
    Roster,
    Plan,
    Consolidation,
    Attendance,
    Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Section,
    Student,
    Assessment,
    Grade,
    Attendance,
    ScheduleBlock,
}

/// Views a successful create/update/delete of `entity` makes stale.
/// Mutation responses carry this list so the client re-reads only those.
pub fn invalidated_by(entity: Entity) -> &'static [View] {
    match entity {
        Entity::Section => &[
            View::Sections,
            View::Roster,
            View::Plan,
            View::Consolidation,
            View::Attendance,
            View::Schedule,
        ],
        Entity::Student => &[
            View::Sections,
            View::Roster,
            View::Consolidation,
            View::Attendance,
        ],
        Entity::Assessment => &[View::Sections, View::Plan, View::Consolidation],
        Entity::Grade => &[View::Consolidation],
        Entity::Attendance => &[View::Attendance],
        Entity::ScheduleBlock => &[View::Schedule],
    }
}
