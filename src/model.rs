use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub owner_id: String,
    pub subject_name: String,
    pub code: String,
    pub trayecto: i64,
    pub trimestre: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub section_id: String,
    pub first_name: String,
    pub last_name: String,
    pub cedula: String,
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub section_id: String,
    pub name: String,
    pub weight: i64,
    pub sort_order: i64,
}

impl Assessment {
    /// Column heading used in the consolidated sheet, e.g. `Parcial 1 (30%)`.
    pub fn column_label(&self) -> String {
        format!("{} ({}%)", self.name, self.weight)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    Presente,
    Ausente,
    Justificado,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 3] = [
        AttendanceStatus::Presente,
        AttendanceStatus::Ausente,
        AttendanceStatus::Justificado,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "Presente" => Some(AttendanceStatus::Presente),
            "Ausente" => Some(AttendanceStatus::Ausente),
            "Justificado" => Some(AttendanceStatus::Justificado),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Presente => "Presente",
            AttendanceStatus::Ausente => "Ausente",
            AttendanceStatus::Justificado => "Justificado",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBlock {
    pub id: String,
    pub section_id: String,
    pub owner_id: String,
    pub weekday: i64,
    pub start: String,
    pub end: String,
    pub room: Option<String>,
}
