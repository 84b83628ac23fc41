pub mod assessments;
pub mod attendance;
pub mod core;
pub mod grades;
pub mod schedule;
pub mod sections;
pub mod students;
