pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod dashboard;
pub mod exams;
pub mod fees;
pub mod settings;
pub mod students;
