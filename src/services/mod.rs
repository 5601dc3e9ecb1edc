pub mod attendance_engine;
pub mod directory;
pub mod notifications;
pub mod settings_registry;
pub mod teams;
pub mod users;
