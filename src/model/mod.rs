pub mod attendance;
pub mod notification;
pub mod role;
pub mod settings;
pub mod team;
pub mod user;
