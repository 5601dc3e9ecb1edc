pub mod auth;
pub mod identity;
pub mod jwt;
pub mod middleware;
