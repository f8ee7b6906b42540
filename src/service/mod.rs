pub mod auth;
pub mod config;
pub mod email;
pub mod password;
pub mod token;
