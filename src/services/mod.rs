pub mod auth_service;
pub mod chat_service;

pub use auth_service::*;
pub use chat_service::*;
