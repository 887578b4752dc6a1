pub mod config;
pub mod models;
pub mod repositories;
pub mod services;
pub mod realtime;
pub mod handlers;
pub mod middleware;
