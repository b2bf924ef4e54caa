pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod lifecycle;
mod middleware;
pub mod model;
pub mod repository;
pub mod routes;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod state;
mod tracing;
