pub mod config;
pub mod routes;
pub mod schedule;
pub mod state;
