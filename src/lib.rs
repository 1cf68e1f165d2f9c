pub mod access;
pub mod achievements;
pub mod api;
pub mod auth;
pub mod collections;
pub mod config;
pub mod context;
pub mod db;
pub mod errors;
pub mod hooks;
pub mod leaderboard;
pub mod learning;
pub mod levels;
pub mod notifications;
pub mod points;
pub mod server;
pub mod streaks;
pub mod telemetry;
pub mod ws;
