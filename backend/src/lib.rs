pub mod auth;
pub mod config;
pub mod db;
pub mod ml;
pub mod routes;
pub mod storage;
