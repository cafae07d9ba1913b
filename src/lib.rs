pub mod api;
pub mod capture;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod replay;
pub mod safe_share;
