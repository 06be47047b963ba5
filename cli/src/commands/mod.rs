pub mod config;
pub mod tour;
