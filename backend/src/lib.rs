pub mod accounts;
pub mod analyze;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod extraction;
pub mod gig;
pub mod item;
pub mod matching;
pub mod models;
pub mod notifications;
pub mod schema;
pub mod validation;
pub mod wanted;
