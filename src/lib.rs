pub mod chat;
pub mod constants;
pub mod db;
pub mod finalizer;
pub mod health;
pub mod history;
pub mod ingress;
pub mod logging;
pub mod main_helper;
pub mod metrics;
pub mod projections;
pub mod specs;
pub mod sse;
pub mod str_utils;
pub mod streaming;
pub mod types;
pub mod upstream;

pub use types::*;

pub use main_helper::{AppState, Args};
