pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod progress;
pub mod study_session;
pub mod test_result;
pub mod user;
pub mod utils;
pub mod validation;
pub mod vocab_item;
pub mod vocab_list;
