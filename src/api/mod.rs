pub mod handler;
pub mod models;
pub mod validation;
