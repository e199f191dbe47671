pub mod infakt;
pub mod retry;
pub mod traits;
