pub mod daily;
pub mod runner;

pub use daily::{DunningScheduler, ScheduleConfig};
pub use runner::{BatchRunner, SyncAcceptedResponse};
