pub mod catalog;
pub mod dispatcher;
pub mod progress;

pub use catalog::{StageCatalog, StageDefinition};
pub use dispatcher::{DeliveryConfig, DispatchOutcome, DispatchScheduler};
pub use progress::{CaseDetail, CaseSummary};
