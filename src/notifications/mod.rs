// Outbound notices: rendering and delivery
pub mod resend;
pub mod templates;

pub use resend::ResendNotifier;
pub use templates::{CreditorDetails, MessageTemplates};
