pub mod completion;
pub mod delivery;
pub mod errors;
pub mod ids;
pub mod security;

pub use completion::{CompletionProvider, CompletionRequest};
pub use delivery::{DeliveryReceipt, Mailer, OutboundEmail};
pub use errors::{Disposition, GatewayError};
pub use ids::{DraftId, SentEmailId, UserId};
pub use security::ApiKey;
