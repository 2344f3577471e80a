//! Outbound email: the Resend HTTP mailer, body rendering, and a scriptable
//! mock for tests.

pub mod html;
pub mod resend;

pub mod mock;

pub use html::text_to_html;
pub use mock::MockMailer;
pub use resend::ResendMailer;
