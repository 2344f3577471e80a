pub mod groq;
pub mod reliable;

pub mod mock;

pub use groq::GroqProvider;
pub use mock::MockCompletionProvider;
pub use reliable::{ReliableConfig, ReliableProvider};
