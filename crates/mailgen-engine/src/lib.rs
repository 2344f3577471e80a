pub mod admission;
pub mod clock;
pub mod error;
pub mod generate;
pub mod send;

pub use admission::{start_sweep_task, Admission, AdmissionConfig, AdmissionController};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use generate::{GeneratedDraft, GeneratedEmail, GenerationConfig, GenerationOrchestrator};
pub use send::{RecipientOutcome, SendOrchestrator, SendOutcome, SendReport, SendRequest};
