//! Player-side building blocks: the session transport, the results
//! pipeline that grades submitted test code, and the finalize coordinator
//! that ends a game exactly once.

pub mod finalize;
pub mod pipeline;
pub mod report;
pub mod services;
pub mod transport;

pub use finalize::{FinalizeCoordinator, FinalizeOutcome, FinalizePhase, FinalizeTrigger};
pub use pipeline::ResultsPipeline;
pub use report::PlayerReport;
pub use services::{CodeServices, HttpCodeServices};
pub use transport::{SessionEvent, SessionTransport};
