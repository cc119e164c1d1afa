mod game;
pub mod http;
mod registry;

pub use game::{Game, SubmitError, Submission};
pub use registry::{EndOutcome, GameRegistry};
