pub mod injector;
pub mod solver;

pub use solver::{ChallengeSignal, TurnstileSolver};
