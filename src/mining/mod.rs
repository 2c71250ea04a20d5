pub mod claim;
pub mod clock;
pub mod multiplier;

pub use claim::{ClaimCoordinator, ClaimOutcome};
pub use clock::EnergyClock;
pub use multiplier::{GrantOutcome, MultiplierManager};
