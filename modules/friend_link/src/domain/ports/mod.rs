pub mod cache;
pub mod remote;

pub use cache::{CachedData, LocalCache};
pub use remote::{ClaimOutcome, RemoteChange, RemoteStore, TransitionOutcome};
