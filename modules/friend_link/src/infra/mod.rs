pub mod cache;
pub mod remote;

pub use cache::{JsonFileCache, MemoryCache};
pub use remote::InMemoryRemoteStore;
