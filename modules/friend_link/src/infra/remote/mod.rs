pub mod memory;

pub use memory::InMemoryRemoteStore;
