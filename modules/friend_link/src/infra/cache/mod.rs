pub mod json_file;
pub mod memory;

pub use json_file::JsonFileCache;
pub use memory::MemoryCache;
