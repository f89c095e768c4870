pub mod client;
pub mod error;
pub mod model;

pub use client::FriendLinkApi;
pub use error::{ErrorKind, FriendLinkError};
pub use model::*;
