use thiserror::Error;
use uuid::Uuid;

use crate::contract::model::LinkRequestStatus;

/// Domain-specific errors using thiserror
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Requester and recipient are the same account")]
    SelfLink,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Pending request {existing} already targets this member")]
    DuplicateRequest { existing: Uuid },

    #[error("Member '{name}' is already linked")]
    MemberAlreadyLinked { name: String },

    #[error("Account '{email}' is already linked to another member")]
    AccountAlreadyLinked { email: String },

    #[error("Link request not found: {id}")]
    RequestNotFound { id: Uuid },

    #[error("Link request {id} is {status}")]
    RequestNotPending { id: Uuid, status: LinkRequestStatus },

    #[error("Link request {id} has expired")]
    RequestExpired { id: Uuid },

    #[error("Caller is not a party of link request {id}")]
    NotRequestParty { id: Uuid },

    #[error("Invite token not found: {id}")]
    TokenNotFound { id: Uuid },

    #[error("Invite token {id} was revoked")]
    TokenRevoked { id: Uuid },

    #[error("Invite token {id} has expired")]
    TokenExpired { id: Uuid },

    #[error("Invite token {id} was already claimed")]
    TokenClaimed { id: Uuid },

    #[error("Caller does not own invite token {id}")]
    NotTokenOwner { id: Uuid },

    #[error("No active session")]
    NoSession,

    #[error("Remote store error: {message}")]
    Remote { message: String },

    #[error("Account not found: {email}")]
    AccountNotFound { email: String },
}

impl DomainError {
    pub fn remote(err: impl std::fmt::Display) -> Self {
        Self::Remote {
            message: err.to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn member_already_linked(name: impl Into<String>) -> Self {
        Self::MemberAlreadyLinked { name: name.into() }
    }

    pub fn account_already_linked(email: impl Into<String>) -> Self {
        Self::AccountAlreadyLinked {
            email: email.into(),
        }
    }

    pub fn account_not_found(email: impl Into<String>) -> Self {
        Self::AccountNotFound {
            email: email.into(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
