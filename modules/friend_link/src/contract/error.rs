use thiserror::Error;

use crate::domain::error::DomainError;

/// Errors that are safe to expose to other modules
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FriendLinkError {
    #[error("You cannot link your account to yourself")]
    SelfLinkNotAllowed,

    #[error("A pending link request for this member already exists")]
    DuplicateRequest,

    #[error("Already linked: {message}")]
    AlreadyLinked { message: String },

    #[error("Invalid: {message}")]
    Invalid { message: String },

    #[error("Expired: {message}")]
    Expired { message: String },

    #[error("This invite has already been claimed")]
    AlreadyClaimed,

    #[error("No signed-in account")]
    AuthSessionMissing,

    #[error("Network unavailable: {message}")]
    NetworkUnavailable { message: String },

    #[error("No account registered for '{email}'")]
    AccountNotFound { email: String },
}

/// Fieldless discriminant of [`FriendLinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SelfLinkNotAllowed,
    DuplicateRequest,
    AlreadyLinked,
    Invalid,
    Expired,
    AlreadyClaimed,
    AuthSessionMissing,
    NetworkUnavailable,
    AccountNotFound,
}

impl FriendLinkError {
    pub fn already_linked(message: impl Into<String>) -> Self {
        Self::AlreadyLinked {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::Expired {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkUnavailable {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SelfLinkNotAllowed => ErrorKind::SelfLinkNotAllowed,
            Self::DuplicateRequest => ErrorKind::DuplicateRequest,
            Self::AlreadyLinked { .. } => ErrorKind::AlreadyLinked,
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::AlreadyClaimed => ErrorKind::AlreadyClaimed,
            Self::AuthSessionMissing => ErrorKind::AuthSessionMissing,
            Self::NetworkUnavailable { .. } => ErrorKind::NetworkUnavailable,
            Self::AccountNotFound { .. } => ErrorKind::AccountNotFound,
        }
    }
}

impl From<DomainError> for FriendLinkError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::SelfLink => Self::SelfLinkNotAllowed,
            DomainError::InvalidInput { message } => Self::invalid(message),
            DomainError::DuplicateRequest { .. } => Self::DuplicateRequest,
            DomainError::MemberAlreadyLinked { name } => {
                Self::already_linked(format!("member '{name}' is already linked to an account"))
            }
            DomainError::AccountAlreadyLinked { email } => {
                Self::already_linked(format!("account '{email}' is already linked to another member"))
            }
            DomainError::RequestNotFound { id } => {
                Self::invalid(format!("link request {id} not found"))
            }
            DomainError::RequestNotPending { id, status } => {
                Self::invalid(format!("link request {id} is already {status}"))
            }
            DomainError::NotRequestParty { id } => {
                Self::invalid(format!("link request {id} is not addressed to this account"))
            }
            DomainError::RequestExpired { id } => {
                Self::expired(format!("link request {id} has expired"))
            }
            DomainError::TokenNotFound { id } => Self::invalid(format!("invite {id} not found")),
            DomainError::TokenRevoked { id } => {
                Self::invalid(format!("invite {id} has been revoked"))
            }
            DomainError::NotTokenOwner { id } => {
                Self::invalid(format!("invite {id} belongs to another account"))
            }
            DomainError::TokenExpired { id } => Self::expired(format!("invite {id} has expired")),
            DomainError::TokenClaimed { .. } => Self::AlreadyClaimed,
            DomainError::NoSession => Self::AuthSessionMissing,
            DomainError::Remote { message } => Self::network(message),
            DomainError::AccountNotFound { email } => Self::AccountNotFound { email },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn revoked_and_claimed_tokens_are_distinct_kinds() {
        let id = Uuid::new_v4();
        let revoked: FriendLinkError = DomainError::TokenRevoked { id }.into();
        let claimed: FriendLinkError = DomainError::TokenClaimed { id }.into();
        assert_eq!(revoked.kind(), ErrorKind::Invalid);
        assert_eq!(claimed.kind(), ErrorKind::AlreadyClaimed);
    }

    #[test]
    fn messages_are_human_readable() {
        let e: FriendLinkError = DomainError::Remote {
            message: "connection reset".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::NetworkUnavailable);
        assert_eq!(e.to_string(), "Network unavailable: connection reset");
    }
}
