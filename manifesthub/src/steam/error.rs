//! Error types for the Steam wire client and session.

use thiserror::Error;

/// Errors raised by the Steam client and session.
///
/// The terminal auth kinds are the ones the orchestrator reacts to by
/// removing the account; everything else is either retried or logged.
#[derive(Debug, Clone, Error)]
pub enum SteamError {
    /// Could not reach or handshake with the network
    #[error("connection failed: {0}")]
    Connection(String),

    /// A remote call failed; usually transient
    #[error("steam rpc failed: {0}")]
    Rpc(String),

    /// A response arrived but could not be decoded
    #[error("malformed steam response: {0}")]
    Decode(String),

    /// The upstream rejected the credentials outright
    #[error("invalid password")]
    InvalidPassword,

    /// The account demands a device two-factor code; headless runs cannot
    /// answer prompts
    #[error("account login denied: device two-factor code required")]
    NeedTwoFactor,

    /// The account demands an email confirmation code
    #[error("account logon denied: verified email required")]
    EmailRequired,
}

impl SteamError {
    /// Whether this error permanently disqualifies the account.
    pub fn is_terminal_auth(&self) -> bool {
        matches!(
            self,
            SteamError::InvalidPassword | SteamError::NeedTwoFactor | SteamError::EmailRequired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_auth_classification() {
        assert!(SteamError::InvalidPassword.is_terminal_auth());
        assert!(SteamError::NeedTwoFactor.is_terminal_auth());
        assert!(SteamError::EmailRequired.is_terminal_auth());
        assert!(!SteamError::Rpc("timeout".into()).is_terminal_auth());
        assert!(!SteamError::Connection("refused".into()).is_terminal_auth());
    }
}
