//! Steam connectivity: the wire client seam and the per-account session.
//!
//! The wire protocol itself is a collaborator hidden behind the
//! [`SteamClient`] trait; everything above it — lifecycle, headless auth
//! policy, reconnect behavior — lives in [`SteamSession`].

mod client;
mod error;
mod session;
mod types;

pub use client::{jwt_steam_id, SteamClient, WebSteamClient};
pub use error::SteamError;
pub use session::{SessionState, SteamSession};
pub use types::{
    AppInfo, AuthPoll, AuthSession, CdnServer, DepotManifest, GuardType, License, Logon,
    PackageInfo, PaymentMethod, SteamEvent,
};

#[cfg(test)]
pub use client::tests::{MockSteamClient, MockSteamState};
