//! Per-account Steam session lifecycle.
//!
//! A session owns one client and one account, drives the state machine
//!
//! ```text
//! Disconnected -> Connecting -> Authing -> LoggedOn -> Ready
//!                                  |
//!                                  v
//!                                Failed
//! ```
//!
//! and runs a background pump that drains the client's connection events
//! on a 100ms cadence. An unsolicited disconnect sleeps five seconds and
//! reconnects; a user-initiated disconnect cancels the pump and joins it.
//!
//! Authentication is headless: a refresh token is tried first (cleared and
//! retried once via password credentials on rejection), device
//! confirmations auto-accept by polling, and any email or device code
//! prompt is a terminal error that propagates to the orchestrator.

use super::client::SteamClient;
use super::error::SteamError;
use super::types::{AuthPoll, GuardType, License, Logon, SteamEvent};
use crate::config::HarvestConfig;
use crate::crypto::friend_code;
use crate::vault::AccountRecord;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authing,
    LoggedOn,
    Ready,
    Failed,
}

/// One authenticated connection for one account.
pub struct SteamSession<C: SteamClient> {
    client: Arc<C>,
    account: AccountRecord,
    config: HarvestConfig,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    logon: Mutex<Option<Logon>>,
    licenses: Mutex<Vec<License>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl<C: SteamClient> SteamSession<C> {
    pub fn new(client: C, account: AccountRecord, config: HarvestConfig) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        Arc::new(Self {
            client: Arc::new(client),
            account,
            config,
            state_tx,
            state_rx,
            logon: Mutex::new(None),
            licenses: Mutex::new(Vec::new()),
            pump: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Connect, authenticate and wait for the license list.
    ///
    /// On success the session is `Ready`. Terminal auth errors mark it
    /// `Failed` and propagate so the orchestrator can remove the account.
    pub async fn establish(self: &Arc<Self>) -> Result<(), SteamError> {
        self.set_state(SessionState::Connecting);
        if let Err(e) = self.client.connect().await {
            self.set_state(SessionState::Failed);
            return Err(e);
        }
        self.spawn_pump();

        self.set_state(SessionState::Authing);
        let logon = match self.authenticate().await {
            Ok(logon) => logon,
            Err(e) => {
                self.set_state(SessionState::Failed);
                return Err(e);
            }
        };
        info!(
            account = %self.account.account_name,
            steam_id = logon.steam_id,
            rotated = logon.new_refresh_token.is_some(),
            "logged on"
        );
        *self.logon.lock().expect("logon poisoned") = Some(logon);
        self.set_state(SessionState::LoggedOn);

        // The session is only usable once the first license list arrived.
        match self.client.licenses().await {
            Ok(licenses) => {
                debug!(count = licenses.len(), "license list received");
                *self.licenses.lock().expect("licenses poisoned") = licenses;
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                return Err(e);
            }
        }
        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Wait until the session is `Ready`.
    ///
    /// # Errors
    ///
    /// Fails if the session reached `Failed` or was torn down.
    pub async fn ready(&self) -> Result<(), SteamError> {
        let mut rx = self.state_rx.clone();
        loop {
            let state = *rx.borrow();
            match state {
                SessionState::Ready => return Ok(()),
                SessionState::Failed => {
                    return Err(SteamError::Rpc("session failed to establish".to_string()))
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(SteamError::Rpc("session dropped".to_string()));
            }
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn client(&self) -> Arc<C> {
        Arc::clone(&self.client)
    }

    /// The license list received at logon.
    pub fn licenses(&self) -> Vec<License> {
        self.licenses.lock().expect("licenses poisoned").clone()
    }

    /// The account record as it should be written back.
    ///
    /// The index is re-derived from the logged-on Steam id. If the upstream
    /// rotated the refresh token, the new token is recorded and
    /// `last_refresh` bumps to now; otherwise the record is unchanged.
    pub fn account_snapshot(&self) -> AccountRecord {
        let mut record = self.account.clone();
        if let Some(logon) = self.logon.lock().expect("logon poisoned").clone() {
            record.index = Some(friend_code::branch_index(logon.steam_id));
            if let Some(token) = logon.new_refresh_token {
                record.refresh_token = Some(token);
                record.last_refresh = Some(unix_now());
            }
        }
        record
    }

    /// Tear the session down: cancel the pump, signal the client and join.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        self.client.disconnect();
        let handle = self.pump.lock().expect("pump poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }

    async fn authenticate(&self) -> Result<Logon, SteamError> {
        let name = &self.account.account_name;

        if let Some(token) = self.account.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            match self.client.logon_with_refresh_token(name, token).await {
                Ok(logon) => return Ok(logon),
                Err(e) if e.is_terminal_auth() => return Err(e),
                Err(e) => {
                    warn!(account = %name, error = %e, "refresh token rejected, retrying with credentials");
                }
            }
        }

        let Some(password) = self
            .account
            .account_password
            .as_deref()
            .filter(|p| !p.is_empty())
        else {
            // Nothing left to try; the account cannot log on headless.
            return Err(SteamError::InvalidPassword);
        };
        self.credentials_logon(name, password).await
    }

    async fn credentials_logon(&self, name: &str, password: &str) -> Result<Logon, SteamError> {
        let auth = self.client.begin_credentials_auth(name, password).await?;
        match auth.confirmation {
            GuardType::EmailCode => return Err(SteamError::EmailRequired),
            GuardType::DeviceCode | GuardType::Unknown => return Err(SteamError::NeedTwoFactor),
            GuardType::None | GuardType::DeviceConfirmation => {}
        }

        let interval = Duration::from_secs(auth.interval_secs.max(1));
        loop {
            let poll: AuthPoll = self.client.poll_auth_session(&auth).await?;
            if let Some(token) = poll.refresh_token {
                let steam_id = poll
                    .steam_id
                    .or_else(|| super::client::jwt_steam_id(&token))
                    .ok_or_else(|| {
                        SteamError::Decode("auth session yielded no steam id".to_string())
                    })?;
                return Ok(Logon {
                    steam_id,
                    new_refresh_token: Some(token),
                });
            }
            debug!(account = %name, "auth session pending, polling again");
            tokio::time::sleep(interval).await;
        }
    }

    fn spawn_pump(self: &Arc<Self>) {
        let client = Arc::clone(&self.client);
        let cancel = self.cancel.clone();
        let pump_interval = self.config.pump_interval();
        let reconnect_delay = self.config.reconnect_delay();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pump_interval) => {}
                }

                for event in client.drain_events() {
                    match event {
                        SteamEvent::Connected => debug!("connection established"),
                        SteamEvent::Disconnected {
                            user_initiated: true,
                        } => return,
                        SteamEvent::Disconnected {
                            user_initiated: false,
                        } => {
                            warn!(
                                delay_secs = reconnect_delay.as_secs(),
                                "unsolicited disconnect, reconnecting"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep(reconnect_delay) => {}
                            }
                            if let Err(e) = client.connect().await {
                                warn!(error = %e, "reconnect failed");
                            }
                        }
                    }
                }
            }
        });
        *self.pump.lock().expect("pump poisoned") = Some(handle);
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::client::tests::MockSteamClient;
    use crate::steam::types::AuthSession;
    use std::sync::atomic::Ordering;

    fn account_with_token(token: &str) -> AccountRecord {
        let mut account = AccountRecord::new("bob");
        account.refresh_token = Some(token.into());
        account
    }

    fn account_with_password(password: &str) -> AccountRecord {
        let mut account = AccountRecord::new("bob");
        account.account_password = Some(password.into());
        account
    }

    #[tokio::test]
    async fn test_refresh_token_logon_reaches_ready() {
        let client = MockSteamClient::new().with_refresh_logon(76561198000000000, None);
        let session = SteamSession::new(client, account_with_token("jwt"), HarvestConfig::default());

        session.establish().await.expect("establish");
        assert_eq!(session.state(), SessionState::Ready);
        session.ready().await.expect("ready");

        // No rotation: the snapshot only gains the derived index.
        let snapshot = session.account_snapshot();
        assert_eq!(snapshot.index.as_deref(), Some("AEJG8-ELAJ"));
        assert_eq!(snapshot.refresh_token.as_deref(), Some("jwt"));
        assert_eq!(snapshot.last_refresh, None);

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_back_to_credentials() {
        let client = MockSteamClient::new().with_credentials_flow(76561198000000000, "fresh-token");
        // No scripted refresh logon: the mock rejects it as transient.
        let mut account = account_with_token("stale");
        account.account_password = Some("hunter2".into());
        let session = SteamSession::new(client, account, HarvestConfig::default());

        session.establish().await.expect("establish");

        let snapshot = session.account_snapshot();
        assert_eq!(snapshot.refresh_token.as_deref(), Some("fresh-token"));
        assert!(snapshot.last_refresh.is_some());
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_rejected_refresh_without_password_is_terminal() {
        let client = MockSteamClient::new();
        let session =
            SteamSession::new(client, account_with_token("stale"), HarvestConfig::default());

        let err = session.establish().await.expect_err("must fail");
        assert!(matches!(err, SteamError::InvalidPassword));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_device_code_prompt_is_terminal() {
        let client = MockSteamClient::new();
        *client.state.begin_auth.lock().unwrap() = Some(Ok(AuthSession {
            client_id: 1,
            request_id: "r".into(),
            interval_secs: 0,
            confirmation: GuardType::DeviceCode,
        }));
        let session = SteamSession::new(
            client,
            account_with_password("hunter2"),
            HarvestConfig::default(),
        );

        let err = session.establish().await.expect_err("must fail");
        assert!(matches!(err, SteamError::NeedTwoFactor));
    }

    #[tokio::test]
    async fn test_email_prompt_is_terminal() {
        let client = MockSteamClient::new();
        *client.state.begin_auth.lock().unwrap() = Some(Ok(AuthSession {
            client_id: 1,
            request_id: "r".into(),
            interval_secs: 0,
            confirmation: GuardType::EmailCode,
        }));
        let session = SteamSession::new(
            client,
            account_with_password("hunter2"),
            HarvestConfig::default(),
        );

        let err = session.establish().await.expect_err("must fail");
        assert!(matches!(err, SteamError::EmailRequired));
    }

    #[tokio::test]
    async fn test_invalid_password_propagates() {
        // Default mock begin_auth is InvalidPassword.
        let client = MockSteamClient::new();
        let session = SteamSession::new(
            client,
            account_with_password("wrong"),
            HarvestConfig::default(),
        );

        let err = session.establish().await.expect_err("must fail");
        assert!(matches!(err, SteamError::InvalidPassword));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_licenses_available_when_ready() {
        let client = MockSteamClient::new()
            .with_refresh_logon(76561198000000000, None)
            .with_app(10, 20, 42, [1; 32]);
        let session = SteamSession::new(client, account_with_token("jwt"), HarvestConfig::default());

        session.establish().await.expect("establish");
        assert_eq!(session.licenses().len(), 1);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_pump_reconnects_after_unsolicited_disconnect() {
        let config = HarvestConfig::default()
            .with_pump_interval_millis(5)
            .with_reconnect_delay_secs(0);
        let client = MockSteamClient::new().with_refresh_logon(76561198000000000, None);
        let state = Arc::clone(&client.state);
        let session = SteamSession::new(client, account_with_token("jwt"), config);

        session.establish().await.expect("establish");
        let connects_before = state.connect_calls.load(Ordering::SeqCst);

        state
            .events
            .lock()
            .unwrap()
            .push_back(SteamEvent::Disconnected {
                user_initiated: false,
            });

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            if state.connect_calls.load(Ordering::SeqCst) > connects_before {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "pump never reconnected"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        session.disconnect().await;
    }
}
