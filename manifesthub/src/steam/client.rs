//! The Steam wire client seam.
//!
//! The harvest only ever talks to Steam through [`SteamClient`], which
//! keeps the session and downloader testable with scripted mocks. The
//! production implementation, [`WebSteamClient`], speaks HTTPS to the Steam
//! web gateway: auth sessions via `IAuthenticationService`, product info
//! via the PICS-backed product-info service, and depot content straight
//! from the CDN edges.

use super::error::SteamError;
use super::types::{
    AppInfo, AuthPoll, AuthSession, CdnServer, GuardType, License, Logon, PackageInfo,
    PaymentMethod, SteamEvent,
};
use base64::prelude::{Engine as _, BASE64_STANDARD, BASE64_URL_SAFE_NO_PAD};
use rand::rngs::OsRng;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Operations the harvest needs from a Steam connection.
///
/// One client instance backs one account's session. Request/response calls
/// are async; connection-level notifications are queued and drained by the
/// session's callback pump.
pub trait SteamClient: Send + Sync + 'static {
    /// Establish the connection. Also called again after an unsolicited
    /// disconnect.
    fn connect(&self) -> impl Future<Output = Result<(), SteamError>> + Send;

    /// User-initiated teardown. Queues a solicited disconnect event.
    fn disconnect(&self);

    /// Drain queued connection events.
    fn drain_events(&self) -> Vec<SteamEvent>;

    /// Log on with a previously issued refresh token.
    fn logon_with_refresh_token(
        &self,
        account_name: &str,
        refresh_token: &str,
    ) -> impl Future<Output = Result<Logon, SteamError>> + Send;

    /// Start a credentials auth session.
    fn begin_credentials_auth(
        &self,
        account_name: &str,
        password: &str,
    ) -> impl Future<Output = Result<AuthSession, SteamError>> + Send;

    /// Poll a pending auth session for its refresh token.
    fn poll_auth_session(
        &self,
        auth: &AuthSession,
    ) -> impl Future<Output = Result<AuthPoll, SteamError>> + Send;

    /// The logged-on account's license list.
    fn licenses(&self) -> impl Future<Output = Result<Vec<License>, SteamError>> + Send;

    /// Product info for a set of packages.
    fn package_info(
        &self,
        package_ids: &[u32],
    ) -> impl Future<Output = Result<Vec<PackageInfo>, SteamError>> + Send;

    /// Per-app access tokens required for app product-info requests.
    fn app_access_tokens(
        &self,
        app_ids: &[u32],
    ) -> impl Future<Output = Result<HashMap<u32, u64>, SteamError>> + Send;

    /// Product info for one app.
    fn app_info(
        &self,
        app_id: u32,
        access_token: u64,
    ) -> impl Future<Output = Result<AppInfo, SteamError>> + Send;

    /// The per-download request code. Zero means access denied.
    fn manifest_request_code(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
    ) -> impl Future<Output = Result<u64, SteamError>> + Send;

    /// The depot's content decryption key.
    fn depot_key(
        &self,
        app_id: u32,
        depot_id: u32,
    ) -> impl Future<Output = Result<[u8; 32], SteamError>> + Send;

    /// The CDN edges serving depot content, fetched once per run.
    fn cdn_servers(&self) -> impl Future<Output = Result<Vec<CdnServer>, SteamError>> + Send;

    /// Download one manifest descriptor from a CDN edge.
    fn download_manifest(
        &self,
        server: &CdnServer,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
        request_code: u64,
    ) -> impl Future<Output = Result<Vec<u8>, SteamError>> + Send;
}

/// Extract the Steam id from a refresh token's JWT claims.
pub fn jwt_steam_id(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let bytes = BASE64_URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("sub")?.as_str()?.parse().ok()
}

const DEFAULT_GATEWAY: &str = "https://api.steampowered.com";

const DIRECTORY_CONNECT: &str = "/ISteamDirectory/GetCMListForConnect/v1/";
const PASSWORD_RSA_KEY: &str = "/IAuthenticationService/GetPasswordRSAPublicKey/v1/";
const BEGIN_AUTH: &str = "/IAuthenticationService/BeginAuthSessionViaCredentials/v1/";
const POLL_AUTH: &str = "/IAuthenticationService/PollAuthSessionStatus/v1/";
const GENERATE_TOKEN: &str = "/IAuthenticationService/GenerateAccessTokenForApp/v1/";
const USER_LICENSES: &str = "/IUserAccountService/GetUserLicenses/v1/";
const PACKAGE_INFO: &str = "/IProductInfoService/GetPackageInfo/v1/";
const APP_TOKENS: &str = "/IProductInfoService/GetAppAccessTokens/v1/";
const APP_INFO: &str = "/IProductInfoService/GetAppInfo/v1/";
const MANIFEST_REQUEST_CODE: &str = "/IContentServerDirectoryService/GetManifestRequestCode/v1/";
const DEPOT_KEY: &str = "/IContentServerDirectoryService/GetDepotDecryptionKey/v1/";
const CDN_SERVERS: &str = "/IContentServerDirectoryService/GetServersForSteamPipe/v1/";

/// EResult code for rejected credentials.
const ERESULT_INVALID_PASSWORD: u64 = 5;

/// Production client speaking to the Steam web gateway.
pub struct WebSteamClient {
    http: reqwest::Client,
    gateway: String,
    access_token: Mutex<Option<String>>,
    events: Mutex<VecDeque<SteamEvent>>,
}

impl WebSteamClient {
    /// Create a client against the public gateway.
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, SteamError> {
        Self::with_gateway(DEFAULT_GATEWAY)
    }

    /// Create a client against a custom gateway base URL.
    pub fn with_gateway(gateway: impl Into<String>) -> Result<Self, SteamError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SteamError::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            gateway: gateway.into().trim_end_matches('/').to_string(),
            access_token: Mutex::new(None),
            events: Mutex::new(VecDeque::new()),
        })
    }

    fn push_event(&self, event: SteamEvent) {
        self.events.lock().expect("event queue poisoned").push_back(event);
    }

    fn access_token(&self) -> String {
        self.access_token
            .lock()
            .expect("access token poisoned")
            .clone()
            .unwrap_or_default()
    }

    fn store_access_token(&self, token: Option<String>) {
        if token.is_some() {
            *self.access_token.lock().expect("access token poisoned") = token;
        }
    }

    /// Map a transport error, queueing an unsolicited-disconnect event for
    /// connection-level failures so the pump reconnects.
    fn transport_error(&self, path: &str, error: reqwest::Error) -> SteamError {
        if error.is_connect() {
            self.push_event(SteamEvent::Disconnected {
                user_initiated: false,
            });
            return SteamError::Connection(format!("{path}: {error}"));
        }
        SteamError::Rpc(format!("{path}: {error}"))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SteamError> {
        let url = format!("{}{path}", self.gateway);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(path, e))?;
        decode_response(path, response).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, SteamError> {
        let url = format!("{}{path}", self.gateway);
        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| self.transport_error(path, e))?;
        decode_response(path, response).await
    }
}

async fn decode_response<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, SteamError> {
    if !response.status().is_success() {
        return Err(SteamError::Rpc(format!(
            "HTTP {} from {path}",
            response.status()
        )));
    }
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| SteamError::Decode(format!("{path}: {e}")))?;
    Ok(envelope.response)
}

impl SteamClient for WebSteamClient {
    async fn connect(&self) -> Result<(), SteamError> {
        let _: Value = self
            .get_json(DIRECTORY_CONNECT, &[("cellid", "0".to_string())])
            .await
            .map_err(|e| SteamError::Connection(e.to_string()))?;
        self.push_event(SteamEvent::Connected);
        debug!("connected to steam gateway");
        Ok(())
    }

    fn disconnect(&self) {
        self.push_event(SteamEvent::Disconnected {
            user_initiated: true,
        });
    }

    fn drain_events(&self) -> Vec<SteamEvent> {
        self.events
            .lock()
            .expect("event queue poisoned")
            .drain(..)
            .collect()
    }

    async fn logon_with_refresh_token(
        &self,
        account_name: &str,
        refresh_token: &str,
    ) -> Result<Logon, SteamError> {
        let steam_id = jwt_steam_id(refresh_token).ok_or_else(|| {
            SteamError::Decode("refresh token carries no steam id claim".to_string())
        })?;
        let response: AccessTokenResponse = self
            .post_form(
                GENERATE_TOKEN,
                &[
                    ("refresh_token", refresh_token.to_string()),
                    ("steamid", steam_id.to_string()),
                    ("renewal_type", "allow".to_string()),
                ],
            )
            .await?;

        if response.access_token.is_none() {
            return Err(SteamError::Rpc(format!(
                "refresh logon rejected for {account_name}"
            )));
        }
        self.store_access_token(response.access_token);
        Ok(Logon {
            steam_id,
            new_refresh_token: response.refresh_token,
        })
    }

    async fn begin_credentials_auth(
        &self,
        account_name: &str,
        password: &str,
    ) -> Result<AuthSession, SteamError> {
        let key: PasswordKeyResponse = self
            .get_json(
                PASSWORD_RSA_KEY,
                &[("account_name", account_name.to_string())],
            )
            .await?;
        let encrypted = encrypt_password(password, &key.publickey_mod, &key.publickey_exp)?;

        let response: BeginAuthResponse = self
            .post_form(
                BEGIN_AUTH,
                &[
                    ("account_name", account_name.to_string()),
                    ("encrypted_password", encrypted),
                    ("encryption_timestamp", key.timestamp.unwrap_or_default()),
                    ("persistence", "1".to_string()),
                ],
            )
            .await?;

        if response.eresult == Some(ERESULT_INVALID_PASSWORD) {
            return Err(SteamError::InvalidPassword);
        }
        let (Some(client_id), Some(request_id)) = (response.client_id, response.request_id)
        else {
            return Err(SteamError::Decode(
                "auth session response carries no client id".to_string(),
            ));
        };

        Ok(AuthSession {
            client_id,
            request_id,
            interval_secs: response.interval.unwrap_or(5),
            confirmation: preferred_confirmation(&response.allowed_confirmations),
        })
    }

    async fn poll_auth_session(&self, auth: &AuthSession) -> Result<AuthPoll, SteamError> {
        let response: PollAuthResponse = self
            .post_form(
                POLL_AUTH,
                &[
                    ("client_id", auth.client_id.to_string()),
                    ("request_id", auth.request_id.clone()),
                ],
            )
            .await?;

        self.store_access_token(response.access_token.clone());
        let steam_id = response.refresh_token.as_deref().and_then(jwt_steam_id);
        Ok(AuthPoll {
            refresh_token: response.refresh_token,
            access_token: response.access_token,
            steam_id,
        })
    }

    async fn licenses(&self) -> Result<Vec<License>, SteamError> {
        let response: LicenseResponse = self
            .get_json(USER_LICENSES, &[("access_token", self.access_token())])
            .await?;
        Ok(response
            .licenses
            .into_iter()
            .map(|raw| License {
                package_id: raw.package_id,
                payment_method: raw.payment_method,
            })
            .collect())
    }

    async fn package_info(&self, package_ids: &[u32]) -> Result<Vec<PackageInfo>, SteamError> {
        let ids = join_ids(package_ids);
        let response: PackageInfoResponse = self
            .get_json(
                PACKAGE_INFO,
                &[
                    ("access_token", self.access_token()),
                    ("packageids", ids),
                ],
            )
            .await?;
        Ok(response
            .packages
            .into_iter()
            .map(|raw| PackageInfo {
                package_id: raw.packageid,
                app_ids: raw.appids,
            })
            .collect())
    }

    async fn app_access_tokens(&self, app_ids: &[u32]) -> Result<HashMap<u32, u64>, SteamError> {
        let ids = join_ids(app_ids);
        let response: AppTokenResponse = self
            .get_json(
                APP_TOKENS,
                &[("access_token", self.access_token()), ("appids", ids)],
            )
            .await?;
        Ok(response
            .tokens
            .into_iter()
            .map(|raw| (raw.appid, raw.access_token.unwrap_or(0)))
            .collect())
    }

    async fn app_info(&self, app_id: u32, access_token: u64) -> Result<AppInfo, SteamError> {
        let response: AppInfoResponse = self
            .get_json(
                APP_INFO,
                &[
                    ("access_token", self.access_token()),
                    ("appid", app_id.to_string()),
                    ("app_access_token", access_token.to_string()),
                ],
            )
            .await?;
        let app = response
            .apps
            .into_iter()
            .find(|a| a.appid == app_id)
            .ok_or_else(|| SteamError::Decode(format!("no product info for app {app_id}")))?;
        Ok(AppInfo {
            app_id,
            depots: app.depots,
        })
    }

    async fn manifest_request_code(
        &self,
        app_id: u32,
        depot_id: u32,
        manifest_id: u64,
    ) -> Result<u64, SteamError> {
        let response: ManifestCodeResponse = self
            .get_json(
                MANIFEST_REQUEST_CODE,
                &[
                    ("access_token", self.access_token()),
                    ("appid", app_id.to_string()),
                    ("depotid", depot_id.to_string()),
                    ("manifestid", manifest_id.to_string()),
                ],
            )
            .await?;
        Ok(response.manifest_request_code.unwrap_or(0))
    }

    async fn depot_key(&self, app_id: u32, depot_id: u32) -> Result<[u8; 32], SteamError> {
        let response: DepotKeyResponse = self
            .get_json(
                DEPOT_KEY,
                &[
                    ("access_token", self.access_token()),
                    ("appid", app_id.to_string()),
                    ("depotid", depot_id.to_string()),
                ],
            )
            .await?;
        let hex_key = response
            .depot_decryption_key
            .ok_or_else(|| SteamError::Rpc(format!("no key issued for depot {depot_id}")))?;
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| SteamError::Decode(format!("depot key is not hex: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| SteamError::Decode("depot key is not 32 bytes".to_string()))
    }

    async fn cdn_servers(&self) -> Result<Vec<CdnServer>, SteamError> {
        let response: CdnServerResponse = self
            .get_json(CDN_SERVERS, &[("cell_id", "0".to_string())])
            .await?;
        Ok(response
            .servers
            .into_iter()
            .map(|raw| CdnServer {
                https: raw.https_support.as_deref() != Some("none"),
                host: raw.host,
            })
            .collect())
    }

    async fn download_manifest(
        &self,
        server: &CdnServer,
        _app_id: u32,
        depot_id: u32,
        manifest_id: u64,
        request_code: u64,
    ) -> Result<Vec<u8>, SteamError> {
        let url = format!(
            "{}/depot/{depot_id}/manifest/{manifest_id}/5/{request_code}",
            server.base_url()
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error("depot manifest", e))?;
        if !response.status().is_success() {
            warn!(url = %url, status = response.status().as_u16(), "manifest fetch failed");
            return Err(SteamError::Rpc(format!(
                "HTTP {} from CDN {}",
                response.status(),
                server.host
            )));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| SteamError::Rpc(format!("failed to read manifest body: {e}")))
    }
}

/// Pick the confirmation path a headless run can satisfy.
///
/// Device confirmations auto-accept (polling eventually succeeds). Code
/// prompts cannot be answered and surface as the strongest demanded kind.
fn preferred_confirmation(allowed: &[RawConfirmation]) -> GuardType {
    let kinds: Vec<GuardType> = allowed
        .iter()
        .map(|c| match c.confirmation_type.unwrap_or(0) {
            1 => GuardType::None,
            2 => GuardType::EmailCode,
            3 => GuardType::DeviceCode,
            4 => GuardType::DeviceConfirmation,
            _ => GuardType::Unknown,
        })
        .collect();

    if kinds.is_empty() || kinds.contains(&GuardType::None) {
        GuardType::None
    } else if kinds.contains(&GuardType::DeviceConfirmation) {
        GuardType::DeviceConfirmation
    } else if kinds.contains(&GuardType::DeviceCode) {
        GuardType::DeviceCode
    } else if kinds.contains(&GuardType::EmailCode) {
        GuardType::EmailCode
    } else {
        GuardType::Unknown
    }
}

fn encrypt_password(password: &str, mod_hex: &str, exp_hex: &str) -> Result<String, SteamError> {
    let n = BigUint::parse_bytes(mod_hex.as_bytes(), 16)
        .ok_or_else(|| SteamError::Decode("RSA modulus is not hex".to_string()))?;
    let e = BigUint::parse_bytes(exp_hex.as_bytes(), 16)
        .ok_or_else(|| SteamError::Decode("RSA exponent is not hex".to_string()))?;
    let key = RsaPublicKey::new(n, e)
        .map_err(|e| SteamError::Decode(format!("unusable RSA public key: {e}")))?;
    let ciphertext = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| SteamError::Rpc(format!("password encryption failed: {e}")))?;
    Ok(BASE64_STANDARD.encode(ciphertext))
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Gateway response documents
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct PasswordKeyResponse {
    publickey_mod: String,
    publickey_exp: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct BeginAuthResponse {
    #[serde(default, deserialize_with = "opt_u64_from_any")]
    client_id: Option<u64>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default, deserialize_with = "opt_u64_from_any")]
    interval: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64_from_any")]
    eresult: Option<u64>,
    #[serde(default)]
    allowed_confirmations: Vec<RawConfirmation>,
}

#[derive(Deserialize)]
struct RawConfirmation {
    #[serde(default, deserialize_with = "opt_u64_from_any")]
    confirmation_type: Option<u64>,
}

#[derive(Deserialize)]
struct PollAuthResponse {
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct LicenseResponse {
    #[serde(default)]
    licenses: Vec<RawLicense>,
}

#[derive(Deserialize)]
struct RawLicense {
    package_id: u32,
    payment_method: PaymentMethod,
}

#[derive(Deserialize)]
struct PackageInfoResponse {
    #[serde(default)]
    packages: Vec<RawPackage>,
}

#[derive(Deserialize)]
struct RawPackage {
    packageid: u32,
    #[serde(default)]
    appids: Vec<u32>,
}

#[derive(Deserialize)]
struct AppTokenResponse {
    #[serde(default)]
    tokens: Vec<RawAppToken>,
}

#[derive(Deserialize)]
struct RawAppToken {
    appid: u32,
    #[serde(default, deserialize_with = "opt_u64_from_any")]
    access_token: Option<u64>,
}

#[derive(Deserialize)]
struct AppInfoResponse {
    #[serde(default)]
    apps: Vec<RawAppInfo>,
}

#[derive(Deserialize)]
struct RawAppInfo {
    appid: u32,
    #[serde(default)]
    depots: Value,
}

#[derive(Deserialize)]
struct ManifestCodeResponse {
    #[serde(default, deserialize_with = "opt_u64_from_any")]
    manifest_request_code: Option<u64>,
}

#[derive(Deserialize)]
struct DepotKeyResponse {
    #[serde(default)]
    depot_decryption_key: Option<String>,
}

#[derive(Deserialize)]
struct CdnServerResponse {
    #[serde(default)]
    servers: Vec<RawCdnServer>,
}

#[derive(Deserialize)]
struct RawCdnServer {
    host: String,
    #[serde(default)]
    https_support: Option<String>,
}

/// The upstream serializes 64-bit ids as either numbers or strings.
fn opt_u64_from_any<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected unsigned 64-bit number")),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom("expected numeric string")),
        Some(_) => Err(serde::de::Error::custom("expected number or string")),
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted client for session, downloader and orchestrator tests.
    ///
    /// All state is shared through an `Arc`, so test code keeps a handle to
    /// inspect call counts after the run.
    #[derive(Clone, Default)]
    pub struct MockSteamClient {
        pub state: Arc<MockSteamState>,
    }

    #[derive(Default)]
    pub struct MockSteamState {
        pub refresh_logon: Mutex<Option<Result<Logon, SteamError>>>,
        pub begin_auth: Mutex<Option<Result<AuthSession, SteamError>>>,
        pub poll: Mutex<Option<AuthPoll>>,
        pub licenses: Mutex<Vec<License>>,
        pub packages: Mutex<Vec<PackageInfo>>,
        pub apps: Mutex<HashMap<u32, AppInfo>>,
        pub request_codes: Mutex<HashMap<(u32, u32, u64), u64>>,
        pub depot_keys: Mutex<HashMap<(u32, u32), [u8; 32]>>,
        pub payloads: Mutex<HashMap<(u32, u32, u64), Vec<u8>>>,
        pub servers: Mutex<Vec<CdnServer>>,
        pub events: Mutex<VecDeque<SteamEvent>>,

        pub connect_calls: AtomicUsize,
        pub request_code_calls: Mutex<Vec<(u32, u32, u64)>>,
        pub download_calls: AtomicUsize,
    }

    impl MockSteamClient {
        pub fn new() -> Self {
            let mock = Self::default();
            *mock.state.servers.lock().unwrap() = vec![CdnServer {
                host: "mock.cdn".into(),
                https: true,
            }];
            mock
        }

        /// Script a successful refresh-token logon.
        pub fn with_refresh_logon(self, steam_id: u64, rotated: Option<&str>) -> Self {
            *self.state.refresh_logon.lock().unwrap() = Some(Ok(Logon {
                steam_id,
                new_refresh_token: rotated.map(str::to_string),
            }));
            self
        }

        /// Script a credentials flow that immediately yields a token.
        pub fn with_credentials_flow(self, steam_id: u64, token: &str) -> Self {
            *self.state.begin_auth.lock().unwrap() = Some(Ok(AuthSession {
                client_id: 1,
                request_id: "r".into(),
                interval_secs: 0,
                confirmation: GuardType::None,
            }));
            *self.state.poll.lock().unwrap() = Some(AuthPoll {
                refresh_token: Some(token.to_string()),
                access_token: Some("access".into()),
                steam_id: Some(steam_id),
            });
            self
        }

        /// Script one app with one depot and its content.
        pub fn with_app(self, app_id: u32, depot_id: u32, manifest_id: u64, key: [u8; 32]) -> Self {
            {
                let mut state = self.state.licenses.lock().unwrap();
                state.push(License {
                    package_id: app_id + 1000,
                    payment_method: PaymentMethod::Other,
                });
            }
            self.state.packages.lock().unwrap().push(PackageInfo {
                package_id: app_id + 1000,
                app_ids: vec![app_id],
            });
            self.state.apps.lock().unwrap().insert(
                app_id,
                AppInfo {
                    app_id,
                    depots: serde_json::json!({
                        depot_id.to_string(): {
                            "manifests": {"public": {"gid": manifest_id.to_string()}}
                        }
                    }),
                },
            );
            self.state
                .request_codes
                .lock()
                .unwrap()
                .insert((app_id, depot_id, manifest_id), 7);
            self.state
                .depot_keys
                .lock()
                .unwrap()
                .insert((app_id, depot_id), key);
            self.state.payloads.lock().unwrap().insert(
                (app_id, depot_id, manifest_id),
                format!("payload-{app_id}-{depot_id}-{manifest_id}").into_bytes(),
            );
            self
        }
    }

    impl SteamClient for MockSteamClient {
        async fn connect(&self) -> Result<(), SteamError> {
            self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn disconnect(&self) {
            self.state
                .events
                .lock()
                .unwrap()
                .push_back(SteamEvent::Disconnected {
                    user_initiated: true,
                });
        }

        fn drain_events(&self) -> Vec<SteamEvent> {
            self.state.events.lock().unwrap().drain(..).collect()
        }

        async fn logon_with_refresh_token(
            &self,
            _account_name: &str,
            _refresh_token: &str,
        ) -> Result<Logon, SteamError> {
            self.state
                .refresh_logon
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Err(SteamError::Rpc("no refresh logon scripted".into())))
        }

        async fn begin_credentials_auth(
            &self,
            _account_name: &str,
            _password: &str,
        ) -> Result<AuthSession, SteamError> {
            self.state
                .begin_auth
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Err(SteamError::InvalidPassword))
        }

        async fn poll_auth_session(&self, _auth: &AuthSession) -> Result<AuthPoll, SteamError> {
            Ok(self.state.poll.lock().unwrap().clone().unwrap_or_default())
        }

        async fn licenses(&self) -> Result<Vec<License>, SteamError> {
            Ok(self.state.licenses.lock().unwrap().clone())
        }

        async fn package_info(&self, package_ids: &[u32]) -> Result<Vec<PackageInfo>, SteamError> {
            Ok(self
                .state
                .packages
                .lock()
                .unwrap()
                .iter()
                .filter(|p| package_ids.contains(&p.package_id))
                .cloned()
                .collect())
        }

        async fn app_access_tokens(
            &self,
            app_ids: &[u32],
        ) -> Result<HashMap<u32, u64>, SteamError> {
            Ok(app_ids.iter().map(|id| (*id, 0)).collect())
        }

        async fn app_info(&self, app_id: u32, _access_token: u64) -> Result<AppInfo, SteamError> {
            self.state
                .apps
                .lock()
                .unwrap()
                .get(&app_id)
                .cloned()
                .ok_or_else(|| SteamError::Rpc(format!("no product info for app {app_id}")))
        }

        async fn manifest_request_code(
            &self,
            app_id: u32,
            depot_id: u32,
            manifest_id: u64,
        ) -> Result<u64, SteamError> {
            self.state
                .request_code_calls
                .lock()
                .unwrap()
                .push((app_id, depot_id, manifest_id));
            Ok(*self
                .state
                .request_codes
                .lock()
                .unwrap()
                .get(&(app_id, depot_id, manifest_id))
                .unwrap_or(&0))
        }

        async fn depot_key(&self, app_id: u32, depot_id: u32) -> Result<[u8; 32], SteamError> {
            self.state
                .depot_keys
                .lock()
                .unwrap()
                .get(&(app_id, depot_id))
                .copied()
                .ok_or_else(|| SteamError::Rpc(format!("no key for depot {depot_id}")))
        }

        async fn cdn_servers(&self) -> Result<Vec<CdnServer>, SteamError> {
            Ok(self.state.servers.lock().unwrap().clone())
        }

        async fn download_manifest(
            &self,
            _server: &CdnServer,
            app_id: u32,
            depot_id: u32,
            manifest_id: u64,
            _request_code: u64,
        ) -> Result<Vec<u8>, SteamError> {
            self.state.download_calls.fetch_add(1, Ordering::SeqCst);
            self.state
                .payloads
                .lock()
                .unwrap()
                .get(&(app_id, depot_id, manifest_id))
                .cloned()
                .ok_or_else(|| SteamError::Rpc("no payload scripted".into()))
        }
    }

    #[test]
    fn test_jwt_steam_id() {
        // Header and signature are irrelevant; only the claims matter.
        let claims = BASE64_URL_SAFE_NO_PAD.encode(r#"{"sub": "76561198000000000"}"#);
        let token = format!("x.{claims}.y");
        assert_eq!(jwt_steam_id(&token), Some(76561198000000000));

        assert_eq!(jwt_steam_id("not-a-jwt"), None);
        let bad = format!("x.{}.y", BASE64_URL_SAFE_NO_PAD.encode(r#"{"aud": []}"#));
        assert_eq!(jwt_steam_id(&bad), None);
    }

    #[test]
    fn test_preferred_confirmation() {
        let raw = |t: u64| RawConfirmation {
            confirmation_type: Some(t),
        };
        assert_eq!(preferred_confirmation(&[]), GuardType::None);
        assert_eq!(preferred_confirmation(&[raw(1), raw(3)]), GuardType::None);
        assert_eq!(
            preferred_confirmation(&[raw(3), raw(4)]),
            GuardType::DeviceConfirmation
        );
        assert_eq!(preferred_confirmation(&[raw(3)]), GuardType::DeviceCode);
        assert_eq!(preferred_confirmation(&[raw(2)]), GuardType::EmailCode);
        assert_eq!(preferred_confirmation(&[raw(99)]), GuardType::Unknown);
    }

    #[test]
    fn test_opt_u64_from_any() {
        #[derive(Deserialize)]
        struct Doc {
            #[serde(default, deserialize_with = "opt_u64_from_any")]
            id: Option<u64>,
        }
        let n: Doc = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(n.id, Some(42));
        let s: Doc = serde_json::from_str(r#"{"id": "42"}"#).unwrap();
        assert_eq!(s.id, Some(42));
        let missing: Doc = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.id, None);
        assert!(serde_json::from_str::<Doc>(r#"{"id": []}"#).is_err());
    }
}
