//! Value types crossing the Steam client seam.

use serde::Deserialize;
use serde_json::Value;

/// How a license was paid for. The harvest only cares about one bucket:
/// complimentary licenses see no depots and are skipped outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Complimentary,
    #[serde(other)]
    Other,
}

impl PaymentMethod {
    pub fn is_complimentary(&self) -> bool {
        matches!(self, PaymentMethod::Complimentary)
    }
}

/// A license grant visible to the logged-on account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct License {
    pub package_id: u32,
    pub payment_method: PaymentMethod,
}

/// Product info for one package: the apps it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub package_id: u32,
    pub app_ids: Vec<u32>,
}

/// Product info for one app.
///
/// `depots` is the raw document as the product-info service returns it;
/// [`AppInfo::public_manifests`] extracts the typed view the downloader
/// consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct AppInfo {
    pub app_id: u32,
    pub depots: Value,
}

/// One depot's current public manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DepotManifest {
    pub depot_id: u32,
    pub manifest_id: u64,
}

impl AppInfo {
    /// Enumerate the depots that carry a public manifest.
    ///
    /// A child of the `depots` record qualifies when its name is all digits
    /// and it has a `manifests.public` sub-object with a readable `gid`
    /// (the upstream serializes it as either a string or a number).
    /// Everything else under `depots` — configuration blocks, branch
    /// metadata, DLC references — is skipped.
    pub fn public_manifests(&self) -> Vec<DepotManifest> {
        let Some(map) = self.depots.as_object() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (name, value) in map {
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let Ok(depot_id) = name.parse() else { continue };
            let Some(gid) = value
                .get("manifests")
                .and_then(|m| m.get("public"))
                .and_then(|p| p.get("gid"))
            else {
                continue;
            };
            let manifest_id = match gid {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.as_u64(),
                _ => None,
            };
            if let Some(manifest_id) = manifest_id {
                out.push(DepotManifest {
                    depot_id,
                    manifest_id,
                });
            }
        }
        out.sort();
        out
    }
}

/// A CDN edge serving depot content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnServer {
    pub host: String,
    pub https: bool,
}

impl CdnServer {
    /// Base URL for depot requests against this server.
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }
}

/// Outcome of a successful logon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logon {
    pub steam_id: u64,
    /// Present when the upstream rotated the refresh token during logon
    pub new_refresh_token: Option<String>,
}

/// Which confirmation the auth session demands from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardType {
    /// No confirmation needed; poll straight away
    None,
    /// Confirm on a trusted device; auto-accepted by polling
    DeviceConfirmation,
    /// A device code must be typed — impossible headless
    DeviceCode,
    /// An email code must be typed — impossible headless
    EmailCode,
    Unknown,
}

/// A pending credentials auth session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub client_id: u64,
    pub request_id: String,
    pub interval_secs: u64,
    pub confirmation: GuardType,
}

/// One poll of a pending auth session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPoll {
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub steam_id: Option<u64>,
}

/// Connection-level notifications drained by the session pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteamEvent {
    Connected,
    Disconnected { user_initiated: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_manifests_extraction() {
        let info = AppInfo {
            app_id: 10,
            depots: json!({
                "20": {"manifests": {"public": {"gid": "42", "size": "123"}}},
                "21": {"manifests": {"public": {"gid": 43}}},
                "22": {"manifests": {"local": {"gid": "99"}}},
                "23": {"encryptedmanifests": {}},
                "branches": {"public": {"buildid": "100"}},
                "baselanguages": "english",
                "24": {"manifests": {"public": {"gid": "not-a-number"}}}
            }),
        };
        assert_eq!(
            info.public_manifests(),
            vec![
                DepotManifest { depot_id: 20, manifest_id: 42 },
                DepotManifest { depot_id: 21, manifest_id: 43 },
            ]
        );
    }

    #[test]
    fn test_public_manifests_tolerates_odd_documents() {
        for depots in [json!(null), json!("string"), json!([]), json!({})] {
            let info = AppInfo { app_id: 10, depots };
            assert!(info.public_manifests().is_empty());
        }
    }

    #[test]
    fn test_payment_method_decodes_unknown_as_other() {
        let complimentary: PaymentMethod = serde_json::from_str("\"complimentary\"").unwrap();
        assert!(complimentary.is_complimentary());
        let other: PaymentMethod = serde_json::from_str("\"credit_card\"").unwrap();
        assert!(!other.is_complimentary());
    }

    #[test]
    fn test_cdn_base_url() {
        let server = CdnServer { host: "cache1.steamcontent.com".into(), https: true };
        assert_eq!(server.base_url(), "https://cache1.steamcontent.com");
        let server = CdnServer { host: "cache2.steamcontent.com".into(), https: false };
        assert_eq!(server.base_url(), "http://cache2.steamcontent.com");
    }
}
