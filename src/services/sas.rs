//! Shared access signatures for the blob service.
//!
//! Read-only blob SAS URLs are handed to the speech service, which cannot use
//! the storage account key. The blob client signs its own requests with
//! short-lived account SAS tokens minted from the same key.

use base64::Engine;
use chrono::{DateTime, Duration, Timelike, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Storage service version the signatures are built for.
pub const SAS_VERSION: &str = "2018-11-09";

/// How long a signed recording URL stays valid.
pub const BLOB_SAS_EXPIRY_HOURS: i64 = 48;

/// Backdating of the validity start, absorbing clock skew with the consumer.
pub const BLOB_SAS_LOOKBACK_MINUTES: i64 = 5;

const ACCOUNT_SAS_LIFETIME_MINUTES: i64 = 30;

/// Validity interval of a signature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SasWindow {
    pub starts_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

impl SasWindow {
    /// Window used for recording URLs: five minutes back, 48 hours ahead.
    pub fn for_recording(now: DateTime<Utc>) -> Self {
        let now = now.with_nanosecond(0).unwrap_or(now);
        Self {
            starts_on: now - Duration::minutes(BLOB_SAS_LOOKBACK_MINUTES),
            expires_on: now + Duration::hours(BLOB_SAS_EXPIRY_HOURS),
        }
    }

    fn for_request(now: DateTime<Utc>) -> Self {
        let now = now.with_nanosecond(0).unwrap_or(now);
        Self {
            starts_on: now - Duration::minutes(BLOB_SAS_LOOKBACK_MINUTES),
            expires_on: now + Duration::minutes(ACCOUNT_SAS_LIFETIME_MINUTES),
        }
    }
}

/// Signed query parameters, ready to append to a request URL.
#[derive(Debug, Clone, PartialEq)]
pub struct SasToken {
    pairs: Vec<(&'static str, String)>,
}

impl SasToken {
    pub fn apply(&self, url: &mut Url) {
        let mut query = url.query_pairs_mut();
        for (key, value) in &self.pairs {
            query.append_pair(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Storage account name plus its HMAC key.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account_name: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

impl SharedKeyCredential {
    /// Create from the account name and its base64-encoded key.
    pub fn new(account_name: &str, account_key_base64: &str) -> Result<Self, SasError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(account_key_base64.trim())
            .map_err(|_| SasError::InvalidKey)?;
        let mac = HmacSha256::new_from_slice(&key).map_err(|_| SasError::InvalidKey)?;

        Ok(Self {
            account_name: account_name.to_string(),
            mac,
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    fn sign(&self, string_to_sign: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(string_to_sign.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Service SAS granting read access to a single blob.
    pub fn blob_read_sas(&self, container: &str, blob: &str, window: SasWindow) -> SasToken {
        let permissions = "r";
        let start = format_time(window.starts_on);
        let expiry = format_time(window.expires_on);
        let resource = format!("/blob/{}/{}/{}", self.account_name, container, blob);

        let string_to_sign = [
            permissions,
            start.as_str(),
            expiry.as_str(),
            resource.as_str(),
            "", // signed identifier
            "", // signed IP
            "", // signed protocol
            SAS_VERSION,
            "b", // signed resource
            "", // snapshot time
            "", // rscc
            "", // rscd
            "", // rsce
            "", // rscl
            "", // rsct
        ]
        .join("\n");

        SasToken {
            pairs: vec![
                ("sv", SAS_VERSION.to_string()),
                ("st", start),
                ("se", expiry),
                ("sr", "b".to_string()),
                ("sp", permissions.to_string()),
                ("sig", self.sign(&string_to_sign)),
            ],
        }
    }

    /// Account SAS for the blob service, covering container and object
    /// operations for the next half hour.
    pub fn blob_service_sas(&self, now: DateTime<Utc>) -> SasToken {
        let window = SasWindow::for_request(now);
        let permissions = "rwdlac";
        let services = "b";
        let resource_types = "sco";
        let start = format_time(window.starts_on);
        let expiry = format_time(window.expires_on);

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n\n\n{}\n",
            self.account_name, permissions, services, resource_types, start, expiry, SAS_VERSION
        );

        SasToken {
            pairs: vec![
                ("sv", SAS_VERSION.to_string()),
                ("ss", services.to_string()),
                ("srt", resource_types.to_string()),
                ("sp", permissions.to_string()),
                ("st", start),
                ("se", expiry),
                ("sig", self.sign(&string_to_sign)),
            ],
        }
    }
}

/// Issues time-bounded read-only URLs for uploaded recordings.
#[derive(Debug, Clone)]
pub struct SignedUrlIssuer {
    credential: SharedKeyCredential,
}

impl SignedUrlIssuer {
    pub fn new(credential: SharedKeyCredential) -> Self {
        Self { credential }
    }

    /// Append a read-only SAS to `object_url`, valid from five minutes before
    /// `now` until 48 hours after it.
    pub fn sign(&self, object_url: &str, now: DateTime<Utc>) -> Result<String, SasError> {
        let mut url = Url::parse(object_url).map_err(|_| SasError::InvalidUrl(object_url.to_string()))?;
        let (container, blob) = split_blob_path(&url, self.credential.account_name())
            .ok_or_else(|| SasError::InvalidUrl(object_url.to_string()))?;

        let token = self
            .credential
            .blob_read_sas(&container, &blob, SasWindow::for_recording(now));
        token.apply(&mut url);
        Ok(url.to_string())
    }
}

/// Container and blob name from a blob URL, percent-decoded as the service
/// expects them in the signed resource. Path-style URLs of local emulators
/// carry the account name as the first segment.
pub fn split_blob_path(url: &Url, account_name: &str) -> Option<(String, String)> {
    let mut segments = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8().ok().map(|s| s.into_owned()))
        .collect::<Option<Vec<String>>>()?;
    if segments.len() > 2 && segments[0] == account_name {
        segments.remove(0);
    }
    if segments.len() < 2 {
        return None;
    }
    let container = segments.remove(0);
    Some((container, segments.join("/")))
}

/// Storage settings parsed from a connection string.
#[derive(Debug, Clone)]
pub struct StorageAccount {
    pub credential: SharedKeyCredential,
    pub blob_endpoint: String,
}

impl StorageAccount {
    /// Parse `AccountName=..;AccountKey=..;...`. The blob endpoint comes from
    /// `BlobEndpoint` when present, otherwise from the protocol and suffix.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, SasError> {
        let lookup = |name: &str| {
            connection_string
                .split(';')
                .filter_map(|part| part.split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim().to_string())
        };

        let account_name = lookup("AccountName").ok_or(SasError::MissingPart("AccountName"))?;
        let account_key = lookup("AccountKey").ok_or(SasError::MissingPart("AccountKey"))?;
        let credential = SharedKeyCredential::new(&account_name, &account_key)?;

        let blob_endpoint = lookup("BlobEndpoint").unwrap_or_else(|| {
            let protocol = lookup("DefaultEndpointsProtocol").unwrap_or_else(|| "https".to_string());
            let suffix = lookup("EndpointSuffix").unwrap_or_else(|| "core.windows.net".to_string());
            format!("{protocol}://{account_name}.blob.{suffix}")
        });

        Ok(Self {
            credential,
            blob_endpoint: blob_endpoint.trim_end_matches('/').to_string(),
        })
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum SasError {
    #[error("Invalid storage account key (must be base64)")]
    InvalidKey,

    #[error("Storage connection string is missing {0}")]
    MissingPart(&'static str),

    #[error("Not a blob URL: {0}")]
    InvalidUrl(String),
}
