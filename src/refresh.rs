//! Background refresher (§4.2, §6): periodically pulls catalog, revocation,
//! and issuer-key snapshots from the upstream authority and swaps them into
//! the [`CacheStore`] atomically.
//!
//! Uses a `reqwest::Client` with an explicit timeout for outbound HTTP,
//! wrapped in a `tokio::time::interval` loop per cache entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::catalog::{Catalog, CatalogVersion, PermissionEntry};
use crate::credential::Credential;
use crate::errors::{GateError, GateResult};
use crate::identifiers::{CredentialId, GateId, IssuerId};

#[derive(Debug, Deserialize)]
pub struct CatalogResponse {
    pub version: u64,
    pub min_compatible_version: u64,
    pub permissions: Vec<PermissionEntry>,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RevocationsResponse {
    pub passport_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssuerKeysResponse {
    pub keys: HashMap<String, String>,
}

/// Everything the background refresher needs from an upstream authority.
/// Abstracted behind a trait so tests can supply a fake without a network.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn fetch_catalog(&self, gate_id: &GateId) -> GateResult<CatalogResponse>;
    async fn fetch_revocations(&self, gate_id: &GateId) -> GateResult<RevocationsResponse>;
    async fn fetch_issuer_keys(&self) -> GateResult<IssuerKeysResponse>;
    async fn issue_safe_default(&self, gate_id: &GateId) -> GateResult<Credential>;
}

pub struct HttpAuthorityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthorityClient {
    pub fn new(base_url: impl Into<String>) -> GateResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GateError::upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn fetch_catalog(&self, gate_id: &GateId) -> GateResult<CatalogResponse> {
        let url = format!("{}/gates/{}/catalog", self.base_url, gate_id.as_str());
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| GateError::upstream(format!("catalog fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| GateError::upstream(format!("catalog response malformed: {e}")))
    }

    async fn fetch_revocations(&self, gate_id: &GateId) -> GateResult<RevocationsResponse> {
        let url = format!("{}/gates/{}/revocations", self.base_url, gate_id.as_str());
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| GateError::upstream(format!("revocations fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| GateError::upstream(format!("revocations response malformed: {e}")))
    }

    async fn fetch_issuer_keys(&self) -> GateResult<IssuerKeysResponse> {
        let url = format!("{}/issuers/keys", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| GateError::upstream(format!("issuer keys fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| GateError::upstream(format!("issuer keys response malformed: {e}")))
    }

    async fn issue_safe_default(&self, gate_id: &GateId) -> GateResult<Credential> {
        let url = format!(
            "{}/gates/{}/passports/safe-default",
            self.base_url,
            gate_id.as_str()
        );
        #[derive(Deserialize)]
        struct Wrapper {
            passport: Credential,
        }
        let wrapper: Wrapper = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| GateError::upstream(format!("safe-default issuance failed: {e}")))?
            .json()
            .await
            .map_err(|e| GateError::upstream(format!("safe-default response malformed: {e}")))?;
        Ok(wrapper.passport)
    }
}

fn parse_issuer_key(hex_key: &str) -> Option<VerifyingKey> {
    let trimmed = hex_key.strip_prefix("0x").unwrap_or(hex_key);
    let bytes = hex::decode(trimmed).ok()?;
    let array: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&array).ok()
}

/// Spawn the three independent refresh loops. Each loop fetches on its own
/// TTL and, on error, logs and leaves the prior snapshot untouched — a
/// failed fetch never produces a partial write (§4.2).
pub fn spawn_refresh_loops(
    client: Arc<dyn AuthorityClient>,
    cache: Arc<CacheStore>,
    gate_id: GateId,
    min_compatible_version: u64,
    catalog_ttl: Duration,
    revocation_ttl: Duration,
    issuer_keys_ttl: Duration,
) {
    tokio::spawn(refresh_catalog_loop(
        client.clone(),
        cache.clone(),
        gate_id.clone(),
        min_compatible_version,
        catalog_ttl,
    ));
    tokio::spawn(refresh_revocations_loop(client.clone(), cache.clone(), gate_id, revocation_ttl));
    tokio::spawn(refresh_issuer_keys_loop(client, cache, issuer_keys_ttl));
}

async fn refresh_catalog_loop(
    client: Arc<dyn AuthorityClient>,
    cache: Arc<CacheStore>,
    gate_id: GateId,
    min_compatible_version: u64,
    ttl: Duration,
) {
    let mut interval = tokio::time::interval(ttl);
    loop {
        interval.tick().await;
        match client.fetch_catalog(&gate_id).await {
            Ok(response) => {
                let catalog = Catalog {
                    gate_id: gate_id.clone(),
                    min_compatible_version,
                    current: CatalogVersion::new(response.version, response.permissions, response.published_at),
                    retained: HashMap::new(),
                };
                cache.replace_catalog(catalog, std::time::Instant::now());
                debug!(gate_id = %gate_id, version = response.version, "catalog refreshed");
            }
            Err(err) => {
                warn!(gate_id = %gate_id, error = %err, "catalog refresh failed, retaining prior snapshot");
            }
        }
    }
}

async fn refresh_revocations_loop(
    client: Arc<dyn AuthorityClient>,
    cache: Arc<CacheStore>,
    gate_id: GateId,
    ttl: Duration,
) {
    let mut interval = tokio::time::interval(ttl);
    loop {
        interval.tick().await;
        match client.fetch_revocations(&gate_id).await {
            Ok(response) => {
                let revoked: HashSet<CredentialId> = response
                    .passport_ids
                    .iter()
                    .filter_map(|id| uuid::Uuid::parse_str(id).ok())
                    .map(CredentialId::from_uuid)
                    .collect();
                cache.replace_revocations(revoked, std::time::Instant::now());
                debug!(gate_id = %gate_id, "revocation set refreshed");
            }
            Err(err) => {
                warn!(gate_id = %gate_id, error = %err, "revocation refresh failed, retaining prior snapshot");
            }
        }
    }
}

async fn refresh_issuer_keys_loop(client: Arc<dyn AuthorityClient>, cache: Arc<CacheStore>, ttl: Duration) {
    let mut interval = tokio::time::interval(ttl);
    loop {
        interval.tick().await;
        match client.fetch_issuer_keys().await {
            Ok(response) => {
                let keys: HashMap<IssuerId, VerifyingKey> = response
                    .keys
                    .into_iter()
                    .filter_map(|(issuer, hex_key)| {
                        parse_issuer_key(&hex_key).map(|key| (IssuerId::new(issuer), key))
                    })
                    .collect();
                cache.replace_issuer_keys(keys, std::time::Instant::now());
                debug!("issuer key map refreshed");
            }
            Err(err) => {
                warn!(error = %err, "issuer key refresh failed, retaining prior snapshot");
            }
        }
    }
}
