//! Lease-based mutual exclusion over logical resource paths.
//!
//! Locks coordinate separate editor sessions (possibly separate
//! processes), so every lease is a small YAML record in a shared lock
//! directory, named by the SHA-256 of the resource path. Expiry is
//! evaluated lazily when a lease is read; nothing sweeps stale files.
//! An unread stale lease is inert data, overwritten by the next
//! successful acquire.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{DataError, DataResult};
use crate::tracking::{ChangeNotifier, ObserverId};

/// Default lease duration.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// One lease record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Logical resource path the lease covers.
    pub resource: String,

    /// Identity of the session holding the lease.
    pub holder: String,

    /// When the lease was (last) granted.
    pub acquired_at: DateTime<Utc>,

    /// When the lease lapses. Always after `acquired_at`.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Whether the lease has lapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the lease has lapsed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// What happened to a lease, delivered to lock-change observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEventKind {
    Acquired,
    Refreshed,
    Released,
}

/// Lock-change notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub resource: String,
    pub holder: String,
    pub kind: LockEventKind,
}

/// File-backed lease service.
pub struct LockService {
    dir: PathBuf,
    default_lease: Duration,
    notifier: ChangeNotifier<LockEvent>,
}

impl LockService {
    /// A service storing leases under `dir`. The directory is created
    /// on first acquire.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            default_lease: DEFAULT_LEASE,
            notifier: ChangeNotifier::new(),
        }
    }

    /// Override the default lease duration.
    pub fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a lock-change observer.
    pub fn on_lock_changed<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&LockEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    pub fn remove_lock_observer(&self, id: ObserverId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Acquire (or extend) the lease on `resource` for `holder`.
    /// Succeeds iff no live lease by another holder exists; the
    /// returned record carries the new expiry.
    pub async fn acquire(
        &self,
        resource: &str,
        holder: &str,
        lease: Option<Duration>,
    ) -> DataResult<LockInfo> {
        self.grant(resource, holder, lease, LockEventKind::Acquired)
            .await
    }

    /// Extend the caller's own lease. Behaves like
    /// [`acquire`](Self::acquire) restricted to the current holder.
    pub async fn refresh(
        &self,
        resource: &str,
        holder: &str,
        lease: Option<Duration>,
    ) -> DataResult<LockInfo> {
        self.grant(resource, holder, lease, LockEventKind::Refreshed)
            .await
    }

    async fn grant(
        &self,
        resource: &str,
        holder: &str,
        lease: Option<Duration>,
        kind: LockEventKind,
    ) -> DataResult<LockInfo> {
        if let Some(existing) = self.read_lease(resource).await? {
            if !existing.is_expired() && existing.holder != holder {
                return Err(DataError::LockConflict {
                    resource: resource.to_string(),
                    holder: existing.holder,
                });
            }
        }

        let now = Utc::now();
        let lease = lease.unwrap_or(self.default_lease);
        let info = LockInfo {
            resource: resource.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(300)),
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.lease_path(resource);
        let text = serde_yaml::to_string(&info)
            .map_err(|e| DataError::from_yaml(&path.display().to_string(), e))?;
        tokio::fs::write(&path, text).await?;

        debug!("Lease on '{resource}' granted to '{holder}'");
        self.notifier.notify(&LockEvent {
            resource: resource.to_string(),
            holder: holder.to_string(),
            kind,
        });
        Ok(info)
    }

    /// Release the lease on `resource` if `holder` owns it. Returns
    /// `Ok(false)` rather than an error when the lease is absent or
    /// owned by someone else.
    pub async fn release(&self, resource: &str, holder: &str) -> DataResult<bool> {
        let Some(existing) = self.read_lease(resource).await? else {
            return Ok(false);
        };
        if existing.holder != holder {
            debug!(
                "Release of '{resource}' by '{holder}' ignored, lease held by '{}'",
                existing.holder
            );
            return Ok(false);
        }

        match tokio::fs::remove_file(self.lease_path(resource)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!("Lease on '{resource}' released by '{holder}'");
        self.notifier.notify(&LockEvent {
            resource: resource.to_string(),
            holder: holder.to_string(),
            kind: LockEventKind::Released,
        });
        Ok(true)
    }

    /// The raw lease record, if one is stored. Expiry is left to the
    /// caller via [`LockInfo::is_expired`].
    pub async fn lock_info(&self, resource: &str) -> DataResult<Option<LockInfo>> {
        self.read_lease(resource).await
    }

    /// Whether a live lease exists on `resource`.
    pub async fn is_locked(&self, resource: &str) -> DataResult<bool> {
        Ok(self
            .read_lease(resource)
            .await?
            .map(|l| !l.is_expired())
            .unwrap_or(false))
    }

    /// Whether a live lease by someone other than `caller` exists.
    pub async fn is_locked_by_other(&self, resource: &str, caller: &str) -> DataResult<bool> {
        Ok(self
            .read_lease(resource)
            .await?
            .map(|l| !l.is_expired() && l.holder != caller)
            .unwrap_or(false))
    }

    async fn read_lease(&self, resource: &str) -> DataResult<Option<LockInfo>> {
        let path = self.lease_path(resource);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_yaml::from_str::<LockInfo>(&text) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                // A damaged lease file must not brick the resource;
                // treat it as absent so the next acquire overwrites it.
                warn!("Corrupt lease file {} ({e}), treating as absent", path.display());
                Ok(None)
            }
        }
    }

    fn lease_path(&self, resource: &str) -> PathBuf {
        let digest = Sha256::digest(resource.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{hex}.lock.yml"))
    }
}
