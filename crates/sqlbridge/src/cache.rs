//! The keyed connection cache.
//!
//! One long-lived handle per (datasource, settings generation, connection
//! args) triple. The settings-mutation timestamp is part of the key, so a
//! configuration edit never reuses a stale handle; query-scoped connection
//! args are fingerprinted so equal args share a handle.

use crate::asyncq::AsyncDb;
use crate::config::{DatasourceSettings, DisposePolicy};
use crate::driver::SqlConnection;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key suffix for the args-less default entry.
pub const DEFAULT_KEY_SUFFIX: &str = "default";

/// Cache key uniquely identifying a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    uid: String,
    updated_unix: i64,
    args_digest: String,
}

impl ConnectionKey {
    pub fn new(settings: &DatasourceSettings, connection_args: Option<&serde_json::Value>) -> Self {
        let args_digest = match connection_args {
            None | Some(serde_json::Value::Null) => DEFAULT_KEY_SUFFIX.to_string(),
            Some(args) => {
                let raw = serde_json::to_vec(args).unwrap_or_default();
                format!("{:x}", Sha256::digest(&raw))
            }
        };
        Self {
            uid: settings.uid.clone(),
            updated_unix: settings.updated.timestamp(),
            args_digest,
        }
    }

    pub fn is_default(&self) -> bool {
        self.args_digest == DEFAULT_KEY_SUFFIX
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}-{}", self.uid, self.updated_unix, self.args_digest)
    }
}

/// An open handle paired with the settings snapshot it was opened from.
pub struct CachedConnection {
    pub handle: Box<dyn SqlConnection>,
    /// Present when the driver exposes the async capability.
    pub async_db: Option<Box<dyn AsyncDb>>,
    pub settings: DatasourceSettings,
    closed: AtomicBool,
}

impl CachedConnection {
    pub fn new(
        handle: Box<dyn SqlConnection>,
        async_db: Option<Box<dyn AsyncDb>>,
        settings: DatasourceSettings,
    ) -> Self {
        Self {
            handle,
            async_db,
            settings,
            closed: AtomicBool::new(false),
        }
    }

    /// Close the handle once, logging close failures rather than surfacing
    /// them. A reconnect closes the handle explicitly and then displaces it
    /// from the cache, so close must tolerate being reached twice.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.handle.close().await {
            warn!(error = %e, "closing existing connection failed");
        }
        if let Some(adb) = &self.async_db {
            if let Err(e) = adb.close().await {
                warn!(error = %e, "closing existing async connection failed");
            }
        }
    }
}

impl fmt::Debug for CachedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedConnection")
            .field("uid", &self.settings.uid)
            .field("async", &self.async_db.is_some())
            .finish()
    }
}

/// Concurrent map of cached connections.
#[derive(Default)]
pub struct ConnectionCache {
    connections: DashMap<ConnectionKey, Arc<CachedConnection>>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<CachedConnection>> {
        self.connections.get(key).map(|entry| entry.value().clone())
    }

    /// Store a handle under a key. Any displaced handle is closed before the
    /// call returns, so the cache never leaks the losing writer of a race.
    pub async fn store(&self, key: ConnectionKey, conn: Arc<CachedConnection>) {
        debug!(key = %key, "caching connection");
        if let Some(displaced) = self.connections.insert(key, conn) {
            displaced.close().await;
        }
    }

    pub fn remove(&self, key: &ConnectionKey) -> Option<Arc<CachedConnection>> {
        self.connections.remove(key).map(|(_, conn)| conn)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Tear the cache down. With [`DisposePolicy::CloseConnections`] every
    /// stored handle is closed and the map is emptied; with
    /// [`DisposePolicy::PreserveConnections`] entries survive so a plugin
    /// reload can keep its handles.
    pub async fn dispose(&self, policy: DisposePolicy) {
        match policy {
            DisposePolicy::PreserveConnections => {
                debug!("dispose requested, preserving cached connections");
            }
            DisposePolicy::CloseConnections => {
                let keys: Vec<ConnectionKey> = self
                    .connections
                    .iter()
                    .map(|entry| entry.key().clone())
                    .collect();
                for key in keys {
                    if let Some((_, conn)) = self.connections.remove(&key) {
                        conn.close().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn settings(uid: &str, updated_sec: i64) -> DatasourceSettings {
        DatasourceSettings {
            uid: uid.into(),
            name: uid.into(),
            updated: Utc.timestamp_opt(updated_sec, 0).unwrap(),
            json_data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_default_key_suffix() {
        let key = ConnectionKey::new(&settings("ds", 0), None);
        assert!(key.is_default());
        assert_eq!(key.to_string(), "ds@0-default");
    }

    #[test]
    fn test_args_fingerprinted() {
        let a = ConnectionKey::new(&settings("ds", 0), Some(&json!({"db": "one"})));
        let b = ConnectionKey::new(&settings("ds", 0), Some(&json!({"db": "two"})));
        let a2 = ConnectionKey::new(&settings("ds", 0), Some(&json!({"db": "one"})));
        assert_ne!(a, b);
        assert_eq!(a, a2);
        assert!(!a.is_default());
    }

    #[test]
    fn test_settings_update_changes_key() {
        let before = ConnectionKey::new(&settings("ds", 0), None);
        let after = ConnectionKey::new(&settings("ds", 60), None);
        assert_ne!(before, after);
    }

    #[test]
    fn test_null_args_are_default() {
        let key = ConnectionKey::new(&settings("ds", 0), Some(&serde_json::Value::Null));
        assert!(key.is_default());
    }
}
