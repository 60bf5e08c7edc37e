use crate::monitor::{MonitorHandle, MonitorRequest};
use crate::rpc::{Rpc, RpcSink};
use crate::transact::{self, Operation, OperationResult, TransactBuilder};
use crate::{Error, Result};
use ovsdb::{DatabaseSchema, TableUpdates};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Who initiated the underlying TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Active,
    Passive,
}

/// Transport security of the established stream. The core only uses this
/// for diagnostics; bring-up happens before the stream is handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketSecurity {
    Ssl,
    NonSsl,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub connection_type: ConnectionType,
    pub socket_security: SocketSecurity,
    /// How long a device-state entry may sit IN_TRANSIT before recovery
    /// logic treats it as stale.
    pub in_transit_expiry: Duration,
    /// Deadline applied to monitor and monitor_cancel requests;
    /// None disables it.
    pub monitor_timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            connection_type: ConnectionType::Active,
            socket_security: SocketSecurity::NonSsl,
            in_transit_expiry: Duration::from_secs(30),
            monitor_timeout: None,
        }
    }
}

/// Addressing facts of the established session.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub connection_type: ConnectionType,
}

/// `MonitorCallback` receives decoded updates of one subscription.
/// Deliveries for a handle arrive strictly in order.
pub trait MonitorCallback: Send + Sync {
    fn update(&self, updates: TableUpdates, schema: &DatabaseSchema);
}

#[derive(Clone)]
struct MonitorEntry {
    schema: Arc<DatabaseSchema>,
    callback: Arc<dyn MonitorCallback>,
}

// Routes server-pushed updates to their subscription. Shared weakly with
// the session task so disconnect severs it.
#[derive(Default)]
struct MonitorRegistry {
    entries: Mutex<HashMap<MonitorHandle, MonitorEntry>>,
}

impl MonitorRegistry {
    fn insert(&self, handle: MonitorHandle, entry: MonitorEntry) {
        self.entries.lock().unwrap().insert(handle, entry);
    }

    fn remove(&self, handle: &MonitorHandle) {
        self.entries.lock().unwrap().remove(handle);
    }

    fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl RpcSink for MonitorRegistry {
    fn update(&self, context: Value, updates: Value) {
        let Some(handle) = context.as_str().map(MonitorHandle::from) else {
            tracing::warn!(%context, "dropping update with a non-string monitor context");
            return;
        };
        let Some(entry) = self.entries.lock().unwrap().get(&handle).cloned() else {
            tracing::debug!(%handle, "dropping update for an unknown monitor");
            return;
        };
        match entry.schema.table_updates_from_json(&updates) {
            Ok(updates) => entry.callback.update(updates, &entry.schema),
            Err(err) => {
                tracing::warn!(%handle, ?err, "failed to decode monitor update");
            }
        }
    }

    fn locked(&self, lock: String) {
        tracing::debug!(%lock, "lock acquired notification");
    }

    fn stolen(&self, lock: String) {
        tracing::debug!(%lock, "lock stolen notification");
    }
}

struct Inner {
    rpc: Rpc,
    options: Options,
    info: ConnectionInfo,
    schemas: Mutex<HashMap<String, Arc<DatabaseSchema>>>,
    monitors: Arc<MonitorRegistry>,
    sink_installed: AtomicBool,
    active: AtomicBool,
    published: AtomicBool,
}

/// `Client` is the OVSDB session façade: schema cache, transact batches,
/// monitor subscriptions, and lifecycle. Clones share one session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Wrap an established stream. Socket and TLS bring-up are the
    /// caller's concern.
    pub fn new<S>(
        io: S,
        options: Options,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        tracing::debug!(
            ?remote_addr,
            connection_type = ?options.connection_type,
            security = ?options.socket_security,
            "starting ovsdb session"
        );
        let info = ConnectionInfo {
            local_addr,
            remote_addr,
            connection_type: options.connection_type,
        };
        Client {
            inner: Arc::new(Inner {
                rpc: Rpc::start(io),
                options,
                info,
                schemas: Mutex::new(HashMap::new()),
                monitors: Arc::new(MonitorRegistry::default()),
                sink_installed: AtomicBool::new(false),
                active: AtomicBool::new(true),
                published: AtomicBool::new(false),
            }),
        }
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.inner.rpc.list_dbs().await
    }

    /// Fetch and cache the named database schema. Subsequent calls return
    /// the cached copy.
    pub async fn get_schema(&self, database: &str) -> Result<Arc<DatabaseSchema>> {
        if let Some(schema) = self.inner.schemas.lock().unwrap().get(database) {
            return Ok(schema.clone());
        }
        let raw = self.inner.rpc.get_schema(database).await?;
        let mut schema = DatabaseSchema::from_json(database, &raw)?;
        schema.populate_internally_generated_columns();
        let schema = Arc::new(schema);

        // A concurrent fetch may have won; keep whichever landed first.
        let mut cache = self.inner.schemas.lock().unwrap();
        Ok(cache.entry(database.to_string()).or_insert(schema).clone())
    }

    /// Run a batch of operations against the schema's database. The result
    /// list preserves operation order; a failed operation populates its
    /// slot's `error` and later slots report the halt.
    pub async fn transact(
        &self,
        schema: &DatabaseSchema,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationResult>> {
        let mut builder = TransactBuilder::new(schema.name.clone());
        for operation in operations {
            builder.add(operation);
        }
        self.transact_builder(&builder).await
    }

    pub async fn transact_builder(&self, builder: &TransactBuilder) -> Result<Vec<OperationResult>> {
        let reply = self.inner.rpc.transact(builder.build()).await?;
        transact::results_from_json(reply)
    }

    /// Subscribe with a fresh handle. Returns the handle and the decoded
    /// initial snapshot.
    pub async fn monitor(
        &self,
        schema: &Arc<DatabaseSchema>,
        requests: BTreeMap<String, MonitorRequest>,
        callback: Arc<dyn MonitorCallback>,
    ) -> Result<(MonitorHandle, TableUpdates)> {
        let handle = MonitorHandle::generate();
        let initial = self
            .monitor_with_handle(handle.clone(), schema, requests, callback)
            .await?;
        Ok((handle, initial))
    }

    /// Subscribe under a caller-supplied handle, as used to resume a known
    /// subscription.
    pub async fn monitor_with_handle(
        &self,
        handle: MonitorHandle,
        schema: &Arc<DatabaseSchema>,
        requests: BTreeMap<String, MonitorRequest>,
        callback: Arc<dyn MonitorCallback>,
    ) -> Result<TableUpdates> {
        self.install_sink();
        self.inner.monitors.insert(
            handle.clone(),
            MonitorEntry {
                schema: schema.clone(),
                callback,
            },
        );

        let params = {
            let database = schema.name.clone();
            let handle = handle.clone();
            move || json!([database, handle, requests])
        };
        match self
            .inner
            .rpc
            .monitor(params, self.inner.options.monitor_timeout)
            .await
        {
            Ok(initial) => Ok(schema.table_updates_from_json(&initial)?),
            // On timeout the server may still own the monitor: leave the
            // handler in place until monitor_cancel or session close.
            Err(Error::Timeout) => Err(Error::Timeout),
            Err(err) => {
                self.inner.monitors.remove(&handle);
                Err(err)
            }
        }
    }

    /// Cancel a subscription. Best-effort: on timeout the handler stays
    /// registered until the session closes.
    pub async fn cancel_monitor(&self, handle: &MonitorHandle) -> Result<()> {
        match self
            .inner
            .rpc
            .monitor_cancel(handle, self.inner.options.monitor_timeout)
            .await
        {
            Ok(_) => {
                self.inner.monitors.remove(handle);
                Ok(())
            }
            Err(Error::Timeout) => {
                tracing::warn!(
                    %handle,
                    "monitor_cancel timed out; handler remains registered until the session closes"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn echo(&self) -> Result<Vec<String>> {
        self.inner.rpc.echo().await
    }

    pub async fn lock(&self, _lock: &str) -> Result<()> {
        Err(Error::Unimplemented("lock"))
    }

    pub async fn steal(&self, _lock: &str) -> Result<()> {
        Err(Error::Unimplemented("steal"))
    }

    pub async fn unlock(&self, _lock: &str) -> Result<()> {
        Err(Error::Unimplemented("unlock"))
    }

    /// Tear the session down: pending requests complete with
    /// `ConnectionClosed` and monitor handlers are dropped. Idempotent.
    pub fn disconnect(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            tracing::debug!("disconnecting ovsdb session");
            self.inner.rpc.shutdown();
            self.inner.monitors.clear();
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_connection_published(&self) -> bool {
        self.inner.published.load(Ordering::SeqCst)
    }

    pub fn set_connection_published(&self, published: bool) {
        self.inner.published.store(published, Ordering::SeqCst);
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// Poll once per second until a schema has been cached, or the timeout
    /// elapses. Intended for integration tests.
    pub async fn is_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.inner.schemas.lock().unwrap().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    fn install_sink(&self) {
        if !self.inner.sink_installed.swap(true, Ordering::SeqCst) {
            let monitors: Arc<dyn RpcSink> = self.inner.monitors.clone();
            let sink: Weak<dyn RpcSink> = Arc::downgrade(&monitors);
            self.inner.rpc.register_callback(sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = Options::default();
        assert_eq!(options.connection_type, ConnectionType::Active);
        assert_eq!(options.socket_security, SocketSecurity::NonSsl);
        assert_eq!(options.in_transit_expiry, Duration::from_secs(30));
        assert_eq!(options.monitor_timeout, None);
    }
}
