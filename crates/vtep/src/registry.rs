use crate::dependency::{DependencyQueue, DependentJob};
use ovsdb::Row;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_IN_TRANSIT_EXPIRY: Duration = Duration::from_secs(30);

/// Hardware-VTEP row classes tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowClass {
    LogicalSwitch,
    PhysicalSwitch,
    PhysicalPort,
    PhysicalLocator,
    PhysicalLocatorSet,
    UcastMacsLocal,
    UcastMacsRemote,
    McastMacsLocal,
    McastMacsRemote,
    Tunnel,
    Acl,
}

/// Availability of one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A mutation was submitted to the device but not yet confirmed.
    InTransit,
    Unavailable,
    Available,
}

/// One registry record: the device-assigned UUID and confirmed payload of a
/// logical key, tagged with its availability.
#[derive(Debug, Clone)]
pub struct DeviceData {
    key: String,
    uuid: Option<Uuid>,
    payload: Option<Row>,
    status: Status,
    transit_since: Option<Instant>,
}

impl DeviceData {
    fn absent(key: &str) -> Self {
        DeviceData {
            key: key.to_string(),
            uuid: None,
            payload: None,
            status: Status::Unavailable,
            transit_since: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn payload(&self) -> Option<&Row> {
        self.payload.as_ref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// True once an IN_TRANSIT entry has outlived the recovery window:
    /// the in-flight transaction is presumed lost.
    pub fn is_in_transit_expired(&self, window: Duration) -> bool {
        self.status == Status::InTransit
            && self
                .transit_since
                .is_some_and(|since| since.elapsed() > window)
    }
}

#[derive(Debug, Clone)]
struct MacEntry {
    row: Row,
    locators: Vec<String>,
}

#[derive(Default)]
struct Maps {
    config: HashMap<(RowClass, String), DeviceData>,
    oper: HashMap<(RowClass, String), DeviceData>,
    by_uuid: HashMap<(RowClass, Uuid), Row>,
    // Termination point -> keys of the MAC rows referencing it.
    tep_refs: HashMap<String, HashSet<String>>,
    // Logical switch -> remote MAC rows, keyed by row key.
    ucasts: HashMap<String, HashMap<String, MacEntry>>,
    mcasts: HashMap<String, HashMap<String, MacEntry>>,
}

impl Maps {
    fn mark_in_transit(&mut self, class: RowClass, key: &str) {
        let data = self
            .oper
            .entry((class, key.to_string()))
            .or_insert_with(|| DeviceData::absent(key));
        data.status = Status::InTransit;
        data.transit_since = Some(Instant::now());
    }

    fn dec_ref(&mut self, referrer: &str, tep: &str) {
        let Some(referrers) = self.tep_refs.get_mut(tep) else {
            tracing::debug!(tep, referrer, "releasing a reference on an unknown termination point");
            return;
        };
        referrers.remove(referrer);
        if referrers.is_empty() {
            // Last reference released: the locator is about to be deleted
            // on the device.
            self.tep_refs.remove(tep);
            self.mark_in_transit(RowClass::PhysicalLocator, tep);
        }
    }

    fn remove_mac(&mut self, remote: RowClass, ls: &str, key: &str) {
        let table = match remote {
            RowClass::UcastMacsRemote => &mut self.ucasts,
            _ => &mut self.mcasts,
        };
        let Some(entry) = table.get_mut(ls).and_then(|rows| rows.remove(key)) else {
            tracing::debug!(ls, key, "removing an unknown remote MAC row");
            return;
        };
        for locator in &entry.locators {
            self.dec_ref(key, locator);
        }
        self.mark_in_transit(remote, key);
    }

    fn remove_oper(&mut self, class: RowClass, key: &str) {
        if let Some(data) = self.oper.remove(&(class, key.to_string())) {
            if let Some(uuid) = data.uuid {
                self.by_uuid.remove(&(class, uuid));
            }
        }
    }
}

/// `DeviceInfo` is the per-connection registry of hardware-VTEP state: what
/// the caller intends (config side), what the device last confirmed (oper
/// side), and the reference counts keeping termination points alive.
///
/// All mutating transitions happen under one registry mutex, which is what
/// makes the pairwise oper/uuid updates and the last-reference-to-transit
/// transition atomic. The mutex is never held across an await point.
pub struct DeviceInfo {
    maps: Mutex<Maps>,
    queue: DependencyQueue,
    expiry: Duration,
}

impl DeviceInfo {
    /// Create the registry and its dependency-queue worker.
    /// Must run inside a tokio runtime.
    pub fn new(expiry: Duration) -> Arc<Self> {
        Arc::new(DeviceInfo {
            maps: Mutex::new(Maps::default()),
            queue: DependencyQueue::new(),
            expiry,
        })
    }

    pub fn queue(&self) -> &DependencyQueue {
        &self.queue
    }

    pub fn in_transit_expiry(&self) -> Duration {
        self.expiry
    }

    /// Record a device-confirmed row under both its logical key and UUID.
    pub fn update_device_oper_data(&self, class: RowClass, key: &str, uuid: Uuid, payload: Row) {
        let mut maps = self.maps.lock().unwrap();
        maps.by_uuid.insert((class, uuid), payload.clone());
        maps.oper.insert(
            (class, key.to_string()),
            DeviceData {
                key: key.to_string(),
                uuid: Some(uuid),
                payload: Some(payload),
                status: Status::Available,
                transit_since: None,
            },
        );
    }

    pub fn get_device_oper_data(&self, class: RowClass, key: &str) -> Option<DeviceData> {
        self.maps
            .lock()
            .unwrap()
            .oper
            .get(&(class, key.to_string()))
            .cloned()
    }

    pub fn get_device_oper_data_by_uuid(&self, class: RowClass, uuid: &Uuid) -> Option<Row> {
        self.maps
            .lock()
            .unwrap()
            .by_uuid
            .get(&(class, *uuid))
            .cloned()
    }

    /// Flag a key as owned by an in-flight transaction, keeping whatever
    /// uuid and payload it already has.
    pub fn mark_key_as_in_transit(&self, class: RowClass, key: &str) {
        self.maps.lock().unwrap().mark_in_transit(class, key);
    }

    /// Settle an IN_TRANSIT key: entries with a confirmed payload revert to
    /// AVAILABLE; placeholder entries with none are erased.
    pub fn clear_in_transit(&self, class: RowClass, key: &str) {
        let mut maps = self.maps.lock().unwrap();
        let Some(data) = maps.oper.get_mut(&(class, key.to_string())) else {
            tracing::debug!(?class, key, "clearing transit on an unknown key");
            return;
        };
        if data.status != Status::InTransit {
            return;
        }
        if data.payload.is_some() {
            data.status = Status::Available;
            data.transit_since = None;
        } else {
            maps.remove_oper(class, key);
        }
    }

    /// Erase one oper-side entry, and its UUID index entry if bound.
    pub fn clear_device_oper_data(&self, class: RowClass, key: &str) {
        self.maps.lock().unwrap().remove_oper(class, key);
    }

    /// Bulk-erase a class, sparing entries owned by in-flight transactions.
    pub fn clear_class_oper_data(&self, class: RowClass) {
        let mut maps = self.maps.lock().unwrap();
        let removed: Vec<(String, Option<Uuid>)> = maps
            .oper
            .iter()
            .filter(|((c, _), data)| *c == class && data.status != Status::InTransit)
            .map(|((_, key), data)| (key.clone(), data.uuid))
            .collect();
        for (key, uuid) in removed {
            maps.oper.remove(&(class, key));
            if let Some(uuid) = uuid {
                maps.by_uuid.remove(&(class, uuid));
            }
        }
    }

    pub fn is_key_in_transit(&self, class: RowClass, key: &str) -> bool {
        self.maps
            .lock()
            .unwrap()
            .oper
            .get(&(class, key.to_string()))
            .is_some_and(|data| data.status == Status::InTransit)
    }

    /// Record the caller's intent for a key.
    pub fn update_config_data(&self, class: RowClass, key: &str, payload: Row) {
        self.maps.lock().unwrap().config.insert(
            (class, key.to_string()),
            DeviceData {
                key: key.to_string(),
                uuid: None,
                payload: Some(payload),
                status: Status::Available,
                transit_since: None,
            },
        );
    }

    pub fn get_config_data(&self, class: RowClass, key: &str) -> Option<DeviceData> {
        self.maps
            .lock()
            .unwrap()
            .config
            .get(&(class, key.to_string()))
            .cloned()
    }

    pub fn clear_config_data(&self, class: RowClass, key: &str) {
        self.maps.lock().unwrap().config.remove(&(class, key.to_string()));
    }

    /// Register `referrer` as keeping the termination point alive.
    pub fn inc_ref_count(&self, referrer: &str, tep: &str) {
        self.maps
            .lock()
            .unwrap()
            .tep_refs
            .entry(tep.to_string())
            .or_default()
            .insert(referrer.to_string());
    }

    /// Release `referrer`'s hold. Dropping the last reference marks the
    /// termination point IN_TRANSIT; the dec-and-check is serialized under
    /// the registry mutex, so concurrent last-releases transition it once.
    pub fn dec_ref_count(&self, referrer: &str, tep: &str) {
        self.maps.lock().unwrap().dec_ref(referrer, tep);
    }

    pub fn ref_count(&self, tep: &str) -> usize {
        self.maps
            .lock()
            .unwrap()
            .tep_refs
            .get(tep)
            .map_or(0, HashSet::len)
    }

    /// Register a remote unicast MAC row under its logical switch and take
    /// a reference on its locator.
    pub fn update_remote_ucast(&self, ls: &str, key: &str, row: Row, locator: &str) {
        self.update_remote_mac(RowClass::UcastMacsRemote, ls, key, row, &[locator.to_string()]);
    }

    /// Multicast analogue: the row references a whole locator set.
    pub fn update_remote_mcast(&self, ls: &str, key: &str, row: Row, locators: &[String]) {
        self.update_remote_mac(RowClass::McastMacsRemote, ls, key, row, locators);
    }

    fn update_remote_mac(
        &self,
        remote: RowClass,
        ls: &str,
        key: &str,
        row: Row,
        locators: &[String],
    ) {
        let mut maps = self.maps.lock().unwrap();
        let table = match remote {
            RowClass::UcastMacsRemote => &mut maps.ucasts,
            _ => &mut maps.mcasts,
        };
        let replaced = table.entry(ls.to_string()).or_default().insert(
            key.to_string(),
            MacEntry {
                row,
                locators: locators.to_vec(),
            },
        );
        // Replacement releases the previous locator references.
        if let Some(previous) = replaced {
            for locator in &previous.locators {
                maps.dec_ref(key, locator);
            }
        }
        for locator in locators {
            maps.tep_refs
                .entry(locator.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    pub fn get_remote_ucast(&self, ls: &str, key: &str) -> Option<Row> {
        self.get_remote_mac(RowClass::UcastMacsRemote, ls, key)
    }

    pub fn get_remote_mcast(&self, ls: &str, key: &str) -> Option<Row> {
        self.get_remote_mac(RowClass::McastMacsRemote, ls, key)
    }

    fn get_remote_mac(&self, remote: RowClass, ls: &str, key: &str) -> Option<Row> {
        let maps = self.maps.lock().unwrap();
        let table = match remote {
            RowClass::UcastMacsRemote => &maps.ucasts,
            _ => &maps.mcasts,
        };
        table
            .get(ls)
            .and_then(|rows| rows.get(key))
            .map(|entry| entry.row.clone())
    }

    /// Drop a remote unicast MAC row: releases its locator reference and
    /// marks the row IN_TRANSIT pending deletion on the device.
    pub fn remove_remote_ucast(&self, ls: &str, key: &str) {
        self.maps
            .lock()
            .unwrap()
            .remove_mac(RowClass::UcastMacsRemote, ls, key);
    }

    pub fn remove_remote_mcast(&self, ls: &str, key: &str) {
        self.maps
            .lock()
            .unwrap()
            .remove_mac(RowClass::McastMacsRemote, ls, key);
    }

    /// Tear down every MAC row under a logical switch through the
    /// individual remove path, then mark the switch itself IN_TRANSIT.
    pub fn clear_logical_switch_refs(&self, ls: &str) {
        let mut maps = self.maps.lock().unwrap();
        let ucast_keys: Vec<String> = maps
            .ucasts
            .get(ls)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default();
        for key in ucast_keys {
            maps.remove_mac(RowClass::UcastMacsRemote, ls, &key);
        }
        let mcast_keys: Vec<String> = maps
            .mcasts
            .get(ls)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default();
        for key in mcast_keys {
            maps.remove_mac(RowClass::McastMacsRemote, ls, &key);
        }
        maps.mark_in_transit(RowClass::LogicalSwitch, ls);
    }

    /// Data-arrival hook: replay config-side jobs whose dependencies are
    /// now present.
    pub fn on_config_data_available(self: &Arc<Self>) {
        self.queue.process_ready_jobs_from_config_queue(self);
    }

    /// Data-arrival hook: replay oper-side jobs whose dependencies are now
    /// present.
    pub fn on_oper_data_available(self: &Arc<Self>) {
        self.queue.process_ready_jobs_from_op_queue(self);
    }

    // A dependency is met when its entry exists and is not held by a live
    // in-flight transaction.
    pub(crate) fn dependencies_met(&self, job: &DependentJob) -> bool {
        let maps = self.maps.lock().unwrap();
        let settled = |data: Option<&DeviceData>| {
            data.is_some_and(|data| {
                data.status != Status::InTransit || data.is_in_transit_expired(self.expiry)
            })
        };
        job.config_dependencies()
            .iter()
            .all(|(class, key)| settled(maps.config.get(&(*class, key.clone()))))
            && job
                .oper_dependencies()
                .iter()
                .all(|(class, key)| settled(maps.oper.get(&(*class, key.clone()))))
    }

    /// Stop the dependency queue, dropping queued jobs unrun. Idempotent.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb::Atom;

    fn row(mac: &str) -> Row {
        let mut row = Row::new();
        row.insert("MAC", Atom::from(mac));
        row
    }

    #[tokio::test]
    async fn oper_update_binds_key_and_uuid() {
        let registry = DeviceInfo::new(DEFAULT_IN_TRANSIT_EXPIRY);
        let id = Uuid::new_v4();
        let payload = row("aa:bb:cc:dd:ee:01");

        registry.update_device_oper_data(RowClass::LogicalSwitch, "ls0", id, payload.clone());

        let data = registry
            .get_device_oper_data(RowClass::LogicalSwitch, "ls0")
            .unwrap();
        assert_eq!(data.status(), Status::Available);
        assert_eq!(data.uuid(), Some(id));
        assert_eq!(data.payload(), Some(&payload));
        assert_eq!(
            registry.get_device_oper_data_by_uuid(RowClass::LogicalSwitch, &id),
            Some(payload),
        );

        // Clearing the key clears the uuid index too.
        registry.clear_device_oper_data(RowClass::LogicalSwitch, "ls0");
        assert!(registry.get_device_oper_data(RowClass::LogicalSwitch, "ls0").is_none());
        assert!(registry
            .get_device_oper_data_by_uuid(RowClass::LogicalSwitch, &id)
            .is_none());
    }

    #[tokio::test]
    async fn transit_preserves_payload_and_settles() {
        let registry = DeviceInfo::new(DEFAULT_IN_TRANSIT_EXPIRY);
        let id = Uuid::new_v4();
        registry.update_device_oper_data(RowClass::PhysicalLocator, "10.0.0.1", id, row("x"));

        registry.mark_key_as_in_transit(RowClass::PhysicalLocator, "10.0.0.1");
        assert!(registry.is_key_in_transit(RowClass::PhysicalLocator, "10.0.0.1"));
        let data = registry
            .get_device_oper_data(RowClass::PhysicalLocator, "10.0.0.1")
            .unwrap();
        assert_eq!(data.uuid(), Some(id));
        assert!(data.payload().is_some());
        assert!(!data.is_in_transit_expired(DEFAULT_IN_TRANSIT_EXPIRY));

        // Settling with a payload reverts to AVAILABLE.
        registry.clear_in_transit(RowClass::PhysicalLocator, "10.0.0.1");
        assert_eq!(
            registry
                .get_device_oper_data(RowClass::PhysicalLocator, "10.0.0.1")
                .unwrap()
                .status(),
            Status::Available,
        );

        // A placeholder without payload is erased outright.
        registry.mark_key_as_in_transit(RowClass::Tunnel, "t0");
        registry.clear_in_transit(RowClass::Tunnel, "t0");
        assert!(registry.get_device_oper_data(RowClass::Tunnel, "t0").is_none());
    }

    #[tokio::test]
    async fn bulk_clear_spares_in_transit_entries() {
        let registry = DeviceInfo::new(DEFAULT_IN_TRANSIT_EXPIRY);
        registry.update_device_oper_data(RowClass::LogicalSwitch, "ls0", Uuid::new_v4(), row("a"));
        registry.update_device_oper_data(RowClass::LogicalSwitch, "ls1", Uuid::new_v4(), row("b"));
        registry.update_device_oper_data(RowClass::PhysicalPort, "p0", Uuid::new_v4(), row("c"));
        registry.mark_key_as_in_transit(RowClass::LogicalSwitch, "ls1");

        registry.clear_class_oper_data(RowClass::LogicalSwitch);

        assert!(registry.get_device_oper_data(RowClass::LogicalSwitch, "ls0").is_none());
        // The in-flight entry is owned by its transaction and survives.
        assert!(registry.is_key_in_transit(RowClass::LogicalSwitch, "ls1"));
        // Other classes are untouched.
        assert!(registry.get_device_oper_data(RowClass::PhysicalPort, "p0").is_some());
    }

    #[tokio::test]
    async fn last_reference_marks_termination_point_in_transit() {
        let registry = DeviceInfo::new(DEFAULT_IN_TRANSIT_EXPIRY);
        registry.inc_ref_count("u1", "tep-x");
        registry.inc_ref_count("u2", "tep-x");

        registry.dec_ref_count("u1", "tep-x");
        assert_eq!(registry.ref_count("tep-x"), 1);
        assert!(!registry.is_key_in_transit(RowClass::PhysicalLocator, "tep-x"));

        registry.dec_ref_count("u2", "tep-x");
        assert_eq!(registry.ref_count("tep-x"), 0);
        assert!(registry.is_key_in_transit(RowClass::PhysicalLocator, "tep-x"));
    }

    #[tokio::test]
    async fn concurrent_last_releases_transition_once() {
        let registry = DeviceInfo::new(DEFAULT_IN_TRANSIT_EXPIRY);
        for i in 0..64 {
            registry.inc_ref_count(&format!("u{i}"), "tep-x");
        }

        std::thread::scope(|scope| {
            for i in 0..64 {
                let registry = &registry;
                scope.spawn(move || registry.dec_ref_count(&format!("u{i}"), "tep-x"));
            }
        });

        assert_eq!(registry.ref_count("tep-x"), 0);
        assert!(registry.is_key_in_transit(RowClass::PhysicalLocator, "tep-x"));
    }

    #[tokio::test]
    async fn remote_macs_maintain_locator_references() {
        let registry = DeviceInfo::new(DEFAULT_IN_TRANSIT_EXPIRY);

        registry.update_remote_ucast("ls0", "mac1", row("aa:bb:cc:dd:ee:01"), "tep-a");
        registry.update_remote_ucast("ls0", "mac2", row("aa:bb:cc:dd:ee:02"), "tep-a");
        registry.update_remote_mcast(
            "ls0",
            "mcast1",
            row("ff:ff:ff:ff:ff:ff"),
            &["tep-a".to_string(), "tep-b".to_string()],
        );
        assert_eq!(registry.ref_count("tep-a"), 3);
        assert_eq!(registry.ref_count("tep-b"), 1);
        assert!(registry.get_remote_ucast("ls0", "mac1").is_some());

        registry.remove_remote_ucast("ls0", "mac1");
        assert_eq!(registry.ref_count("tep-a"), 2);
        assert!(registry.get_remote_ucast("ls0", "mac1").is_none());
        assert!(registry.is_key_in_transit(RowClass::UcastMacsRemote, "mac1"));

        // Dropping the whole switch removes the rest and releases tep-b,
        // which transitions for deletion.
        registry.clear_logical_switch_refs("ls0");
        assert!(registry.get_remote_ucast("ls0", "mac2").is_none());
        assert!(registry.get_remote_mcast("ls0", "mcast1").is_none());
        assert_eq!(registry.ref_count("tep-b"), 0);
        assert!(registry.is_key_in_transit(RowClass::PhysicalLocator, "tep-b"));
        assert!(registry.is_key_in_transit(RowClass::LogicalSwitch, "ls0"));
    }

    #[tokio::test]
    async fn missing_keys_are_answered_without_raising() {
        let registry = DeviceInfo::new(DEFAULT_IN_TRANSIT_EXPIRY);
        assert!(registry.get_device_oper_data(RowClass::Acl, "none").is_none());
        assert!(!registry.is_key_in_transit(RowClass::Acl, "none"));
        registry.clear_device_oper_data(RowClass::Acl, "none");
        registry.clear_in_transit(RowClass::Acl, "none");
        registry.dec_ref_count("nobody", "no-tep");
        registry.remove_remote_ucast("no-ls", "no-mac");
    }
}
