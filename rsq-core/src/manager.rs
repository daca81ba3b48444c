use crate::{
    Connection, ConnectionKind, ConnectionSettings, Driver, Endpoint, QueryEvent, Value,
    application, uuid,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds a released reservation stays claimable before its worker is
/// eligible for retirement.
pub const DEFAULT_EXPIRY: u64 = 10;

/// Back-off applied while waiting for a worker to free up or finish.
const RESERVE_BACKOFF: Duration = Duration::from_millis(30);

/// A caller's claim on a worker: the uuid it is addressed by, its expiry
/// deadline (0 = reserved indefinitely) and the receiver wired to the
/// worker's EXECUTED signal.
pub struct ConnectionRecord {
    pub uuid: String,
    pub expiry: u64,
    pub receiver: Option<Weak<Endpoint>>,
}

/// Lifecycle controller for the workers of one database endpoint:
/// reserves, re-uses, retires and disconnects them under a configured
/// maximum. The manager is not a thread itself; it runs on whichever
/// thread calls into it and relies on that thread's event pump for
/// retirement notifications.
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
}

pub(crate) struct ManagerShared {
    weak: Weak<ManagerShared>,
    kind: ConnectionKind,
    max_connections: u32,
    /// Never connects; used only as a factory for fresh workers.
    template: Mutex<Box<dyn Driver>>,
    state: Mutex<ManagerState>,
    /// EXECUTED receiver of retiring workers and watcher for blocking
    /// calls. Homed on the thread that created the manager.
    node: Arc<Endpoint>,
    /// Correlation uids the node has seen, consumed by blocking calls.
    delivered: Mutex<Vec<Value>>,
}

#[derive(Default)]
struct ManagerState {
    active: Vec<ActiveEntry>,
    retiring: HashMap<String, Connection>,
}

struct ActiveEntry {
    worker: Connection,
    record: ConnectionRecord,
}

impl ConnectionManager {
    pub fn new(template: Box<dyn Driver>, settings: &ConnectionSettings) -> ConnectionManager {
        let kind = settings.connection_kind();
        let max_connections = settings.get("max_connections").as_u32().max(1);
        let shared = Arc::new_cyclic(|weak: &Weak<ManagerShared>| {
            let handler_weak = weak.clone();
            let node = Endpoint::with_handler(move |_, args| {
                if let Some(shared) = handler_weak.upgrade() {
                    shared.executed(args);
                }
            });
            ManagerShared {
                weak: weak.clone(),
                kind,
                max_connections,
                template: Mutex::new(template),
                state: Mutex::new(ManagerState::default()),
                node,
                delivered: Mutex::new(Vec::new()),
            }
        });
        ConnectionManager { shared }
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.shared.kind
    }

    pub fn max_connections(&self) -> u32 {
        self.shared.max_connections
    }

    /// Claims a worker and returns the reservation uuid. With
    /// `expiry_seconds == 0` the claim is held until the manager goes
    /// away; otherwise the worker becomes retirement-eligible once
    /// released. A given receiver is subscribed to the worker's EXECUTED
    /// signal. Blocks (pumping events) while the pool is saturated.
    pub fn reserve(&self, expiry_seconds: u64, receiver: Option<&Arc<Endpoint>>) -> String {
        self.shared.reserve(expiry_seconds, receiver)
    }

    /// Gives the reservation up. The worker survives for another
    /// [`DEFAULT_EXPIRY`] seconds' worth of claims before retirement.
    pub fn release(&self, uuid: &str) {
        let mut state = self.shared.state.lock();
        match state.active.iter_mut().find(|entry| entry.record.uuid == uuid) {
            Some(entry) => entry.record.expiry = unix_now() + DEFAULT_EXPIRY,
            None => log::warn!("Released an unknown reservation `{uuid}`"),
        }
    }

    /// Forwards a command to the reserved worker. With `blocking` the
    /// calling thread pumps events until the EXECUTED item carrying
    /// `uid` has been delivered.
    pub fn call(
        &self,
        uuid: &str,
        uid: Value,
        event: QueryEvent,
        arguments: Vec<Value>,
        blocking: bool,
    ) {
        {
            let state = self.shared.state.lock();
            let Some(entry) = state.active.iter().find(|entry| entry.record.uuid == uuid) else {
                log::warn!("Call on an unknown reservation `{uuid}`");
                return;
            };
            if blocking {
                // A stale marker from an earlier call must not satisfy
                // this wait
                self.shared.delivered.lock().retain(|seen| *seen != uid);
                entry.worker.connect_receiver(&self.shared.node);
            }
            entry.worker.call(uid.clone(), event, arguments);
        }
        if blocking {
            loop {
                application::process_events();
                {
                    let mut delivered = self.shared.delivered.lock();
                    if let Some(index) = delivered.iter().position(|seen| *seen == uid) {
                        delivered.remove(index);
                        break;
                    }
                }
                thread::sleep(RESERVE_BACKOFF);
            }
            let state = self.shared.state.lock();
            if let Some(entry) = state.active.iter().find(|entry| entry.record.uuid == uuid) {
                entry.worker.disconnect_receiver(&self.shared.node);
            }
        }
    }

    /// Aborts whatever the reserved worker is running by reserving a
    /// secondary worker and sending the kill through it. The secondary
    /// is released immediately; its expiry reaps it.
    pub fn kill_query(&self, uuid: &str) {
        let receiver = {
            let state = self.shared.state.lock();
            let Some(entry) = state.active.iter().find(|entry| entry.record.uuid == uuid) else {
                log::warn!("Kill on an unknown reservation `{uuid}`");
                return;
            };
            entry.record.receiver.clone()
        };
        let receiver = receiver.and_then(|weak| weak.upgrade());
        let secondary = self.reserve(DEFAULT_EXPIRY, receiver.as_ref());
        self.call(
            &secondary,
            Value::Null,
            QueryEvent::KillQuery,
            vec![Value::from(uuid)],
            false,
        );
        self.release(&secondary);
    }
}

impl ManagerShared {
    fn reserve(&self, expiry_seconds: u64, receiver: Option<&Arc<Endpoint>>) -> String {
        let deadline = if expiry_seconds > 0 {
            unix_now() + expiry_seconds
        } else {
            0
        };
        loop {
            {
                let mut state = self.state.lock();
                let now = unix_now();
                let mut count = 0u32;
                let mut chosen = None;
                let mut index = 0;
                while index < state.active.len() {
                    let entry = &state.active[index];
                    if entry.record.expiry == 0 {
                        // Reserved indefinitely; never reassigned
                        index += 1;
                        continue;
                    }
                    count += 1;
                    if chosen.is_none() && entry.worker.is_stopping() && !entry.worker.is_busy() {
                        // Re-use this one. Cut the old receiver off first
                        // so it stops getting signals, and roll back any
                        // half-open state.
                        entry.worker.disconnect_receivers();
                        entry
                            .worker
                            .call(Value::Null, QueryEvent::CleanState, Vec::new());
                        chosen = Some(index);
                        break;
                    } else if entry.record.expiry > now && !entry.worker.is_busy() {
                        // Freshly released and idle: retire it. The
                        // manager takes over the EXECUTED signal so it
                        // learns when the disconnect went through.
                        // (See DESIGN.md on this predicate.)
                        entry.worker.disconnect_receivers();
                        entry.worker.connect_receiver(&self.node);
                        entry.worker.call(
                            Value::from(entry.record.uuid.clone()),
                            QueryEvent::Disconnect,
                            Vec::new(),
                        );
                        let entry = state.active.remove(index);
                        log::debug!("Retiring worker `{}`", entry.record.uuid);
                        state.retiring.insert(entry.record.uuid.clone(), entry.worker);
                        continue;
                    }
                    index += 1;
                }
                if let Some(index) = chosen {
                    return self.assign(&mut state.active[index], deadline, receiver);
                }
                if count < self.max_connections {
                    let driver = self.template.lock().clone_driver();
                    let mut worker = Connection::with_manager(driver, self.weak.clone());
                    worker.start();
                    let mut entry = ActiveEntry {
                        worker,
                        record: ConnectionRecord {
                            uuid: String::new(),
                            expiry: 0,
                            receiver: None,
                        },
                    };
                    let uuid = self.assign(&mut entry, deadline, receiver);
                    state.active.push(entry);
                    return uuid;
                }
            }
            // Saturated: let pending notifications land, then retry
            application::process_events();
            thread::sleep(RESERVE_BACKOFF);
        }
    }

    fn assign(
        &self,
        entry: &mut ActiveEntry,
        deadline: u64,
        receiver: Option<&Arc<Endpoint>>,
    ) -> String {
        entry.record = ConnectionRecord {
            uuid: uuid::make_uuid(),
            expiry: deadline,
            receiver: receiver.map(Arc::downgrade),
        };
        if let Some(receiver) = receiver {
            entry.worker.connect_receiver(receiver);
        }
        entry.record.uuid.clone()
    }

    /// Server-side session id behind an active reservation, used by
    /// workers resolving a KillQuery victim.
    pub(crate) fn session_id_for(&self, uuid: &str) -> Option<u64> {
        self.state
            .lock()
            .active
            .iter()
            .find(|entry| entry.record.uuid == uuid)
            .map(|entry| entry.worker.session_id())
    }

    /// EXECUTED handler of the manager node. A payload whose head names
    /// a retiring worker is that worker's disconnect notification; the
    /// worker is stopped, joined and freed. Anything else is a delivery
    /// watched by a blocking call.
    fn executed(&self, args: &[Value]) {
        let Some(head) = args.first() else {
            return;
        };
        let worker = self.state.lock().retiring.remove(&head.as_string());
        match worker {
            Some(mut worker) => {
                worker.stop(false);
                while !worker.is_finished() {
                    application::process_events();
                    thread::sleep(RESERVE_BACKOFF);
                }
                worker.join();
                log::debug!("Retired worker `{}` joined", head.as_string());
            }
            None => self.delivered.lock().push(head.clone()),
        }
    }

    /// Asks every worker to stop, then joins and frees each one as it
    /// winds down. Retiring workers whose notification never landed are
    /// collected too.
    fn shutdown(&self) {
        loop {
            let workers = {
                let mut state = self.state.lock();
                std::mem::take(&mut state.active)
            };
            if workers.is_empty() {
                break;
            }
            let mut remaining = Vec::new();
            let mut waiting = false;
            for mut entry in workers {
                if entry.worker.is_stopping() {
                    entry.worker.join();
                } else {
                    entry.worker.stop(false);
                    waiting = true;
                    remaining.push(entry);
                }
            }
            {
                self.state.lock().active = remaining;
            }
            if !waiting {
                break;
            }
        }
        let retiring = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.retiring)
        };
        for (_, mut worker) in retiring {
            worker.stop(true);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
