use crate::{Value, application};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

pub type SignalId = u32;

/// Signal id used by connection workers to deliver command results to
/// their subscribed receivers.
pub const EXECUTED: SignalId = 1;

/// Mailbox sentinel scheduling the endpoint for teardown on its next
/// pump.
pub(crate) const DELETE_LATER: SignalId = 0;

/// Per-endpoint handler invoked by the mailbox pump, always on the
/// endpoint's home thread.
pub type SignalHandler = Box<dyn FnMut(SignalId, &[Value]) + Send>;

/// A thread-affine event endpoint. Every endpoint is pinned to the
/// thread that created it: any thread may `emit` towards it, but only
/// the home thread may drain its mailbox. Subscriptions are weak, so an
/// emission towards a dropped receiver is discarded silently rather than
/// delivered to freed state.
pub struct Endpoint {
    home: ThreadId,
    state: Mutex<EndpointState>,
    handler: Mutex<Option<SignalHandler>>,
    /// Guards against re-entrant pumping when a handler spins the event
    /// pump itself; the outer pump finishes the drain.
    pumping: AtomicBool,
    finished: AtomicBool,
}

#[derive(Default)]
struct EndpointState {
    mailbox: VecDeque<(SignalId, Vec<Value>)>,
    subscriptions: Vec<(SignalId, Weak<Endpoint>)>,
    parent: Weak<Endpoint>,
    children: Vec<Arc<Endpoint>>,
    arbitrary: BTreeMap<String, Value>,
}

impl Endpoint {
    /// A pure emitter: no handler, mailbox items are drained and dropped.
    pub fn new() -> Arc<Endpoint> {
        Self::build(None)
    }

    /// An endpoint whose mailbox items are dispatched to `handler` by the
    /// pump.
    pub fn with_handler(handler: impl FnMut(SignalId, &[Value]) + Send + 'static) -> Arc<Endpoint> {
        Self::build(Some(Box::new(handler)))
    }

    fn build(handler: Option<SignalHandler>) -> Arc<Endpoint> {
        let endpoint = Arc::new(Endpoint {
            home: thread::current().id(),
            state: Mutex::new(EndpointState::default()),
            handler: Mutex::new(handler),
            pumping: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });
        application::register_object(&endpoint);
        endpoint
    }

    pub fn home_thread(&self) -> ThreadId {
        self.home
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Subscribes `receiver` to `id`. One receiver may appear under many
    /// ids and many times under one id; nothing is deduplicated.
    pub fn connect(&self, id: SignalId, receiver: &Arc<Endpoint>) {
        self.state
            .lock()
            .subscriptions
            .push((id, Arc::downgrade(receiver)));
    }

    /// Removes subscriptions matching the given axes. With both `None`
    /// every subscription on this emitter is dropped.
    pub fn disconnect(&self, id: Option<SignalId>, receiver: Option<&Arc<Endpoint>>) {
        let target = receiver.map(Arc::downgrade);
        self.state.lock().subscriptions.retain(|(signal, weak)| {
            let id_matches = id.is_none_or(|id| *signal == id);
            let receiver_matches = target
                .as_ref()
                .is_none_or(|target| Weak::ptr_eq(weak, target));
            !(id_matches && receiver_matches)
        });
    }

    /// Appends `(id, args)` to the mailbox of every live subscriber of
    /// `id`. Never blocks a receiver and never runs receiver code.
    pub fn emit(&self, id: SignalId, args: Vec<Value>) {
        let receivers: Vec<Arc<Endpoint>> = {
            let state = self.state.lock();
            state
                .subscriptions
                .iter()
                .filter(|(signal, _)| *signal == id)
                .filter_map(|(_, weak)| weak.upgrade())
                .collect()
        };
        for receiver in receivers {
            receiver.push_mail(id, args.clone());
        }
    }

    fn push_mail(&self, id: SignalId, args: Vec<Value>) {
        if self.is_finished() {
            return;
        }
        self.state.lock().mailbox.push_back((id, args));
    }

    /// Schedules this endpoint for teardown: the next pump stops at the
    /// sentinel and reports the endpoint finished.
    pub fn delete_later(&self) {
        self.state
            .lock()
            .mailbox
            .push_back((DELETE_LATER, Vec::new()));
    }

    /// Drains the mailbox in FIFO order, dispatching each item to the
    /// handler. Must run on the home thread. Returns true once the
    /// endpoint is finished and should be dropped from the roster.
    pub fn process_mailbox(&self) -> bool {
        assert_eq!(
            thread::current().id(),
            self.home,
            "process_mailbox called off the endpoint's home thread"
        );
        if self.is_finished() {
            return true;
        }
        if self.pumping.swap(true, Ordering::Acquire) {
            // Re-entered from a handler; the outer drain picks the rest up
            return false;
        }
        let mut finished = false;
        loop {
            let item = self.state.lock().mailbox.pop_front();
            let Some((id, args)) = item else {
                break;
            };
            if id == DELETE_LATER {
                finished = true;
                break;
            }
            if let Some(handler) = self.handler.lock().as_mut() {
                handler(id, &args);
            }
        }
        if finished {
            self.finish();
        }
        self.pumping.store(false, Ordering::Release);
        finished
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        let mut state = self.state.lock();
        state.mailbox.clear();
        state.subscriptions.clear();
        // Children go down with the endpoint, depth-first through their
        // own teardown
        state.children.clear();
        drop(state);
        *self.handler.lock() = None;
    }

    /// Re-homes this endpoint under `parent`; ownership of the endpoint
    /// moves with it (children are kept alive by their parent).
    pub fn set_parent(self: &Arc<Self>, parent: &Arc<Endpoint>) {
        if Arc::ptr_eq(self, parent) {
            return;
        }
        let previous = {
            let mut state = self.state.lock();
            let previous = state.parent.upgrade();
            state.parent = Arc::downgrade(parent);
            previous
        };
        if let Some(previous) = previous {
            if Arc::ptr_eq(&previous, parent) {
                return;
            }
            previous.remove_child(self);
        }
        parent.state.lock().children.push(self.clone());
    }

    pub fn parent(&self) -> Option<Arc<Endpoint>> {
        self.state.lock().parent.upgrade()
    }

    pub fn children(&self) -> Vec<Arc<Endpoint>> {
        self.state.lock().children.clone()
    }

    fn remove_child(&self, child: &Arc<Endpoint>) {
        self.state
            .lock()
            .children
            .retain(|candidate| !Arc::ptr_eq(candidate, child));
    }

    /// Detaches `child` without tearing it down; the caller keeps it
    /// alive through its own reference.
    pub fn release_child(&self, child: &Arc<Endpoint>) {
        self.remove_child(child);
        child.state.lock().parent = Weak::new();
    }

    pub fn set_arbitrary_data(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state
            .lock()
            .arbitrary
            .insert(key.into(), value.into());
    }

    pub fn arbitrary_data(&self, key: &str) -> Value {
        self.state
            .lock()
            .arbitrary
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }
}
