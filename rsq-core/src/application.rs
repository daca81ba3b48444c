//! Process-wide application handle: the per-thread endpoint roster and
//! its pump, plus a cross-thread message channel for notifications that
//! do not belong to any endpoint.
//!
//! Every [`Endpoint`] registers with the roster of the thread that
//! created it. [`process_events`] only ever touches the calling thread's
//! roster, so no lock is needed around it; the mailboxes themselves are
//! individually locked.

use crate::{Endpoint, Message, MessageKind, Value};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Weak};

thread_local! {
    static ROSTER: RefCell<Vec<Weak<Endpoint>>> = const { RefCell::new(Vec::new()) };
}

static MESSAGES: LazyLock<Mutex<VecDeque<Message>>> =
    LazyLock::new(|| Mutex::new(VecDeque::new()));

pub(crate) fn register_object(object: &Arc<Endpoint>) {
    ROSTER.with(|roster| roster.borrow_mut().push(Arc::downgrade(object)));
}

/// Pumps the mailbox of every endpoint homed on the calling thread.
/// Endpoints that report themselves finished are dropped from the
/// roster; because that mutates the roster, the sweep restarts until a
/// pass completes without teardown.
pub fn process_events() {
    loop {
        let objects: Vec<Arc<Endpoint>> = ROSTER.with(|roster| {
            roster
                .borrow()
                .iter()
                .filter_map(Weak::upgrade)
                .collect()
        });
        if objects.is_empty() {
            return;
        }
        let mut finished_any = false;
        for object in &objects {
            if object.process_mailbox() {
                finished_any = true;
            }
        }
        ROSTER.with(|roster| {
            roster
                .borrow_mut()
                .retain(|weak| weak.upgrade().is_some_and(|object| !object.is_finished()))
        });
        if !finished_any {
            return;
        }
    }
}

/// Posts a message to the process-wide channel. Callable from any
/// thread.
pub fn post_message(kind: MessageKind, label: impl Into<String>, data: impl Into<Value>) {
    MESSAGES.lock().push_back(Message {
        kind,
        label: label.into(),
        data: data.into(),
    });
}

pub fn has_message() -> bool {
    !MESSAGES.lock().is_empty()
}

/// Oldest pending message, if any.
pub fn next_message() -> Option<Message> {
    MESSAGES.lock().pop_front()
}

/// Drops the calling thread's roster and any pending messages. Endpoints
/// stay alive through their owners; they merely stop being pumped here.
pub fn shutdown() {
    ROSTER.with(|roster| roster.borrow_mut().clear());
    MESSAGES.lock().clear();
}
