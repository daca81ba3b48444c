use ::uuid::Builder;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::sync::LazyLock;

thread_local! {
    static GENERATOR: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

static SHARED_GENERATOR: LazyLock<Mutex<SmallRng>> =
    LazyLock::new(|| Mutex::new(SmallRng::from_os_rng()));

/// A fresh version-4 uuid as a 36-character hyphenated string, drawn
/// from the calling thread's generator (no locking).
pub fn make_uuid() -> String {
    GENERATOR.with(|generator| format_uuid(generator.borrow_mut().random()))
}

/// Like [`make_uuid`] but drawing from one mutex-guarded process-wide
/// generator, for callers that want draws serialised across threads.
pub fn make_uuid_thread_safe() -> String {
    let mut generator = SHARED_GENERATOR.lock();
    format_uuid(generator.random())
}

fn format_uuid(bytes: [u8; 16]) -> String {
    // Builder stamps the version and variant nibbles per RFC 4122
    Builder::from_random_bytes(bytes).into_uuid().to_string()
}
