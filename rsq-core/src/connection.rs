use crate::manager::ManagerShared;
use crate::{
    Driver, EXECUTED, Endpoint, QueryCommand, QueryError, QueryEvent, QueryResult, StopToken,
    Value, WorkerThread,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// How long the worker sleeps when its queue is empty.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// One database session bound to one worker thread. Commands enqueue
/// from any thread through [`Connection::call`] and execute serially in
/// FIFO order; each outcome is emitted through the EXECUTED signal to
/// whatever receivers are subscribed at that moment.
pub struct Connection {
    shared: Arc<ConnectionShared>,
    thread: WorkerThread,
}

struct ConnectionShared {
    queue: Mutex<CommandQueue>,
    emitter: Arc<Endpoint>,
    /// Server-side session id, published by the worker thread after a
    /// successful connect. Read by sibling workers executing KillQuery.
    session_id: AtomicU64,
}

#[derive(Default)]
struct CommandQueue {
    commands: VecDeque<QueryCommand>,
    busy: bool,
}

impl Connection {
    /// A standalone worker with no manager; KillQuery commands cannot
    /// resolve their victim and report an error instead.
    pub fn new(driver: Box<dyn Driver>) -> Connection {
        Self::with_manager(driver, Weak::new())
    }

    pub(crate) fn with_manager(driver: Box<dyn Driver>, manager: Weak<ManagerShared>) -> Connection {
        let shared = Arc::new(ConnectionShared {
            queue: Mutex::new(CommandQueue::default()),
            emitter: Endpoint::new(),
            session_id: AtomicU64::new(0),
        });
        let routine_shared = shared.clone();
        let thread = WorkerThread::new(move |token| {
            run(driver, routine_shared, manager, token);
        });
        Connection { shared, thread }
    }

    pub fn start(&mut self) {
        self.thread.start();
    }

    pub fn stop(&mut self, block: bool) {
        self.thread.stop(block);
    }

    pub fn join(&mut self) {
        self.thread.join();
    }

    pub fn is_stopping(&self) -> bool {
        self.thread.is_stopping()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// True while a command is executing or queued. Raised by `call`
    /// before the command is even dequeued, so a manager scanning for a
    /// free worker sees this one as taken immediately.
    pub fn is_busy(&self) -> bool {
        let queue = self.shared.queue.lock();
        queue.busy || !queue.commands.is_empty()
    }

    pub fn session_id(&self) -> u64 {
        self.shared.session_id.load(Ordering::Acquire)
    }

    /// Enqueues a command. `uid` is opaque to the worker and echoed back
    /// verbatim in the EXECUTED payload; an empty argument list is
    /// normalised so that the first argument is always addressable.
    pub fn call(&self, uid: Value, event: QueryEvent, mut arguments: Vec<Value>) {
        if arguments.is_empty() {
            arguments.push(Value::Null);
        }
        let mut queue = self.shared.queue.lock();
        queue.busy = true;
        queue.commands.push_back(QueryCommand {
            uid,
            event,
            arguments,
        });
    }

    /// Subscribes `receiver` to this worker's EXECUTED signal.
    pub fn connect_receiver(&self, receiver: &Arc<Endpoint>) {
        self.shared.emitter.connect(EXECUTED, receiver);
    }

    pub fn disconnect_receiver(&self, receiver: &Arc<Endpoint>) {
        self.shared.emitter.disconnect(Some(EXECUTED), Some(receiver));
    }

    /// Drops every EXECUTED subscription, cutting a stale receiver off
    /// before the worker is recycled or retired.
    pub fn disconnect_receivers(&self) {
        self.shared.emitter.disconnect(Some(EXECUTED), None);
    }
}

impl ConnectionShared {
    fn emit_result(&self, uid: Value, event: QueryEvent, result: QueryResult) {
        self.emitter
            .emit(EXECUTED, vec![uid, event.into(), result.into()]);
    }
}

/// The worker routine: connect once, then drain the command queue until
/// the stop flag is raised. Driver failures never end the loop; they
/// travel inside the emitted result.
fn run(
    mut driver: Box<dyn Driver>,
    shared: Arc<ConnectionShared>,
    manager: Weak<ManagerShared>,
    token: StopToken,
) {
    let connected = driver.connect();
    if connected.error.is_error {
        log::error!("Worker connect failed: {}", connected.error.message);
        shared.emit_result(Value::Null, QueryEvent::NoEvent, connected);
        driver.disconnect();
        return;
    }
    shared
        .session_id
        .store(driver.session_id(), Ordering::Release);
    log::debug!("Worker connected (session {})", driver.session_id());

    while !token.is_stopping() {
        let command = {
            let mut queue = shared.queue.lock();
            match queue.commands.pop_front() {
                Some(command) => {
                    queue.busy = true;
                    command
                }
                None => {
                    queue.busy = false;
                    QueryCommand::default()
                }
            }
        };
        match command.event {
            QueryEvent::NoEvent => thread::sleep(IDLE_WAIT),
            QueryEvent::TestConnection => {
                if !connected.error.is_error {
                    shared.emit_result(command.uid, command.event, connected.clone());
                }
            }
            QueryEvent::ListDatabases => {
                let filter = command.arguments[0].as_string_list();
                let result = driver.list_databases(&filter);
                shared.emit_result(command.uid, command.event, result);
            }
            QueryEvent::ListTables => {
                let result = driver.list_tables(&command.arguments[0].as_string());
                shared.emit_result(command.uid, command.event, result);
            }
            QueryEvent::ExecuteQuery => {
                let result = driver.execute(&command.arguments);
                shared.emit_result(command.uid, command.event, result);
            }
            QueryEvent::SelectDatabase => {
                let result = driver.select_database(&command.arguments[0].as_string());
                shared.emit_result(command.uid, command.event, result);
            }
            QueryEvent::KillQuery => {
                let target = command.arguments[0].as_string();
                let victim = manager
                    .upgrade()
                    .and_then(|manager| manager.session_id_for(&target));
                let result = match victim {
                    Some(session_id) => driver.kill_session(session_id),
                    None => QueryResult::failure(QueryError::new(
                        Value::Null,
                        format!("No reserved connection matches `{target}`"),
                    )),
                };
                shared.emit_result(command.uid, command.event, result);
            }
            QueryEvent::CleanState => {
                // Rollback-on-recycle hook; nothing to undo yet.
            }
            QueryEvent::Disconnect => {
                driver.disconnect();
                shared.emit_result(command.uid, command.event, connected.clone());
            }
        }
    }

    log::debug!("Worker loop finished");
    driver.disconnect();
}
