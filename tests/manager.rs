#[cfg(test)]
mod tests {
    use rsq::{
        Connection, ConnectionManager, ConnectionSettings, Driver, Endpoint, QueryError,
        QueryEvent, QueryResult, SignalId, Value, WorkerThread, application,
    };
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    /// The worker-thread counter is process-global, so the tests that
    /// assert on it must not overlap.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> std::sync::MutexGuard<'static, ()> {
        let _ = env_logger::builder().is_test(true).try_init();
        SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// In-memory driver: connects instantly, answers list/execute calls
    /// from canned data and records lifecycle traffic for assertions.
    #[derive(Default)]
    struct StubState {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        kills: Mutex<Vec<u64>>,
        next_session: AtomicU64,
    }

    struct StubDriver {
        state: Arc<StubState>,
        fail_connect: bool,
        execute_delay: Duration,
        session_id: u64,
    }

    impl StubDriver {
        fn new(state: &Arc<StubState>) -> StubDriver {
            StubDriver {
                state: state.clone(),
                fail_connect: false,
                execute_delay: Duration::ZERO,
                session_id: 0,
            }
        }

        fn ok() -> QueryResult {
            QueryResult {
                valid: true,
                ..QueryResult::default()
            }
        }
    }

    impl Driver for StubDriver {
        fn connect(&mut self) -> QueryResult {
            if self.fail_connect {
                return QueryResult::failure(QueryError::new(
                    Value::from(2003_u32),
                    "HY000: cannot reach the stub",
                ));
            }
            if self.session_id == 0 {
                self.session_id = self.state.next_session.fetch_add(1, Ordering::SeqCst) + 1;
            }
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            Self::ok()
        }

        fn disconnect(&mut self) {
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn execute(&mut self, arguments: &[Value]) -> QueryResult {
            if !self.execute_delay.is_zero() {
                thread::sleep(self.execute_delay);
            }
            let mut result = Self::ok();
            result.rows = vec![arguments.to_vec()];
            result.rows_count = 1;
            result
        }

        fn list_databases(&mut self, filter: &[String]) -> QueryResult {
            let mut result = Self::ok();
            result.columns = vec!["Database".to_string()];
            result.rows = filter
                .iter()
                .map(|name| vec![Value::from(name.as_str())])
                .collect();
            result.rows_count = result.rows.len() as i32;
            result
        }

        fn list_tables(&mut self, database: &str) -> QueryResult {
            let mut result = Self::ok();
            result.rows = vec![vec![Value::from(format!("{database}.widgets"))]];
            result.rows_count = 1;
            result
        }

        fn select_database(&mut self, _database: &str) -> QueryResult {
            Self::ok()
        }

        fn kill_session(&mut self, session_id: u64) -> QueryResult {
            self.state.kills.lock().unwrap().push(session_id);
            Self::ok()
        }

        fn session_id(&self) -> u64 {
            self.session_id
        }

        fn clone_driver(&self) -> Box<dyn Driver> {
            Box::new(StubDriver {
                state: self.state.clone(),
                fail_connect: self.fail_connect,
                execute_delay: self.execute_delay,
                session_id: 0,
            })
        }
    }

    fn stub_settings(max_connections: u32) -> ConnectionSettings {
        let settings = ConnectionSettings::new();
        settings.set("hostname", "localhost");
        settings.set("username", "test");
        settings.set("max_connections", max_connections);
        settings
    }

    fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            application::process_events();
            thread::sleep(Duration::from_millis(10));
        }
    }

    type Seen = Arc<Mutex<Vec<(SignalId, Vec<Value>)>>>;

    fn recorder() -> (Arc<Endpoint>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let receiver = Endpoint::with_handler(move |id, args| {
            sink.lock().unwrap().push((id, args.to_vec()));
        });
        (receiver, seen)
    }

    #[test]
    fn reserve_release_shutdown() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(5),
        );

        let uuid = manager.reserve(0, None);
        assert_eq!(uuid.len(), 36);
        wait_for("the worker thread to start", || {
            WorkerThread::active_count() == 1
        });

        manager.release(&uuid);
        drop(manager);
        assert_eq!(WorkerThread::active_count(), 0);
        assert!(state.disconnects.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn implicit_shutdown() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(5),
        );

        manager.reserve(0, None);
        wait_for("the worker thread to start", || {
            WorkerThread::active_count() == 1
        });

        // No release: dropping the manager alone must wind everything
        // down
        drop(manager);
        assert_eq!(WorkerThread::active_count(), 0);
    }

    #[test]
    fn zero_max_connections_is_promoted_to_one() {
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(0),
        );
        assert_eq!(manager.max_connections(), 1);
    }

    #[test]
    fn list_databases_with_filter() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(5),
        );
        let (receiver, seen) = recorder();

        let uuid = manager.reserve(0, Some(&receiver));
        manager.call(
            &uuid,
            Value::from("uid"),
            QueryEvent::ListDatabases,
            vec![Value::from(vec!["test".to_string()])],
            false,
        );
        wait_for("the result delivery", || !seen.lock().unwrap().is_empty());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (_, args) = &seen[0];
        assert_eq!(args[0], Value::from("uid"));
        assert_eq!(QueryEvent::from_value(&args[1]), QueryEvent::ListDatabases);
        let result = args[2].as_query_result();
        assert!(!result.error.is_error);
        assert_eq!(result.rows, vec![vec![Value::from("test")]]);
        drop(seen);
        drop(manager);
    }

    #[test]
    fn blocking_call_pumps_until_delivery() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(5),
        );
        let (receiver, seen) = recorder();

        let uuid = manager.reserve(0, Some(&receiver));
        manager.call(
            &uuid,
            Value::from(7_i32),
            QueryEvent::ExecuteQuery,
            vec![Value::from("SELECT 1")],
            true,
        );
        // Delivery happened inside the blocking pump
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1[0], Value::from(7_i32));
        assert_eq!(
            QueryEvent::from_value(&seen[0].1[1]),
            QueryEvent::ExecuteQuery
        );
        drop(seen);
        drop(manager);
    }

    #[test]
    fn commands_execute_in_fifo_order() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(5),
        );
        let (receiver, seen) = recorder();

        let uuid = manager.reserve(0, Some(&receiver));
        for index in 0..5_i32 {
            manager.call(
                &uuid,
                Value::from(index),
                QueryEvent::ExecuteQuery,
                vec![Value::from("SELECT 1")],
                false,
            );
        }
        wait_for("all five deliveries", || seen.lock().unwrap().len() == 5);
        let order: Vec<i32> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, args)| args[0].as_i32())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        drop(manager);
    }

    #[test]
    fn released_worker_is_retired_by_the_next_reserve() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(5),
        );

        let first = manager.reserve(60, None);
        wait_for("the first worker", || WorkerThread::active_count() == 1);
        manager.release(&first);

        // The freshly released worker is the reaping candidate; the new
        // claim gets a fresh one
        let second = manager.reserve(60, None);
        assert_ne!(first, second);
        wait_for("the retired worker to wind down", || {
            WorkerThread::active_count() == 1
        });
        drop(manager);
        assert_eq!(WorkerThread::active_count(), 0);
    }

    #[test]
    fn busy_worker_is_not_retired() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let mut template = StubDriver::new(&state);
        template.execute_delay = Duration::from_millis(200);
        let manager = ConnectionManager::new(Box::new(template), &stub_settings(5));

        let first = manager.reserve(60, None);
        wait_for("the first worker", || WorkerThread::active_count() == 1);
        manager.call(
            &first,
            Value::Null,
            QueryEvent::ExecuteQuery,
            vec![Value::from("SELECT SLEEP(1)")],
            false,
        );

        // Busy or queued workers are skipped by the reaping sweep
        let second = manager.reserve(60, None);
        assert_ne!(first, second);
        wait_for("both workers to run", || WorkerThread::active_count() == 2);
        drop(manager);
        assert_eq!(WorkerThread::active_count(), 0);
    }

    #[test]
    fn kill_query_goes_through_a_secondary_worker() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let manager = ConnectionManager::new(
            Box::new(StubDriver::new(&state)),
            &stub_settings(5),
        );
        let (receiver, _seen) = recorder();

        let victim = manager.reserve(0, Some(&receiver));
        wait_for("the victim session", || {
            state.connects.load(Ordering::SeqCst) >= 1
        });

        manager.kill_query(&victim);
        wait_for("the kill to land", || !state.kills.lock().unwrap().is_empty());
        // The victim was the first session the stub handed out
        assert_eq!(state.kills.lock().unwrap()[0], 1);
        // A second worker carried the kill
        assert!(state.connects.load(Ordering::SeqCst) >= 2);
        drop(manager);
    }

    #[test]
    fn failed_connect_emits_the_error_and_terminates() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let mut driver = StubDriver::new(&state);
        driver.fail_connect = true;
        let (receiver, seen) = recorder();

        let mut worker = Connection::new(Box::new(driver));
        worker.connect_receiver(&receiver);
        worker.start();
        wait_for("the connect error", || !seen.lock().unwrap().is_empty());
        wait_for("the worker to terminate", || worker.is_finished());

        let seen = seen.lock().unwrap();
        let (_, args) = &seen[0];
        assert!(args[0].is_null());
        assert_eq!(QueryEvent::from_value(&args[1]), QueryEvent::NoEvent);
        let result = args[2].as_query_result();
        assert!(result.error.is_error);
        assert_eq!(result.error.code.as_u32(), 2003);
    }

    #[test]
    fn standalone_worker_answers_test_connection() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let (receiver, seen) = recorder();

        let mut worker = Connection::new(Box::new(StubDriver::new(&state)));
        worker.connect_receiver(&receiver);
        worker.start();
        worker.call(Value::from("t"), QueryEvent::TestConnection, Vec::new());
        wait_for("the test-connection echo", || !seen.lock().unwrap().is_empty());

        let seen = seen.lock().unwrap();
        let (_, args) = &seen[0];
        assert_eq!(args[0], Value::from("t"));
        assert_eq!(
            QueryEvent::from_value(&args[1]),
            QueryEvent::TestConnection
        );
        assert!(!args[2].as_query_result().error.is_error);
        drop(seen);
        worker.stop(true);
    }

    #[test]
    fn kill_without_manager_reports_an_error() {
        let _guard = serial();
        let state = Arc::new(StubState::default());
        let (receiver, seen) = recorder();

        let mut worker = Connection::new(Box::new(StubDriver::new(&state)));
        worker.connect_receiver(&receiver);
        worker.start();
        worker.call(
            Value::Null,
            QueryEvent::KillQuery,
            vec![Value::from("nobody")],
        );
        wait_for("the kill failure", || !seen.lock().unwrap().is_empty());

        let seen = seen.lock().unwrap();
        let result = seen[0].1[2].as_query_result();
        assert!(result.error.is_error);
        assert!(state.kills.lock().unwrap().is_empty());
        drop(seen);
        worker.stop(true);
    }
}
