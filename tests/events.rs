#[cfg(test)]
mod tests {
    use rsq::{EXECUTED, Endpoint, MessageKind, SignalId, Value, application};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

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
    fn single_thread_routing() {
        let emitter = Endpoint::new();
        let (receiver, seen) = recorder();
        emitter.connect(1, &receiver);
        emitter.emit(1, vec![Value::from("test")]);
        receiver.process_mailbox();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[0].1, vec![Value::from("test")]);
    }

    #[test]
    fn mailbox_preserves_fifo_order() {
        let emitter = Endpoint::new();
        let (receiver, seen) = recorder();
        emitter.connect(1, &receiver);
        for index in 0..10_i32 {
            emitter.emit(1, vec![Value::from(index)]);
        }
        receiver.process_mailbox();
        let seen = seen.lock().unwrap();
        let order: Vec<i32> = seen.iter().map(|(_, args)| args[0].as_i32()).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn emit_reaches_only_matching_signal() {
        let emitter = Endpoint::new();
        let (receiver, seen) = recorder();
        emitter.connect(1, &receiver);
        emitter.connect(3, &receiver);
        emitter.emit(2, vec![Value::from("dropped")]);
        emitter.emit(3, vec![Value::from("kept")]);
        receiver.process_mailbox();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 3);
    }

    #[test]
    fn multiple_receivers_and_duplicates() {
        let emitter = Endpoint::new();
        let (first, seen_first) = recorder();
        let (second, seen_second) = recorder();
        emitter.connect(1, &first);
        // No deduplication: a doubly connected receiver hears it twice
        emitter.connect(1, &second);
        emitter.connect(1, &second);
        emitter.emit(1, vec![Value::from("x")]);
        first.process_mailbox();
        second.process_mailbox();
        assert_eq!(seen_first.lock().unwrap().len(), 1);
        assert_eq!(seen_second.lock().unwrap().len(), 2);
    }

    #[test]
    fn disconnect_by_signal_and_receiver() {
        let emitter = Endpoint::new();
        let (first, seen_first) = recorder();
        let (second, seen_second) = recorder();
        emitter.connect(1, &first);
        emitter.connect(1, &second);
        emitter.connect(2, &second);
        emitter.disconnect(Some(1), Some(&second));
        emitter.emit(1, vec![Value::Null]);
        emitter.emit(2, vec![Value::Null]);
        first.process_mailbox();
        second.process_mailbox();
        assert_eq!(seen_first.lock().unwrap().len(), 1);
        assert_eq!(seen_second.lock().unwrap().len(), 1);
        assert_eq!(seen_second.lock().unwrap()[0].0, 2);

        emitter.disconnect(None, None);
        emitter.emit(1, vec![Value::Null]);
        first.process_mailbox();
        assert_eq!(seen_first.lock().unwrap().len(), 1);
    }

    #[test]
    fn dropped_receiver_is_skipped_silently() {
        let emitter = Endpoint::new();
        let (receiver, seen) = recorder();
        emitter.connect(1, &receiver);
        drop(seen);
        drop(receiver);
        // No live subscriber left; nothing to deliver to, nothing breaks
        emitter.emit(1, vec![Value::from("ghost")]);
        application::process_events();
    }

    #[test]
    fn cross_thread_emission() {
        let (receiver, seen) = recorder();
        let emitter = Endpoint::new();
        emitter.connect(EXECUTED, &receiver);
        let handle = {
            let emitter = emitter.clone();
            thread::spawn(move || {
                emitter.emit(EXECUTED, vec![Value::from("from afar")]);
            })
        };
        handle.join().unwrap();
        // Delivery happens on the receiver's home thread, inside its pump
        application::process_events();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1[0].as_string(), "from afar");
    }

    #[test]
    fn emit_never_runs_receiver_code_inline() {
        let emitter = Endpoint::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let receiver = Endpoint::with_handler(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        emitter.connect(1, &receiver);
        emitter.emit(1, vec![]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        receiver.process_mailbox();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_later_finishes_on_next_pump() {
        let emitter = Endpoint::new();
        let (receiver, seen) = recorder();
        emitter.connect(1, &receiver);
        emitter.emit(1, vec![Value::from("before")]);
        receiver.delete_later();
        emitter.emit(1, vec![Value::from("after")]);
        application::process_events();
        assert!(receiver.is_finished());
        // Items before the sentinel were delivered, the rest dropped
        assert_eq!(seen.lock().unwrap().len(), 1);
        emitter.emit(1, vec![Value::from("too late")]);
        application::process_events();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn message_channel_and_shutdown() {
        application::post_message(MessageKind::Warning, "connection lost", Value::from("worker 3"));
        application::post_message(MessageKind::Critical, "disk full", Value::Null);
        assert!(application::has_message());
        let first = application::next_message().unwrap();
        assert_eq!(first.kind, MessageKind::Warning);
        assert_eq!(first.label, "connection lost");
        assert_eq!(first.data.as_string(), "worker 3");
        let second = application::next_message().unwrap();
        assert_eq!(second.kind, MessageKind::Critical);
        assert!(application::next_message().is_none());
        assert!(!application::has_message());

        // Shutdown drops this thread's roster: pumped deliveries stop
        let emitter = Endpoint::new();
        let (receiver, seen) = recorder();
        emitter.connect(1, &receiver);
        application::shutdown();
        emitter.emit(1, vec![Value::from("ignored")]);
        application::process_events();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn parent_child_tree() {
        let parent = Endpoint::new();
        let child = Endpoint::new();
        let grandchild = Endpoint::new();
        child.set_parent(&parent);
        grandchild.set_parent(&child);
        assert_eq!(parent.children().len(), 1);
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &parent));
        assert!(Arc::ptr_eq(&grandchild.parent().unwrap(), &child));

        let other = Endpoint::new();
        child.set_parent(&other);
        assert!(parent.children().is_empty());
        assert_eq!(other.children().len(), 1);

        other.release_child(&child);
        assert!(child.parent().is_none());
        assert!(other.children().is_empty());
    }

    #[test]
    fn arbitrary_data_bag() {
        let object = Endpoint::new();
        object.set_arbitrary_data("test", 123_i32);
        assert_eq!(object.arbitrary_data("test").as_i32(), 123);
        assert!(object.arbitrary_data("missing").is_null());
        object.set_arbitrary_data("test", "replaced");
        assert_eq!(object.arbitrary_data("test").as_string(), "replaced");
    }

    #[test]
    fn pump_on_foreign_thread_does_not_deliver() {
        let emitter = Endpoint::new();
        let (receiver, seen) = recorder();
        emitter.connect(1, &receiver);
        emitter.emit(1, vec![Value::from("pinned")]);
        // A foreign thread pumping its own (empty) roster must not touch
        // this thread's receiver
        thread::spawn(|| application::process_events())
            .join()
            .unwrap();
        thread::sleep(Duration::from_millis(10));
        assert!(seen.lock().unwrap().is_empty());
        application::process_events();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
