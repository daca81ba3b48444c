#[cfg(test)]
mod tests {
    use rsq::uuid;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn uniqueness() {
        let mut uuids = HashSet::new();
        for _ in 0..1000 {
            assert!(uuids.insert(uuid::make_uuid()));
        }
    }

    #[test]
    fn shape() {
        let uuid = uuid::make_uuid();
        assert_eq!(uuid.len(), 36);
        let characters: Vec<char> = uuid.chars().collect();
        for index in [8, 13, 18, 23] {
            assert_eq!(characters[index], '-');
        }
        assert_eq!(characters[14], '4');
        assert!(matches!(characters[19], '8' | '9' | 'a' | 'b'));
    }

    #[test]
    fn threaded_uniqueness() {
        // 10 threads drawing 1000 each from the shared generator must
        // never collide
        let handles: Vec<_> = (0..10)
            .map(|_| {
                thread::spawn(|| {
                    (0..1000)
                        .map(|_| uuid::make_uuid_thread_safe())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut uuids = HashSet::new();
        for handle in handles {
            for uuid in handle.join().unwrap() {
                assert!(uuids.insert(uuid));
            }
        }
        assert_eq!(uuids.len(), 10_000);
    }
}
