// Concurrent access tests for shardkv
// These verify the single-writer/multi-reader contract across threads.

use shardkv::{Options, Router};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn quiet_options() -> Options {
    Options::default().num_partitions(4).flush_interval(Duration::from_secs(3600))
}

#[test]
fn test_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Router::open(dir.path(), quiet_options()).unwrap());

    let num_threads = 8;
    let writes_per_thread = 100;

    let mut handles = vec![];
    for thread_id in 0..num_threads {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..writes_per_thread {
                let key = format!("thread_{}_key_{}", thread_id, i);
                let value = format!("thread_{}_value_{}", thread_id, i);
                store.put(&key, value.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for thread_id in 0..num_threads {
        for i in 0..writes_per_thread {
            let key = format!("thread_{}_key_{}", thread_id, i);
            let expected = format!("thread_{}_value_{}", thread_id, i).into_bytes();
            assert_eq!(store.get(&key).unwrap(), expected);
        }
    }
    assert_eq!(store.stats().total_keys, num_threads * writes_per_thread);

    store.close().unwrap();
}

#[test]
fn test_concurrent_reads() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Router::open(dir.path(), quiet_options()).unwrap());

    for i in 0..500 {
        store.put(&format!("read_key_{}", i), format!("read_value_{}", i).as_bytes()).unwrap();
    }

    let mut handles = vec![];
    for _ in 0..12 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..500 {
                let expected = format!("read_value_{}", i).into_bytes();
                assert_eq!(store.get(&format!("read_key_{}", i)).unwrap(), expected);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    store.close().unwrap();
}

#[test]
fn test_readers_alongside_writer() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Router::open(dir.path(), quiet_options()).unwrap());

    for i in 0..100 {
        store.put(&format!("stable_{}", i), b"fixed").unwrap();
    }

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..1000 {
                store.put(&format!("churn_{}", i % 20), format!("{}", i).as_bytes()).unwrap();
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let store = Arc::clone(&store);
        readers.push(thread::spawn(move || {
            // The stable keys must be visible throughout, whatever the
            // writer is doing to the churn keys.
            for _ in 0..50 {
                for i in 0..100 {
                    assert_eq!(store.get(&format!("stable_{}", i)).unwrap(), b"fixed".to_vec());
                }
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    // Last write wins per churn slot.
    for i in 0..20 {
        let expected = format!("{}", 980 + i).into_bytes();
        assert_eq!(store.get(&format!("churn_{}", i)).unwrap(), expected);
    }

    store.close().unwrap();
}

#[test]
fn test_own_writes_visible_to_own_reads() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Router::open(dir.path(), quiet_options()).unwrap());

    let mut handles = vec![];
    for thread_id in 0..6 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let key = format!("own_{}", thread_id);
            for i in 0..200 {
                let value = format!("{}", i).into_bytes();
                store.put(&key, &value).unwrap();
                assert_eq!(store.get(&key).unwrap(), value);
            }
            store.delete(&key).unwrap();
            assert!(store.get(&key).unwrap_err().is_not_found());
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    store.close().unwrap();
}

#[test]
fn test_concurrent_writes_with_background_flusher() {
    let dir = TempDir::new().unwrap();
    let options = Options::default()
        .num_partitions(2)
        .memtable_capacity(50)
        .flush_interval(Duration::from_millis(25));
    let store = Arc::new(Router::open(dir.path(), options).unwrap());

    let mut handles = vec![];
    for thread_id in 0..4 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..250 {
                let key = format!("t{}_{}", thread_id, i);
                store.put(&key, key.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Writes race the ticker and the capacity-triggered flushes; nothing
    // may be lost between the layers.
    for thread_id in 0..4 {
        for i in 0..250 {
            let key = format!("t{}_{}", thread_id, i);
            assert_eq!(store.get(&key).unwrap(), key.clone().into_bytes());
        }
    }

    store.close().unwrap();
}
