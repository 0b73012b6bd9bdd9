//! Auto-index: a single insert followed by a batch.

use crate::auto_index::AutoIndex;
use crate::btree::TreeError;
use crate::memory::SystemPool;

#[test]
fn test_single_then_batch() {
    let index = AutoIndex::new(SystemPool::new()).expect("system pool never refuses");

    assert_eq!(index.insert("first".to_string()), Ok(1));
    let range = index
        .insert_batch(vec!["second".to_string(), "third".to_string(), "fourth".to_string()])
        .expect("batch fits");

    assert_eq!(range, 2..5);
    assert_eq!(index.min_key(), Some(1));
    assert_eq!(index.max_key(), Some(4));
    assert_eq!(index.search(3).value(), Some("third".to_string()));
    assert_eq!(index.get(4), Ok("fourth".to_string()));
    assert_eq!(index.get(5), Err(TreeError::NotFound));

    let keys: Vec<u64> = index.iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec![1, 2, 3, 4]);
}

#[test]
fn test_batch_keys_follow_counter() {
    let index = AutoIndex::with_start(SystemPool::new(), 50).expect("system pool never refuses");

    for value in 0..10u32 {
        index.insert(value).expect("insert");
    }
    // The counter sits at 60 before the batch, so k+1 values take 60..=60+k
    let range = index.insert_batch((100..105).collect()).expect("batch fits");

    assert_eq!(range, 60..65);
    assert_eq!(index.min_key(), Some(50));
    assert_eq!(index.max_key(), Some(64));
    assert_eq!(index.tree().key_at_position(10), Ok(60));
    assert_eq!(index.get(62), Ok(102));
}
