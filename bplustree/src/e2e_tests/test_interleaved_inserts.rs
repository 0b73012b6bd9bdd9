//! Insert the even keys, then the odd keys, and check lookups and order.

use crate::btree::TreeError;
use crate::e2e_tests::helpers::*;

#[test]
fn test_even_then_odd_keys() {
    let tree = new_tree();

    for key in (0..200).step_by(2) {
        tree.insert(key, tag(key)).expect("even key");
    }
    for key in (1..200).step_by(2) {
        tree.insert(key, tag(key)).expect("odd key");
    }

    assert_eq!(tree.len(), 200);
    tree.check_invariants().expect("valid tree");

    // Forward iteration: exactly 200 strictly increasing keys with matching values
    let entries: Vec<(u64, String)> = tree.iter().collect();
    assert_eq!(entries.len(), 200);
    for (expected, (key, value)) in (0u64..).zip(&entries) {
        assert_eq!(*key, expected);
        assert_eq!(*value, tag(expected));
    }

    let hit = tree.search(&100);
    assert!(!hit.is_end());
    assert_eq!(hit.value(), Some(tag(100)));
    assert!(tree.search(&300).is_end());

    assert_eq!(tree.insert(100, "again".to_string()), Err(TreeError::DuplicateKey));
    assert_eq!(tree.len(), 200);
    assert_eq!(tree.get(&100), Some(tag(100)));
}

#[test]
fn test_backward_iteration_reverses_forward() {
    let tree = new_tree();
    for key in (0..200).step_by(2).chain((1..200).step_by(2)) {
        tree.insert(key, tag(key)).expect("insert");
    }

    let forward = keys_forward(&tree);
    let mut backward = keys_backward(&tree);
    backward.reverse();
    assert_eq!(forward, backward);

    // The same walk with a raw cursor starting from the end
    let mut cursor = tree.end();
    cursor.move_prev();
    let mut keys = Vec::new();
    while let Some(key) = cursor.key() {
        keys.push(key);
        cursor.move_prev();
    }
    keys.reverse();
    assert_eq!(keys, forward);
}

#[test]
fn test_rank_matches_sorted_order() {
    let tree = new_tree();
    for key in (0..200).step_by(2).chain((1..200).step_by(2)) {
        tree.insert(key, tag(key)).expect("insert");
    }

    for position in 0..200 {
        assert_eq!(tree.key_at_position(position), Ok(position as u64));
    }
    assert_eq!(
        tree.key_at_position(200),
        Err(TreeError::InvalidPosition {
            position: 200,
            size: 200
        })
    );
}
