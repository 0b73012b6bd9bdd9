// Forbid unwrap() in production code to prevent panics on bad input.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::sync::Arc;
use std::time::Instant;

use bplustree::{BPlusTree, MemoryPool, SystemPool, TaskGroup, TreeError, WorkloadConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Value stored under `key` by the workload.
fn value_for(key: u64) -> String {
    format!("value-{key}")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bplustree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match WorkloadConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: tasks={}, keys_per_task={}, leaf_slots={}, inner_slots={}, append_mode={}",
        config.tasks,
        config.keys_per_task,
        config.tree.leaf_slots(),
        config.tree.inner_slots(),
        config.tree.append_mode()
    );

    let pool = SystemPool::new();
    let tree = match BPlusTree::<u64, String>::new(config.tree, Arc::clone(&pool) as Arc<dyn MemoryPool>) {
        Ok(tree) => Arc::new(tree),
        Err(e) => {
            tracing::error!("Failed to create tree: {e}");
            std::process::exit(1);
        }
    };

    // Each task owns a disjoint key range [task * keys_per_task, (task + 1) * keys_per_task)
    let started = Instant::now();
    let mut group = TaskGroup::<TreeError>::new();
    for task in 0..config.tasks {
        let tree = Arc::clone(&tree);
        let keys = (0u64..)
            .skip(task * config.keys_per_task)
            .take(config.keys_per_task);
        group.spawn(format!("inserter-{task}"), move || {
            for key in keys {
                tree.insert(key, value_for(key))?;
            }
            Ok(())
        });
    }

    match group.join_all().await {
        Ok(finished) => tracing::info!(
            tasks = finished,
            elapsed_ms = started.elapsed().as_millis(),
            "inserts finished"
        ),
        Err(e) => {
            tracing::error!("Workload failed: {e}");
            std::process::exit(1);
        }
    }

    if let Err(message) = verify(&tree, config.total_keys()) {
        tracing::error!("Verification failed: {message}");
        std::process::exit(1);
    }

    tracing::info!(
        size = tree.len(),
        height = tree.height(),
        pool_bytes = pool.in_use(),
        "workload verified"
    );
}

/// Check that the tree holds exactly the keys `0..expected`, each with its value.
fn verify(tree: &BPlusTree<u64, String>, expected: usize) -> Result<(), String> {
    if tree.len() != expected {
        return Err(format!("expected {expected} elements, found {}", tree.len()));
    }
    tree.check_invariants()?;

    for (position, key) in (0..expected).zip(0u64..) {
        if tree.get(&key) != Some(value_for(key)) {
            return Err(format!("key {key} missing or holding the wrong value"));
        }
        match tree.key_at_position(position) {
            Ok(found) if found == key => {}
            other => return Err(format!("position {position} gave {other:?}, expected {key}")),
        }
    }

    let mut visited = 0;
    let mut previous = None;
    for (key, _) in tree.iter() {
        if previous.is_some_and(|previous| previous >= key) {
            return Err(format!("iteration out of order at key {key}"));
        }
        previous = Some(key);
        visited += 1;
    }
    if visited != expected {
        return Err(format!("iteration visited {visited} of {expected} elements"));
    }
    Ok(())
}
