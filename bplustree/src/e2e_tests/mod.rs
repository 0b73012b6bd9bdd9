//! End-to-end scenarios against the public tree API.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! where the scenario allows it.

#![cfg(test)]

mod helpers;

mod test_auto_index_batch;
mod test_auto_index_sequence;
mod test_concurrent_tasks;
mod test_duplicate_race;
mod test_interleaved_inserts;
mod test_out_of_memory;
