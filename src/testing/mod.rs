//! Testing utilities for the shard balancer.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     TestCluster                          │
//! │  - LoadBalancer over [0, 2^16)                            │
//! │  - hit / hit_shard / round                               │
//! │  - assert_invariants / assert_applied                    │
//! └──────────────────────────────────────────────────────────┘
//!                           ▲
//!                           │ drive(ops)
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Workload                           │
//! │  - seeded, skewed towards a few hot keys                 │
//! │  - mix of local reads, remote reads, writes and flushes  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod utils;

mod balancer_e2e_tests;
mod concurrency_tests;
