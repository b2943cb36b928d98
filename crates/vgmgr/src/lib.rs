//! # spnode Virtual Group Manager
//!
//! Placement allocator for objects this SP is primary for.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────── VirtualGroupManager ───────────────────────┐
//!  TopologySource │ refresh ──► RwLock<Arc<Snapshot>> ◄── pick_* (weighted by free %) │
//!  ─────────────► │                    ▲                        │                      │
//!                 │        FreezeSpPool┘   HealthChecker ───────┘ exclusions         │
//!  Signer ◄────── │ create GVG / delete empty GVG / stake top-up                       │
//!                 └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Content |
//! |--------|---------|
//! | `snapshot` | immutable topology view swapped on refresh |
//! | `pick` | free-capacity weights and the weighted draw |
//! | `policy` | `SpPickPolicy` and secondary selection for new GVGs |
//! | `freeze` | cool-down pool of failed secondaries |
//! | `health` | peer status probing with a redundancy floor |
//! | `lifecycle` | empty-GVG GC and stake top-up |
//! | `manager` | `VirtualGroupManager` and its background loops |

pub mod error;
pub mod freeze;
pub mod health;
pub mod lifecycle;
pub mod manager;
pub mod pick;
pub mod policy;
pub mod snapshot;

pub use error::VgmError;
pub use freeze::{FreezeEntry, FreezeSpPool};
pub use health::{HealthChecker, HealthProbe, HttpHealthProbe};
pub use lifecycle::{EmptyGvgTracker, StakeTopUp};
pub use manager::VirtualGroupManager;
pub use pick::{free_capacity_weight, pick_weighted};
pub use policy::{select_secondaries, PreferredPolicy, RandomPolicy, SpPickPolicy};
pub use snapshot::Snapshot;
