//! Path registry for multiplexed WebSocket endpoints
//!
//! The registry owns, per port, the one shared front door and the ordered
//! table of path-scoped stream servers behind it. Mutations go through the
//! registry lock; the front door only reads its port's table.
//!
//! # Architecture
//!
//! ```text
//!                            Arc<Registry>
//!                     ┌─────────────────────────┐
//!                     │ ports: HashMap<u16,     │
//!                     │   PortEntry {           │
//!                     │     front_door,         │
//!                     │     table: PathTable,   │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │ shared PathTable
//!                                 ▼
//!   TCP / UpgradeTap ──► [FrontDoor :9000] ── normalize(path) ──┐
//!                                                               │
//!                 ┌─────────────────────────┬───────────────────┤
//!                 ▼                         ▼                   ▼
//!           [StreamServer /a]       [StreamServer /b]     (no match: drop)
//! ```
//!
//! Paths are compared in normalized form only (see `normalize_path`), and
//! the first registered route wins.

pub mod config;
pub mod error;
pub mod path;
pub mod store;
pub mod table;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use path::normalize_path;
pub use store::Registry;
pub use table::{PathTable, Route};
