//! tidegraph: an in-memory, multi-version temporal property graph engine.
//!
//! Vertices carry versioned byte payloads; directed edges are labeled,
//! versioned, and stored per `(src, label)` in capacity-bounded blocks
//! inside one mapped arena. Transactions give snapshot-isolated reads,
//! optimistic write-write conflict detection, and time-travel queries over
//! edge version windows.
//!
//! ```no_run
//! use tidegraph::{Graph, GraphConfig};
//! # fn main() -> tidegraph::Result<()> {
//! let graph = Graph::open_with_config(
//!     "blocks.tg".as_ref(),
//!     "wal.tg".as_ref(),
//!     GraphConfig::small(),
//! )?;
//! let mut txn = graph.begin_transaction();
//! let a = txn.new_vertex(true)?;
//! let b = txn.new_vertex(true)?;
//! txn.put_vertex(a, b"alice")?;
//! txn.put_vertex(b, b"bob")?;
//! txn.put_edge(a, 1, b, b"follows", false)?;
//! txn.commit(true)?;
//!
//! let reader = graph.begin_read_only_transaction();
//! assert_eq!(reader.get_edge(a, 1, b)?, Some(&b"follows"[..]));
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod config;
pub mod error;
pub mod graph;
pub mod query;
pub mod txn;
pub mod types;
pub mod wal;

pub use crate::config::{GraphConfig, SyncMode};
pub use crate::error::{GraphError, Result};
pub use crate::graph::{Graph, GraphStats};
pub use crate::txn::iter::{EdgeIterator, EdgeIteratorVersion, EdgeView};
pub use crate::txn::Transaction;
pub use crate::types::{Label, Timestamp, VertexId};
