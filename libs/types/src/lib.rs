//! # DOM Types Library
//!
//! Shared type system for depth-of-market (DOM) strategies: order-book
//! snapshots, trade sides, contract metadata and the validation errors
//! raised while building them.
//!
//! ## Design Philosophy
//!
//! - **Exact Book Values**: Level prices and sizes are stored as `Decimal`
//!   and only converted to `f64` at the analytics boundary
//! - **Open Metadata**: Snapshots carry a free-form JSON metadata map so
//!   upstream feeds can attach precomputed metrics and contract details
//! - **Lenient Ingestion**: Malformed level values become zero instead of
//!   failing the whole snapshot; only structural problems are errors
//!
//! ## Quick Start
//!
//! ```rust
//! use dom_types::{DomLevel, DomSnapshot};
//! use rust_decimal::Decimal;
//!
//! let snapshot = DomSnapshot::new(
//!     "ES",
//!     vec![DomLevel::new(Decimal::new(500000, 2), Decimal::from(12))],
//!     vec![DomLevel::new(Decimal::new(500025, 2), Decimal::from(9))],
//!     chrono::Utc::now(),
//! );
//! assert_eq!(snapshot.mid_price().unwrap(), 5000.125);
//! ```
//!
//! ## Integration Points
//!
//! - **Strategy Services**: Snapshot ingestion, zone detection, order-flow analytics
//! - **Replay Tooling**: JSON-lines market events decoded via [`DomSnapshot::from_market_event`]
//! - **Signal Metadata**: Contract fields propagated through [`extract_contract_metadata`]

pub mod common;
pub mod contract;
pub mod dom;
pub mod side;

pub use common::errors::SnapshotError;
pub use common::numeric::{coerce_f64, is_truthy};
pub use contract::{extract_contract_metadata, CONTRACT_METADATA_KEYS};
pub use dom::{DomLevel, DomSnapshot, SNAPSHOT_METRIC_KEYS};
pub use side::Side;
