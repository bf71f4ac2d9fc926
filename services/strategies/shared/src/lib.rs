//! Shared Strategy Framework
//!
//! Common traits and utilities for DOM strategy implementations: the
//! strategy capability interface, the collaborators a strategy consumes
//! (risk authority, position provider, telemetry sink, event dispatcher,
//! threshold model), a monotonic clock abstraction, metrics collection and
//! reusable test doubles.

pub mod clock;
pub mod collaborators;
pub mod metrics;
pub mod telemetry;
pub mod testing;
pub mod traits;

pub use clock::*;
pub use collaborators::*;
pub use metrics::*;
pub use telemetry::*;
pub use traits::*;
