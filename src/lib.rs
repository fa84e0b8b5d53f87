//! Sykli Core — polyglot CI pipeline orchestration.
//!
//! Layered the way the teacher lays out its domain: a pure domain model at
//! the center (`graph`, `condition`), an application layer that drives it
//! (`scheduler`, `cache`, `delta`, `mesh`), infrastructure at the edges
//! (`runtime`, `target`, `config`), and cross-cutting concerns threaded
//! through all of them (`error`, `events`, `context`, `util`).
//!
//! ```text
//! graph/       domain model: Task, Service, Graph, parsing, validation, matrix
//! cache/       fingerprinting + content-addressed store
//! delta/       git-diff-based change impact
//! runtime/     shell / docker process execution
//! target/      Target trait + capability traits; local + k8s implementations
//! scheduler/   wavefront executor, retries, on_failure, cancellation
//! mesh/        node selection + placement errors
//! events/      pub/sub event bus
//! error.rs     SykliError + PlacementError + error-code vocabulary
//! context.rs   RunContext
//! condition.rs Condition tagged sum + evaluator
//! config.rs    ambient SykliConfig
//! util/        glob matching, hashing helpers, ULID generation
//! ```

pub mod cache;
pub mod condition;
pub mod config;
pub mod context;
pub mod delta;
pub mod error;
pub mod events;
pub mod graph;
pub mod mesh;
pub mod runtime;
pub mod scheduler;
pub mod target;
pub mod util;

pub use context::{GitContext, RunContext, RunOptions};
pub use error::{ErrorCode, ErrorKind, PlacementError, Result, SykliError};
pub use graph::{Graph, Task};
pub use scheduler::{RunResult, Scheduler, TaskResult, TaskStatus};
