//! Durable steps for resumable runs
//!
//! Every side effect of a run (sandbox creation, each model call, each tool
//! call, persistence) happens inside a named step. A step's successful output
//! is written to a journal keyed by `(run id, step name, call ordinal)`. When a
//! run is re-executed with the same run id, completed steps are replayed from
//! the journal instead of being executed again.
//!
//! # Architecture
//!
//! ```text
//! workflow ──run("terminal", body)──► StepRunner
//!                                        │
//!                        journal hit? ───┼──► yes: deserialize + return
//!                                        │
//!                                        └──► no: body() with retries
//!                                                   │
//!                                             Ok ──► record ──► return
//!                                             Err ─► retry / StepError
//! ```

pub mod journal;
pub mod step;

pub use journal::{FileJournal, JournalStore, MemoryJournal, StepKey};
pub use step::{RetryPolicy, StepError, StepRunner};
