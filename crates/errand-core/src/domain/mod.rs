//! Domain model (IDs, tasks, status, results, outcomes, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod result;
pub mod state;
pub mod task;

pub use self::errors::{ErrandError, ErrorKind};
pub use self::events::{DomainEvent, RunSummary};
pub use self::ids::{Id, IdMarker, ParseIdError, RunId, TaskId};
pub use self::outcome::{ExecutorOutcome, SyncOutcome};
pub use self::result::{TaskResult, UntrustedText};
pub use self::state::TaskStatus;
pub use self::task::{NewTask, Task, TaskPatch};
