//! 核心层：错误分类与恢复、执行状态机、任务执行器及其构建器

pub mod builder;
pub mod error;
pub mod executor;
pub mod recovery;
pub mod state;

pub use builder::ExecutorBuilder;
pub use error::{ExternalError, FailureKind, RecoveryAction, TaskFailure};
pub use executor::TaskExecutor;
pub use recovery::{CallKind, RecoveryEngine, RetryPolicy};
pub use state::{ExecutionContext, StepRecord, TaskState};
