//! Application services: the scheduler and its collaborators.

pub mod invoker;
pub mod join;
pub mod logger;
pub mod router;
pub mod scheduler;
pub mod timer;

pub use invoker::{FunctionInvoker, FunctionRegistry, UserFunctionRuntime};
pub use join::{Arrival, JoinTracker};
pub use logger::InstanceLogger;
pub use router::{ConditionEvaluator, JmespathConditionEvaluator, RoutedBranch, TransitionRouter};
pub use scheduler::{AdvanceOutcome, ProcessScheduler, SchedulerConfig, Trigger, TriggerKind};
pub use timer::{TimerScheduler, TimerWake};
