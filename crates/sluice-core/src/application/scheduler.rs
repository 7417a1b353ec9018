//! The process scheduler: drives instances through their definitions.

use crate::application::invoker::FunctionInvoker;
use crate::application::join::{Arrival, JoinTracker};
use crate::application::logger::InstanceLogger;
use crate::application::router::TransitionRouter;
use crate::application::timer::{TimerScheduler, TimerWake};
use crate::domain::definition::{Activity, ActivityKind, WorkflowDefinition};
use crate::domain::events::DomainEventHandler;
use crate::domain::instance::{ActivityId, InstanceId, InstanceStatus, WorkflowId, WorkflowInstance};
use crate::domain::log::LogOperation;
use crate::domain::repository::{DefinitionRepository, InstanceRepository, LogRepository};
use crate::{Directive, EngineError, FunctionCall, Payload};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Tunables for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How many ReRun retries a directive may request before the
    /// instance errors; budget K allows K+1 invocations in total
    pub retry_budget: u32,

    /// How long a synchronization point may stay partially arrived
    pub join_timeout: Duration,

    /// Hard ceiling on a single function invocation
    pub advance_ceiling: Duration,

    /// How many activity executions one advance may run before it is
    /// treated as failed; bounds definitions that cycle without parking
    pub step_budget: u32,

    /// Poll interval of the timer tick task
    pub timer_tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            join_timeout: Duration::from_secs(60),
            advance_ceiling: Duration::from_secs(30),
            step_budget: 1_000,
            timer_tick: Duration::from_millis(50),
        }
    }
}

/// What caused an advance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    /// An external caller (user action, API)
    User,
    /// A timer wake-up
    Timer,
    /// A nested workflow reported completion
    NestedWorkflow,
}

/// An advance trigger with its payload
#[derive(Debug, Clone)]
pub struct Trigger {
    /// What kind of trigger this is
    pub kind: TriggerKind,

    /// Data carried by the trigger; merged into the instance context
    /// under the `trigger` key when non-null
    pub payload: Payload,
}

impl Trigger {
    /// A user trigger carrying a payload
    pub fn user(payload: Payload) -> Self {
        Self {
            kind: TriggerKind::User,
            payload,
        }
    }

    /// A synthetic timer trigger
    pub fn timer() -> Self {
        Self {
            kind: TriggerKind::Timer,
            payload: Payload::null(),
        }
    }

    /// A nested-workflow completion trigger
    pub fn nested(payload: Payload) -> Self {
        Self {
            kind: TriggerKind::NestedWorkflow,
            payload,
        }
    }
}

/// Where an advance left the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// Status after the advance
    pub status: InstanceStatus,

    /// Activity the instance is parked at
    pub current_activity: Option<ActivityId>,

    /// Error message when the advance ended in the Error status
    pub error: Option<String>,
}

impl AdvanceOutcome {
    fn of(instance: &WorkflowInstance) -> Self {
        Self {
            status: instance.status,
            current_activity: instance.current_activity.clone(),
            error: instance.error.clone(),
        }
    }
}

/// How one activity execution ended
enum ActivityRun {
    /// All function lists ran; the activity may route onward
    Completed,
    /// A Break directive parked the instance at this activity
    Parked,
    /// A directive cancelled the whole workflow
    Cancelled,
    /// A directive reset the workflow to its Start activity
    Restarted,
    /// The activity failed; the message becomes the instance error
    Errored(String),
}

/// Drives workflow instances through their definitions.
///
/// One advance runs per instance at a time (per-instance lease);
/// distinct instances advance fully in parallel. Instance state is
/// mutated on a working copy and persisted once per quiescent point, so
/// a failure mid-advance leaves the durable state untouched.
pub struct ProcessScheduler {
    definitions: Arc<dyn DefinitionRepository>,
    instances: Arc<dyn InstanceRepository>,
    logger: InstanceLogger,
    invoker: FunctionInvoker,
    router: TransitionRouter,
    joins: JoinTracker,
    timers: TimerScheduler,
    event_handler: Arc<dyn DomainEventHandler>,
    leases: DashMap<InstanceId, Arc<Mutex<()>>>,
    config: SchedulerConfig,
}

impl ProcessScheduler {
    /// Create a scheduler and the receiver of its timer wake-ups.
    ///
    /// The host passes the receiver to [`ProcessScheduler::spawn_timer_pump`]
    /// once the scheduler is wrapped in an `Arc`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        definitions: Arc<dyn DefinitionRepository>,
        instances: Arc<dyn InstanceRepository>,
        logs: Arc<dyn LogRepository>,
        invoker: FunctionInvoker,
        router: TransitionRouter,
        event_handler: Arc<dyn DomainEventHandler>,
        config: SchedulerConfig,
    ) -> (Self, mpsc::Receiver<TimerWake>) {
        let (timers, timer_rx) = TimerScheduler::new(config.timer_tick);
        let scheduler = Self {
            definitions,
            instances,
            logger: InstanceLogger::new(logs),
            invoker,
            router,
            joins: JoinTracker::new(config.join_timeout),
            timers,
            event_handler,
            leases: DashMap::new(),
            config,
        };
        (scheduler, timer_rx)
    }

    /// Create an OnHold instance at the definition's Start activity,
    /// promote it to Started and run the first advance.
    pub async fn start_workflow(
        &self,
        workflow_id: &WorkflowId,
        trigger: Trigger,
        starter: Option<String>,
        entity: Option<String>,
    ) -> Result<(InstanceId, AdvanceOutcome), EngineError> {
        let definition = self.load_definition(workflow_id).await?;
        definition.validate()?;

        let start = definition
            .start_activity()
            .ok_or_else(|| EngineError::ValidationError("definition has no Start".to_string()))?;

        let mut instance = WorkflowInstance::new(
            workflow_id.clone(),
            start.id.clone(),
            starter,
            entity,
            Payload::new(json!({})),
        );
        instance.start()?;
        let instance_id = instance.id.clone();

        tracing::info!(
            workflow_id = %workflow_id.0,
            instance_id = %instance_id.0,
            "starting workflow instance"
        );

        self.instances.save(&instance).await?;
        self.handle_events(&mut instance).await;

        let outcome = self.advance(&instance_id, trigger).await?;
        Ok((instance_id, outcome))
    }

    /// Advance an instance under its lease.
    ///
    /// The trigger payload is merged into the context under `trigger`.
    /// OnHold and ReAssigned instances are promoted to Started on
    /// entry; Error instances need an explicit [`ProcessScheduler::retry`].
    /// A timer fire against a terminal instance is dropped quietly.
    pub async fn advance(
        &self,
        instance_id: &InstanceId,
        trigger: Trigger,
    ) -> Result<AdvanceOutcome, EngineError> {
        let lease = self.lease(instance_id);
        let _guard = lease.lock().await;

        let mut instance = self.load_instance(instance_id).await?;

        if instance.status.is_terminal() {
            if trigger.kind == TriggerKind::Timer {
                tracing::debug!(
                    instance_id = %instance_id.0,
                    "dropping timer fire against terminal instance"
                );
                return Ok(AdvanceOutcome::of(&instance));
            }
            return Err(EngineError::InvalidTransition(format!(
                "instance {} is terminal ({:?})",
                instance_id.0, instance.status
            )));
        }

        match instance.status {
            InstanceStatus::Started => {}
            InstanceStatus::OnHold | InstanceStatus::ReAssigned => instance.start()?,
            _ => {
                return Err(EngineError::InvalidTransition(format!(
                    "cannot advance instance {} in status {:?}",
                    instance_id.0, instance.status
                )));
            }
        }

        let definition = self.load_definition(&instance.workflow_id).await?;

        // A timer delay holds until its wake-up: while the timer is
        // still pending, only the timer trigger may run the activity
        if trigger.kind != TriggerKind::Timer {
            if let Some(current) = &instance.current_activity {
                let parked_on_timer = definition
                    .activity(current)
                    .map_or(false, |a| a.kind == ActivityKind::Timer)
                    && self.timers.has_pending(instance_id).await;
                if parked_on_timer {
                    return Err(EngineError::InvalidTransition(format!(
                        "instance {} is paused at timer activity {}",
                        instance_id.0, current.0
                    )));
                }
            }
        }

        if !trigger.payload.is_null() {
            instance
                .context
                .set("trigger", trigger.payload.as_value().clone());
        }

        self.run(&mut instance, &definition, &trigger).await?;

        self.instances.save(&instance).await?;
        self.handle_events(&mut instance).await;

        if instance.status.is_terminal() {
            self.joins.clear_instance(instance_id);
            self.timers.cancel_instance(instance_id).await;
        }

        Ok(AdvanceOutcome::of(&instance))
    }

    /// Cancel an instance from any non-terminal status
    pub async fn cancel(&self, instance_id: &InstanceId) -> Result<AdvanceOutcome, EngineError> {
        let lease = self.lease(instance_id);
        let _guard = lease.lock().await;

        let mut instance = self.load_instance(instance_id).await?;
        instance.cancel()?;
        self.instances.save(&instance).await?;
        self.handle_events(&mut instance).await;

        self.joins.clear_instance(instance_id);
        self.timers.cancel_instance(instance_id).await;

        let entry = self.logger.entry(
            instance_id.clone(),
            LogOperation::StatusChanged,
            "instance cancelled",
        );
        self.logger.append(entry).await;

        Ok(AdvanceOutcome::of(&instance))
    }

    /// Retry an errored instance from its current activity
    pub async fn retry(&self, instance_id: &InstanceId) -> Result<AdvanceOutcome, EngineError> {
        {
            let lease = self.lease(instance_id);
            let _guard = lease.lock().await;

            let mut instance = self.load_instance(instance_id).await?;
            if instance.status != InstanceStatus::Error {
                return Err(EngineError::InvalidTransition(format!(
                    "cannot retry instance {} in status {:?}",
                    instance_id.0, instance.status
                )));
            }
            instance.start()?;
            self.instances.save(&instance).await?;
            self.handle_events(&mut instance).await;
        }

        self.advance(instance_id, Trigger::user(Payload::null()))
            .await
    }

    /// Hand an instance back for re-assignment; the next user trigger
    /// resumes it
    pub async fn reassign(&self, instance_id: &InstanceId) -> Result<AdvanceOutcome, EngineError> {
        let lease = self.lease(instance_id);
        let _guard = lease.lock().await;

        let mut instance = self.load_instance(instance_id).await?;
        instance.reassign()?;
        self.instances.save(&instance).await?;
        self.handle_events(&mut instance).await;

        Ok(AdvanceOutcome::of(&instance))
    }

    /// Load an instance for observation
    pub async fn instance(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, EngineError> {
        self.load_instance(instance_id).await
    }

    /// Audit log entries for an instance, in sequence order
    pub async fn logs(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<crate::domain::log::LogEntry>, EngineError> {
        self.logger.list(instance_id).await
    }

    /// Fail every join whose timeout elapsed. Called by the sweep task.
    pub async fn fail_expired_joins(&self) {
        for (instance_id, activity_id) in self.joins.take_expired() {
            let lease = self.lease(&instance_id);
            let _guard = lease.lock().await;

            let mut instance = match self.load_instance(&instance_id).await {
                Ok(instance) => instance,
                Err(e) => {
                    tracing::warn!(
                        instance_id = %instance_id.0,
                        error = %e,
                        "expired join for unloadable instance"
                    );
                    continue;
                }
            };
            if instance.status.is_terminal() {
                continue;
            }

            let message = EngineError::PartialJoinTimeout(format!(
                "not all branches reached {} in time",
                activity_id.0
            ))
            .to_string();
            if instance.mark_error(message.clone()).is_ok() {
                if let Err(e) = self.instances.save(&instance).await {
                    tracing::error!(
                        instance_id = %instance_id.0,
                        error = %e,
                        "failed to persist join timeout"
                    );
                    continue;
                }
                self.handle_events(&mut instance).await;
                let entry = self
                    .logger
                    .entry(instance_id.clone(), LogOperation::Anomaly, message)
                    .with_activity(activity_id.clone());
                self.logger.append(entry).await;
            }
        }
    }

    /// Spawn the task that turns timer wake-ups into advances.
    ///
    /// Stale wakes (the instance moved on or finished) are dropped.
    pub fn spawn_timer_pump(scheduler: Arc<Self>, mut rx: mpsc::Receiver<TimerWake>) {
        tokio::spawn(async move {
            while let Some((instance_id, activity_id)) = rx.recv().await {
                let parked_here = match scheduler.load_instance(&instance_id).await {
                    Ok(instance) => instance.current_activity.as_ref() == Some(&activity_id),
                    Err(_) => false,
                };
                if !parked_here {
                    continue;
                }
                match scheduler.advance(&instance_id, Trigger::timer()).await {
                    Ok(_) => {}
                    Err(EngineError::NotFound(_)) | Err(EngineError::InvalidTransition(_)) => {}
                    Err(e) => {
                        tracing::warn!(
                            instance_id = %instance_id.0,
                            error = %e,
                            "timer-driven advance failed"
                        );
                    }
                }
            }
        });
    }

    /// Spawn the task that periodically fails expired joins
    pub fn spawn_join_sweep(scheduler: Arc<Self>) {
        let tick = scheduler.config.timer_tick;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tick).await;
                scheduler.fail_expired_joins().await;
            }
        });
    }

    fn lease(&self, instance_id: &InstanceId) -> Arc<Mutex<()>> {
        self.leases
            .entry(instance_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_definition(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowDefinition, EngineError> {
        self.definitions
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow {}", workflow_id.0)))
    }

    async fn load_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<WorkflowInstance, EngineError> {
        self.instances
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", instance_id.0)))
    }

    async fn handle_events(&self, instance: &mut WorkflowInstance) {
        for event in instance.take_events() {
            let event_type = event.event_type();
            if let Err(e) = self.event_handler.handle_event(event).await {
                tracing::warn!(
                    instance_id = %instance.id.0,
                    event_type,
                    error = %e,
                    "event handler failed"
                );
            }
        }
    }

    /// The while-progress loop: run activities and follow transitions
    /// until every open branch of this advance parks or the instance
    /// reaches a terminal or error state.
    async fn run(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        trigger: &Trigger,
    ) -> Result<(), EngineError> {
        let mut queue: VecDeque<ActivityId> = VecDeque::new();
        let resume_at = instance.current_activity.clone().ok_or_else(|| {
            EngineError::InvalidTransition(format!(
                "instance {} has no current activity",
                instance.id.0
            ))
        })?;
        queue.push_back(resume_at);

        let mut steps: u32 = 0;
        while let Some(activity_id) = queue.pop_front() {
            steps += 1;
            if steps > self.config.step_budget {
                self.soft_error(
                    instance,
                    EngineError::FatalRetryExceeded(format!(
                        "advance ran {} activities without parking; definition likely cycles",
                        self.config.step_budget
                    ))
                    .to_string(),
                )
                .await;
                return Ok(());
            }
            // Activities with no functions complete without an await
            // point; keep the advance preemptible either way
            tokio::task::yield_now().await;

            let activity = match definition.activity(&activity_id) {
                Some(activity) => activity.clone(),
                None => {
                    self.soft_error(
                        instance,
                        format!("activity {} not in definition", activity_id.0),
                    )
                    .await;
                    return Ok(());
                }
            };

            match self.run_activity(instance, definition, &activity, trigger).await {
                ActivityRun::Completed => {}
                ActivityRun::Parked => continue,
                ActivityRun::Cancelled => {
                    instance.cancel()?;
                    let entry = self.logger.entry(
                        instance.id.clone(),
                        LogOperation::StatusChanged,
                        "cancelled by directive",
                    );
                    self.logger.append(entry).await;
                    return Ok(());
                }
                ActivityRun::Restarted => {
                    let start = definition.start_activity().ok_or_else(|| {
                        EngineError::ValidationError("definition has no Start".to_string())
                    })?;
                    instance.restart(start.id.clone())?;
                    self.joins.clear_instance(&instance.id);
                    self.timers.cancel_instance(&instance.id).await;
                    let entry = self.logger.entry(
                        instance.id.clone(),
                        LogOperation::StatusChanged,
                        "restarted to Start",
                    );
                    self.logger.append(entry).await;
                    return Ok(());
                }
                ActivityRun::Errored(message) => {
                    self.soft_error(instance, message).await;
                    return Ok(());
                }
            }

            if activity.kind == ActivityKind::End {
                instance.complete()?;
                let entry = self.logger.entry(
                    instance.id.clone(),
                    LogOperation::StatusChanged,
                    "completed",
                );
                self.logger.append(entry).await;
                return Ok(());
            }

            let branches =
                match self
                    .router
                    .route(definition, &activity_id, &instance.context)
                {
                    Ok(branches) => branches,
                    Err(e) => {
                        self.soft_error(instance, e.to_string()).await;
                        return Ok(());
                    }
                };

            // No branch fired: the instance stays parked here
            for branch in branches {
                let target = match definition.activity(&branch.target) {
                    Some(target) => target,
                    None => {
                        self.soft_error(
                            instance,
                            format!("transition target {} not in definition", branch.target.0),
                        )
                        .await;
                        return Ok(());
                    }
                };

                if definition.enable_log {
                    let entry = self
                        .logger
                        .entry(
                            instance.id.clone(),
                            LogOperation::TransitionTaken,
                            format!("{} -> {}", activity_id.0, branch.target.0),
                        )
                        .with_activity(activity_id.clone());
                    self.logger.append(entry).await;
                }

                match target.kind {
                    ActivityKind::AwaitParallel => {
                        let expected = definition.incoming_count(&target.id);
                        let arrival = self.joins.arrive(
                            &instance.id,
                            &target.id,
                            branch.branch.clone(),
                            expected,
                        );
                        match arrival {
                            Arrival::Complete => {
                                if definition.enable_log {
                                    let entry = self
                                        .logger
                                        .entry(
                                            instance.id.clone(),
                                            LogOperation::JoinArrival,
                                            format!("join {} complete", target.id.0),
                                        )
                                        .with_activity(target.id.clone());
                                    self.logger.append(entry).await;
                                }
                                instance.enter_activity(target.id.clone());
                                queue.push_back(target.id.clone());
                            }
                            Arrival::Pending { arrived, expected } => {
                                if definition.enable_log {
                                    let entry = self
                                        .logger
                                        .entry(
                                            instance.id.clone(),
                                            LogOperation::JoinArrival,
                                            format!(
                                                "join {} waiting ({}/{})",
                                                target.id.0, arrived, expected
                                            ),
                                        )
                                        .with_activity(target.id.clone());
                                    self.logger.append(entry).await;
                                }
                            }
                            Arrival::Duplicate => {
                                let entry = self
                                    .logger
                                    .entry(
                                        instance.id.clone(),
                                        LogOperation::Anomaly,
                                        format!(
                                            "duplicate arrival of branch {} at {}",
                                            branch.branch.0, target.id.0
                                        ),
                                    )
                                    .with_activity(target.id.clone());
                                self.logger.append(entry).await;
                            }
                        }
                    }
                    ActivityKind::Timer => {
                        instance.enter_activity(target.id.clone());
                        self.timers
                            .schedule(&instance.id, &target.id, target.pause())
                            .await?;
                    }
                    ActivityKind::User | ActivityKind::MultiInnerWorkflow => {
                        // Parks until an external trigger re-enters
                        instance.enter_activity(target.id.clone());
                    }
                    _ => {
                        instance.enter_activity(target.id.clone());
                        queue.push_back(target.id.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Run an activity's pre, main and after function lists, applying
    /// directives as they come back.
    async fn run_activity(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        activity: &Activity,
        trigger: &Trigger,
    ) -> ActivityRun {
        let mut activity_attempts: u32 = 0;

        'activity: loop {
            let phases = [
                &activity.pre_functions,
                &activity.functions,
                &activity.after_functions,
            ];

            'phases: for phase in phases {
                let mut idx = 0;
                let mut attempts: u32 = 0;

                while idx < phase.len() {
                    let function_id = &phase[idx];
                    let function = match definition.function(function_id) {
                        Some(function) => function,
                        None => {
                            return ActivityRun::Errored(format!(
                                "function {} not in definition",
                                function_id.0
                            ));
                        }
                    };

                    let call = FunctionCall {
                        instance_id: instance.id.clone(),
                        activity_id: activity.id.clone(),
                        function_id: function.id.clone(),
                        parameters: function.parameters.clone(),
                        context: instance.context.clone(),
                        trigger: trigger.payload.clone(),
                        attempt: attempts,
                    };

                    let invoked = tokio::time::timeout(
                        self.config.advance_ceiling,
                        self.invoker.invoke(function, call),
                    )
                    .await;

                    let invocation = match invoked {
                        Ok(Ok(invocation)) => invocation,
                        Ok(Err(e)) => return ActivityRun::Errored(e.to_string()),
                        Err(_) => {
                            return ActivityRun::Errored(format!(
                                "function {} exceeded the {}ms ceiling",
                                function.id.0,
                                self.config.advance_ceiling.as_millis()
                            ));
                        }
                    };

                    if let Some(context) = invocation.context {
                        instance.context = context;
                    }
                    instance.last_result = Some(invocation.result.clone());
                    instance.touch();

                    if definition.enable_log {
                        let entry = self
                            .logger
                            .entry(
                                instance.id.clone(),
                                LogOperation::FunctionInvoked,
                                format!("{} -> {:?}", function.name, invocation.directive),
                            )
                            .with_activity(activity.id.clone())
                            .with_function(function.id.clone())
                            .with_detail(invocation.result.clone());
                        self.logger.append(entry).await;
                    }

                    match invocation.directive {
                        Directive::Continue => {
                            idx += 1;
                            attempts = 0;
                        }
                        Directive::BreakOperation => continue 'phases,
                        Directive::BreakFunction | Directive::BreakActivity => {
                            return ActivityRun::Parked;
                        }
                        Directive::BreakWorkflow | Directive::CancelWorkflow => {
                            return ActivityRun::Cancelled;
                        }
                        Directive::ReRunOperation | Directive::ReRunFunction => {
                            attempts += 1;
                            if attempts > self.config.retry_budget {
                                return ActivityRun::Errored(
                                    EngineError::FatalRetryExceeded(format!(
                                        "function {} retried {} times",
                                        function.id.0, attempts
                                    ))
                                    .to_string(),
                                );
                            }
                        }
                        Directive::ReRunActivity => {
                            activity_attempts += 1;
                            if activity_attempts > self.config.retry_budget {
                                return ActivityRun::Errored(
                                    EngineError::FatalRetryExceeded(format!(
                                        "activity {} retried {} times",
                                        activity.id.0, activity_attempts
                                    ))
                                    .to_string(),
                                );
                            }
                            continue 'activity;
                        }
                        Directive::RestartWorkflow => return ActivityRun::Restarted,
                    }
                }
            }

            return ActivityRun::Completed;
        }
    }

    /// Park the instance in the Error status and log the cause
    async fn soft_error(&self, instance: &mut WorkflowInstance, message: String) {
        tracing::warn!(
            instance_id = %instance.id.0,
            error = %message,
            "advance ended in error"
        );
        if instance.mark_error(message.clone()).is_ok() {
            let entry = self.logger.entry(
                instance.id.clone(),
                LogOperation::Anomaly,
                message,
            );
            self.logger.append(entry).await;
        }
    }
}
