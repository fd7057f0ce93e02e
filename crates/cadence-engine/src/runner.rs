use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadence_core::error::{CadenceError, Result};
use cadence_core::event::EventBus;
use cadence_core::types::{
    CadenceEvent, Contact, ExecutionId, ExecutionRecord, MailAccount, StepRecord, StepStatus,
    ThreadSnapshot,
};
use cadence_store::SqliteStore;

use crate::cancel::ExecutionRegistry;
use crate::delay::{plan_timeline, wait_until};
use crate::graph::{CadenceGraph, SkippedStep};
use crate::send::SendPipeline;
use crate::thread::ThreadContinuity;

/// A request to run one cadence for one contact.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub owner_id: String,
    pub cadence_id: String,
    pub graph: CadenceGraph,
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub execution_id: ExecutionId,
    /// Steps sent during the call.
    pub sent: usize,
    /// Steps whose send failed during the call; they stay pending.
    pub failed: usize,
    /// Steps left for the background chain.
    pub queued: usize,
    #[serde(skip)]
    pub skipped: Vec<SkippedStep>,
}

/// Everything a chain needs to fire its remaining steps.
///
/// `steps[i]` lines up with index `i` of the registry chain.
struct ChainContext {
    account: MailAccount,
    record: ExecutionRecord,
    steps: Vec<StepRecord>,
    thread: ThreadContinuity,
    token: CancellationToken,
}

#[derive(Debug, Clone, Copy, Default)]
struct DriveStats {
    sent: usize,
    failed: usize,
    fired: usize,
}

enum Fired {
    Sent,
    Failed,
    Skipped,
}

/// Plans execution timelines and drives them to completion.
///
/// Steps due at run time are sent before `run_execution` returns; the rest
/// are fired by one spawned task per execution.
pub struct CadenceRunner {
    store: Arc<SqliteStore>,
    pipeline: Arc<SendPipeline>,
    registry: Arc<ExecutionRegistry>,
    events: Arc<EventBus>,
    tasks: Mutex<HashMap<ExecutionId, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl CadenceRunner {
    pub fn new(
        store: Arc<SqliteStore>,
        pipeline: Arc<SendPipeline>,
        registry: Arc<ExecutionRegistry>,
        events: Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            pipeline,
            registry,
            events,
            tasks: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// Resolve, plan and persist an execution, send its due steps and queue
    /// the rest.
    pub async fn run_execution(self: &Arc<Self>, request: RunRequest) -> Result<RunOutcome> {
        let account = self
            .store
            .mail_account(&request.owner_id)?
            .ok_or_else(|| CadenceError::NoCredentials(request.owner_id.clone()))?;

        let resolution = request.graph.resolve(request.contact.as_ref())?;
        for skipped in &resolution.skipped {
            self.events.publish(CadenceEvent::StepSkipped {
                node_id: skipped.node_id.clone(),
                reason: skipped.reason.clone(),
            });
        }

        let now = Utc::now();
        let delays: Vec<_> = resolution.steps.iter().map(|s| s.delay).collect();
        let planned = plan_timeline(&delays, now);

        let record = ExecutionRecord {
            id: ExecutionId::new(),
            owner_id: request.owner_id,
            cadence_id: request.cadence_id,
            contact: request.contact,
            thread: ThreadSnapshot::default(),
            created_at: now,
            cancelled_at: None,
            completed_at: None,
        };
        let steps: Vec<StepRecord> = resolution
            .steps
            .iter()
            .zip(planned)
            .enumerate()
            .map(|(position, (step, scheduled_for))| StepRecord {
                execution_id: record.id.clone(),
                node_id: step.node_id.clone(),
                position,
                recipient: step.recipient.clone(),
                subject: step.subject.clone(),
                body: step.body.clone(),
                scheduled_for,
                status: StepStatus::Pending,
                sent_at: None,
                provider_message_id: None,
            })
            .collect();
        self.store.create_execution(&record, &steps)?;

        let execution_id = record.id.clone();
        info!(
            execution_id = %execution_id,
            owner = %record.owner_id,
            cadence = %record.cadence_id,
            steps = steps.len(),
            skipped = resolution.skipped.len(),
            "Execution started"
        );
        self.events.publish(CadenceEvent::ExecutionStarted {
            execution_id: execution_id.clone(),
            steps: steps.len(),
        });

        let token = self.shutdown.child_token();
        self.registry.register(
            &execution_id,
            steps.iter().map(|s| s.node_id.clone()).collect(),
            token.clone(),
        );

        let total = steps.len();
        let mut ctx = ChainContext {
            account,
            thread: ThreadContinuity::new(record.thread.clone()),
            record,
            steps,
            token,
        };
        let stats = self.drive(&mut ctx, Some(now)).await;
        self.spawn_chain(ctx);

        Ok(RunOutcome {
            execution_id,
            sent: stats.sent,
            failed: stats.failed,
            queued: total - stats.fired,
            skipped: resolution.skipped,
        })
    }

    /// Resume every stored execution that still has pending steps and is not
    /// already running. Overdue steps fire straight away, in order.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let mut resumed = 0;
        for id in self.store.executions_with_pending_steps()? {
            if self.registry.contains(&id) {
                continue;
            }
            let (record, steps) = self.store.execution_status(&id)?;
            let Some(account) = self.store.mail_account(&record.owner_id)? else {
                warn!(execution_id = %id, owner = %record.owner_id, "No credentials, not resuming");
                continue;
            };
            let pending: Vec<StepRecord> = steps
                .into_iter()
                .filter(|s| s.status == StepStatus::Pending)
                .collect();

            let token = self.shutdown.child_token();
            self.registry.register(
                &id,
                pending.iter().map(|s| s.node_id.clone()).collect(),
                token.clone(),
            );
            info!(execution_id = %id, pending = pending.len(), "Resuming execution");
            self.spawn_chain(ChainContext {
                account,
                thread: ThreadContinuity::new(record.thread.clone()),
                record,
                steps: pending,
                token,
            });
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Wait for an execution's background chain to finish.
    pub async fn wait_for(&self, id: &ExecutionId) {
        let handle = self.lock_tasks().remove(id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(execution_id = %id, error = %e, "Execution task panicked");
            }
        }
    }

    /// Stop every chain. Pending steps stay pending for the next `recover`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_chain(self: &Arc<Self>, mut ctx: ChainContext) {
        let runner = Arc::clone(self);
        let id = ctx.record.id.clone();
        let handle = tokio::spawn(async move {
            runner.drive(&mut ctx, None).await;
            runner.finish(&ctx);
        });
        let mut tasks = self.lock_tasks();
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(id, handle);
    }

    /// Fire chain steps in order. With `until` set, only steps planned at or
    /// before it are fired and nothing waits; otherwise each step waits for
    /// its planned time.
    async fn drive(&self, ctx: &mut ChainContext, until: Option<DateTime<Utc>>) -> DriveStats {
        let id = ctx.record.id.clone();
        let mut stats = DriveStats::default();

        while let Some((idx, node_id)) = self.registry.successor(&id) {
            let due = ctx.steps[idx].scheduled_for;
            match until {
                Some(limit) if due > limit => break,
                Some(_) => {}
                None => {
                    debug!(execution_id = %id, node_id = %node_id, due = %due, "Waiting for step");
                    if !wait_until(due, &ctx.token).await {
                        debug!(execution_id = %id, node_id = %node_id, "Wait cancelled");
                        break;
                    }
                }
            }

            // Cancellation may have cut the chain during the wait.
            if !self.registry.advance(&id, idx) {
                debug!(execution_id = %id, node_id = %node_id, "Chain cut, not firing");
                break;
            }

            stats.fired += 1;
            match self.fire(ctx, idx).await {
                Fired::Sent => stats.sent += 1,
                Fired::Failed => stats.failed += 1,
                Fired::Skipped => {}
            }
        }
        stats
    }

    async fn fire(&self, ctx: &mut ChainContext, idx: usize) -> Fired {
        let step = ctx.steps[idx].clone();
        let id = ctx.record.id.clone();

        match self.store.step_status(&id, &step.node_id) {
            Ok(Some(StepStatus::Pending)) => {}
            Ok(status) => {
                debug!(execution_id = %id, node_id = %step.node_id, ?status, "Step not pending, skipping");
                return Fired::Skipped;
            }
            Err(e) => {
                error!(execution_id = %id, node_id = %step.node_id, error = %e, "Failed to read step status");
                return Fired::Failed;
            }
        }

        // A cancel that lands after `advance` must still stop the send.
        if ctx.token.is_cancelled() {
            debug!(execution_id = %id, node_id = %step.node_id, "Chain cancelled before send");
            return Fired::Skipped;
        }

        let message = ctx.thread.outbound(
            &ctx.account.address,
            &step.recipient,
            &step.subject,
            &step.body,
        );
        match self
            .pipeline
            .send_step(&ctx.account, &ctx.record, &step, &message)
            .await
        {
            Ok(outcome) => {
                if ctx
                    .thread
                    .establish(&outcome.thread_id, &message.subject, &outcome.message_id)
                {
                    ctx.record.thread = ctx.thread.snapshot().clone();
                    if let Err(e) = self.store.update_thread(&id, &ctx.record.thread) {
                        error!(execution_id = %id, error = %e, "Failed to persist thread snapshot");
                    }
                }
                self.events.publish(CadenceEvent::StepSent {
                    execution_id: id,
                    node_id: step.node_id,
                    thread_id: outcome.thread_id,
                });
                Fired::Sent
            }
            Err(e) => {
                warn!(execution_id = %id, node_id = %step.node_id, error = %e, "Step send failed, leaving pending");
                self.events.publish(CadenceEvent::StepFailed {
                    execution_id: id,
                    node_id: step.node_id,
                    error: e.to_string(),
                });
                Fired::Failed
            }
        }
    }

    fn finish(&self, ctx: &ChainContext) {
        let id = &ctx.record.id;
        if ctx.token.is_cancelled() {
            // Cut by cancellation (already forgotten) or stopped by shutdown.
            self.registry.remove(id);
            debug!(execution_id = %id, "Chain stopped");
            return;
        }
        if !self.registry.remove(id) {
            return;
        }
        if let Err(e) = self.store.mark_completed(id, Utc::now()) {
            error!(execution_id = %id, error = %e, "Failed to mark execution completed");
            return;
        }
        info!(execution_id = %id, "Execution completed");
        self.events.publish(CadenceEvent::ExecutionCompleted {
            execution_id: id.clone(),
        });
    }
}
