use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cadence_core::config::AppConfig;
use cadence_core::event::EventBus;
use cadence_core::traits::{CalendarProvider, IntentClassifier, MailProvider};
use cadence_store::SqliteStore;

use crate::cancel::{CancellationController, ExecutionRegistry};
use crate::heuristic::HeuristicClassifier;
use crate::poller::ReplyPoller;
use crate::router::SchedulingIntentRouter;
use crate::runner::CadenceRunner;
use crate::send::SendPipeline;

/// Every engine service wired together over one store and one set of
/// providers.
#[derive(Clone)]
pub struct CadenceEngine {
    pub store: Arc<SqliteStore>,
    pub events: Arc<EventBus>,
    pub pipeline: Arc<SendPipeline>,
    pub controller: Arc<CancellationController>,
    pub runner: Arc<CadenceRunner>,
    pub router: Arc<SchedulingIntentRouter>,
    pub poller: Arc<ReplyPoller>,
    pub shutdown: CancellationToken,
}

impl CadenceEngine {
    /// Without a classifier the keyword heuristics answer every question.
    pub fn new(
        config: &AppConfig,
        store: Arc<SqliteStore>,
        mail: Arc<dyn MailProvider>,
        calendar: Arc<dyn CalendarProvider>,
        classifier: Option<Arc<dyn IntentClassifier>>,
        events: Arc<EventBus>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let classifier = classifier.unwrap_or_else(|| {
            Arc::new(HeuristicClassifier::new(config.scheduling.clone())) as Arc<dyn IntentClassifier>
        });

        let registry = Arc::new(ExecutionRegistry::new());
        let pipeline = Arc::new(SendPipeline::new(mail.clone(), store.clone()));
        let controller = Arc::new(CancellationController::new(
            registry.clone(),
            store.clone(),
            events.clone(),
        ));
        let runner = Arc::new(CadenceRunner::new(
            store.clone(),
            pipeline.clone(),
            registry,
            events.clone(),
            shutdown.child_token(),
        ));
        let router = Arc::new(SchedulingIntentRouter::new(
            store.clone(),
            calendar,
            classifier,
            pipeline.clone(),
            events.clone(),
            config.scheduling.clone(),
        ));
        let poller = Arc::new(ReplyPoller::new(
            store.clone(),
            mail,
            controller.clone(),
            router.clone(),
            events.clone(),
            config.poller.clone(),
        ));

        Self {
            store,
            events,
            pipeline,
            controller,
            runner,
            router,
            poller,
            shutdown,
        }
    }

    /// Resume stored executions and start the reply poller when enabled.
    pub async fn start(&self, poller_enabled: bool) -> cadence_core::Result<usize> {
        let resumed = self.runner.recover().await?;
        if poller_enabled {
            tokio::spawn(self.poller.clone().run(self.shutdown.child_token()));
        }
        Ok(resumed)
    }

    /// Stop the poller and every running chain.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
