use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use cadence_core::config::SchedulingConfig;
use cadence_core::event::EventBus;
use cadence_core::traits::{CalendarProvider, IntentClassifier};
use cadence_core::types::{
    CadenceEvent, ExecutionRecord, IntentClassification, MailAccount, NewEvent, OutboundMessage,
    ProviderMessage, SchedulingType, UserSettings,
};
use cadence_store::SqliteStore;

use crate::dates::resolve_range;
use crate::heuristic::HeuristicClassifier;
use crate::send::{Delivery, SendPipeline};
use crate::slots::{format_slots, free_slots};
use crate::thread::{reply_references, reply_subject};

/// A genuine reply handed over by the poller.
#[derive(Debug, Clone)]
pub struct InboundContext {
    pub execution: Option<ExecutionRecord>,
    pub thread_id: String,
    pub message: ProviderMessage,
    /// Reply text with quoted history removed.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Disabled,
    NoIntent,
    AvailabilitySent { slots: usize, draft: bool },
    Booked { event_id: Option<String>, draft: bool },
    Failed(String),
}

impl RouteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RouteOutcome::Disabled => "disabled",
            RouteOutcome::NoIntent => "no_intent",
            RouteOutcome::AvailabilitySent { .. } => "availability_sent",
            RouteOutcome::Booked { .. } => "booked",
            RouteOutcome::Failed(_) => "failed",
        }
    }
}

/// Answers scheduling replies with free slots or a booking confirmation.
///
/// Nothing here fails past `route`: calendar and send errors come back as
/// `RouteOutcome::Failed`.
pub struct SchedulingIntentRouter {
    store: Arc<SqliteStore>,
    calendar: Arc<dyn CalendarProvider>,
    classifier: Arc<dyn IntentClassifier>,
    fallback: HeuristicClassifier,
    pipeline: Arc<SendPipeline>,
    events: Arc<EventBus>,
    config: SchedulingConfig,
}

impl SchedulingIntentRouter {
    pub fn new(
        store: Arc<SqliteStore>,
        calendar: Arc<dyn CalendarProvider>,
        classifier: Arc<dyn IntentClassifier>,
        pipeline: Arc<SendPipeline>,
        events: Arc<EventBus>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            store,
            calendar,
            classifier,
            fallback: HeuristicClassifier::new(config.clone()),
            pipeline,
            events,
            config,
        }
    }

    pub async fn route(&self, account: &MailAccount, ctx: &InboundContext) -> RouteOutcome {
        let outcome = self.route_inner(account, ctx).await;
        debug!(
            owner = %account.owner_id,
            thread_id = %ctx.thread_id,
            outcome = outcome.label(),
            "Reply routed"
        );
        if !matches!(outcome, RouteOutcome::Disabled | RouteOutcome::NoIntent) {
            self.events.publish(CadenceEvent::SchedulingResponse {
                owner_id: account.owner_id.clone(),
                thread_id: ctx.thread_id.clone(),
                outcome: outcome.label().to_string(),
            });
        }
        outcome
    }

    async fn route_inner(&self, account: &MailAccount, ctx: &InboundContext) -> RouteOutcome {
        let settings = match self.store.settings(&account.owner_id) {
            Ok(s) => s,
            Err(e) => return RouteOutcome::Failed(e.to_string()),
        };
        if !settings.ai_replies_enabled {
            return RouteOutcome::Disabled;
        }

        let classification = match self.classifier.classify_intent(&ctx.text).await {
            Ok(c) => c,
            Err(e) => {
                warn!(owner = %account.owner_id, error = %e, "Intent classification failed, treating as no intent");
                return RouteOutcome::NoIntent;
            }
        };

        match classification.scheduling_type {
            SchedulingType::None => RouteOutcome::NoIntent,
            SchedulingType::RequestAvailability | SchedulingType::GeneralScheduling => {
                self.offer_availability(account, ctx, settings).await
            }
            SchedulingType::BookSpecificTime => {
                self.book(account, ctx, settings, &classification).await
            }
        }
    }

    async fn offer_availability(
        &self,
        account: &MailAccount,
        ctx: &InboundContext,
        settings: UserSettings,
    ) -> RouteOutcome {
        let label = match self.classifier.extract_date_range(&ctx.text).await {
            Ok(hint) if !hint.range_label.trim().is_empty() => hint.range_label,
            Ok(_) => self.fallback.range_label(&ctx.text),
            Err(e) => {
                warn!(error = %e, "Date range extraction failed, using keyword fallback");
                self.fallback.range_label(&ctx.text)
            }
        };
        let now = Utc::now();
        let range = resolve_range(&label, now, &self.config);

        let busy = match self.calendar.free_busy(account, range).await {
            Ok(busy) => busy,
            Err(e) => {
                warn!(owner = %account.owner_id, error = %e, "Calendar lookup failed");
                return RouteOutcome::Failed(e.to_string());
            }
        };
        let slots = free_slots(range, &busy, &self.config, now);

        let body = if slots.is_empty() {
            format!(
                "Thanks for getting back to me! My calendar is full for {}. \
                 Could you suggest a few times that work for you?",
                label
            )
        } else {
            format!(
                "Thanks for getting back to me! Here are a few times that work on my end:\n\n{}\n\n\
                 Let me know which one suits you and I'll send over an invite.",
                format_slots(&slots, &self.config)
            )
        };

        let message = self.reply_message(account, ctx, body).await;
        match self
            .pipeline
            .send_reply(account, ctx.execution.as_ref(), &message, settings.draft_mode)
            .await
        {
            Ok(delivery) => {
                info!(owner = %account.owner_id, thread_id = %ctx.thread_id, slots = slots.len(), "Availability offered");
                RouteOutcome::AvailabilitySent {
                    slots: slots.len(),
                    draft: matches!(delivery, Delivery::Draft(_)),
                }
            }
            Err(e) => {
                warn!(owner = %account.owner_id, error = %e, "Availability reply failed");
                RouteOutcome::Failed(e.to_string())
            }
        }
    }

    async fn book(
        &self,
        account: &MailAccount,
        ctx: &InboundContext,
        settings: UserSettings,
        classification: &IntentClassification,
    ) -> RouteOutcome {
        let phrase = classification
            .suggested_times
            .first()
            .cloned()
            .unwrap_or_else(|| ctx.text.clone());
        let now = Utc::now();
        let parsed = match self.classifier.parse_time(&phrase, now).await {
            Ok(parsed) if parsed.end > parsed.start => parsed,
            Ok(_) => self.fallback.time(&phrase, now),
            Err(e) => {
                warn!(error = %e, "Time parsing failed, using keyword fallback");
                self.fallback.time(&phrase, now)
            }
        };

        let contact = ctx.execution.as_ref().and_then(|e| e.contact.as_ref());
        let attendee = contact
            .map(|c| c.email.clone())
            .unwrap_or_else(|| ctx.message.sender_address());
        let who = contact
            .map(|c| c.full_name())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| attendee.clone());
        let event = NewEvent {
            summary: format!("Meeting with {}", who),
            description: format!("Booked from email reply: \"{}\"", phrase),
            start: parsed.start,
            end: parsed.end,
            attendees: vec![attendee.clone()],
        };

        let created = match self.calendar.create_event(account, &event).await {
            Ok(created) => Some(created),
            Err(e) => {
                warn!(owner = %account.owner_id, error = %e, "Calendar event creation failed");
                None
            }
        };

        let body = match &created {
            Some(ev) => {
                let link = ev
                    .html_link
                    .as_deref()
                    .map(|l| format!("\n\nEvent: {}", l))
                    .unwrap_or_default();
                format!(
                    "Great, you're booked for {}. I've sent a calendar invite to {}.{}",
                    parsed.display, attendee, link
                )
            }
            None => format!(
                "{} works for me. I'll send over a calendar invite shortly.",
                parsed.display
            ),
        };

        let message = self.reply_message(account, ctx, body).await;
        match self
            .pipeline
            .send_reply(account, ctx.execution.as_ref(), &message, settings.draft_mode)
            .await
        {
            Ok(delivery) => {
                info!(owner = %account.owner_id, thread_id = %ctx.thread_id, time = %parsed.display, "Meeting confirmation sent");
                RouteOutcome::Booked {
                    event_id: created.map(|c| c.id),
                    draft: matches!(delivery, Delivery::Draft(_)),
                }
            }
            Err(e) => {
                warn!(owner = %account.owner_id, error = %e, "Confirmation reply failed");
                RouteOutcome::Failed(e.to_string())
            }
        }
    }

    /// A response in the reply's thread, anchored on the newest inbound
    /// message in the conversation at send time.
    async fn reply_message(
        &self,
        account: &MailAccount,
        ctx: &InboundContext,
        body: String,
    ) -> OutboundMessage {
        let anchor = self
            .latest_inbound_id(account, &ctx.thread_id)
            .await
            .or_else(|| ctx.message.message_id_header.clone());
        let snapshot = ctx.execution.as_ref().map(|e| &e.thread);
        let canonical = snapshot.and_then(|t| t.canonical_message_id.as_deref());
        let subject = snapshot
            .and_then(|t| t.canonical_subject.as_deref())
            .unwrap_or(&ctx.message.subject);
        let to = ctx
            .execution
            .as_ref()
            .and_then(|e| e.contact.as_ref())
            .map(|c| c.email.clone())
            .unwrap_or_else(|| ctx.message.sender_address());

        OutboundMessage {
            from: account.address.clone(),
            to,
            subject: reply_subject(subject),
            body,
            thread_id: Some(ctx.thread_id.clone()),
            references: anchor.as_deref().map(|a| reply_references(canonical, a)),
            in_reply_to: anchor,
        }
    }

    async fn latest_inbound_id(&self, account: &MailAccount, thread_id: &str) -> Option<String> {
        let own = account.address.to_lowercase();
        match self.pipeline.mail().get_thread(account, thread_id).await {
            Ok(messages) => messages
                .into_iter()
                .rev()
                .filter(|m| m.sender_address() != own)
                .find_map(|m| m.message_id_header),
            Err(e) => {
                warn!(thread_id, error = %e, "Thread re-fetch failed, anchoring on the routed reply");
                None
            }
        }
    }
}
