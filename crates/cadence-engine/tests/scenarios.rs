use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Weekday};
use tokio::sync::broadcast::Receiver;

use cadence_core::config::AppConfig;
use cadence_core::event::EventBus;
use cadence_core::traits::IntentClassifier;
use cadence_core::types::{
    CadenceEvent, Contact, ExecutionId, ExecutionRecord, SchedulingType, SentMessageRecord,
    StepRecord, StepStatus, ThreadSnapshot, UserSettings,
};
use cadence_engine::{CadenceEngine, CadenceGraph, RunRequest};
use cadence_store::SqliteStore;
use cadence_test_utils::fixtures::{self, CONTACT_ADDRESS, OWNER, OWNER_ADDRESS};
use cadence_test_utils::{MockCalendar, MockClassifier, MockMailProvider};

struct Harness {
    mail: Arc<MockMailProvider>,
    calendar: Arc<MockCalendar>,
    store: Arc<SqliteStore>,
    engine: CadenceEngine,
    rx: Receiver<CadenceEvent>,
}

fn harness(classifier: Option<Arc<MockClassifier>>) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store.upsert_account(&fixtures::account()).unwrap();
    harness_on(store, Arc::new(MockMailProvider::new()), classifier)
}

fn harness_on(
    store: Arc<SqliteStore>,
    mail: Arc<MockMailProvider>,
    classifier: Option<Arc<MockClassifier>>,
) -> Harness {
    let calendar = Arc::new(MockCalendar::new());
    let events = Arc::new(EventBus::new(256));
    let rx = events.subscribe();
    let engine = CadenceEngine::new(
        &AppConfig::default(),
        store.clone(),
        mail.clone(),
        calendar.clone(),
        classifier.map(|c| c as Arc<dyn IntentClassifier>),
        events,
    );
    Harness {
        mail,
        calendar,
        store,
        engine,
        rx,
    }
}

fn request(steps: &[(&str, &str, &str, u64)]) -> RunRequest {
    let graph: CadenceGraph =
        serde_json::from_value(fixtures::linear_graph_json(steps)).unwrap();
    RunRequest {
        owner_id: OWNER.into(),
        cadence_id: "cadence-1".into(),
        graph,
        contact: Some(fixtures::contact()),
    }
}

fn request_for(contact: Contact, steps: &[(&str, &str, &str, u64)]) -> RunRequest {
    RunRequest {
        contact: Some(contact),
        ..request(steps)
    }
}

fn second_contact() -> Contact {
    Contact {
        id: "contact-2".into(),
        email: "kim@other.io".into(),
        first_name: Some("Kim".into()),
        ..Default::default()
    }
}

fn status(h: &Harness, id: &ExecutionId, node: &str) -> Option<StepStatus> {
    h.store.step_status(id, node).unwrap()
}

fn drain(rx: &mut Receiver<CadenceEvent>) -> Vec<CadenceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count_cancellations(events: &[CadenceEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, CadenceEvent::ExecutionCancelled { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn scenario_a_delayed_step_reuses_thread_and_subject() {
    let mut h = harness(None);
    let started = tokio::time::Instant::now();
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "minutes", 2),
        ]))
        .await
        .unwrap();
    let id = out.execution_id.clone();

    assert_eq!(out.sent, 1);
    assert_eq!(out.queued, 1);
    assert_eq!(status(&h, &id, "e1"), Some(StepStatus::Sent));
    assert_eq!(status(&h, &id, "e2"), Some(StepStatus::Pending));

    tokio::time::sleep(Duration::from_secs(110)).await;
    assert_eq!(status(&h, &id, "e2"), Some(StepStatus::Pending));

    h.engine.runner.wait_for(&id).await;
    assert!(started.elapsed() >= Duration::from_secs(115));
    assert_eq!(status(&h, &id, "e2"), Some(StepStatus::Sent));

    let sent = h.mail.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].thread_id, None);
    assert_eq!(sent[1].thread_id.as_deref(), Some("thread-1"));
    assert_eq!(sent[1].subject, "S1");
    assert_eq!(sent[1].in_reply_to.as_deref(), Some("<msg-1@mock.mail>"));
    assert_eq!(sent[1].body, "Hi Lee, note e2");

    let (record, _) = h.store.execution_status(&id).unwrap();
    assert_eq!(record.thread.thread_id.as_deref(), Some("thread-1"));
    assert!(record.completed_at.is_some());
    assert!(drain(&mut h.rx)
        .iter()
        .any(|e| matches!(e, CadenceEvent::ExecutionCompleted { .. })));
}

#[tokio::test(start_paused = true)]
async fn scenario_b_out_of_office_reply_is_ignored() {
    let mut h = harness(None);
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "immediate", 0),
            ("e3", "S3", "immediate", 0),
            ("e4", "S4", "immediate", 0),
            ("e5", "S5", "days", 1),
        ]))
        .await
        .unwrap();
    assert_eq!(out.sent, 4);
    assert!(h
        .mail
        .sent()
        .iter()
        .all(|m| m.subject == "S1" && m.thread_id.as_deref().unwrap_or("thread-1") == "thread-1"));

    h.mail.inject_reply(
        "thread-1",
        CONTACT_ADDRESS,
        "Out of Office: Re: S1",
        "I am away until Monday.",
    );
    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 0);
    assert!(report.errors.is_empty());
    assert!(h.store.inbound_replies(OWNER).unwrap().is_empty());
    assert_eq!(status(&h, &out.execution_id, "e5"), Some(StepStatus::Pending));

    let events = drain(&mut h.rx);
    assert_eq!(count_cancellations(&events), 0);
    assert!(events
        .iter()
        .any(|e| matches!(e, CadenceEvent::InboundFiltered { .. })));
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn scenario_c_availability_reply_offers_slots_in_thread() {
    let classifier = Arc::new(
        MockClassifier::with_intent(SchedulingType::RequestAvailability).range("next week"),
    );
    let h = harness(Some(classifier));
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "days", 3),
        ]))
        .await
        .unwrap();

    let reply_id = h.mail.inject_reply(
        "thread-1",
        &format!("Lee Park <{}>", CONTACT_ADDRESS),
        "Re: S1",
        "I'm available next week",
    );
    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 1);

    let sent = h.mail.sent();
    let response = sent.last().unwrap();
    assert_eq!(response.thread_id.as_deref(), Some("thread-1"));
    assert_eq!(response.subject, "Re: S1");
    assert_eq!(response.to, CONTACT_ADDRESS);
    let anchor = format!("<{}@contact.mail>", reply_id);
    assert_eq!(response.in_reply_to.as_deref(), Some(anchor.as_str()));
    assert_eq!(
        response.references.as_deref(),
        Some(format!("<msg-1@mock.mail> {}", anchor).as_str())
    );
    assert_eq!(response.body.lines().filter(|l| l.starts_with("- ")).count(), 8);
    assert!(h.calendar.created().is_empty());

    assert_eq!(status(&h, &out.execution_id, "e2"), Some(StepStatus::Cancelled));
    h.engine.runner.wait_for(&out.execution_id).await;
    assert_eq!(h.mail.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_booking_reply_creates_event_and_cancels() {
    // No parsed time configured: the keyword fallback resolves the phrase.
    let classifier = Arc::new(MockClassifier::with_intent(SchedulingType::BookSpecificTime));
    let mut h = harness(Some(classifier.clone()));
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "days", 2),
            ("e3", "S3", "days", 4),
        ]))
        .await
        .unwrap();
    let id = out.execution_id.clone();

    h.mail.inject_reply(
        "thread-1",
        CONTACT_ADDRESS,
        "Re: S1",
        "How about Tuesday at 2pm?",
    );
    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 1);

    let created = h.calendar.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].start.weekday(), Weekday::Tue);
    assert_eq!(created[0].start.hour(), 14);
    assert_eq!(created[0].end - created[0].start, chrono::Duration::minutes(30));
    assert_eq!(created[0].attendees, vec![CONTACT_ADDRESS.to_string()]);
    assert!(classifier.calls().contains(&"parse_time".to_string()));

    let confirmation = h.mail.sent().last().cloned().unwrap();
    assert_eq!(confirmation.thread_id.as_deref(), Some("thread-1"));
    assert!(confirmation.body.contains("https://calendar.mock/event-1"));

    assert_eq!(status(&h, &id, "e1"), Some(StepStatus::Sent));
    assert_eq!(status(&h, &id, "e2"), Some(StepStatus::Cancelled));
    assert_eq!(status(&h, &id, "e3"), Some(StepStatus::Cancelled));

    h.engine.runner.wait_for(&id).await;
    let (record, _) = h.store.execution_status(&id).unwrap();
    assert!(record.cancelled_at.is_some());
    assert!(record.completed_at.is_none());
    assert_eq!(count_cancellations(&drain(&mut h.rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_e_two_replies_cancel_once_and_route_once() {
    let classifier = Arc::new(MockClassifier::with_intent(SchedulingType::None));
    let mut h = harness(Some(classifier.clone()));
    h.engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "days", 1),
        ]))
        .await
        .unwrap();

    h.mail.inject_reply("thread-1", CONTACT_ADDRESS, "Re: S1", "Thanks!");
    h.mail.inject_reply("thread-1", CONTACT_ADDRESS, "Re: S1", "One more thing");

    let first = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(first.found, 2);
    assert_eq!(h.store.inbound_replies(OWNER).unwrap().len(), 2);
    assert_eq!(
        classifier
            .calls()
            .iter()
            .filter(|c| c.as_str() == "classify_intent")
            .count(),
        1
    );

    // Same messages again: nothing new.
    let again = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(again.found, 0);

    // A later reply is logged and routed but does not re-cancel.
    h.mail.inject_reply("thread-1", CONTACT_ADDRESS, "Re: S1", "Following up");
    let later = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(later.found, 1);
    assert_eq!(h.store.inbound_replies(OWNER).unwrap().len(), 3);

    assert_eq!(count_cancellations(&drain(&mut h.rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn thread_fetch_failure_falls_back_to_subject_search() {
    let mut h = harness(Some(Arc::new(MockClassifier::with_intent(SchedulingType::None))));
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "days", 1),
        ]))
        .await
        .unwrap();

    let reply_id = h.mail.inject_reply("thread-1", CONTACT_ADDRESS, "Re: S1", "Interested");
    h.mail.fail_thread("thread-1");
    let query = format!("subject:\"S1\" -from:{}", OWNER_ADDRESS);
    h.mail.set_search_results(&query, vec![reply_id.clone()]);

    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 1);
    assert!(report.errors.is_empty());
    assert!(h.mail.queries().contains(&query));
    assert_eq!(status(&h, &out.execution_id, "e2"), Some(StepStatus::Cancelled));
    assert_eq!(count_cancellations(&drain(&mut h.rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn degraded_read_back_uses_synthetic_anchor() {
    let h = harness(None);
    h.mail.fail_read_back(true);
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "seconds", 30),
        ]))
        .await
        .unwrap();
    h.engine.runner.wait_for(&out.execution_id).await;

    let sent = h.mail.sent();
    assert_eq!(sent[1].in_reply_to.as_deref(), Some("<msg-1@mail.gmail.com>"));
}

#[tokio::test(start_paused = true)]
async fn failed_send_leaves_step_pending() {
    let mut h = harness(None);
    h.mail.fail_sends(true);
    let out = h
        .engine
        .runner
        .run_execution(request(&[("e1", "S1", "immediate", 0)]))
        .await
        .unwrap();
    assert_eq!(out.sent, 0);
    assert_eq!(out.failed, 1);
    assert_eq!(status(&h, &out.execution_id, "e1"), Some(StepStatus::Pending));
    assert!(drain(&mut h.rx)
        .iter()
        .any(|e| matches!(e, CadenceEvent::StepFailed { .. })));
}

#[tokio::test(start_paused = true)]
async fn pending_steps_resume_after_restart() {
    let first = harness(None);
    let out = first
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "minutes", 5),
        ]))
        .await
        .unwrap();
    let id = out.execution_id.clone();

    first.engine.stop();
    first.engine.runner.wait_for(&id).await;
    assert_eq!(status(&first, &id, "e2"), Some(StepStatus::Pending));
    assert!(first.store.execution(&id).unwrap().unwrap().completed_at.is_none());

    let second = harness_on(first.store.clone(), first.mail.clone(), None);
    assert_eq!(second.engine.runner.recover().await.unwrap(), 1);
    second.engine.runner.wait_for(&id).await;

    assert_eq!(status(&second, &id, "e2"), Some(StepStatus::Sent));
    let sent = second.mail.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].thread_id.as_deref(), Some("thread-1"));
    assert_eq!(sent[1].subject, "S1");
}

#[tokio::test(start_paused = true)]
async fn cancel_execution_is_one_shot() {
    let h = harness(None);
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "minutes", 1),
            ("e2", "S2", "minutes", 2),
        ]))
        .await
        .unwrap();
    assert_eq!(out.sent, 0);

    let controller = &h.engine.controller;
    assert_eq!(controller.cancel_execution(OWNER, "contact-1", "cadence-1").unwrap(), 1);
    assert_eq!(controller.cancel_execution(OWNER, "contact-1", "cadence-1").unwrap(), 0);

    h.engine.runner.wait_for(&out.execution_id).await;
    assert!(h.mail.sent().is_empty());
    assert_eq!(status(&h, &out.execution_id, "e1"), Some(StepStatus::Cancelled));
    assert_eq!(status(&h, &out.execution_id, "e2"), Some(StepStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn draft_mode_and_disabled_replies() {
    let classifier = Arc::new(
        MockClassifier::with_intent(SchedulingType::RequestAvailability).range("tomorrow"),
    );
    let h = harness(Some(classifier.clone()));
    h.store
        .set_settings(
            OWNER,
            UserSettings {
                ai_replies_enabled: true,
                draft_mode: true,
            },
        )
        .unwrap();
    h.engine
        .runner
        .run_execution(request(&[("e1", "S1", "immediate", 0)]))
        .await
        .unwrap();

    h.mail.inject_reply("thread-1", CONTACT_ADDRESS, "Re: S1", "When are you free?");
    h.engine.poller.poll_user(OWNER).await;
    assert_eq!(h.mail.sent().len(), 1);
    assert_eq!(h.mail.drafts().len(), 1);
    assert_eq!(h.mail.drafts()[0].thread_id.as_deref(), Some("thread-1"));

    h.store
        .set_settings(
            OWNER,
            UserSettings {
                ai_replies_enabled: false,
                draft_mode: false,
            },
        )
        .unwrap();
    let calls_before = classifier.calls().len();
    h.mail.inject_reply("thread-1", CONTACT_ADDRESS, "Re: S1", "Any update?");
    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 1);
    assert_eq!(classifier.calls().len(), calls_before);
    assert_eq!(h.mail.drafts().len(), 1);
}

#[tokio::test]
async fn poll_without_credentials_reports_nothing() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let h = harness_on(store, Arc::new(MockMailProvider::new()), None);
    let report = h.engine.poller.poll_user("nobody").await;
    assert_eq!(report.found, 0);
    assert!(report.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn subject_search_ignores_other_contacts_replies() {
    let h = harness(Some(Arc::new(MockClassifier::with_intent(SchedulingType::None))));
    let steps = [
        ("e1", "Quick question", "immediate", 0),
        ("e2", "Follow up", "days", 2),
    ];
    let lee = h.engine.runner.run_execution(request(&steps)).await.unwrap();
    let kim = h
        .engine
        .runner
        .run_execution(request_for(second_contact(), &steps))
        .await
        .unwrap();

    let reply_id = h.mail.inject_reply("thread-2", "Kim <kim@other.io>", "Re: Quick question", "Sure");
    h.mail.fail_thread("thread-1");
    h.mail.fail_thread("thread-2");
    let query = format!("subject:\"Quick question\" -from:{}", OWNER_ADDRESS);
    h.mail.set_search_results(&query, vec![reply_id.clone()]);

    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 1);
    assert!(report.errors.is_empty());

    let replies = h.store.inbound_replies(OWNER).unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].thread_id, "thread-2");
    assert_eq!(replies[0].contact_id.as_deref(), Some("contact-2"));
    assert_eq!(status(&h, &lee.execution_id, "e2"), Some(StepStatus::Pending));
    assert_eq!(status(&h, &kim.execution_id, "e2"), Some(StepStatus::Cancelled));
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn out_of_range_delay_is_skipped_without_panic() {
    let mut h = harness(None);
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "days", 1_000_000_000),
        ]))
        .await
        .unwrap();

    assert_eq!(out.sent, 1);
    assert_eq!(out.queued, 0);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].node_id, "e2");
    assert_eq!(status(&h, &out.execution_id, "e2"), None);

    h.engine.runner.wait_for(&out.execution_id).await;
    let events = drain(&mut h.rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, CadenceEvent::StepSkipped { node_id, .. } if node_id == "e2")));
    assert!(events
        .iter()
        .any(|e| matches!(e, CadenceEvent::ExecutionCompleted { .. })));
}

#[tokio::test(start_paused = true)]
async fn reply_stays_unlogged_until_cancellation_succeeds() {
    let h = harness(None);
    let id = ExecutionId::new();
    let now = chrono::Utc::now();
    h.store
        .insert_sent_message(&SentMessageRecord {
            provider_message_id: "out-1".into(),
            owner_id: OWNER.into(),
            execution_id: Some(id.clone()),
            cadence_id: None,
            contact_id: None,
            node_id: Some("e1".into()),
            thread_id: "thread-x".into(),
            canonical_message_id: None,
            subject: "S1".into(),
            recipient: CONTACT_ADDRESS.into(),
            sent_at: now,
        })
        .unwrap();
    h.mail.inject_reply("thread-x", CONTACT_ADDRESS, "Re: S1", "Yes please");

    // The execution behind the conversation is not stored yet: cancel fails.
    let failed = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(failed.found, 0);
    assert_eq!(failed.errors.len(), 1);
    assert!(h.store.inbound_replies(OWNER).unwrap().is_empty());

    let record = ExecutionRecord {
        id: id.clone(),
        owner_id: OWNER.into(),
        cadence_id: "cadence-1".into(),
        contact: None,
        thread: ThreadSnapshot::default(),
        created_at: now,
        cancelled_at: None,
        completed_at: None,
    };
    let pending = StepRecord {
        execution_id: id.clone(),
        node_id: "e2".into(),
        position: 1,
        recipient: CONTACT_ADDRESS.into(),
        subject: "S2".into(),
        body: "Hi".into(),
        scheduled_for: now + chrono::Duration::days(1),
        status: StepStatus::Pending,
        sent_at: None,
        provider_message_id: None,
    };
    h.store.create_execution(&record, &[pending]).unwrap();

    let retried = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(retried.found, 1);
    assert!(retried.errors.is_empty());
    assert_eq!(h.store.inbound_replies(OWNER).unwrap().len(), 1);
    assert_eq!(status(&h, &id, "e2"), Some(StepStatus::Cancelled));
    assert!(h.store.execution(&id).unwrap().unwrap().cancelled_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn owners_own_message_is_not_a_reply() {
    let mut h = harness(None);
    let out = h
        .engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "days", 1),
        ]))
        .await
        .unwrap();

    // Sent from another client, so its id is not among our sent records.
    h.mail.inject_reply(
        "thread-1",
        "Rep <REP@Sender.io>",
        "Re: S1",
        "Adding a note to the thread",
    );
    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 0);
    assert!(report.errors.is_empty());
    assert!(h.store.inbound_replies(OWNER).unwrap().is_empty());
    assert_eq!(status(&h, &out.execution_id, "e2"), Some(StepStatus::Pending));
    assert_eq!(count_cancellations(&drain(&mut h.rx)), 0);
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn unreadable_conversation_does_not_block_others() {
    let h = harness(None);
    let steps = [("e1", "S1", "immediate", 0), ("e2", "S2", "days", 1)];
    let lee = h.engine.runner.run_execution(request(&steps)).await.unwrap();
    let kim = h
        .engine
        .runner
        .run_execution(request_for(second_contact(), &steps))
        .await
        .unwrap();

    h.mail.inject_reply("thread-1", CONTACT_ADDRESS, "Re: S1", "Interested");
    h.mail.inject_reply("thread-2", "kim@other.io", "Re: S1", "Interested too");
    h.mail.fail_thread("thread-1");
    h.mail.fail_search(true);

    let report = h.engine.poller.poll_user(OWNER).await;
    assert_eq!(report.found, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("thread thread-1"));
    assert_eq!(status(&h, &lee.execution_id, "e2"), Some(StepStatus::Pending));
    assert_eq!(status(&h, &kim.execution_id, "e2"), Some(StepStatus::Cancelled));
    h.engine.stop();
}

#[tokio::test(start_paused = true)]
async fn filtered_auto_reply_is_reported_once() {
    let mut h = harness(None);
    h.engine
        .runner
        .run_execution(request(&[
            ("e1", "S1", "immediate", 0),
            ("e2", "S2", "days", 1),
        ]))
        .await
        .unwrap();
    h.mail.inject_reply(
        "thread-1",
        CONTACT_ADDRESS,
        "Automatic reply: S1",
        "I am out of the office this week.",
    );

    for _ in 0..3 {
        let report = h.engine.poller.poll_user(OWNER).await;
        assert_eq!(report.found, 0);
    }
    let filtered = drain(&mut h.rx)
        .iter()
        .filter(|e| matches!(e, CadenceEvent::InboundFiltered { .. }))
        .count();
    assert_eq!(filtered, 1);
    h.engine.stop();
}
