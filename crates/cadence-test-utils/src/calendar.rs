use std::sync::Mutex;

use futures::future::BoxFuture;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::CalendarProvider;
use cadence_core::types::{CalendarEvent, CreatedEvent, MailAccount, NewEvent, TimeRange};

#[derive(Default)]
struct Inner {
    busy: Vec<TimeRange>,
    created: Vec<NewEvent>,
    fail_free_busy: bool,
    fail_create: bool,
}

/// Calendar with a fixed list of busy intervals.
#[derive(Default)]
pub struct MockCalendar {
    inner: Mutex<Inner>,
}

impl MockCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy(busy: Vec<TimeRange>) -> Self {
        let cal = Self::default();
        cal.inner.lock().unwrap().busy = busy;
        cal
    }

    /// Events passed to `create_event`.
    pub fn created(&self) -> Vec<NewEvent> {
        self.inner.lock().unwrap().created.clone()
    }

    pub fn fail_free_busy(&self, fail: bool) {
        self.inner.lock().unwrap().fail_free_busy = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.inner.lock().unwrap().fail_create = fail;
    }
}

impl CalendarProvider for MockCalendar {
    fn list_events<'a>(
        &'a self,
        _account: &'a MailAccount,
        range: TimeRange,
    ) -> BoxFuture<'a, Result<Vec<CalendarEvent>>> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .busy
                .iter()
                .filter(|b| b.overlaps(&range))
                .enumerate()
                .map(|(i, b)| CalendarEvent {
                    id: format!("busy-{}", i),
                    summary: "Busy".into(),
                    start: b.start,
                    end: b.end,
                })
                .collect())
        })
    }

    fn free_busy<'a>(
        &'a self,
        _account: &'a MailAccount,
        range: TimeRange,
    ) -> BoxFuture<'a, Result<Vec<TimeRange>>> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap();
            if inner.fail_free_busy {
                return Err(CadenceError::Calendar("freeBusy: HTTP 503".into()));
            }
            Ok(inner.busy.iter().filter(|b| b.overlaps(&range)).copied().collect())
        })
    }

    fn create_event<'a>(
        &'a self,
        _account: &'a MailAccount,
        event: &'a NewEvent,
    ) -> BoxFuture<'a, Result<CreatedEvent>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_create {
                return Err(CadenceError::Calendar("events.insert: HTTP 403".into()));
            }
            inner.created.push(event.clone());
            let id = format!("event-{}", inner.created.len());
            Ok(CreatedEvent {
                html_link: Some(format!("https://calendar.mock/{}", id)),
                id,
            })
        })
    }
}
