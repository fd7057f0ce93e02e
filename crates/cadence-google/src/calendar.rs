use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use serde::Deserialize;

use cadence_core::config::GoogleConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::CalendarProvider;
use cadence_core::types::{CalendarEvent, CreatedEvent, MailAccount, NewEvent, TimeRange};

use crate::oauth::{Api, GoogleAuth};

/// Google Calendar v3 client bound to one calendar id.
pub struct GoogleCalendar {
    auth: Arc<GoogleAuth>,
    base_url: String,
    calendar_id: String,
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Deserialize)]
struct EventItem {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: EventTime,
    end: EventTime,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(default)]
    date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    date: Option<NaiveDate>,
}

impl EventTime {
    // All-day events carry only a date.
    fn resolve(&self) -> Option<DateTime<Utc>> {
        self.date_time
            .or_else(|| self.date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc()))
    }
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<TimeRange>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertedEvent {
    id: String,
    #[serde(default)]
    html_link: Option<String>,
}

impl GoogleCalendar {
    pub fn new(config: &GoogleConfig, auth: Arc<GoogleAuth>) -> Self {
        Self {
            auth,
            base_url: config.calendar_base_url.trim_end_matches('/').to_string(),
            calendar_id: config.calendar_id.clone(),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.base_url, self.calendar_id)
    }
}

fn decode_err(op: &str, e: reqwest::Error) -> CadenceError {
    CadenceError::Calendar(format!("{}: invalid response: {}", op, e))
}

impl CalendarProvider for GoogleCalendar {
    fn list_events<'a>(
        &'a self,
        account: &'a MailAccount,
        range: TimeRange,
    ) -> BoxFuture<'a, Result<Vec<CalendarEvent>>> {
        Box::pin(async move {
            let url = self.events_url();
            let time_min = range.start.to_rfc3339();
            let time_max = range.end.to_rfc3339();
            let response = self
                .auth
                .execute(account, Api::Calendar, "events.list", |token| {
                    self.auth.http().get(&url).bearer_auth(token).query(&[
                        ("timeMin", time_min.as_str()),
                        ("timeMax", time_max.as_str()),
                        ("singleEvents", "true"),
                        ("orderBy", "startTime"),
                    ])
                })
                .await?;
            let list: EventList = response
                .json()
                .await
                .map_err(|e| decode_err("events.list", e))?;
            Ok(list
                .items
                .into_iter()
                .filter_map(|item| {
                    Some(CalendarEvent {
                        start: item.start.resolve()?,
                        end: item.end.resolve()?,
                        id: item.id,
                        summary: item.summary.unwrap_or_default(),
                    })
                })
                .collect())
        })
    }

    fn free_busy<'a>(
        &'a self,
        account: &'a MailAccount,
        range: TimeRange,
    ) -> BoxFuture<'a, Result<Vec<TimeRange>>> {
        Box::pin(async move {
            let url = format!("{}/freeBusy", self.base_url);
            let body = serde_json::json!({
                "timeMin": range.start.to_rfc3339(),
                "timeMax": range.end.to_rfc3339(),
                "items": [{ "id": self.calendar_id }],
            });
            let response = self
                .auth
                .execute(account, Api::Calendar, "freeBusy", |token| {
                    self.auth.http().post(&url).bearer_auth(token).json(&body)
                })
                .await?;
            let parsed: FreeBusyResponse = response
                .json()
                .await
                .map_err(|e| decode_err("freeBusy", e))?;
            Ok(parsed
                .calendars
                .into_values()
                .flat_map(|c| c.busy)
                .collect())
        })
    }

    fn create_event<'a>(
        &'a self,
        account: &'a MailAccount,
        event: &'a NewEvent,
    ) -> BoxFuture<'a, Result<CreatedEvent>> {
        Box::pin(async move {
            let url = self.events_url();
            let attendees: Vec<_> = event
                .attendees
                .iter()
                .map(|email| serde_json::json!({ "email": email }))
                .collect();
            let body = serde_json::json!({
                "summary": event.summary,
                "description": event.description,
                "start": { "dateTime": event.start.to_rfc3339() },
                "end": { "dateTime": event.end.to_rfc3339() },
                "attendees": attendees,
            });
            let response = self
                .auth
                .execute(account, Api::Calendar, "events.insert", |token| {
                    self.auth
                        .http()
                        .post(&url)
                        .bearer_auth(token)
                        .query(&[("sendUpdates", "all")])
                        .json(&body)
                })
                .await?;
            let created: InsertedEvent = response
                .json()
                .await
                .map_err(|e| decode_err("events.insert", e))?;
            Ok(CreatedEvent {
                id: created.id,
                html_link: created.html_link,
            })
        })
    }
}
