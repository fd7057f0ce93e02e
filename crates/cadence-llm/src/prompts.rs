pub(crate) const CLASSIFY_INTENT: &str = "You triage replies to sales outreach emails. \
Decide whether the reply is about scheduling a meeting. Respond with a JSON object: \
{\"scheduling_type\": one of \"none\", \"request_availability\", \"book_specific_time\", \
\"general_scheduling\", \"suggested_times\": [phrases naming concrete times], \
\"confidence\": number between 0 and 1}. Use book_specific_time only when the sender \
proposes a concrete day and time.";

pub(crate) const EXTRACT_DATE_RANGE: &str = "Extract the date range a person is asking about \
from the text. Respond with a JSON object: {\"range_label\": one of \"today\", \"tomorrow\", \
\"this week\", \"next week\", \"next 2 weeks\", or a weekday name such as \"tuesday\", \
\"timezone\": IANA name or null}.";

pub(crate) fn parse_time(reference: &str) -> String {
    format!(
        "Resolve the meeting time described in the text to absolute UTC timestamps. \
The current time is {}. Default meeting length is 30 minutes. Respond with a JSON object: \
{{\"start\": RFC 3339, \"end\": RFC 3339, \"display\": human readable time}}.",
        reference
    )
}
