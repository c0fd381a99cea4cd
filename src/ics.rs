//! iCalendar (RFC 5545) export for events.

use chrono::{DateTime, Utc};

use crate::models::EventModel;

pub const CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

const PRODID: &str = "-//CampusConnect//Event//EN";
// Octets per content line, excluding the CRLF.
const MAX_LINE_OCTETS: usize = 75;

pub fn filename(event_id: i64) -> String {
    format!("event-{}.ics", event_id)
}

/// Renders one VEVENT wrapped in a VCALENDAR. `stamp` becomes DTSTAMP.
pub fn render_event(event: &EventModel, stamp: DateTime<Utc>) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", PRODID),
        "BEGIN:VEVENT".to_string(),
        format!("UID:event-{}@campusconnect.com", event.id),
        format!("DTSTAMP:{}", timestamp(stamp)),
        format!("DTSTART:{}", timestamp(event.start_time)),
    ];
    if let Some(end) = event.end_time {
        lines.push(format!("DTEND:{}", timestamp(end)));
    }
    lines.push(format!("SUMMARY:{}", escape_text(&event.title)));
    if let Some(ref description) = event.description {
        lines.push(format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(ref venue) = event.venue {
        lines.push(format!("LOCATION:{}", escape_text(venue)));
    }
    if !event.tags.is_empty() {
        let tags: Vec<String> = event.tags.iter().map(|t| escape_text(t)).collect();
        lines.push(format!("CATEGORIES:{}", tags.join(",")));
    }
    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in &lines {
        out.push_str(&fold(line));
        out.push_str("\r\n");
    }
    out
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

/// Splits a content line into CRLF + space continuations without cutting a UTF-8 sequence.
fn fold(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut used = 0;
    for c in line.chars() {
        let width = c.len_utf8();
        if used + width > MAX_LINE_OCTETS {
            out.push_str("\r\n ");
            // The leading space counts toward the continuation line.
            used = 1;
        }
        out.push(c);
        used += width;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event() -> EventModel {
        let start = Utc.with_ymd_and_hms(2024, 10, 3, 14, 30, 0).unwrap();
        EventModel {
            id: 12,
            title: "Robotics, demo; day".to_string(),
            description: Some("Bring laptops\nand chargers".to_string()),
            start_time: start,
            end_time: Some(start + chrono::Duration::hours(2)),
            venue: Some("Main hall".to_string()),
            organizer_id: None,
            organizer_name: None,
            tags: vec!["tech".to_string(), "club".to_string()],
            max_attendees: None,
            attendee_count: 0,
            is_rsvped: false,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_render_event() {
        let stamp = Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap();
        let ics = render_event(&event(), stamp);

        let lines: Vec<&str> = ics.split("\r\n").collect();
        assert_eq!(lines.first(), Some(&"BEGIN:VCALENDAR"));
        assert_eq!(lines.last(), Some(&""));
        assert!(lines.contains(&"UID:event-12@campusconnect.com"));
        assert!(lines.contains(&"DTSTAMP:20240901T080000Z"));
        assert!(lines.contains(&"DTSTART:20241003T143000Z"));
        assert!(lines.contains(&"DTEND:20241003T163000Z"));
        assert!(lines.contains(&"SUMMARY:Robotics\\, demo\\; day"));
        assert!(lines.contains(&"DESCRIPTION:Bring laptops\\nand chargers"));
        assert!(lines.contains(&"LOCATION:Main hall"));
        assert!(lines.contains(&"CATEGORIES:tech,club"));
        assert!(!ics.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_optional_properties_omitted() {
        let mut event = event();
        event.end_time = None;
        event.description = None;
        event.venue = None;
        event.tags.clear();

        let ics = render_event(&event, Utc::now());

        assert!(!ics.contains("DTEND"));
        assert!(!ics.contains("DESCRIPTION"));
        assert!(!ics.contains("LOCATION"));
        assert!(!ics.contains("CATEGORIES"));
    }

    #[test]
    fn test_long_lines_are_folded() {
        let line = format!("SUMMARY:{}", "é".repeat(60));
        let folded = fold(&line);

        for part in folded.split("\r\n") {
            assert!(part.len() <= MAX_LINE_OCTETS, "{} octets", part.len());
        }
        assert_eq!(folded.replace("\r\n ", ""), line);
    }

    #[test]
    fn test_filename() {
        assert_eq!(filename(7), "event-7.ics");
    }
}
