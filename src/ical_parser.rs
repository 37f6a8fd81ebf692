// iCal (RFC 5545) parsing into busy events
// Lenient per entry, strict per document: a broken VEVENT is skipped, a non-calendar body is an error

use crate::calendar::{CalendarError, Event};
use crate::interval::Interval;
use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use icalendar::{
    Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime,
    Event as IcalEvent, EventLike,
};

#[derive(Debug, Clone)]
pub struct CalendarParser {
    utc_offset: FixedOffset,
}

impl Default for CalendarParser {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

// Content lines of one BEGIN:VEVENT ... END:VEVENT block, delimiters excluded
type EntryLines = Vec<String>;

impl CalendarParser {
    // `utc_offset` converts `Z` timestamps into the property's local time
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self { utc_offset }
    }

    pub fn parse(&self, raw: &str, source: Option<&str>) -> Result<Vec<Event>, CalendarError> {
        let lines = unfold(raw.trim_start_matches('\u{feff}'));
        let header = lines.first().map(String::as_str).unwrap_or_default();
        if !is_delimiter(header, "BEGIN", "VCALENDAR") {
            return Err(CalendarError::Format(format!(
                "expected BEGIN:VCALENDAR, found {:?}",
                header.chars().take(40).collect::<String>()
            )));
        }

        let (entries, mut skipped) = split_entries(&lines[1..], source);
        let declared = entries.len() + skipped;

        let mut events = Vec::new();
        for entry in &entries {
            match self.parse_entry(entry) {
                Some(mut event) => {
                    event.source = source.map(str::to_string);
                    events.push(event);
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::debug!(source, skipped, "skipped malformed calendar entries");
        }
        // Entries were declared but none could be read: the body is not a calendar we understand
        if declared > 0 && events.is_empty() {
            return Err(CalendarError::Format(format!(
                "none of the {} VEVENT entries could be read",
                declared
            )));
        }
        Ok(events)
    }

    // Each entry goes through icalendar on its own, so one bad entry cannot hide the others
    fn parse_entry(&self, entry: &EntryLines) -> Option<Event> {
        let mut content = Vec::with_capacity(entry.len());
        for line in entry {
            match normalize_content_line(line) {
                Some(line) => content.push(line),
                None => {
                    tracing::debug!(line = %line, "VEVENT with an unreadable content line");
                    return None;
                }
            }
        }

        let document = format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//apartment_booking//entry//EN\r\n\
             BEGIN:VEVENT\r\n{}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
            content.join("\r\n")
        );
        let calendar = match document.parse::<Calendar>() {
            Ok(calendar) => calendar,
            Err(e) => {
                tracing::debug!(error = %e, "VEVENT rejected by the iCal grammar");
                return None;
            }
        };

        let vevent = calendar.components.iter().find_map(|component| match component {
            CalendarComponent::Event(vevent) => Some(vevent),
            _ => None,
        });
        match vevent {
            Some(vevent) => self.to_event(vevent),
            None => {
                tracing::debug!("VEVENT produced no event component");
                None
            }
        }
    }

    fn to_event(&self, vevent: &IcalEvent) -> Option<Event> {
        let uid = vevent.get_uid().map(str::to_string);

        let Some(start) = vevent.get_start() else {
            tracing::debug!(?uid, "VEVENT without a usable DTSTART");
            return None;
        };
        let end = match (vevent.get_end(), &start) {
            (Some(end), _) => self.local_time(&end),
            // An all-day event without DTEND lasts exactly one day
            (None, DatePerhapsTime::Date(date)) => start_of_day(*date) + Duration::days(1),
            (None, DatePerhapsTime::DateTime(_)) => {
                tracing::debug!(?uid, "timed VEVENT without DTEND");
                return None;
            }
        };

        if vevent.property_value("RRULE").is_some() {
            tracing::debug!(?uid, "recurrence is not expanded, using first occurrence only");
        }

        let interval = match Interval::new(self.local_time(&start), end) {
            Ok(interval) => interval,
            Err(e) => {
                tracing::debug!(?uid, error = %e, "VEVENT with an empty interval");
                return None;
            }
        };

        Some(Event {
            interval,
            source: None,
            summary: vevent.get_summary().map(str::to_string),
            uid,
        })
    }

    fn local_time(&self, value: &DatePerhapsTime) -> NaiveDateTime {
        match value {
            DatePerhapsTime::Date(date) => start_of_day(*date),
            DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => *naive,
            DatePerhapsTime::DateTime(CalendarDateTime::Utc(utc)) => {
                utc.with_timezone(&self.utc_offset).naive_local()
            }
            // Zone database is not consulted, TZID wall time is taken as local
            DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, .. }) => {
                *date_time
            }
        }
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

// Joins folded continuation lines and drops blank ones
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line.strip_prefix([' ', '\t']) {
            Some(continuation) if !lines.is_empty() => {
                if let Some(previous) = lines.last_mut() {
                    previous.push_str(continuation);
                }
            }
            _ if line.trim().is_empty() => {}
            _ => lines.push(line.trim_end().to_string()),
        }
    }
    lines
}

fn is_delimiter(line: &str, keyword: &str, component: &str) -> bool {
    line.trim()
        .split_once(':')
        .map_or(false, |(name, value)| {
            name.eq_ignore_ascii_case(keyword) && value.trim().eq_ignore_ascii_case(component)
        })
}

// Collects VEVENT blocks up to END:VCALENDAR, returning them with the number of unterminated ones
fn split_entries(lines: &[String], source: Option<&str>) -> (Vec<EntryLines>, usize) {
    let mut entries = Vec::new();
    let mut current: Option<EntryLines> = None;
    let mut unterminated = 0usize;
    let mut closed = false;

    for line in lines {
        if is_delimiter(line, "END", "VCALENDAR") {
            closed = true;
            break;
        }
        if is_delimiter(line, "BEGIN", "VEVENT") {
            if current.replace(Vec::new()).is_some() {
                unterminated += 1;
            }
        } else if is_delimiter(line, "END", "VEVENT") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
        } else if let Some(entry) = current.as_mut() {
            entry.push(line.clone());
        }
    }

    if current.is_some() {
        unterminated += 1;
    }
    if unterminated > 0 {
        tracing::debug!(source, unterminated, "VEVENT without END:VEVENT");
    }
    if !closed {
        tracing::debug!(source, "calendar without END:VCALENDAR");
    }
    (entries, unterminated)
}

// `NAME[;PARAM=...]:VALUE` with the name upper-cased, or None when the line is not a content line
fn normalize_content_line(line: &str) -> Option<String> {
    let name_end = line.find([';', ':'])?;
    let name = &line[..name_end];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }
    line[name_end..].contains(':').then(|| {
        let mut normalized = name.to_ascii_uppercase();
        normalized.push_str(&line[name_end..]);
        normalized
    })
}

#[cfg(test)]
pub(crate) fn ics(lines: &[&str]) -> String {
    let mut document = vec!["BEGIN:VCALENDAR", "VERSION:2.0", "PRODID:-//test//booking//EN"];
    document.extend_from_slice(lines);
    document.push("END:VCALENDAR");
    document.join("\r\n") + "\r\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::interval;

    const BOOKING_FEED: &str = "https://admin.booking.com/hotel/ical/42.ics";

    #[test]
    fn test_parse_timed_events_in_order() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:first@booking.com",
            "SUMMARY:CLOSED - Not available",
            "DTSTART:20240110T140000",
            "DTEND:20240112T110000",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:second@booking.com",
            "DTSTART:20240201T140000",
            "DTEND:20240203T110000",
            "END:VEVENT",
        ]);

        let events = CalendarParser::default()
            .parse(&raw, Some(BOOKING_FEED))
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].interval,
            interval("2024-01-10T14:00", "2024-01-12T11:00")
        );
        assert_eq!(events[0].summary.as_deref(), Some("CLOSED - Not available"));
        assert_eq!(events[0].uid.as_deref(), Some("first@booking.com"));
        assert_eq!(events[0].source.as_deref(), Some(BOOKING_FEED));
        assert_eq!(
            events[1].interval,
            interval("2024-02-01T14:00", "2024-02-03T11:00")
        );
    }

    #[test]
    fn test_all_day_events_cover_full_local_days() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:range",
            "DTSTART;VALUE=DATE:20240110",
            "DTEND;VALUE=DATE:20240112",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:single-day",
            "DTSTART;VALUE=DATE:20240120",
            "END:VEVENT",
        ]);

        let events = CalendarParser::default().parse(&raw, None).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].interval,
            interval("2024-01-10T00:00", "2024-01-12T00:00")
        );
        assert_eq!(
            events[1].interval,
            interval("2024-01-20T00:00", "2024-01-21T00:00")
        );
    }

    #[test]
    fn test_utc_times_are_shifted_to_local_time() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:utc",
            "DTSTART:20240110T120000Z",
            "DTEND:20240112T090000Z",
            "END:VEVENT",
        ]);
        let parser = CalendarParser::new(FixedOffset::east_opt(2 * 3600).unwrap());

        let events = parser.parse(&raw, None).unwrap();

        assert_eq!(
            events[0].interval,
            interval("2024-01-10T14:00", "2024-01-12T11:00")
        );
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:no-start",
            "DTEND:20240112T110000",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:no-end",
            "DTSTART:20240110T140000",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:inverted",
            "DTSTART:20240112T110000",
            "DTEND:20240110T140000",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:garbage-date",
            "DTSTART:tomorrow",
            "DTEND:20240110T140000",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:no-colon",
            "DTSTART:20240115T140000",
            "THIS LINE HAS NO COLON",
            "DTEND:20240116T110000",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:unterminated",
            "DTSTART:20240120T140000",
            "DTEND:20240121T110000",
            "BEGIN:VEVENT",
            "UID:valid",
            "DTSTART:20240301T140000",
            "DTEND:20240302T110000",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:cut-off",
            "DTSTART:20240401T140000",
        ]);

        let events = CalendarParser::default().parse(&raw, None).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid.as_deref(), Some("valid"));
        assert_eq!(
            events[0].interval,
            interval("2024-03-01T14:00", "2024-03-02T11:00")
        );
    }

    #[test]
    fn test_text_after_the_calendar_is_ignored() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:stay",
            "DTSTART:20240110T140000",
            "DTEND:20240112T110000",
            "END:VEVENT",
        ]) + "X";

        let events = CalendarParser::default().parse(&raw, None).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].interval,
            interval("2024-01-10T14:00", "2024-01-12T11:00")
        );
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let raw = [
            "begin:vcalendar",
            "version:2.0",
            "begin:vevent",
            "uid:lower",
            "dtstart:20240110T140000",
            "dtend:20240112T110000",
            "end:vevent",
            "end:vcalendar",
        ]
        .join("\r\n");

        let events = CalendarParser::default().parse(&raw, None).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid.as_deref(), Some("lower"));
        assert_eq!(
            events[0].interval,
            interval("2024-01-10T14:00", "2024-01-12T11:00")
        );
    }

    #[test]
    fn test_folded_lines_are_joined() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:folded",
            "SUMMARY:CLOSED - Not",
            "  available",
            "DTSTART:20240110T",
            " 140000",
            "DTEND:20240112T110000",
            "END:VEVENT",
        ]);

        let events = CalendarParser::default().parse(&raw, None).unwrap();

        assert_eq!(events[0].summary.as_deref(), Some("CLOSED - Not available"));
        assert_eq!(
            events[0].interval,
            interval("2024-01-10T14:00", "2024-01-12T11:00")
        );
    }

    #[test]
    fn test_calendar_with_only_unreadable_entries_is_a_format_error() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:broken",
            "NO COLON HERE",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:never-closed",
        ]);

        assert!(matches!(
            CalendarParser::default().parse(&raw, None),
            Err(CalendarError::Format(_))
        ));
    }

    #[test]
    fn test_recurring_event_uses_first_occurrence() {
        let raw = ics(&[
            "BEGIN:VEVENT",
            "UID:weekly-cleaning",
            "DTSTART:20240105T100000",
            "DTEND:20240105T120000",
            "RRULE:FREQ=WEEKLY;COUNT=4",
            "END:VEVENT",
        ]);

        let events = CalendarParser::default().parse(&raw, None).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].interval,
            interval("2024-01-05T10:00", "2024-01-05T12:00")
        );
    }

    #[test]
    fn test_empty_calendar_has_no_events() {
        let events = CalendarParser::default().parse(&ics(&[]), None).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_unrecognized_document_is_a_format_error() {
        let result = CalendarParser::default().parse("FILE CONTENT", Some(BOOKING_FEED));
        assert!(matches!(result, Err(CalendarError::Format(_))));

        let html = "<html><body>Service unavailable</body></html>";
        assert!(matches!(
            CalendarParser::default().parse(html, None),
            Err(CalendarError::Format(_))
        ));
    }
}
