//! Origination-date formatting for display.

/// Placeholder shown when the message carries no Date header.
pub const DATE_UNKNOWN: &str = "Дата неизвестна";

const WEEKDAYS: &[(&str, &str)] = &[
    ("Mon", "Пн"),
    ("Tue", "Вт"),
    ("Wed", "Ср"),
    ("Thu", "Чт"),
    ("Fri", "Пт"),
    ("Sat", "Сб"),
    ("Sun", "Вс"),
];

const MONTHS: &[(&str, &str)] = &[
    ("Jan", "января"),
    ("Feb", "февраля"),
    ("Mar", "марта"),
    ("Apr", "апреля"),
    ("May", "мая"),
    ("Jun", "июня"),
    ("Jul", "июля"),
    ("Aug", "августа"),
    ("Sep", "сентября"),
    ("Oct", "октября"),
    ("Nov", "ноября"),
    ("Dec", "декабря"),
];

/// Format an RFC 822 origination date for display.
///
/// Assumes the common five-token layout (weekday, day, month, year,
/// time-with-offset), e.g. `"Mon, 12 May 2025 14:30:00 +0300"`. Weekday and
/// month go through the lookup tables, day and year pass through verbatim,
/// the time is truncated to `HH:MM`. Anything that does not split into at
/// least five tokens is returned unmodified; an absent header yields the
/// fixed placeholder. This never fails.
pub fn format_date(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return DATE_UNKNOWN.to_string();
    };

    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() < 5 {
        return raw.to_string();
    }

    let weekday = lookup(WEEKDAYS, tokens[0].trim_end_matches(','));
    let day = tokens[1];
    let month = lookup(MONTHS, tokens[2]);
    let year = tokens[3];
    let time: String = tokens[4].chars().take(5).collect();

    format!("{weekday}, {day} {month} {year}, {time}")
}

/// Translate through a fixed table, passing unknown tokens through verbatim.
fn lookup<'a>(table: &[(&str, &'a str)], token: &'a str) -> &'a str {
    table
        .iter()
        .find(|(en, _)| *en == token)
        .map_or(token, |(_, ru)| ru)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_layout_is_localized() {
        assert_eq!(
            format_date(Some("Mon, 12 May 2025 14:30:00 +0300")),
            "Пн, 12 мая 2025, 14:30"
        );
    }

    #[test]
    fn every_weekday_and_month_translates() {
        assert_eq!(
            format_date(Some("Sun, 1 Jan 2025 09:05:59 +0000")),
            "Вс, 1 января 2025, 09:05"
        );
        assert_eq!(
            format_date(Some("Sat, 31 Dec 2025 23:59:59 -0500")),
            "Сб, 31 декабря 2025, 23:59"
        );
    }

    #[test]
    fn absent_header_gives_placeholder() {
        assert_eq!(format_date(None), DATE_UNKNOWN);
        assert_eq!(format_date(Some("")), DATE_UNKNOWN);
        assert_eq!(format_date(Some("   ")), DATE_UNKNOWN);
    }

    #[test]
    fn too_few_tokens_returned_unmodified() {
        assert_eq!(format_date(Some("12 May 2025")), "12 May 2025");
        assert_eq!(format_date(Some("yesterday")), "yesterday");
    }

    #[test]
    fn unknown_tokens_pass_through() {
        assert_eq!(
            format_date(Some("Lun, 12 Mai 2025 14:30:00 +0300")),
            "Lun, 12 Mai 2025, 14:30"
        );
    }
}
