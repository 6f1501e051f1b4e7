//! Formats the raw CMS timestamps carried by the display models. The CMS
//! emits ISO 8601 timestamps with a `+0000`-style offset, which isn't quite
//! RFC 3339, so both forms (and bare dates) are accepted.

use std::fmt;

use chrono::{DateTime, FixedOffset, Locale, NaiveDate, TimeZone};

/// A `strftime` pattern plus the locale used for month and day names.
#[derive(Clone, Copy, Debug)]
pub struct DateFormat<'a> {
    pattern: &'a str,
    locale: Locale,
}

impl<'a> DateFormat<'a> {
    /// Constructs a [`DateFormat`]. `locale` is a POSIX locale name such as
    /// `pt_BR` or `en_US`.
    pub fn new(pattern: &'a str, locale: &str) -> Result<DateFormat<'a>, UnknownLocale> {
        Ok(DateFormat {
            pattern,
            locale: Locale::try_from(locale).map_err(|_| UnknownLocale(locale.to_owned()))?,
        })
    }

    /// Formats `raw`, or returns `None` if it isn't a recognizable timestamp.
    pub fn format(&self, raw: &str) -> Option<String> {
        parse_timestamp(raw).map(|date| date.format_localized(self.pattern, self.locale).to_string())
    }

    /// Formats an optional timestamp for display: unparseable values are
    /// shown as-is and missing ones as the empty string.
    pub fn display(&self, raw: Option<&str>) -> String {
        match raw {
            Some(raw) => self.format(raw).unwrap_or_else(|| raw.to_owned()),
            None => String::new(),
        }
    }
}

/// Parses an RFC 3339 timestamp, a timestamp with a colon-less offset
/// (`2021-03-25T19:25:28+0000`), or a bare date (taken as midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(date);
    }
    let naive = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let utc = FixedOffset::east_opt(0)?;
    Some(utc.from_utc_datetime(&naive.and_hms_opt(0, 0, 0)?))
}

/// Returned when a configured locale name isn't known.
#[derive(Debug)]
pub struct UnknownLocale(pub String);

impl fmt::Display for UnknownLocale {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown locale: {}", &self.0)
    }
}

impl std::error::Error for UnknownLocale {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_cms_timestamp() {
        let date = parse_timestamp("2021-03-25T19:25:28+0000").unwrap();
        assert_eq!("2021-03-25T19:25:28+00:00", date.to_rfc3339());
    }

    #[test]
    fn test_parse_rfc3339() {
        let date = parse_timestamp("2021-03-25T16:25:28-03:00").unwrap();
        assert_eq!("2021-03-25T16:25:28-03:00", date.to_rfc3339());
    }

    #[test]
    fn test_parse_bare_date() {
        let date = parse_timestamp("2021-03-25").unwrap();
        assert_eq!("2021-03-25T00:00:00+00:00", date.to_rfc3339());
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(None, parse_timestamp("yesterday"));
    }

    #[test]
    fn test_format() -> Result<(), UnknownLocale> {
        let format = DateFormat::new("%d %b %Y", "en_US")?;
        assert_eq!(
            Some("25 Mar 2021".to_owned()),
            format.format("2021-03-25T19:25:28+0000")
        );
        Ok(())
    }

    #[test]
    fn test_display_falls_back_to_raw() -> Result<(), UnknownLocale> {
        let format = DateFormat::new("%d %b %Y", "pt_BR")?;
        assert_eq!("someday", format.display(Some("someday")));
        assert_eq!("", format.display(None));
        Ok(())
    }

    #[test]
    fn test_unknown_locale() {
        assert!(DateFormat::new("%d", "xx_XX").is_err());
    }
}
