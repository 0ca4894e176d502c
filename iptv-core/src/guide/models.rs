use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Minute-resolution timestamp format used by the guide and by `at -t`.
pub const STAMP_FORMAT: &str = "%Y%m%d%H%M";

const STAMP_WITH_SECONDS: &str = "%Y%m%d%H%M%S";

/// Number of leading title characters compared when deduplicating airings.
pub const TITLE_PREFIX_CHARS: usize = 10;

pub fn parse_stamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    match raw.len() {
        12 => NaiveDateTime::parse_from_str(raw, STAMP_FORMAT).ok(),
        14 => NaiveDateTime::parse_from_str(raw, STAMP_WITH_SECONDS).ok(),
        _ => None,
    }
}

pub fn format_stamp(at: NaiveDateTime) -> String {
    at.format(STAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl DurationValue {
    pub fn seconds(&self) -> Option<i64> {
        match self {
            DurationValue::Seconds(value) => Some(*value),
            DurationValue::Fractional(value) if value.is_finite() => Some(value.trunc() as i64),
            DurationValue::Fractional(_) => None,
            DurationValue::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// One raw entry of `info_progs.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideEntry {
    pub title: String,
    pub channel: String,
    pub start: String,
    pub duration: DurationValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_fusion: Option<String>,
}

/// One program instance to capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiringRequest {
    pub title: String,
    pub channel: String,
    pub start: NaiveDateTime,
    pub duration_seconds: i64,
    pub fusion_at: Option<NaiveDateTime>,
}

impl AiringRequest {
    pub fn new(
        title: impl Into<String>,
        channel: impl Into<String>,
        start: NaiveDateTime,
        duration_seconds: i64,
    ) -> Self {
        Self {
            title: title.into(),
            channel: channel.into(),
            start,
            duration_seconds,
            fusion_at: None,
        }
    }

    pub fn with_fusion_at(mut self, at: NaiveDateTime) -> Self {
        self.fusion_at = Some(at);
        self
    }

    /// Saturates at the latest representable instant.
    pub fn end(&self) -> NaiveDateTime {
        checked_end(self.start, self.duration_seconds).unwrap_or(NaiveDateTime::MAX)
    }

    /// Fusion trigger from the guide, or the end plus `delay_minutes`.
    pub fn fusion_trigger(&self, delay_minutes: i64) -> NaiveDateTime {
        self.fusion_at.unwrap_or_else(|| {
            let end = self.end();
            TimeDelta::try_minutes(delay_minutes)
                .and_then(|delay| end.checked_add_signed(delay))
                .unwrap_or(end)
        })
    }

    fn title_prefix(&self) -> String {
        self.title.chars().take(TITLE_PREFIX_CHARS).collect()
    }

    /// Repeated guide entries share a title prefix and a start.
    pub fn is_same_airing(&self, other: &AiringRequest) -> bool {
        self.start == other.start && self.title_prefix() == other.title_prefix()
    }
}

fn checked_end(start: NaiveDateTime, duration_seconds: i64) -> Option<NaiveDateTime> {
    TimeDelta::try_seconds(duration_seconds).and_then(|duration| start.checked_add_signed(duration))
}

impl TryFrom<&GuideEntry> for AiringRequest {
    type Error = String;

    fn try_from(entry: &GuideEntry) -> Result<Self, Self::Error> {
        let start = parse_stamp(&entry.start)
            .ok_or_else(|| format!("invalid start {:?}", entry.start))?;
        let duration_seconds = entry
            .duration
            .seconds()
            .filter(|seconds| *seconds > 0 && checked_end(start, *seconds).is_some())
            .ok_or_else(|| format!("invalid duration {:?}", entry.duration))?;
        let fusion_at = match entry.start_fusion.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(
                parse_stamp(raw).ok_or_else(|| format!("invalid start_fusion {raw:?}"))?,
            ),
            _ => None,
        };
        Ok(Self {
            title: entry.title.clone(),
            channel: entry.channel.clone(),
            start,
            duration_seconds,
            fusion_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn stamps_round_trip_with_zero_padding() {
        assert_eq!(parse_stamp("202403092105"), Some(at(21, 5)));
        assert_eq!(parse_stamp("20240309210500"), Some(at(21, 5)));
        assert_eq!(format_stamp(at(8, 3)), "202403090803");
        assert_eq!(parse_stamp("2024-03-09"), None);
    }

    #[test]
    fn duration_accepts_numbers_and_strings() {
        let entry: GuideEntry = serde_json::from_str(
            r#"{"title":"Film","channel":"TF1","start":"202403092100","duration":"5400"}"#,
        )
        .unwrap();
        let airing = AiringRequest::try_from(&entry).unwrap();
        assert_eq!(airing.duration_seconds, 5400);
        assert_eq!(airing.end(), at(22, 30));
        assert_eq!(airing.fusion_trigger(5), at(22, 35));
    }

    #[test]
    fn duration_past_the_calendar_is_rejected() {
        let entry: GuideEntry = serde_json::from_str(
            r#"{"title":"Film","channel":"TF1","start":"202403092100","duration":"99999999999999"}"#,
        )
        .unwrap();
        let err = AiringRequest::try_from(&entry).unwrap_err();
        assert!(err.contains("invalid duration"));
    }

    #[test]
    fn end_saturates_instead_of_overflowing() {
        let airing = AiringRequest::new("Film", "tf1", at(21, 0), i64::MAX);
        assert_eq!(airing.end(), NaiveDateTime::MAX);
        assert_eq!(airing.fusion_trigger(5), NaiveDateTime::MAX);
    }

    #[test]
    fn explicit_fusion_stamp_wins() {
        let entry: GuideEntry = serde_json::from_str(
            r#"{"title":"Film","channel":"TF1","start":"202403092100","duration":3600,"start_fusion":"202403092220"}"#,
        )
        .unwrap();
        let airing = AiringRequest::try_from(&entry).unwrap();
        assert_eq!(airing.fusion_trigger(5), at(22, 20));
    }

    #[test]
    fn same_airing_compares_title_prefix_and_start() {
        let a = AiringRequest::new("Les Experts : Miami", "tf1", at(21, 0), 3000);
        let b = AiringRequest::new("Les Espions", "tf1", at(21, 0), 3000);
        let c = AiringRequest::new("Les Experts : Manhattan", "tf1", at(21, 0), 3000);
        let d = AiringRequest::new("Les Experts : Miami", "tf1", at(21, 50), 3000);
        assert!(!a.is_same_airing(&b));
        assert!(a.is_same_airing(&c));
        assert!(!a.is_same_airing(&d));
    }
}
