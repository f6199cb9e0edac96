use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Half-open date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Timespan {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

/// Cut `[start, end]` into steps of `step_days`. The first span is always
/// present; later spans start while the cursor is before `end`, and every
/// span is clipped to `end`.
pub fn partition(start: NaiveDate, end: NaiveDate, step_days: u32) -> Vec<Timespan> {
    let step = Days::new(u64::from(step_days.max(1)));
    let advance = |d: NaiveDate| d.checked_add_days(step).unwrap_or(NaiveDate::MAX);

    let mut spans = vec![Timespan {
        start,
        end: end.min(advance(start)),
    }];
    let mut cursor = advance(start);
    while cursor < end {
        let next = advance(cursor);
        spans.push(Timespan {
            start: cursor,
            end: end.min(next),
        });
        cursor = next;
    }
    spans
}

/// Index of the span containing `date`. Spans must be sorted and disjoint,
/// as returned by [`partition`].
pub fn locate(spans: &[Timespan], date: NaiveDate) -> Option<usize> {
    let idx = spans.partition_point(|s| s.end <= date);
    spans.get(idx).filter(|s| s.contains(date)).map(|_| idx)
}

/// Parse the leading `YYYY-MM-DD` of a timestamp such as
/// `2020-01-05 13:22:11+00:00`.
pub fn parse_post_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn weekly_partition_of_january() {
        let spans = partition(d("2020-01-01"), d("2020-02-01"), 7);
        let starts: Vec<String> = spans.iter().map(|s| s.start.to_string()).collect();
        assert_eq!(
            starts,
            vec!["2020-01-01", "2020-01-08", "2020-01-15", "2020-01-22", "2020-01-29"]
        );
        assert_eq!(spans.last().unwrap().end, d("2020-02-01"));
    }

    #[test]
    fn equal_dates_yield_one_empty_span() {
        let spans = partition(d("2020-01-01"), d("2020-01-01"), 7);
        assert_eq!(spans.len(), 1);
        assert!(!spans[0].contains(d("2020-01-01")));
    }

    #[test]
    fn step_longer_than_range_is_clipped() {
        let spans = partition(d("2020-01-01"), d("2020-01-10"), 3650);
        assert_eq!(spans, vec![Timespan { start: d("2020-01-01"), end: d("2020-01-10") }]);
    }

    #[test]
    fn locate_respects_half_open_bounds() {
        let spans = partition(d("2020-01-01"), d("2020-02-01"), 7);
        assert_eq!(locate(&spans, d("2020-01-01")), Some(0));
        assert_eq!(locate(&spans, d("2020-01-07")), Some(0));
        assert_eq!(locate(&spans, d("2020-01-08")), Some(1));
        assert_eq!(locate(&spans, d("2020-01-31")), Some(4));
        assert_eq!(locate(&spans, d("2020-02-01")), None);
        assert_eq!(locate(&spans, d("2019-12-31")), None);
    }

    #[test]
    fn post_dates() {
        assert_eq!(parse_post_date("2020-01-05 13:22:11+00:00"), Some(d("2020-01-05")));
        assert_eq!(parse_post_date("2020-01-05"), Some(d("2020-01-05")));
        assert_eq!(parse_post_date("yesterday"), None);
        assert_eq!(parse_post_date(""), None);
    }
}
