use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// One candidate satellite acquisition over the area of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flyover {
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
    /// Share of the area covered by the acquisition, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<FlyoverMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlyoverMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_cloud_cover_percent: Option<f64>,
}

impl Flyover {
    pub fn new(from_time: DateTime<Utc>, to_time: DateTime<Utc>) -> Self {
        Self {
            from_time,
            to_time,
            coverage_percent: None,
            meta: None,
        }
    }

    pub fn with_coverage(mut self, percent: f64) -> Self {
        self.coverage_percent = Some(percent);
        self
    }

    pub fn with_cloud_cover(mut self, percent: f64) -> Self {
        self.meta = Some(FlyoverMeta {
            average_cloud_cover_percent: Some(percent),
        });
        self
    }

    /// Coverage in percent; absent means full coverage.
    pub fn coverage(&self) -> f64 {
        self.coverage_percent.unwrap_or(100.0)
    }

    pub fn cloud_cover(&self) -> Option<f64> {
        self.meta.as_ref()?.average_cloud_cover_percent
    }

    /// Cloud-free share in percent; absent cloud cover means fully clear.
    pub fn clear_sky_coverage(&self) -> f64 {
        self.cloud_cover().map_or(100.0, |cloud| 100.0 - cloud)
    }

    /// `coverage × clear sky`, higher is better.
    pub fn score(&self) -> f64 {
        self.coverage() * self.clear_sky_coverage()
    }
}

/// Bucket size used to merge neighbouring flyovers into one timelapse frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Orbit,
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Period; 5] = [
        Period::Orbit,
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Year,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Orbit => "orbit",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// Both instants fall into the same UTC calendar bucket (ISO weeks for `Week`).
    pub fn same_bucket(self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        match self {
            Period::Orbit => false,
            Period::Day => a.date_naive() == b.date_naive(),
            Period::Week => a.iso_week() == b.iso_week(),
            Period::Month => a.year() == b.year() && a.month() == b.month(),
            Period::Year => a.year() == b.year(),
        }
    }

    /// Any endpoint of `cur` shares a bucket with any endpoint of `prev`.
    pub fn touches(self, prev: &Flyover, cur: &Flyover) -> bool {
        [
            (cur.from_time, prev.from_time),
            (cur.to_time, prev.to_time),
            (cur.from_time, prev.to_time),
            (cur.to_time, prev.from_time),
        ]
        .into_iter()
        .any(|(a, b)| self.same_bucket(a, b))
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPeriod(pub String);

impl std::fmt::Display for UnknownPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown period {:?} (expected orbit, day, week, month or year)",
            self.0
        )
    }
}

impl std::error::Error for UnknownPeriod {}

impl std::str::FromStr for Period {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPeriod(s.to_string()))
    }
}

/// Split time-ordered flyovers into intervals.
///
/// Each flyover is compared with its immediate predecessor only; the input is expected
/// to be sorted by time already.
pub fn group_by_interval(flyovers: &[Flyover], period: Period) -> Vec<Vec<&Flyover>> {
    let mut groups: Vec<Vec<&Flyover>> = Vec::new();
    let mut prev: Option<&Flyover> = None;

    for flyover in flyovers {
        let joins = period != Period::Orbit && prev.is_some_and(|p| period.touches(p, flyover));
        match groups.last_mut() {
            Some(group) if joins => group.push(flyover),
            _ => groups.push(vec![flyover]),
        }
        prev = Some(flyover);
    }

    groups
}

fn best_of<'a>(group: &[&'a Flyover]) -> Option<&'a Flyover> {
    let mut best: Option<&'a Flyover> = None;
    for &candidate in group {
        if best.is_none_or(|b| candidate.score() > b.score()) {
            best = Some(candidate);
        }
    }
    best
}

/// One representative flyover per interval: the best `coverage × clear sky` score,
/// earliest on ties. Output follows interval order.
pub fn select_best_per_interval(flyovers: &[Flyover], period: Period) -> Vec<Flyover> {
    group_by_interval(flyovers, period)
        .iter()
        .filter_map(|group| best_of(group))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Flyover, Period, group_by_interval, select_best_per_interval};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn pass(y: i32, m: u32, d: u32) -> Flyover {
        Flyover::new(at(y, m, d, 10), at(y, m, d, 11))
    }

    #[test]
    fn orbit_keeps_every_flyover() {
        let flyovers: Vec<Flyover> = (1..=7).map(|d| pass(2021, 3, d)).collect();
        let selected = select_best_per_interval(&flyovers, Period::Orbit);
        assert_eq!(selected.len(), 7);
        assert_eq!(selected, flyovers);
    }

    #[test]
    fn year_picks_best_coverage_per_year() {
        let flyovers = vec![
            pass(2019, 4, 2).with_coverage(99.0).with_cloud_cover(15.0),
            pass(2019, 9, 14).with_coverage(40.0).with_cloud_cover(90.0),
            pass(2020, 6, 1).with_coverage(90.0).with_cloud_cover(20.0),
        ];
        let selected = select_best_per_interval(&flyovers, Period::Year);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0], flyovers[0]);
        assert_eq!(selected[0].score(), 99.0 * 85.0);
        assert_eq!(selected[1], flyovers[2]);
    }

    #[test]
    fn later_candidate_wins_when_strictly_better() {
        let flyovers = vec![
            pass(2020, 1, 5).with_cloud_cover(60.0),
            pass(2020, 1, 5).with_cloud_cover(10.0),
            pass(2020, 1, 5).with_cloud_cover(10.0).with_coverage(100.0),
        ];
        let selected = select_best_per_interval(&flyovers, Period::Day);
        assert_eq!(selected, vec![flyovers[1].clone()]);
    }

    #[test]
    fn missing_quality_fields_count_as_perfect() {
        let f = pass(2020, 1, 1);
        assert_eq!(f.coverage(), 100.0);
        assert_eq!(f.clear_sky_coverage(), 100.0);
        assert_eq!(f.score(), 10_000.0);
    }

    #[test]
    fn flyover_spanning_midnight_touches_next_day() {
        let late = Flyover::new(at(2020, 1, 31, 23), at(2020, 2, 1, 1));
        let next = pass(2020, 2, 1);
        let spanning = [late, next];
        let groups = group_by_interval(&spanning, Period::Day);
        assert_eq!(groups.len(), 1);

        let consecutive = [pass(2020, 1, 30), pass(2020, 1, 31)];
        let groups = group_by_interval(&consecutive, Period::Day);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn week_and_month_buckets() {
        // 2021-01-03 is a Sunday (ISO week 53 of 2020); 2021-01-04 starts week 1.
        let across_weeks = [pass(2021, 1, 3), pass(2021, 1, 4)];
        let groups = group_by_interval(&across_weeks, Period::Week);
        assert_eq!(groups.len(), 2);
        let same_week = [pass(2021, 1, 4), pass(2021, 1, 10)];
        let groups = group_by_interval(&same_week, Period::Week);
        assert_eq!(groups.len(), 1);

        let same_month = [pass(2021, 1, 1), pass(2021, 1, 31)];
        let groups = group_by_interval(&same_month, Period::Month);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn only_adjacent_flyovers_are_compared() {
        let flyovers = vec![pass(2021, 1, 5), pass(2021, 2, 5), pass(2021, 1, 20)];
        let groups = group_by_interval(&flyovers, Period::Month);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert!(select_best_per_interval(&[], Period::Month).is_empty());
    }

    #[test]
    fn parses_search_results() {
        let json = r#"[
            {"fromTime": "2020-05-01T10:00:00Z", "toTime": "2020-05-01T10:05:00Z",
             "coveragePercent": 80, "meta": {"averageCloudCoverPercent": 25}},
            {"fromTime": "2020-05-02T10:00:00Z", "toTime": "2020-05-02T10:05:00Z"}
        ]"#;
        let flyovers: Vec<Flyover> = serde_json::from_str(json).unwrap();
        assert_eq!(flyovers[0].score(), 80.0 * 75.0);
        assert_eq!(flyovers[1].cloud_cover(), None);
    }

    #[test]
    fn period_round_trips_through_strings() {
        for p in Period::ALL {
            assert_eq!(p.to_string().parse::<Period>(), Ok(p));
        }
        assert_eq!("Month".parse::<Period>(), Ok(Period::Month));
        assert!("fortnight".parse::<Period>().is_err());
    }
}
