use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flyover::{Flyover, Period, select_best_per_interval};

/// Quality thresholds deciding which frames start out selected for export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameFilter {
    pub max_cloud_cover_percent: f64,
    pub min_coverage_percent: f64,
}

impl Default for FrameFilter {
    fn default() -> Self {
        Self {
            max_cloud_cover_percent: 100.0,
            min_coverage_percent: 0.0,
        }
    }
}

impl FrameFilter {
    pub fn accepts(&self, flyover: &Flyover) -> bool {
        flyover.cloud_cover().unwrap_or(0.0) <= self.max_cloud_cover_percent
            && flyover.coverage() >= self.min_coverage_percent
    }
}

/// A flyover chosen to become a frame, before any imagery is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFrame {
    pub flyover: Flyover,
    pub is_selected: bool,
}

/// Reduce flyovers to one per interval and mark which ones pass `filter`.
pub fn plan_frames(flyovers: &[Flyover], period: Period, filter: &FrameFilter) -> Vec<PlannedFrame> {
    select_best_per_interval(flyovers, period)
        .into_iter()
        .map(|flyover| PlannedFrame {
            is_selected: filter.accepts(&flyover),
            flyover,
        })
        .collect()
}

/// A finished, annotated timelapse frame (JPEG).
#[derive(Debug, Clone, PartialEq)]
pub struct TimelapseFrame {
    pub bytes: Bytes,
    pub timestamp: DateTime<Utc>,
    pub is_selected: bool,
}

impl TimelapseFrame {
    pub fn data_url(&self) -> String {
        crate::composer::jpeg_data_url(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameFilter, plan_frames};
    use crate::flyover::{Flyover, Period};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn pass(month: u32) -> Flyover {
        let from = Utc.with_ymd_and_hms(2022, month, 3, 9, 0, 0).unwrap();
        Flyover::new(from, from + chrono::Duration::minutes(4))
    }

    #[test]
    fn default_filter_accepts_everything() {
        let filter = FrameFilter::default();
        assert!(filter.accepts(&pass(1).with_cloud_cover(100.0).with_coverage(0.0)));
    }

    #[test]
    fn plan_marks_frames_outside_thresholds() {
        let flyovers = vec![
            pass(1).with_cloud_cover(70.0),
            pass(2).with_cloud_cover(5.0).with_coverage(95.0),
            pass(3).with_coverage(20.0),
        ];
        let filter = FrameFilter {
            max_cloud_cover_percent: 30.0,
            min_coverage_percent: 50.0,
        };
        let plan = plan_frames(&flyovers, Period::Month, &filter);
        let selected: Vec<bool> = plan.iter().map(|p| p.is_selected).collect();
        assert_eq!(selected, vec![false, true, false]);
    }

    #[test]
    fn filter_reads_partial_json() {
        let filter: FrameFilter = serde_json::from_str(r#"{"max_cloud_cover_percent": 20}"#).unwrap();
        assert_eq!(filter.max_cloud_cover_percent, 20.0);
        assert_eq!(filter.min_coverage_percent, 0.0);
    }
}
