use std::path::PathBuf;

use serde::Serialize;

use crate::roles::Role;

/// One recorded file with its wall-clock placement, in epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub path: PathBuf,
    pub role: Role,
    pub start: i64,
    pub duration: i64,
}

impl Segment {
    pub fn new(path: impl Into<PathBuf>, role: Role, start: i64, duration: i64) -> Self {
        Self {
            path: path.into(),
            role,
            start,
            duration,
        }
    }

    pub fn end(&self) -> i64 {
        self.start + self.duration
    }

    fn overlaps_frontier(&self, frontier: i64) -> bool {
        self.start < frontier && frontier < self.end()
    }
}

/// Segments chosen to cover the airing, in playback order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedTimeline {
    pub segments: Vec<Segment>,
    pub max_known_end: i64,
}

impl MergedTimeline {
    pub fn last_end(&self) -> Option<i64> {
        self.segments.last().map(Segment::end)
    }

    /// False when coverage stops more than `tolerance` seconds short of the
    /// latest end recorded by any role.
    pub fn is_complete(&self, tolerance: i64) -> bool {
        match self.last_end() {
            Some(end) => end >= self.max_known_end - tolerance,
            None => false,
        }
    }

    /// Seconds between the timeline start and the given instant.
    pub fn offset(&self, at: i64) -> i64 {
        self.segments.first().map_or(0, |first| at - first.start)
    }
}

/// Greedy longest-coverage stitch over a pool of viable segments.
///
/// Starts from the earliest segment, then repeatedly takes, among segments
/// that start before the frontier and end after it, the one ending last.
/// Ties keep the first segment in pool order.
pub fn stitch(mut pool: Vec<Segment>) -> MergedTimeline {
    let max_known_end = pool.iter().map(Segment::end).max().unwrap_or(0);
    let mut segments = Vec::new();

    let Some(seed) = pool
        .iter()
        .enumerate()
        .min_by_key(|(index, segment)| (segment.start, *index))
        .map(|(index, _)| index)
    else {
        return MergedTimeline {
            segments,
            max_known_end,
        };
    };
    segments.push(pool.remove(seed));

    let mut previous: Vec<PathBuf> = Vec::new();
    loop {
        let frontier = segments.last().map_or(0, Segment::end);
        let candidates: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, segment)| segment.overlaps_frontier(frontier))
            .map(|(index, _)| index)
            .collect();
        if candidates.is_empty() {
            break;
        }
        let paths: Vec<PathBuf> = candidates.iter().map(|i| pool[*i].path.clone()).collect();
        if paths == previous {
            break;
        }

        let mut best = candidates[0];
        for index in &candidates[1..] {
            if pool[*index].end() > pool[best].end() {
                best = *index;
            }
        }
        segments.push(pool.remove(best));
        previous = paths;
    }

    MergedTimeline {
        segments,
        max_known_end,
    }
}

/// Seek position, in stream timestamps, where the next segment is cut.
///
/// Overlaps above `min_time` are trimmed, leaving `safe_time` seconds of
/// overlap at the seam; smaller ones keep the segment whole.
pub fn cut_point(diff: i64, embedded_start: f64, min_time: i64, safe_time: i64) -> i64 {
    let base = embedded_start.trunc() as i64;
    if diff > min_time {
        base + diff - safe_time
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(name: &str, role: Role, start: i64, end: i64) -> Segment {
        Segment::new(name, role, start, end - start)
    }

    fn names(timeline: &MergedTimeline) -> Vec<String> {
        timeline
            .segments
            .iter()
            .map(|s| s.path.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn overlapping_roles_chain_into_one_timeline() {
        let timeline = stitch(vec![
            seg("a", Role::Primary, 0, 600),
            seg("b", Role::Backup, 590, 1200),
            seg("c", Role::Backup2, 1195, 1800),
        ]);
        assert_eq!(names(&timeline), vec!["a", "b", "c"]);
        assert_eq!(timeline.max_known_end, 1800);
        assert!(timeline.is_complete(300));
    }

    #[test]
    fn gap_stops_the_stitch_and_flags_discontinuity() {
        let timeline = stitch(vec![
            seg("a", Role::Primary, 0, 700),
            seg("b", Role::Backup, 750, 1400),
        ]);
        assert_eq!(names(&timeline), vec!["a"]);
        assert!(!timeline.is_complete(300));
    }

    #[test]
    fn adjacent_segment_is_not_a_continuation() {
        let timeline = stitch(vec![
            seg("a", Role::Primary, 0, 600),
            seg("b", Role::Backup, 600, 1200),
        ]);
        assert_eq!(names(&timeline), vec!["a"]);
    }

    #[test]
    fn longest_continuation_wins_and_ties_keep_pool_order() {
        let timeline = stitch(vec![
            seg("a", Role::Primary, 0, 600),
            seg("short", Role::Primary, 500, 900),
            seg("long", Role::Backup, 550, 1500),
            seg("tie", Role::Backup2, 580, 1500),
        ]);
        assert_eq!(names(&timeline), vec!["a", "long"]);
    }

    #[test]
    fn earliest_start_seeds_and_first_wins_on_equal_start() {
        let timeline = stitch(vec![
            seg("late", Role::Primary, 100, 700),
            seg("first", Role::Backup, 10, 500),
            seg("second", Role::Backup2, 10, 900),
        ]);
        assert_eq!(names(&timeline)[0], "first");
    }

    #[test]
    fn enclosed_segments_never_loop() {
        let timeline = stitch(vec![
            seg("a", Role::Primary, 0, 1000),
            seg("inner", Role::Backup, 100, 900),
            seg("same", Role::Backup2, 0, 1000),
        ]);
        assert_eq!(names(&timeline), vec!["a"]);
    }

    #[test]
    fn empty_pool_yields_empty_timeline() {
        let timeline = stitch(Vec::new());
        assert!(timeline.segments.is_empty());
        assert!(!timeline.is_complete(300));
    }

    #[test]
    fn cut_point_trims_only_large_overlaps() {
        assert_eq!(cut_point(10, 100.0, 5, 2), 108);
        assert_eq!(cut_point(3, 100.0, 5, 2), 100);
        assert_eq!(cut_point(5, 100.9, 5, 2), 100);
        assert_eq!(cut_point(-40, 1.4, 0, 0), 1);
    }
}
