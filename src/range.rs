//! Ranges and the range planner (§3 "Range", §4.3).

use tracing::debug;

/// A contiguous byte interval of the target file, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub range_start: u64,
    pub range_end: u64,
    /// As reported by the server for this part; `None` until a response
    /// headers are parsed.
    pub content_length: Option<u64>,
    /// Bytes actually received and accepted so far.
    pub content_offset: u64,
    /// Next byte offset where the decoded stream must be written. Differs
    /// from `content_offset` under chunked/compressed transfer.
    pub file_write_offset: u64,
}

impl Range {
    pub fn new(range_start: u64, range_end: u64) -> Self {
        Self {
            range_start,
            range_end,
            content_length: None,
            content_offset: 0,
            file_write_offset: range_start,
        }
    }

    /// `0 <= content_offset <= (range_end - range_start) + 1` (data model
    /// invariant).
    pub fn len(&self) -> u64 {
        self.range_end - self.range_start + 1
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.content_offset)
    }

    pub fn is_complete(&self) -> bool {
        self.content_offset >= self.len()
    }

    pub fn resume_range_header(&self) -> String {
        format!(
            "bytes={}-{}",
            self.range_start + self.content_offset,
            self.range_end
        )
    }
}

/// Splits/re-splits remaining work into Ranges honoring the job's `parts`,
/// and tracks which planned Ranges have not yet been assigned to a live
/// Connection (the `range_queue` cursor from §3).
#[derive(Debug, Default)]
pub struct RangePlanner {
    pub range_list: Vec<Range>,
    /// Index into `range_list` of the first Range not yet assigned to a
    /// live Connection. Ranges before the cursor are done or in-flight.
    pub range_queue_cursor: usize,
}

impl RangePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a freshly-created Download whose total size is unknown yet:
    /// exactly one placeholder Range with start = end = 0.
    pub fn seed_placeholder(&mut self) {
        self.range_list = vec![Range::new(0, 0)];
        self.range_queue_cursor = 0;
    }

    pub fn seed_whole_file(&mut self, file_size: u64) {
        self.range_list = vec![Range::new(0, file_size.saturating_sub(1))];
        self.range_queue_cursor = 0;
    }

    /// Ranges in `range_list` not yet completed.
    fn incomplete_indices(&self) -> Vec<usize> {
        self.range_list
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_complete())
            .map(|(i, _)| i)
            .collect()
    }

    /// Run the planner for a desired part count `n`. Idempotent: planning
    /// with N parts twice in a row on the same state is a no-op (§8).
    pub fn plan(&mut self, n: usize) {
        let n = n.max(1);
        let incomplete = self.incomplete_indices();
        let r = incomplete.len();

        if r == 0 {
            if self.range_list.is_empty() {
                self.seed_placeholder();
            }
            return;
        }
        if r >= n {
            debug!(r, n, "range planner: already at or above desired parts");
            return;
        }

        let parts_per = n / r;
        let mut rem = n % r;

        // Work right-to-left so indices into range_list for ranges we
        // haven't touched yet stay valid as we splice in sub-ranges.
        let mut rebuilt: Vec<Range> = Vec::with_capacity(self.range_list.len() + n);
        let mut carry_over: usize = 0;

        let mut completed_before_each: Vec<Range> = Vec::new();
        let mut cursor = 0usize;
        for (pos, range) in self.range_list.iter().enumerate() {
            if incomplete.contains(&pos) {
                break;
            }
            completed_before_each.push(*range);
            cursor = pos + 1;
        }
        rebuilt.extend(completed_before_each);

        for &idx in &incomplete {
            let range = self.range_list[idx];
            let mut want = parts_per + if rem > 0 { rem -= 1; 1 } else { 0 };
            want += carry_over;
            carry_over = 0;

            let remaining_bytes = range.remaining();
            if remaining_bytes < want as u64 {
                // Not enough bytes left to usefully split this far; take
                // exactly one sub-range and roll the rest forward onto the
                // next incomplete range.
                carry_over = want.saturating_sub(1);
                want = 1;
            }

            rebuilt.extend(split_one(&range, want));
        }

        debug_assert!(cursor <= self.range_list.len());
        self.range_list = rebuilt;
        // Anything already completed stays assigned; the queue cursor
        // moves to the first of the freshly split sub-ranges so they are
        // picked up as live Connections become available.
        self.range_queue_cursor = self
            .range_list
            .iter()
            .position(|r| !r.is_complete())
            .unwrap_or(self.range_list.len());
    }

    /// Ranges the scheduler may hand to a new Connection right now (those
    /// at or after the queue cursor that are not already complete).
    pub fn queued_ranges(&self) -> impl Iterator<Item = (usize, &Range)> {
        self.range_list
            .iter()
            .enumerate()
            .skip(self.range_queue_cursor)
            .filter(|(_, r)| !r.is_complete())
    }

    pub fn advance_cursor_past(&mut self, idx: usize) {
        if idx >= self.range_queue_cursor {
            self.range_queue_cursor = idx + 1;
        }
    }

    pub fn all_complete(&self) -> bool {
        !self.range_list.is_empty() && self.range_list.iter().all(|r| r.is_complete())
    }

    pub fn total_content_offset(&self) -> u64 {
        self.range_list.iter().map(|r| r.content_offset).sum()
    }
}

/// Split the still-incomplete tail of `range` into `want` sub-ranges.
/// Bytes are distributed evenly; the last sub-range absorbs any remainder
/// so its `range_end` exactly matches the original `range_end`. The first
/// sub-range reuses the parent's start (and whatever progress it already
/// has); each subsequent sub-range starts fresh at `prev_end + 1`.
fn split_one(range: &Range, want: usize) -> Vec<Range> {
    let want = want.max(1);
    if want == 1 {
        return vec![*range];
    }

    let remaining_start = range.range_start + range.content_offset;
    let total_remaining = range.range_end - remaining_start + 1;
    let chunk = total_remaining / want as u64;

    let mut out = Vec::with_capacity(want);
    // First sub-range keeps the parent's already-downloaded prefix.
    let first_end = remaining_start + chunk.max(1) - 1;
    out.push(Range {
        range_start: range.range_start,
        range_end: first_end.min(range.range_end),
        content_length: None,
        content_offset: range.content_offset,
        file_write_offset: range.file_write_offset,
    });

    let mut next_start = out[0].range_end + 1;
    for i in 1..want {
        let end = if i == want - 1 {
            range.range_end
        } else {
            (next_start + chunk - 1).min(range.range_end)
        };
        if next_start > range.range_end {
            break;
        }
        out.push(Range::new(next_start, end));
        next_start = end + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_on_unknown_size() {
        let mut p = RangePlanner::new();
        p.plan(4);
        assert_eq!(p.range_list.len(), 1);
        assert_eq!(p.range_list[0].range_start, 0);
        assert_eq!(p.range_list[0].range_end, 0);
    }

    #[test]
    fn four_part_http_happy_path() {
        let mut p = RangePlanner::new();
        p.seed_whole_file(4_000_000);
        p.plan(4);
        let ranges: Vec<(u64, u64)> = p
            .range_list
            .iter()
            .map(|r| (r.range_start, r.range_end))
            .collect();
        assert_eq!(
            ranges,
            vec![
                (0, 999_999),
                (1_000_000, 1_999_999),
                (2_000_000, 2_999_999),
                (3_000_000, 3_999_999),
            ]
        );
    }

    #[test]
    fn replanning_with_same_n_is_a_no_op() {
        let mut p = RangePlanner::new();
        p.seed_whole_file(4_000_000);
        p.plan(4);
        let before = p.range_list.clone();
        p.plan(4);
        assert_eq!(before, p.range_list);
    }

    #[test]
    fn small_range_yields_one_sub_range_with_leftover_redistributed() {
        let mut p = RangePlanner::new();
        // One byte range can't be usefully split into 4 sub-ranges.
        p.range_list = vec![Range::new(0, 0), Range::new(1, 1_000_000)];
        p.plan(4);
        // The 1-byte range gets exactly one sub-range; its 3 leftover
        // allocations roll forward onto the next incomplete range.
        let first = p.range_list[0];
        assert_eq!((first.range_start, first.range_end), (0, 0));
        let rest: Vec<_> = p.range_list[1..].to_vec();
        assert_eq!(rest.len(), 4);
        assert_eq!(rest.last().unwrap().range_end, 1_000_000);
    }

    #[test]
    fn sub_ranges_are_contiguous_and_non_overlapping() {
        let mut p = RangePlanner::new();
        p.seed_whole_file(1_000_003);
        p.plan(7);
        let mut prev_end: Option<u64> = None;
        for r in &p.range_list {
            if let Some(pe) = prev_end {
                assert_eq!(r.range_start, pe + 1);
            }
            prev_end = Some(r.range_end);
        }
        assert_eq!(prev_end, Some(1_000_002));
    }
}
