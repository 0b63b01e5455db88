//! Dense linear auxiliary index: for each `2^14`-bp window of a reference,
//! the smallest virtual offset of any record overlapping that window.

use crate::binning::LINEAR_WINDOW;
use crate::voffset::VirtualOffset;

fn window_of(pos0: u64) -> usize {
    (pos0 >> LINEAR_WINDOW.trailing_zeros()) as usize
}

/// Linear index under construction or already finalized.
#[derive(Debug, Clone, Default)]
pub struct LinearIndex {
    windows: Vec<Option<VirtualOffset>>,
}

impl LinearIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<VirtualOffset>) -> Self {
        Self {
            windows: entries.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Updates the windows spanned by a record's 1-based inclusive range
    /// `[start1, end1]` to record `begin_vo` as their minimum, per §4.3.
    pub fn update(&mut self, start1: u32, end1: u32, begin_vo: VirtualOffset) {
        let w1 = window_of(u64::from(start1 - 1));
        let w2 = window_of(u64::from(end1 - 1));
        if w2 >= self.windows.len() {
            self.windows.resize(w2 + 1, None);
        }
        for w in &mut self.windows[w1..=w2] {
            match w {
                Some(existing) if *existing <= begin_vo => {}
                _ => *w = Some(begin_vo),
            }
        }
    }

    /// Left-propagates set values into any leading or interior holes, per
    /// the finalization policy: a hole keeps the previous non-empty cell's
    /// value, and leading holes take the first record's VO.
    pub fn finalize(&mut self) {
        let first_set = self.windows.iter().position(Option::is_some);
        let Some(first_set) = first_set else {
            return;
        };
        let fill = self.windows[first_set];
        for w in &mut self.windows[..first_set] {
            *w = fill;
        }
        let mut last = self.windows[first_set];
        for w in &mut self.windows[first_set..] {
            match w {
                Some(v) => last = Some(*v),
                None => *w = last,
            }
        }
    }

    /// Raw entries as stored on disk, one virtual offset per window.
    pub fn entries(&self) -> Vec<VirtualOffset> {
        self.windows
            .iter()
            .map(|w| w.unwrap_or(VirtualOffset::MIN))
            .collect()
    }

    /// `lookupLowerBound(start1)`: the minimum virtual offset from which a
    /// record overlapping `start1` could begin. Returns `None` (meaning 0)
    /// if the index is empty.
    pub fn lookup_lower_bound(&self, start1: u32) -> Option<VirtualOffset> {
        if self.windows.is_empty() {
            return None;
        }
        let w = window_of(u64::from(start1 - 1));
        let idx = w.min(self.windows.len() - 1);
        self.windows[idx]
    }

    /// The slice of entries covering windows `[w1, w2]`, clamped to the
    /// index's actual length, per `IndexReader::query` step (e).
    pub fn slice(&self, start1: u32, end1: u32) -> &[Option<VirtualOffset>] {
        let w1 = window_of(u64::from(start1 - 1));
        if w1 >= self.windows.len() {
            return &[];
        }
        let w2 = if end1 > 0 {
            window_of(u64::from(end1 - 1))
        } else {
            self.windows.len() - 1
        };
        let actual_stop = w2.min(self.windows.len() - 1);
        &self.windows[w1..=actual_stop]
    }
}
