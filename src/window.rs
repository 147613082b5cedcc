//! Fixed-width windowing shared by every feature family.
//!
//! Two shapes exist: per-base tracks reduced window by window
//! ([`WindowPlan::track_windows`], [`reduce_track`]) and sorted positional
//! events accumulated into buckets ([`Bucketed`]).

use std::ops::Range;

use crate::config::WindowConfig;

/// Window geometry: starts at `first_start`, steps by `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    first_start: usize,
    size: usize,
    min_tail: usize,
}

impl Default for WindowPlan {
    fn default() -> Self {
        Self::new(&WindowConfig::default())
    }
}

impl WindowPlan {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            first_start: config.first_start,
            size: config.size.max(1),
            min_tail: config.min_tail,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Windows over a track of `length` bases.
    ///
    /// A window is emitted for every start below `length`; scanning stops
    /// right after the first window whose end leaves `min_tail` bases or fewer.
    pub fn track_windows(&self, length: usize) -> TrackWindows {
        TrackWindows {
            next: Some(self.first_start),
            length,
            size: self.size,
            min_tail: self.min_tail,
        }
    }

    /// Windows starting at `first_start` while the start is at most `last`.
    pub fn open_windows(&self, last: usize) -> impl Iterator<Item = Range<usize>> {
        let size = self.size;
        (self.first_start..=last)
            .step_by(size)
            .map(move |s| s..s + size)
    }

    /// Start of the window containing `pos`, or None before the first window.
    pub fn bucket(&self, pos: usize) -> Option<usize> {
        if pos < self.first_start {
            return None;
        }
        Some((pos - self.first_start) / self.size * self.size + self.first_start)
    }
}

/// Iterator returned by [`WindowPlan::track_windows`].
#[derive(Debug, Clone)]
pub struct TrackWindows {
    next: Option<usize>,
    length: usize,
    size: usize,
    min_tail: usize,
}

impl Iterator for TrackWindows {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        if start >= self.length {
            self.next = None;
            return None;
        }
        let end = start + self.size;
        self.next = if self.length.saturating_sub(end) <= self.min_tail {
            None
        } else {
            Some(end)
        };
        Some(start..end)
    }
}

/// Reduce each window of a per-base track with `f(start, slice)`.
///
/// The slice is clipped to the track, so a window running past the end
/// sees only the remaining bases.
pub fn reduce_track<T, R, F>(plan: &WindowPlan, track: &[T], mut f: F) -> Vec<R>
where
    F: FnMut(usize, &[T]) -> R,
{
    plan.track_windows(track.len())
        .map(|w| {
            let end = w.end.min(track.len());
            f(w.start, &track[w.start..end])
        })
        .collect()
}

/// Accumulates sorted positional events into per-window state `C`.
///
/// The current bucket is flushed as soon as an event lands in a different
/// bucket; [`Bucketed::finish`] flushes the last one.
#[derive(Debug)]
pub struct Bucketed<C> {
    plan: WindowPlan,
    current: Option<(usize, C)>,
    flushed: Vec<(usize, C)>,
}

impl<C: Default> Bucketed<C> {
    pub fn new(plan: WindowPlan) -> Self {
        Self {
            plan,
            current: None,
            flushed: Vec::new(),
        }
    }

    /// State of the bucket for `pos`, or None when `pos` precedes the first window.
    pub fn slot(&mut self, pos: usize) -> Option<&mut C> {
        let bucket = self.plan.bucket(pos)?;
        let switch = match &self.current {
            Some((start, _)) => *start != bucket,
            None => true,
        };
        if switch {
            if let Some(done) = self.current.take() {
                self.flushed.push(done);
            }
            self.current = Some((bucket, C::default()));
        }
        self.current.as_mut().map(|(_, c)| c)
    }

    /// Flush the open bucket and return all buckets in visiting order.
    pub fn finish(mut self) -> Vec<(usize, C)> {
        if let Some(done) = self.current.take() {
            self.flushed.push(done);
        }
        self.flushed
    }
}
