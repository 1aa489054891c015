use core::ops::Range;




/**
 * A sorted sequence of disjoint, half-open intervals of integer grid
 * columns along one row. This is the atomic unit of the sparse mesh
 * representation: a row of occupied cells at one resolution level is one
 * `IntervalSet`, and the level-wide sets are maps from row index to
 * `IntervalSet` (see the `subset` module). Intervals are normalized on
 * insertion: they never overlap and never touch.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntervalSet {
    runs: Vec<Range<i64>>,
}




// ============================================================================
impl IntervalSet {

    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    pub fn from_range(range: Range<i64>) -> Self {
        let mut set = Self::new();
        set.insert(range);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /**
     * Return the number of maximal runs in this set.
     */
    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    /**
     * Return the total number of cells covered.
     */
    pub fn num_cells(&self) -> usize {
        self.runs.iter().map(|r| (r.end - r.start) as usize).sum()
    }

    pub fn contains(&self, column: i64) -> bool {
        self.runs
            .binary_search_by(|r| {
                if r.end <= column {
                    core::cmp::Ordering::Less
                } else if r.start > column {
                    core::cmp::Ordering::Greater
                } else {
                    core::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /**
     * Insert an interval, merging it with any runs it overlaps or touches.
     */
    pub fn insert(&mut self, range: Range<i64>) {
        if range.start >= range.end {
            return
        }
        let mut merged = range;
        let mut result = Vec::with_capacity(self.runs.len() + 1);
        let mut placed = false;

        for run in self.runs.drain(..) {
            if run.end < merged.start {
                result.push(run)
            } else if placed || run.start > merged.end {
                if !placed {
                    result.push(merged.clone());
                    placed = true;
                }
                result.push(run)
            } else {
                merged = merged.start.min(run.start)..merged.end.max(run.end)
            }
        }
        if !placed {
            result.push(merged)
        }
        self.runs = result
    }

    /**
     * Visit the runs in ascending column order.
     */
    pub fn iter(&self) -> impl Iterator<Item = &Range<i64>> {
        self.runs.iter()
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for run in &other.runs {
            result.insert(run.clone())
        }
        result
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut runs = Vec::new();
        let mut i = 0;
        let mut j = 0;

        while i < self.runs.len() && j < other.runs.len() {
            let a = &self.runs[i];
            let b = &other.runs[j];
            let lo = a.start.max(b.start);
            let hi = a.end.min(b.end);

            if lo < hi {
                runs.push(lo..hi)
            }
            if a.end <= b.end {
                i += 1
            } else {
                j += 1
            }
        }
        Self { runs }
    }

    pub fn difference(&self, other: &Self) -> Self {
        let mut runs = Vec::new();

        for a in &self.runs {
            let mut lo = a.start;

            for b in &other.runs {
                if b.end <= lo {
                    continue
                }
                if b.start >= a.end {
                    break
                }
                if b.start > lo {
                    runs.push(lo..b.start)
                }
                lo = lo.max(b.end);
                if lo >= a.end {
                    break
                }
            }
            if lo < a.end {
                runs.push(lo..a.end)
            }
        }
        Self { runs }
    }

    pub fn translate(&self, delta: i64) -> Self {
        Self {
            runs: self.runs.iter().map(|r| r.start + delta..r.end + delta).collect(),
        }
    }

    /**
     * Grow every run by the given number of cells on both sides, merging
     * runs that come into contact.
     */
    pub fn expand(&self, delta: i64) -> Self {
        let mut result = Self::new();
        for run in &self.runs {
            result.insert(run.start - delta..run.end + delta)
        }
        result
    }

    /**
     * Remap this set to a level `delta` levels finer: each cell becomes
     * `2^delta` cells.
     */
    pub fn refine(&self, delta: u32) -> Self {
        Self {
            runs: self.runs.iter().map(|r| r.start << delta..r.end << delta).collect(),
        }
    }

    /**
     * Remap this set to a level `delta` levels coarser, keeping every
     * coarse cell touched by at least one fine cell.
     */
    pub fn coarsen(&self, delta: u32) -> Self {
        let m = (1 << delta) - 1;
        let mut result = Self::new();
        for run in &self.runs {
            result.insert(run.start >> delta..(run.end + m) >> delta)
        }
        result
    }

    /**
     * Remap this set to a level `delta` levels coarser, keeping only coarse
     * cells entirely covered by fine cells.
     */
    pub fn coarsen_strict(&self, delta: u32) -> Self {
        let m = (1 << delta) - 1;
        let mut result = Self::new();
        for run in &self.runs {
            let lo = (run.start + m) >> delta;
            let hi = run.end >> delta;
            if lo < hi {
                result.insert(lo..hi)
            }
        }
        result
    }
}




// ============================================================================
impl core::iter::FromIterator<Range<i64>> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = Range<i64>>>(iter: I) -> Self {
        let mut set = Self::new();
        for range in iter {
            set.insert(range)
        }
        set
    }
}
