use core::ops::Range;
use std::collections::{BTreeMap, BTreeSet};
use crate::interval_set::IntervalSet;




/**
 * The set of occupied cells at one resolution level: a map from row index
 * to the `IntervalSet` of occupied columns in that row. Level sets are the
 * concrete (materialized) form of the mesh representation; the lazy
 * combinators in this module operate on them by reference.
 *
 * Level remapping is exact in both directions. Going finer, each cell
 * becomes a `2^delta` by `2^delta` block. Going coarser, `remap` keeps any
 * coarse cell touched by a fine cell while `remap_strict` keeps only
 * coarse cells entirely covered.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LevelSet {
    level: u32,
    rows: BTreeMap<i64, IntervalSet>,
}




// ============================================================================
impl LevelSet {

    pub fn new(level: u32) -> Self {
        Self { level, rows: BTreeMap::new() }
    }

    /**
     * Build a level set covering a rectangular index block.
     */
    pub fn from_block(level: u32, di: Range<i64>, dj: Range<i64>) -> Self {
        let mut set = Self::new(level);
        for j in dj {
            set.insert(j, di.clone())
        }
        set
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_empty(&self) -> bool {
        self.rows.values().all(|r| r.is_empty())
    }

    pub fn num_cells(&self) -> usize {
        self.rows.values().map(|r| r.num_cells()).sum()
    }

    pub fn contains(&self, index: (i64, i64)) -> bool {
        self.rows.get(&index.1).map_or(false, |r| r.contains(index.0))
    }

    pub fn insert(&mut self, row: i64, range: Range<i64>) {
        if range.start < range.end {
            self.rows.entry(row).or_insert_with(IntervalSet::new).insert(range)
        }
    }

    pub fn row(&self, row: i64) -> Option<&IntervalSet> {
        self.rows.get(&row).filter(|r| !r.is_empty())
    }

    /**
     * Visit occupied rows in ascending order.
     */
    pub fn rows(&self) -> impl Iterator<Item = (i64, &IntervalSet)> {
        self.rows.iter().filter(|(_, r)| !r.is_empty()).map(|(j, r)| (*j, r))
    }

    /**
     * Visit every interval in increasing row, increasing column order.
     */
    pub fn for_each<F: FnMut(i64, Range<i64>)>(&self, mut f: F) {
        for (j, row) in self.rows() {
            for run in row.iter() {
                f(j, run.clone())
            }
        }
    }

    /**
     * Visit every cell in increasing row, increasing column order.
     */
    pub fn for_each_cell<F: FnMut(i64, i64)>(&self, mut f: F) {
        self.for_each(|j, run| {
            for i in run {
                f(i, j)
            }
        })
    }

    pub fn union(&self, other: &Self) -> Self {
        assert_eq!(self.level, other.level);
        let mut result = self.clone();
        for (j, row) in other.rows() {
            for run in row.iter() {
                result.insert(j, run.clone())
            }
        }
        result
    }

    pub fn intersection(&self, other: &Self) -> Self {
        assert_eq!(self.level, other.level);
        let mut result = Self::new(self.level);
        for (j, row) in self.rows() {
            if let Some(b) = other.row(j) {
                let isect = row.intersection(b);
                if !isect.is_empty() {
                    result.rows.insert(j, isect);
                }
            }
        }
        result
    }

    pub fn difference(&self, other: &Self) -> Self {
        assert_eq!(self.level, other.level);
        let mut result = Self::new(self.level);
        for (j, row) in self.rows() {
            let diff = match other.row(j) {
                Some(b) => row.difference(b),
                None => row.clone(),
            };
            if !diff.is_empty() {
                result.rows.insert(j, diff);
            }
        }
        result
    }

    pub fn translate(&self, delta: (i64, i64)) -> Self {
        let mut result = Self::new(self.level);
        for (j, row) in self.rows() {
            result.rows.insert(j + delta.1, row.translate(delta.0));
        }
        result
    }

    /**
     * Grow the set by a halo of the given width in all 8 directions.
     */
    pub fn expand(&self, width: i64) -> Self {
        let mut result = Self::new(self.level);
        for (j, row) in self.rows() {
            let wide = row.expand(width);
            for dj in -width..=width {
                for run in wide.iter() {
                    result.insert(j + dj, run.clone())
                }
            }
        }
        result
    }

    /**
     * Remap this set to another level. Coarsening keeps every coarse cell
     * touched by at least one fine cell.
     */
    pub fn remap(&self, level: u32) -> Self {
        if level == self.level {
            self.clone()
        } else if level > self.level {
            let delta = level - self.level;
            let mut result = Self::new(level);
            for (j, row) in self.rows() {
                let fine = row.refine(delta);
                for jf in j << delta..(j + 1) << delta {
                    result.rows.insert(jf, fine.clone());
                }
            }
            result
        } else {
            let delta = self.level - level;
            let mut result = Self::new(level);
            for (j, row) in self.rows() {
                for run in row.coarsen(delta).iter() {
                    result.insert(j >> delta, run.clone())
                }
            }
            result
        }
    }

    /**
     * Remap this set to a coarser level, keeping only coarse cells whose
     * `4^delta` descendants are all present.
     */
    pub fn remap_strict(&self, level: u32) -> Self {
        assert!(level <= self.level);
        let delta = self.level - level;
        if delta == 0 {
            return self.clone()
        }
        let mut result = Self::new(level);
        let coarse_rows: BTreeSet<i64> = self.rows().map(|(j, _)| j >> delta).collect();

        for jc in coarse_rows {
            let mut strict: Option<IntervalSet> = None;
            for jf in jc << delta..(jc + 1) << delta {
                let row = match self.row(jf) {
                    Some(row) => row.coarsen_strict(delta),
                    None => IntervalSet::new(),
                };
                strict = Some(match strict {
                    Some(s) => s.intersection(&row),
                    None => row,
                });
            }
            if let Some(s) = strict {
                if !s.is_empty() {
                    result.rows.insert(jc, s);
                }
            }
        }
        result
    }
}




/**
 * A lazy boolean expression over level sets. Nothing is materialized until
 * a terminal traversal (`for_each`, `materialize`, `is_empty`) walks the
 * expression at a single evaluation level, remapping every operand to that
 * level on the fly. The default evaluation level is the finest level among
 * the operands; `on` overrides it, as in
 * `intersection(a.into(), b.into()).on(level + 1)`.
 *
 * Traversal order is always increasing row, then increasing column, which
 * makes floating-point accumulations over subsets reproducible.
 */
#[derive(Clone)]
pub enum Subset<'a> {
    Leaf(&'a LevelSet),
    Union(Box<Subset<'a>>, Box<Subset<'a>>),
    Intersection(Box<Subset<'a>>, Box<Subset<'a>>),
    Difference(Box<Subset<'a>>, Box<Subset<'a>>),
    Translate(Box<Subset<'a>>, (i64, i64), u32),
    On(Box<Subset<'a>>, u32),
}




// ============================================================================
pub fn union<'a>(a: Subset<'a>, b: Subset<'a>) -> Subset<'a> {
    Subset::Union(Box::new(a), Box::new(b))
}

pub fn intersection<'a>(a: Subset<'a>, b: Subset<'a>) -> Subset<'a> {
    Subset::Intersection(Box::new(a), Box::new(b))
}

pub fn difference<'a>(a: Subset<'a>, b: Subset<'a>) -> Subset<'a> {
    Subset::Difference(Box::new(a), Box::new(b))
}

/**
 * Translate a subset by an offset expressed in cells of the given level.
 */
pub fn translate(a: Subset<'_>, delta: (i64, i64), level: u32) -> Subset<'_> {
    Subset::Translate(Box::new(a), delta, level)
}




// ============================================================================
impl<'a> From<&'a LevelSet> for Subset<'a> {
    fn from(set: &'a LevelSet) -> Self {
        Subset::Leaf(set)
    }
}




// ============================================================================
impl<'a> Subset<'a> {

    /**
     * Override the level at which the terminal traversal runs.
     */
    pub fn on(self, level: u32) -> Self {
        Subset::On(Box::new(self), level)
    }

    fn finest_level(&self) -> u32 {
        match self {
            Subset::Leaf(set) => set.level(),
            Subset::Union(a, b) => a.finest_level().max(b.finest_level()),
            Subset::Intersection(a, b) => a.finest_level().max(b.finest_level()),
            Subset::Difference(a, b) => a.finest_level().max(b.finest_level()),
            Subset::Translate(a, _, _) => a.finest_level(),
            Subset::On(_, level) => *level,
        }
    }

    fn candidate_rows(&self, level: u32) -> BTreeSet<i64> {
        match self {
            Subset::Leaf(set) => {
                let mut rows = BTreeSet::new();
                for (j, _) in set.rows() {
                    if level >= set.level() {
                        let delta = level - set.level();
                        rows.extend(j << delta..(j + 1) << delta);
                    } else {
                        rows.insert(j >> (set.level() - level));
                    }
                }
                rows
            }
            Subset::Union(a, b) => {
                let mut rows = a.candidate_rows(level);
                rows.extend(b.candidate_rows(level));
                rows
            }
            Subset::Intersection(a, b) => {
                let rb = b.candidate_rows(level);
                a.candidate_rows(level).into_iter().filter(|j| rb.contains(j)).collect()
            }
            Subset::Difference(a, _) => a.candidate_rows(level),
            Subset::Translate(a, delta, at_level) => {
                let dj = scale_offset(delta.1, *at_level, level);
                a.candidate_rows(level).into_iter().map(|j| j + dj).collect()
            }
            Subset::On(a, at_level) => {
                let inner = a.candidate_rows(*at_level);
                let mut rows = BTreeSet::new();
                for j in inner {
                    if level >= *at_level {
                        let delta = level - at_level;
                        rows.extend(j << delta..(j + 1) << delta);
                    } else {
                        rows.insert(j >> (at_level - level));
                    }
                }
                rows
            }
        }
    }

    fn row_intervals(&self, level: u32, row: i64) -> IntervalSet {
        match self {
            Subset::Leaf(set) => {
                if level >= set.level() {
                    let delta = level - set.level();
                    set.row(row >> delta).map_or_else(IntervalSet::new, |r| r.refine(delta))
                } else {
                    let delta = set.level() - level;
                    let mut result = IntervalSet::new();
                    for jf in row << delta..(row + 1) << delta {
                        if let Some(r) = set.row(jf) {
                            result = result.union(&r.coarsen(delta));
                        }
                    }
                    result
                }
            }
            Subset::Union(a, b) => a.row_intervals(level, row).union(&b.row_intervals(level, row)),
            Subset::Intersection(a, b) => a.row_intervals(level, row).intersection(&b.row_intervals(level, row)),
            Subset::Difference(a, b) => a.row_intervals(level, row).difference(&b.row_intervals(level, row)),
            Subset::Translate(a, delta, at_level) => {
                let di = scale_offset(delta.0, *at_level, level);
                let dj = scale_offset(delta.1, *at_level, level);
                a.row_intervals(level, row - dj).translate(di)
            }
            Subset::On(a, at_level) => {
                if level >= *at_level {
                    let delta = level - at_level;
                    a.row_intervals(*at_level, row >> delta).refine(delta)
                } else {
                    let delta = at_level - level;
                    let mut result = IntervalSet::new();
                    for jf in row << delta..(row + 1) << delta {
                        result = result.union(&a.row_intervals(*at_level, jf).coarsen(delta));
                    }
                    result
                }
            }
        }
    }

    /**
     * Terminal traversal: visit every interval of the evaluated subset in
     * increasing row, increasing column order.
     */
    pub fn for_each<F: FnMut(i64, Range<i64>)>(&self, mut f: F) {
        let level = self.finest_level();
        for j in self.candidate_rows(level) {
            for run in self.row_intervals(level, j).iter() {
                f(j, run.clone())
            }
        }
    }

    /**
     * Terminal traversal: visit every cell of the evaluated subset.
     */
    pub fn for_each_cell<F: FnMut(i64, i64)>(&self, mut f: F) {
        self.for_each(|j, run| {
            for i in run {
                f(i, j)
            }
        })
    }

    /**
     * Evaluate the expression into a concrete level set.
     */
    pub fn materialize(&self) -> LevelSet {
        let level = self.finest_level();
        let mut result = LevelSet::new(level);
        self.for_each(|j, run| result.insert(j, run));
        result
    }

    pub fn is_empty(&self) -> bool {
        let level = self.finest_level();
        self.candidate_rows(level)
            .into_iter()
            .all(|j| self.row_intervals(level, j).is_empty())
    }
}




/**
 * Convert an offset expressed in cells at one level to cells at another.
 * Coarsening an offset is exact only when it is divisible by the level
 * ratio, which holds for the boundary predicates this is used for (offsets
 * are multiples of `2^(max_level - level)`).
 */
fn scale_offset(delta: i64, from_level: u32, to_level: u32) -> i64 {
    if to_level >= from_level {
        delta << (to_level - from_level)
    } else {
        delta >> (from_level - to_level)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn block(level: u32, n: i64) -> LevelSet {
        LevelSet::from_block(level, 0..n, 0..n)
    }

    #[test]
    fn level_set_remap_round_trips() {
        let a = block(2, 4);
        assert_eq!(a.remap(3).remap(2), a);
        assert_eq!(a.remap(3).remap_strict(2), a);
        assert_eq!(a.remap(3).num_cells(), 4 * a.num_cells());
    }

    #[test]
    fn remap_strict_drops_partial_blocks() {
        let mut a = LevelSet::new(3);
        a.insert(0, 0..2);
        a.insert(1, 0..2);
        a.insert(2, 0..1);
        assert_eq!(a.remap_strict(2).num_cells(), 1);
        assert!(a.remap_strict(2).contains((0, 0)));
        assert_eq!(a.remap(2).num_cells(), 2);
    }

    #[test]
    fn expand_grows_halo_in_all_directions() {
        let mut a = LevelSet::new(0);
        a.insert(0, 0..1);
        let b = a.expand(1);
        assert_eq!(b.num_cells(), 9);
        assert!(b.contains((-1, -1)));
        assert!(b.contains((1, 1)));
    }

    #[test]
    fn lazy_intersection_remaps_mixed_levels() {
        let coarse = block(1, 2);
        let fine = LevelSet::from_block(2, 1..3, 1..3);

        // The intersection evaluated at the finer level covers exactly the
        // fine block, since the coarse block covers the whole 4x4 fine box.
        let isect = intersection((&coarse).into(), (&fine).into());
        assert_eq!(isect.materialize(), fine);
    }

    #[test]
    fn boundary_predicate_finds_east_column() {
        let b = block(3, 8);

        // Cells with no east neighbor inside the box.
        let east = difference((&b).into(), translate((&b).into(), (-1, 0), 3));
        let east = east.materialize();
        assert_eq!(east.num_cells(), 8);
        assert!(east.contains((7, 0)));
        assert!(east.contains((7, 7)));
        assert!(!east.contains((6, 3)));
    }

    #[test]
    fn translation_scales_across_levels() {
        let b = block(3, 8);

        // A translation by one cell at level 2 is two cells at level 3.
        let shifted = translate((&b).into(), (1, 0), 2).on(3);
        let shifted = shifted.materialize();
        assert!(shifted.contains((2, 0)));
        assert!(!shifted.contains((1, 0)));
    }

    #[test]
    fn traversal_is_row_major_ascending() {
        let mut a = LevelSet::new(0);
        a.insert(1, 4..6);
        a.insert(0, 2..3);
        a.insert(0, 7..9);

        let mut seen = Vec::new();
        Subset::from(&a).for_each(|j, run| seen.push((j, run)));
        assert_eq!(seen, vec![(0, 2..3), (0, 7..9), (1, 4..6)]);
    }

    #[test]
    fn empty_intersection_is_detected_lazily() {
        let a = LevelSet::from_block(2, 0..2, 0..2);
        let b = LevelSet::from_block(2, 2..4, 2..4);
        assert!(intersection((&a).into(), (&b).into()).is_empty());
        assert!(!union((&a).into(), (&b).into()).is_empty());
    }
}
