use core::ops::Range;
use crate::error::Error;
use crate::subset::LevelSet;




/// Type alias for a 2d range
pub type Rectangle<T> = (Range<T>, Range<T>);




/// The largest level the engine accepts; `2^20` cells per axis is already
/// beyond what a single-process run can hold.
pub const MAX_LEVEL: u32 = 20;




/// Tag distinguishing the three kinds of cell a mesh tracks per level.
/// Leaves hold ground-truth solution state; ghosts are halo cells whose
/// values are derived by projection, prediction, or boundary extension;
/// overleaves are virtual one-level-finer cells used only to evaluate
/// fluxes conservatively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellKind {
    Leaf,
    Ghost,
    Overleaf,
}




/**
 * A hierarchy of nested Cartesian resolutions over a rectangular domain.
 * Level `L` divides the domain into `2^L` cells per axis; finer level means
 * larger integer. The leaves across all levels tile the domain exactly
 * once, and adjacent leaves never differ by more than one level (the 2:1
 * graduation invariant). Ghost and overleaf sets are derived from the leaf
 * sets whenever the leaves change.
 *
 * Construction seeds the finest level with the full box; the mesh is then
 * mutated only through `apply_coarsen` / `apply_refine` (or the adaptation
 * loop, which batches them).
 */
#[derive(Clone, Debug)]
pub struct Mesh {
    area: Rectangle<f64>,
    min_level: u32,
    max_level: u32,
    leaves: Vec<LevelSet>,
    ghosts: Vec<LevelSet>,
    overleaves: Vec<LevelSet>,
    boxes: Vec<LevelSet>,
}




// ============================================================================
impl Mesh {

    pub fn new(area: Rectangle<f64>, min_level: u32, max_level: u32) -> Result<Self, Error> {
        let dx = area.0.end - area.0.start;
        let dy = area.1.end - area.1.start;

        if min_level > max_level || max_level > MAX_LEVEL {
            return Err(Error::InvalidLevels(min_level, max_level))
        }
        if dx <= 0.0 || dy <= 0.0 {
            return Err(Error::EmptyDomain(dx, dy))
        }

        let boxes = (min_level..=max_level)
            .map(|l| LevelSet::from_block(l, 0..1 << l, 0..1 << l))
            .collect::<Vec<_>>();

        let mut leaves: Vec<_> = (min_level..=max_level).map(LevelSet::new).collect();
        leaves[(max_level - min_level) as usize] = boxes[(max_level - min_level) as usize].clone();

        let mut mesh = Self {
            area,
            min_level,
            max_level,
            leaves,
            ghosts: Vec::new(),
            overleaves: Vec::new(),
            boxes,
        };
        mesh.derive_ghosts();
        Ok(mesh)
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn area(&self) -> &Rectangle<f64> {
        &self.area
    }

    fn slot(&self, level: u32) -> usize {
        assert!(
            level >= self.min_level && level <= self.max_level,
            "level {} outside [{}, {}]", level, self.min_level, self.max_level);
        (level - self.min_level) as usize
    }

    pub fn leaves(&self, level: u32) -> &LevelSet {
        &self.leaves[self.slot(level)]
    }

    pub fn ghosts(&self, level: u32) -> &LevelSet {
        &self.ghosts[self.slot(level)]
    }

    pub fn overleaves(&self, level: u32) -> &LevelSet {
        &self.overleaves[self.slot(level)]
    }

    /**
     * The full domain box as a cell set at the given level.
     */
    pub fn initial(&self, level: u32) -> &LevelSet {
        &self.boxes[self.slot(level)]
    }

    pub fn exists(&self, kind: CellKind, level: u32, index: (i64, i64)) -> bool {
        match kind {
            CellKind::Leaf => self.leaves(level).contains(index),
            CellKind::Ghost => self.ghosts(level).contains(index),
            CellKind::Overleaf => self.overleaves(level).contains(index),
        }
    }

    /**
     * Return the cell spacing on each axis at the given level.
     */
    pub fn cell_spacing(&self, level: u32) -> (f64, f64) {
        let n = (1u64 << level) as f64;
        ((self.area.0.end - self.area.0.start) / n,
         (self.area.1.end - self.area.1.start) / n)
    }

    pub fn cell_center(&self, level: u32, index: (i64, i64)) -> (f64, f64) {
        let (d0, d1) = self.cell_spacing(level);
        let x0 = self.area.0.start + d0 * (index.0 as f64 + 0.5);
        let x1 = self.area.1.start + d1 * (index.1 as f64 + 0.5);
        (x0, x1)
    }

    /**
     * Visit every leaf cell, coarsest level first, rows and columns
     * ascending within a level.
     */
    pub fn for_each_leaf<F: FnMut(u32, (i64, i64))>(&self, mut f: F) {
        for level in self.min_level..=self.max_level {
            self.leaves(level).for_each_cell(|i, j| f(level, (i, j)))
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.iter().map(|s| s.num_cells()).sum()
    }

    /**
     * Move a region of leaves at `level` to `level + 1`. Returns an error,
     * leaving the mesh untouched, if the move would break the 2:1
     * graduation invariant.
     */
    pub fn apply_refine(&mut self, level: u32, region: &LevelSet) -> Result<(), Error> {
        assert!(region.level() == level && level < self.max_level);
        let moved = region.intersection(self.leaves(level));

        let mut leaves = self.leaves.clone();
        leaves[self.slot(level)] = self.leaves(level).difference(&moved);
        leaves[self.slot(level + 1)] = self.leaves(level + 1).union(&moved.remap(level + 1));
        self.try_set_leaves(leaves)
    }

    /**
     * Move a region of leaves at `level` to `level - 1`. Only complete
     * sibling quads move; partial quads in the region are left in place.
     */
    pub fn apply_coarsen(&mut self, level: u32, region: &LevelSet) -> Result<(), Error> {
        assert!(region.level() == level && level > self.min_level);
        let parents = region.intersection(self.leaves(level)).remap_strict(level - 1);
        let moved = parents.remap(level);

        let mut leaves = self.leaves.clone();
        leaves[self.slot(level)] = self.leaves(level).difference(&moved);
        leaves[self.slot(level - 1)] = self.leaves(level - 1).union(&parents);
        self.try_set_leaves(leaves)
    }

    /**
     * Replace the leaf sets wholesale, rederiving ghosts and overleaves.
     * The caller is responsible for partition correctness; graduation is
     * still checked.
     */
    pub(crate) fn try_set_leaves(&mut self, leaves: Vec<LevelSet>) -> Result<(), Error> {
        let previous = std::mem::replace(&mut self.leaves, leaves);
        if let Err(e) = self.check_graduation() {
            self.leaves = previous;
            return Err(e)
        }
        self.derive_ghosts();
        Ok(())
    }

    /**
     * Recompute ghost and overleaf sets from the leaf sets. Ghosts are a
     * one-cell halo around the leaves of each level, extended recursively
     * with the parents of all finer-level storage so every fine ghost has
     * a complete prediction stencil one level down. Overleaves are the
     * children of each level's leaves plus a two-cell halo at the child
     * level, excluding cells already stored as leaves or ghosts there.
     */
    fn derive_ghosts(&mut self) {
        let n = self.leaves.len();
        let mut storage: Vec<LevelSet> = vec![LevelSet::new(0); n];

        for level in (self.min_level..=self.max_level).rev() {
            let slot = self.slot(level);
            let mut core = self.leaves[slot].clone();
            if level < self.max_level {
                core = core.union(&storage[slot + 1].remap(level));
            }
            storage[slot] = core.expand(1);
        }

        self.ghosts = storage
            .iter()
            .zip(&self.leaves)
            .map(|(cag, leaves)| cag.difference(leaves))
            .collect();

        self.overleaves = (self.min_level..=self.max_level)
            .map(|level| {
                if level == self.min_level {
                    LevelSet::new(level)
                } else {
                    let slot = self.slot(level);
                    self.leaves[slot - 1]
                        .remap(level)
                        .expand(2)
                        .difference(&storage[slot])
                }
            })
            .collect();
    }

    /**
     * Verify that no two leaves sharing a face or corner differ by more
     * than one level.
     */
    pub fn check_graduation(&self) -> Result<(), Error> {
        for la in self.min_level..=self.max_level {
            for lb in la + 2..=self.max_level {
                let near = self.leaves[self.slot(lb)].expand(1).remap(la);
                if !near.intersection(&self.leaves[self.slot(la)]).is_empty() {
                    return Err(Error::GraduationViolation(la, lb))
                }
            }
        }
        Ok(())
    }

    /**
     * Verify that the leaves tile the domain exactly once.
     */
    pub fn is_partition(&self) -> bool {
        let total: usize = (self.min_level..=self.max_level)
            .map(|l| self.leaves(l).num_cells() << (2 * (self.max_level - l)))
            .sum();

        let mut union = LevelSet::new(self.max_level);
        for level in self.min_level..=self.max_level {
            union = union.union(&self.leaves(level).remap(self.max_level));
        }
        let full = self.initial(self.max_level);
        total == full.num_cells() && union == *full
    }
}
