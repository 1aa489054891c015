use core::ops::Range;
use std::collections::BTreeMap;
use crate::mesh::Mesh;
use crate::subset::LevelSet;




/**
 * Maps cell indexes at one level to offsets in a contiguous buffer. Offsets
 * are assigned in increasing row, increasing column order, so a linear walk
 * of the buffer is the deterministic traversal order used everywhere else.
 */
#[derive(Clone, Debug, Default)]
pub struct CellIndex {
    rows: BTreeMap<i64, Vec<(Range<i64>, usize)>>,
    num_cells: usize,
}




// ============================================================================
impl CellIndex {

    pub fn build(set: &LevelSet) -> Self {
        let mut rows: BTreeMap<i64, Vec<(Range<i64>, usize)>> = BTreeMap::new();
        let mut offset = 0;

        set.for_each(|j, run| {
            let len = (run.end - run.start) as usize;
            rows.entry(j).or_default().push((run, offset));
            offset += len;
        });
        Self { rows, num_cells: offset }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn offset(&self, index: (i64, i64)) -> Option<usize> {
        let runs = self.rows.get(&index.1)?;
        let slot = runs
            .binary_search_by(|(run, _)| {
                if run.end <= index.0 {
                    core::cmp::Ordering::Less
                } else if run.start > index.0 {
                    core::cmp::Ordering::Greater
                } else {
                    core::cmp::Ordering::Equal
                }
            })
            .ok()?;
        let (run, base) = &runs[slot];
        Some(base + (index.0 - run.start) as usize)
    }
}




/**
 * A field of fixed-width component vectors over the storage cells of a
 * mesh: one contiguous buffer per level covering leaves, ghosts and
 * overleaves, in traversal order. The field is owned by the simulation
 * driver and borrowed (never retained) by the operators; the mesh layout
 * it was built against must outlive any mesh mutation, so the adaptation
 * loop rebuilds fields rather than patching them.
 */
#[derive(Clone, Debug)]
pub struct Field {
    min_level: u32,
    num_fields: usize,
    index: Vec<CellIndex>,
    data: Vec<Vec<f64>>,
}




// ============================================================================
impl Field {

    /**
     * Allocate a zero field with the given number of components per cell
     * over the storage cells of the mesh.
     */
    pub fn zeros(mesh: &Mesh, num_fields: usize) -> Self {
        let index: Vec<_> = (mesh.min_level()..=mesh.max_level())
            .map(|level| {
                let storage = mesh
                    .leaves(level)
                    .union(mesh.ghosts(level))
                    .union(mesh.overleaves(level));
                CellIndex::build(&storage)
            })
            .collect();

        let data = index.iter().map(|i| vec![0.0; i.num_cells() * num_fields]).collect();

        Self {
            min_level: mesh.min_level(),
            num_fields,
            index,
            data,
        }
    }

    /**
     * Allocate a field and initialize the leaf cells from a function of
     * the cell centre. Ghost and overleaf cells start at zero.
     */
    pub fn from_function<F>(mesh: &Mesh, num_fields: usize, f: F) -> Self
    where
        F: Fn(u32, (f64, f64), &mut [f64])
    {
        let mut field = Self::zeros(mesh, num_fields);
        mesh.for_each_leaf(|level, index| {
            let center = mesh.cell_center(level, index);
            f(level, center, field.get_slice_mut(level, index))
        });
        field
    }

    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    fn slot(&self, level: u32) -> usize {
        (level - self.min_level) as usize
    }

    pub fn try_get_slice(&self, level: u32, index: (i64, i64)) -> Option<&[f64]> {
        let slot = self.slot(level);
        let offset = self.index[slot].offset(index)?;
        let nq = self.num_fields;
        Some(&self.data[slot][offset * nq..(offset + 1) * nq])
    }

    pub fn get_slice(&self, level: u32, index: (i64, i64)) -> &[f64] {
        self.try_get_slice(level, index).unwrap_or_else(|| {
            panic!("no storage for cell ({} {}) at level {}", index.0, index.1, level)
        })
    }

    pub fn get_slice_mut(&mut self, level: u32, index: (i64, i64)) -> &mut [f64] {
        let slot = self.slot(level);
        let offset = match self.index[slot].offset(index) {
            Some(offset) => offset,
            None => panic!("no storage for cell ({} {}) at level {}", index.0, index.1, level),
        };
        let nq = self.num_fields;
        &mut self.data[slot][offset * nq..(offset + 1) * nq]
    }

    pub fn value(&self, component: usize, level: u32, index: (i64, i64)) -> f64 {
        self.get_slice(level, index)[component]
    }

    /**
     * Accumulate into one component of one cell.
     */
    pub fn add(&mut self, component: usize, level: u32, index: (i64, i64), delta: f64) {
        self.get_slice_mut(level, index)[component] += delta
    }

    /**
     * Feed every leaf cell to a callback, coarsest level first. This is
     * the output boundary: persistence formats adapt this callback.
     */
    pub fn for_each_leaf<F>(&self, mesh: &Mesh, mut f: F)
    where
        F: FnMut(u32, (i64, i64), (f64, f64), &[f64])
    {
        mesh.for_each_leaf(|level, index| {
            f(level, index, mesh.cell_center(level, index), self.get_slice(level, index))
        })
    }

    /**
     * Sum one component over the leaves, weighted by cell volume. Linear
     * resolution transfer leaves this invariant.
     */
    pub fn total(&self, mesh: &Mesh, component: usize) -> f64 {
        let mut sum = 0.0;
        self.for_each_leaf(mesh, |level, _, _, q| {
            let (dx, dy) = mesh.cell_spacing(level);
            sum += q[component] * dx * dy;
        });
        sum
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::mesh::Mesh;

    #[test]
    fn cell_index_is_dense_and_ordered() {
        let mut set = crate::subset::LevelSet::new(0);
        set.insert(1, 0..4);
        set.insert(0, 2..5);
        let index = CellIndex::build(&set);

        assert_eq!(index.num_cells(), 7);
        assert_eq!(index.offset((2, 0)), Some(0));
        assert_eq!(index.offset((4, 0)), Some(2));
        assert_eq!(index.offset((0, 1)), Some(3));
        assert_eq!(index.offset((5, 0)), None);
        assert_eq!(index.offset((0, 2)), None);
    }

    #[test]
    fn field_round_trips_values_through_storage() {
        let mesh = Mesh::new((0.0..1.0, 0.0..1.0), 2, 3).unwrap();
        let mut field = Field::zeros(&mesh, 2);

        field.get_slice_mut(3, (1, 2)).copy_from_slice(&[3.5, -1.0]);
        assert_eq!(field.get_slice(3, (1, 2)), &[3.5, -1.0]);
        assert_eq!(field.value(1, 3, (1, 2)), -1.0);
        assert_eq!(field.get_slice(3, (0, 0)), &[0.0, 0.0]);
    }

    #[test]
    fn from_function_initializes_leaves() {
        let mesh = Mesh::new((0.0..1.0, 0.0..1.0), 2, 3).unwrap();
        let field = Field::from_function(&mesh, 1, |_, (x, y), q| q[0] = x + y);

        let mut count = 0;
        field.for_each_leaf(&mesh, |_, _, (x, y), q| {
            assert_eq!(q[0], x + y);
            count += 1;
        });
        assert_eq!(count, 64);
    }

    #[test]
    fn total_weights_by_cell_volume() {
        let mesh = Mesh::new((0.0..1.0, 0.0..1.0), 2, 3).unwrap();
        let field = Field::from_function(&mesh, 1, |_, _, q| q[0] = 2.0);
        assert!((field.total(&mesh, 0) - 2.0).abs() < 1e-12);
    }
}
