use std::collections::{BTreeMap, HashMap};
use crate::error::Error;
use crate::field::Field;
use crate::mesh::{CellKind, Mesh};
use crate::subset::LevelSet;




/// Memo cache for the recursive predictor, keyed by `(level, i, j)`. A
/// cache lives for one refresh cycle: any write to the field invalidates
/// it, so callers create a fresh one per operator pass.
pub type PredictionCache = HashMap<(u32, i64, i64), Vec<f64>>;




/**
 * Evaluate the field at an arbitrary `(level, index)`. If the position is
 * stored as a leaf or ghost, the stored value is returned directly.
 * Positions outside the domain box clamp to the nearest in-domain cell
 * (zero-gradient closure). Anything else is reconstructed recursively from
 * the next-coarser level with the bilinear-correction formula; recursion
 * depth is bounded by `max_level - min_level`.
 */
pub fn predicted(field: &Field, mesh: &Mesh, level: u32, index: (i64, i64), cache: &mut PredictionCache) -> Vec<f64> {
    let n = 1i64 << level;
    let clamped = (index.0.max(0).min(n - 1), index.1.max(0).min(n - 1));

    if clamped != index {
        return predicted(field, mesh, level, clamped, cache)
    }
    if mesh.exists(CellKind::Leaf, level, index) || mesh.exists(CellKind::Ghost, level, index) {
        return field.get_slice(level, index).to_vec()
    }
    if let Some(value) = cache.get(&(level, index.0, index.1)) {
        return value.clone()
    }
    assert!(
        level > mesh.min_level(),
        "cell ({} {}) at level {} is not derivable", index.0, index.1, level);

    let value = predict_value(field, mesh, level, index, cache);
    cache.insert((level, index.0, index.1), value.clone());
    value
}




/**
 * Reconstruct the value of a cell from its parent and the parent's eight
 * neighbours one level down, regardless of whether the cell itself is
 * stored. This is the one-step prediction operator; the sign pattern is
 * keyed by the parity of the target position within its parent.
 */
pub fn predict_value(field: &Field, mesh: &Mesh, level: u32, index: (i64, i64), cache: &mut PredictionCache) -> Vec<f64> {
    let (i, j) = index;
    let (ig, jg) = (i >> 1, j >> 1);
    let sx = if i & 1 == 0 { 1.0 } else { -1.0 };
    let sy = if j & 1 == 0 { 1.0 } else { -1.0 };

    let parent = predicted(field, mesh, level - 1, (ig, jg), cache);
    let w = predicted(field, mesh, level - 1, (ig - 1, jg), cache);
    let e = predicted(field, mesh, level - 1, (ig + 1, jg), cache);
    let s = predicted(field, mesh, level - 1, (ig, jg - 1), cache);
    let n = predicted(field, mesh, level - 1, (ig, jg + 1), cache);
    let sw = predicted(field, mesh, level - 1, (ig - 1, jg - 1), cache);
    let se = predicted(field, mesh, level - 1, (ig + 1, jg - 1), cache);
    let nw = predicted(field, mesh, level - 1, (ig - 1, jg + 1), cache);
    let ne = predicted(field, mesh, level - 1, (ig + 1, jg + 1), cache);

    (0..field.num_fields())
        .map(|q| {
            parent[q]
                + 0.125 * sx * (w[q] - e[q])
                + 0.125 * sy * (s[q] - n[q])
                - sx * sy / 64.0 * (ne[q] - nw[q] - se[q] + sw[q])
        })
        .collect()
}




/**
 * Fill every ghost cell from the leaf data: in-domain ghosts lying under a
 * coarser leaf are predicted from the level below; ghosts outside the
 * domain box take the nearest in-domain value. Ghosts covered by finer
 * leaves are left alone, since projection keeps them current. Levels are
 * processed coarsest first so each sweep only reads completed data.
 */
pub fn fill_ghosts(field: &mut Field, mesh: &Mesh) {
    let mut cache = PredictionCache::new();

    for level in mesh.min_level()..=mesh.max_level() {
        let in_box = mesh.ghosts(level).intersection(mesh.initial(level));

        if level > mesh.min_level() {
            let targets = in_box.difference(&fine_cover(mesh, level));
            let mut values = Vec::new();
            targets.for_each_cell(|i, j| {
                values.push(((i, j), predict_value(field, mesh, level, (i, j), &mut cache)));
            });
            for ((i, j), value) in values {
                field.get_slice_mut(level, (i, j)).copy_from_slice(&value)
            }
        }

        let outside = mesh.ghosts(level).difference(mesh.initial(level));
        extend_outside(field, mesh, level, &outside, &mut cache);
    }
}




/**
 * Fill the overleaf cells one level finer than each leaf set, using the
 * same prediction formula. Ghosts must be current (`fill_ghosts`) before
 * this runs.
 */
pub fn fill_overleaves(field: &mut Field, mesh: &Mesh) {
    let mut cache = PredictionCache::new();

    for level in mesh.min_level() + 1..=mesh.max_level() {
        let in_box = mesh.overleaves(level).intersection(mesh.initial(level));
        let mut values = Vec::new();
        in_box.for_each_cell(|i, j| {
            values.push(((i, j), predict_value(field, mesh, level, (i, j), &mut cache)));
        });
        for ((i, j), value) in values {
            field.get_slice_mut(level, (i, j)).copy_from_slice(&value)
        }

        let outside = mesh.overleaves(level).difference(mesh.initial(level));
        extend_outside(field, mesh, level, &outside, &mut cache);
    }
}




/**
 * Write the zero-gradient boundary closure onto storage cells outside the
 * domain box.
 */
fn extend_outside(field: &mut Field, mesh: &Mesh, level: u32, outside: &LevelSet, cache: &mut PredictionCache) {
    let mut values = Vec::new();
    outside.for_each_cell(|i, j| {
        values.push(((i, j), predicted(field, mesh, level, (i, j), cache)));
    });
    for ((i, j), value) in values {
        field.get_slice_mut(level, (i, j)).copy_from_slice(&value)
    }
}




/**
 * The set of cells at `level` entirely covered by finer leaves.
 */
fn fine_cover(mesh: &Mesh, level: u32) -> LevelSet {
    let mut cover = LevelSet::new(mesh.max_level());
    for l in (level + 1..=mesh.max_level()).rev() {
        cover = mesh.leaves(l).union(&cover.remap(l)).remap_strict(l - 1);
    }
    cover
}




/**
 * Reconstruct the field everywhere at the finest level. Returns the
 * uniform mesh the reconstruction lives on together with the
 * reconstructed field. Projection and ghost data must be current.
 */
pub fn reconstruct(field: &Field, mesh: &Mesh) -> Result<(Mesh, Field), Error> {
    let fine_mesh = Mesh::new(mesh.area().clone(), mesh.max_level(), mesh.max_level())?;
    let mut out = Field::zeros(&fine_mesh, field.num_fields());
    let mut cache = PredictionCache::new();

    for level in mesh.min_level()..=mesh.max_level() {
        let on_finest = mesh.leaves(level).remap(mesh.max_level());
        let mut values = Vec::new();
        on_finest.for_each_cell(|i, j| {
            values.push(((i, j), predicted(field, mesh, mesh.max_level(), (i, j), &mut cache)));
        });
        for ((i, j), value) in values {
            out.get_slice_mut(mesh.max_level(), (i, j)).copy_from_slice(&value)
        }
    }
    Ok((fine_mesh, out))
}




/**
 * A linear combination of cell values, stored as a sorted map from cell
 * offset to weight. This is the flattened form of the recursive prediction
 * operator: evaluating a predicted value becomes a dot product over the
 * map. Iteration order is deterministic (sorted by offset).
 */
#[derive(Clone, Debug, Default)]
pub struct PredictionMap {
    coeff: BTreeMap<(i64, i64), f64>,
}




// ============================================================================
impl PredictionMap {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.coeff.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(i64, i64), &f64)> {
        self.coeff.iter()
    }

    pub fn total_weight(&self) -> f64 {
        self.coeff.values().sum()
    }

    fn accumulate(&mut self, other: &Self, weight: f64) {
        for (offset, w) in &other.coeff {
            *self.coeff.entry(*offset).or_insert(0.0) += weight * w
        }
    }

    fn unit(offset: (i64, i64)) -> Self {
        let mut coeff = BTreeMap::new();
        coeff.insert(offset, 1.0);
        Self { coeff }
    }

    /**
     * Express the value of fine cell `(i, j)`, `gap` levels below the
     * storage level, as weights over storage-level cells. The recursion
     * mirrors the runtime predictor with all field values symbolic.
     */
    pub fn prediction(gap: u32, i: i64, j: i64, memo: &mut HashMap<(u32, i64, i64), PredictionMap>) -> Self {
        if let Some(hit) = memo.get(&(gap, i, j)) {
            return hit.clone()
        }
        let result = if gap == 0 {
            Self::unit((i, j))
        } else {
            let (ig, jg) = (i >> 1, j >> 1);
            let sx = if i & 1 == 0 { 1.0 } else { -1.0 };
            let sy = if j & 1 == 0 { 1.0 } else { -1.0 };
            let cross = -sx * sy / 64.0;

            let mut map = Self::new();
            map.accumulate(&Self::prediction(gap - 1, ig, jg, memo), 1.0);
            map.accumulate(&Self::prediction(gap - 1, ig - 1, jg, memo), 0.125 * sx);
            map.accumulate(&Self::prediction(gap - 1, ig + 1, jg, memo), -0.125 * sx);
            map.accumulate(&Self::prediction(gap - 1, ig, jg - 1, memo), 0.125 * sy);
            map.accumulate(&Self::prediction(gap - 1, ig, jg + 1, memo), -0.125 * sy);
            map.accumulate(&Self::prediction(gap - 1, ig + 1, jg + 1, memo), cross);
            map.accumulate(&Self::prediction(gap - 1, ig - 1, jg + 1, memo), -cross);
            map.accumulate(&Self::prediction(gap - 1, ig + 1, jg - 1, memo), -cross);
            map.accumulate(&Self::prediction(gap - 1, ig - 1, jg - 1, memo), cross);
            map
        };
        memo.insert((gap, i, j), result.clone());
        result
    }
}




/// Number of flux slots per level gap: the four axis velocities carry one
/// entering and one exiting face each, the four diagonal velocities carry
/// three of each (two sides and the corner).
pub const NUM_SLOTS: usize = 32;




/// Velocity index served by each flux slot.
pub const SLOT_VELOCITY: [usize; NUM_SLOTS] = [
    1, 1, 2, 2, 3, 3, 4, 4,
    5, 5, 5, 5, 5, 5,
    6, 6, 6, 6, 6, 6,
    7, 7, 7, 7, 7, 7,
    8, 8, 8, 8, 8, 8,
];




/**
 * The per-level-gap stencil-coefficient tables for the overleaf flux
 * scheme: for every slot, a flat `(offset, weight)` list expressing the
 * flux through one face of a coarse cell in terms of overleaf-level
 * values. Built once at start-up by rotating the canonical "moving in +x"
 * stencil onto all eight moving directions, and immutable afterwards.
 */
pub struct FluxStencils {
    min_level: u32,
    max_level: u32,
    slots: Vec<Vec<PredictionMap>>,
}




// ============================================================================
impl FluxStencils {

    pub fn compute(min_level: u32, max_level: u32) -> Result<Self, Error> {
        let mut memo = HashMap::new();
        let mut slots = Vec::new();

        for gap in 0..=max_level - min_level {
            let size = 1i64 << gap;
            let mut table = vec![PredictionMap::new(); NUM_SLOTS];

            // Axis velocities: one entering and one exiting face each,
            // rotated from the canonical +x direction.
            for alpha in 0..4 {
                for l in 0..size {
                    let enter = rotate(alpha, tau(gap, -1), tau(gap, l));
                    let exit = rotate(alpha, tau(gap, size - 1), tau(gap, l));

                    let enter = PredictionMap::prediction(gap, tau_inverse(gap, enter.0), tau_inverse(gap, enter.1), &mut memo);
                    let exit = PredictionMap::prediction(gap, tau_inverse(gap, exit.0), tau_inverse(gap, exit.1), &mut memo);
                    table[2 * alpha].accumulate(&enter, 1.0);
                    table[2 * alpha + 1].accumulate(&exit, 1.0);
                }
            }

            // Diagonal velocities: two sides and the corner, entering and
            // exiting.
            for alpha in 0..4 {
                let base = 8 + 6 * alpha;

                for l in 0..size - 1 {
                    let enter = rotate(alpha, tau(gap, -1), tau(gap, l));
                    let exit = rotate(alpha, tau(gap, size - 1), tau(gap, l));

                    let enter = PredictionMap::prediction(gap, tau_inverse(gap, enter.0), tau_inverse(gap, enter.1), &mut memo);
                    let exit = PredictionMap::prediction(gap, tau_inverse(gap, exit.0), tau_inverse(gap, exit.1), &mut memo);
                    table[base].accumulate(&enter, 1.0);
                    table[base + 3].accumulate(&exit, 1.0);
                }
                {
                    let enter = rotate(alpha, tau(gap, -1), tau(gap, -1));
                    let exit = rotate(alpha, tau(gap, size - 1), tau(gap, size - 1));

                    let enter = PredictionMap::prediction(gap, tau_inverse(gap, enter.0), tau_inverse(gap, enter.1), &mut memo);
                    let exit = PredictionMap::prediction(gap, tau_inverse(gap, exit.0), tau_inverse(gap, exit.1), &mut memo);
                    table[base + 1].accumulate(&enter, 1.0);
                    table[base + 4].accumulate(&exit, 1.0);
                }
                for l in 0..size - 1 {
                    let enter = rotate(alpha, tau(gap, l), tau(gap, -1));
                    let exit = rotate(alpha, tau(gap, l), tau(gap, size - 1));

                    let enter = PredictionMap::prediction(gap, tau_inverse(gap, enter.0), tau_inverse(gap, enter.1), &mut memo);
                    let exit = PredictionMap::prediction(gap, tau_inverse(gap, exit.0), tau_inverse(gap, exit.1), &mut memo);
                    table[base + 2].accumulate(&enter, 1.0);
                    table[base + 5].accumulate(&exit, 1.0);
                }
            }
            slots.push(table)
        }

        let stencils = Self { min_level, max_level, slots };
        stencils.validate()?;
        Ok(stencils)
    }

    pub fn slot(&self, gap: u32, slot: usize) -> &PredictionMap {
        &self.slots[gap as usize][slot]
    }

    pub fn num_gaps(&self) -> u32 {
        self.max_level - self.min_level + 1
    }

    /**
     * Check that every moving velocity is covered by its flux slots at
     * every gap: the entering and exiting weights must both sum to the
     * number of sub-faces of the coarse face (`2^gap` for axis directions,
     * `2^(gap+1) - 1` for diagonals).
     */
    fn validate(&self) -> Result<(), Error> {
        for gap in 0..self.num_gaps() {
            let size = (1i64 << gap) as f64;

            for vel in 1..crate::lattice::NUM_VEL {
                let expected = if vel < 5 { size } else { 2.0 * size - 1.0 };
                let enter: f64 = (0..NUM_SLOTS)
                    .filter(|&s| SLOT_VELOCITY[s] == vel && slot_is_entering(s))
                    .map(|s| self.slot(gap, s).total_weight())
                    .sum();
                let exit: f64 = (0..NUM_SLOTS)
                    .filter(|&s| SLOT_VELOCITY[s] == vel && !slot_is_entering(s))
                    .map(|s| self.slot(gap, s).total_weight())
                    .sum();

                if (enter - expected).abs() > 1e-10 || (exit - expected).abs() > 1e-10 {
                    return Err(Error::UnmappedDirection(vel))
                }
            }
        }
        Ok(())
    }
}




/**
 * Whether a slot accumulates entering (as opposed to exiting) flux.
 */
pub fn slot_is_entering(slot: usize) -> bool {
    if slot < 8 {
        slot % 2 == 0
    } else {
        (slot - 8) % 6 < 3
    }
}




/**
 * Rotation of `(k, h)` by `alpha` quarter turns, exactly on integers.
 */
fn rotate(alpha: usize, k: i64, h: i64) -> (i64, i64) {
    let (cos, sin) = [(1, 0), (0, 1), (-1, 0), (0, -1)][alpha];
    (cos * k - sin * h, sin * k + cos * h)
}




/**
 * Shift cell indexes so the quarter-turn rotations act about the centre of
 * the `2^delta` block rather than its corner.
 */
fn tau(delta: u32, k: i64) -> i64 {
    if delta == 0 {
        k
    } else {
        let tmp = 1i64 << (delta - 1);
        if k < tmp { k - tmp } else { k - tmp + 1 }
    }
}

fn tau_inverse(delta: u32, k: i64) -> i64 {
    if delta == 0 {
        k
    } else {
        let tmp = 1i64 << (delta - 1);
        if k < 0 { k + tmp } else { k + tmp - 1 }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::field::Field;
    use crate::mesh::Mesh;
    use crate::projection;
    use crate::subset::LevelSet;

    fn coarse_mesh() -> Mesh {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 2, 4).unwrap();
        mesh.apply_coarsen(4, &LevelSet::from_block(4, 0..16, 0..16)).unwrap();
        mesh.apply_coarsen(3, &LevelSet::from_block(3, 0..8, 0..8)).unwrap();
        mesh
    }

    #[test]
    fn prediction_reproduces_constants_exactly() {
        let mesh = coarse_mesh();
        let mut field = Field::from_function(&mesh, 1, |_, _, q| q[0] = 1.0);

        projection::project(&mut field, &mesh);
        fill_ghosts(&mut field, &mesh);

        let mut cache = PredictionCache::new();
        for &index in &[(0, 0), (7, 3), (15, 15), (9, 2)] {
            let value = predicted(&field, &mesh, 4, index, &mut cache);
            assert!((value[0] - 1.0).abs() < 1e-14);
        }
    }

    #[test]
    fn prediction_is_exact_for_linear_fields() {
        let mesh = coarse_mesh();
        let mut field = Field::from_function(&mesh, 1, |_, (x, y), q| q[0] = 2.0 * x - y);

        projection::project(&mut field, &mesh);
        fill_ghosts(&mut field, &mesh);

        // Away from the boundary the quadratic correction terms vanish on
        // a linear field, so prediction reproduces the cell averages.
        let mut cache = PredictionCache::new();
        for &index in &[(7, 7), (8, 5), (5, 9)] {
            let (x, y) = mesh.cell_center(4, index);
            let value = predicted(&field, &mesh, 4, index, &mut cache);
            assert!((value[0] - (2.0 * x - y)).abs() < 1e-12);
        }
    }

    #[test]
    fn projection_of_predicted_children_restores_the_parent() {
        let mesh = coarse_mesh();
        let mut field = Field::from_function(&mesh, 1, |_, (x, y), q| {
            q[0] = (x * 3.1).sin() + (y * 2.3).cos()
        });

        projection::project(&mut field, &mesh);
        fill_ghosts(&mut field, &mesh);

        // The four sign patterns of the correction terms cancel in the
        // mean, so predicting the children and projecting back is the
        // identity on the parent.
        let mut cache = PredictionCache::new();
        for &(i, j) in &[(1, 1), (2, 3), (0, 0)] {
            let mut mean = 0.0;
            for &child in &[(2 * i, 2 * j), (2 * i + 1, 2 * j), (2 * i, 2 * j + 1), (2 * i + 1, 2 * j + 1)] {
                mean += 0.25 * predict_value(&field, &mesh, 3, child, &mut cache)[0];
            }
            assert!((mean - field.value(0, 2, (i, j))).abs() < 1e-14);
        }
    }

    #[test]
    fn prediction_map_weights_sum_to_one() {
        let mut memo = HashMap::new();
        for &(gap, i, j) in &[(0, 0, 0), (1, 0, 1), (2, 3, 2), (3, -2, 5)] {
            let map = PredictionMap::prediction(gap, i, j, &mut memo);
            assert!((map.total_weight() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn gap_zero_slots_are_unit_neighbor_offsets() {
        let stencils = FluxStencils::compute(4, 6).unwrap();

        // At gap zero the entering face of the +x velocity is the single
        // cell at offset (-1, 0), and its +y rotation is (0, -1).
        let slot0: Vec<_> = stencils.slot(0, 0).iter().map(|(o, w)| (*o, *w)).collect();
        assert_eq!(slot0, vec![((-1, 0), 1.0)]);
        let slot2: Vec<_> = stencils.slot(0, 2).iter().map(|(o, w)| (*o, *w)).collect();
        assert_eq!(slot2, vec![((0, -1), 1.0)]);
    }

    #[test]
    fn flux_stencils_validate_across_gaps() {
        assert!(FluxStencils::compute(2, 6).is_ok());
        assert!(FluxStencils::compute(6, 6).is_ok());
    }

    #[test]
    fn reconstruction_of_a_constant_is_constant() {
        let mesh = coarse_mesh();
        let mut field = Field::from_function(&mesh, 2, |_, _, q| {
            q[0] = 0.5;
            q[1] = -1.5;
        });

        projection::project(&mut field, &mesh);
        fill_ghosts(&mut field, &mesh);

        let (fine_mesh, fine) = reconstruct(&field, &mesh).unwrap();
        fine.for_each_leaf(&fine_mesh, |_, _, _, q| {
            assert!((q[0] - 0.5).abs() < 1e-14);
            assert!((q[1] + 1.5).abs() < 1e-14);
        });
    }
}
