use crate::field::Field;
use crate::mesh::{CellKind, Mesh};
use crate::prediction::{self, PredictionCache};
use crate::projection;
use crate::subset::LevelSet;




/**
 * The multiresolution detail of a cell: the largest component-wise
 * difference between the stored value and its prediction from the parent
 * level. A proxy for the local approximation error; exactly zero wherever
 * the field is locally linear.
 *
 * Leaves at `min_level` have no stored parent, so their parent level is
 * synthesized by projection on the fly; this lets a fully coarsened
 * region grow resolution back when a feature moves into it.
 */
pub fn detail(field: &Field, mesh: &Mesh, level: u32, index: (i64, i64), cache: &mut PredictionCache) -> f64 {
    let stored = field.get_slice(level, index);
    let predicted = if level > mesh.min_level() {
        prediction::predict_value(field, mesh, level, index, cache)
    } else {
        predict_from_virtual_parent(field, mesh, index, cache)
    };
    stored
        .iter()
        .zip(&predicted)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}




/**
 * One-step prediction of a `min_level` cell from a parent level that is
 * not stored: the nine coarse values are projected from `min_level` data
 * directly.
 */
fn predict_from_virtual_parent(field: &Field, mesh: &Mesh, index: (i64, i64), cache: &mut PredictionCache) -> Vec<f64> {
    let level = mesh.min_level();
    assert!(level >= 1, "cannot synthesize a parent below level 0");

    let (i, j) = index;
    let (ig, jg) = (i >> 1, j >> 1);
    let sx = if i & 1 == 0 { 1.0 } else { -1.0 };
    let sy = if j & 1 == 0 { 1.0 } else { -1.0 };

    let mut coarse = |ci: i64, cj: i64| -> Vec<f64> {
        let n = 1i64 << (level - 1);
        let ci = ci.max(0).min(n - 1);
        let cj = cj.max(0).min(n - 1);
        let mut mean = vec![0.0; field.num_fields()];
        for &child in &[(2 * ci, 2 * cj), (2 * ci + 1, 2 * cj), (2 * ci, 2 * cj + 1), (2 * ci + 1, 2 * cj + 1)] {
            let value = prediction::predicted(field, mesh, level, child, cache);
            for (m, v) in mean.iter_mut().zip(&value) {
                *m += 0.25 * v
            }
        }
        mean
    };

    let parent = coarse(ig, jg);
    let w = coarse(ig - 1, jg);
    let e = coarse(ig + 1, jg);
    let s = coarse(ig, jg - 1);
    let n = coarse(ig, jg + 1);
    let sw = coarse(ig - 1, jg - 1);
    let se = coarse(ig + 1, jg - 1);
    let nw = coarse(ig - 1, jg + 1);
    let ne = coarse(ig + 1, jg + 1);

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
 * The level-wise threshold: details shrink by a factor `2^dim` per level
 * of smoothness, so the reference threshold at the finest level scales
 * down by `4` per coarser level.
 */
fn level_threshold(eps: f64, level: u32, max_level: u32) -> f64 {
    eps * f64::powi(2.0, 2 * (level as i32 - max_level as i32))
}




/**
 * One coarsening pass: wherever all four siblings of a quad carry details
 * below the level threshold, the quad collapses into its parent. The pass
 * scans every level, corrects the candidate set until the 2:1 graduation
 * invariant holds, then rebuilds the mesh and transfers the field (the
 * parent takes the conservative mean of its children). Returns `true` if
 * nothing changed, which is the caller's early-exit signal.
 */
pub fn coarsening(field: &mut Field, mesh: &mut Mesh, eps: f64) -> bool {
    projection::project(field, mesh);
    prediction::fill_ghosts(field, mesh);

    let min_level = mesh.min_level();
    let max_level = mesh.max_level();
    let mut cache = PredictionCache::new();

    // Candidate parents, per level, absorbing their four children.
    let mut candidates: Vec<LevelSet> = (min_level..=max_level).map(LevelSet::new).collect();

    for level in min_level..max_level {
        let parents = mesh.leaves(level + 1).remap_strict(level);
        let threshold = level_threshold(eps, level + 1, max_level);
        let slot = (level - min_level) as usize;

        parents.for_each_cell(|i, j| {
            let small = [(2 * i, 2 * j), (2 * i + 1, 2 * j), (2 * i, 2 * j + 1), (2 * i + 1, 2 * j + 1)]
                .iter()
                .all(|&child| detail(field, mesh, level + 1, child, &mut cache) < threshold);
            if small {
                candidates[slot].insert(j, i..i + 1)
            }
        });
    }

    let new_leaves = graduate_coarsening(mesh, &mut candidates);

    if candidates.iter().all(|c| c.is_empty()) {
        return true
    }
    rebuild(field, mesh, new_leaves);
    false
}




/**
 * One refinement pass: any leaf whose detail exceeds the level threshold
 * times the regularity factor splits into four children, along with a
 * one-cell safety margin around it. The refine region is extended until
 * graduation holds, then the mesh is rebuilt and new fine cells are
 * predicted from their parents. Returns `true` if nothing changed.
 */
pub fn refinement(field: &mut Field, mesh: &mut Mesh, eps: f64, regularity: f64) -> bool {
    projection::project(field, mesh);
    prediction::fill_ghosts(field, mesh);

    let min_level = mesh.min_level();
    let max_level = mesh.max_level();
    let mut cache = PredictionCache::new();

    let mut refine: Vec<LevelSet> = (min_level..=max_level).map(LevelSet::new).collect();

    for level in min_level.max(1)..max_level {
        // Refine where the would-be children, whose details shrink by the
        // regularity factor per level, would still resist coarsening.
        let threshold = level_threshold(eps, level + 1, max_level) * f64::powf(2.0, 2.0 + regularity);
        let slot = (level - min_level) as usize;
        let mut flagged = LevelSet::new(level);

        mesh.leaves(level).for_each_cell(|i, j| {
            if detail(field, mesh, level, (i, j), &mut cache) >= threshold {
                flagged.insert(j, i..i + 1)
            }
        });

        // Safety margin: the feature may move into a neighbor before the
        // next adaptation.
        refine[slot] = flagged.expand(1).intersection(mesh.leaves(level));
    }

    let new_leaves = graduate_refinement(mesh, &mut refine);

    if refine.iter().all(|r| r.is_empty()) {
        return true
    }
    rebuild(field, mesh, new_leaves);
    false
}




/**
 * Run coarsening and refinement passes to a fixed point, at most
 * `max_level - min_level` of each, mirroring the driver loop of the
 * reference implementation.
 */
pub fn adapt(field: &mut Field, mesh: &mut Mesh, eps: f64, regularity: f64) {
    let passes = (mesh.max_level() - mesh.min_level()) as usize;

    for _ in 0..passes {
        if coarsening(field, mesh, eps) {
            break
        }
    }
    for _ in 0..passes {
        if refinement(field, mesh, eps, regularity) {
            break
        }
    }
}




/**
 * Drop coarsening candidates until the candidate mesh satisfies the 2:1
 * graduation invariant. Violations can only involve candidate parents
 * (the input mesh is graduated and coarsening only removes resolution),
 * so cancelling the offending candidates always converges.
 */
fn graduate_coarsening(mesh: &Mesh, candidates: &mut [LevelSet]) -> Vec<LevelSet> {
    let min_level = mesh.min_level();
    let max_level = mesh.max_level();

    loop {
        let new_leaves = apply_coarsening(mesh, candidates);
        let mut cancelled = false;

        for la in min_level..max_level {
            let sa = (la - min_level) as usize;
            for lb in la + 2..=max_level {
                let sb = (lb - min_level) as usize;
                let near = new_leaves[sb].expand(1).remap(la);
                let bad = near.intersection(&candidates[sa]);
                if !bad.is_empty() {
                    candidates[sa] = candidates[sa].difference(&bad);
                    cancelled = true;
                }
            }
        }
        if !cancelled {
            return new_leaves
        }
    }
}

fn apply_coarsening(mesh: &Mesh, candidates: &[LevelSet]) -> Vec<LevelSet> {
    let min_level = mesh.min_level();
    let max_level = mesh.max_level();

    (min_level..=max_level)
        .map(|level| {
            let slot = (level - min_level) as usize;
            let mut leaves = mesh.leaves(level).union(&candidates[slot]);
            if level > min_level {
                leaves = leaves.difference(&candidates[slot - 1].remap(level));
            }
            leaves
        })
        .collect()
}




/**
 * Extend the refine region until the refined mesh satisfies the 2:1
 * graduation invariant: a coarse leaf left next to a newly refined region
 * is pulled into the region, exactly the automatic correction the error
 * taxonomy requires.
 */
fn graduate_refinement(mesh: &Mesh, refine: &mut [LevelSet]) -> Vec<LevelSet> {
    let min_level = mesh.min_level();
    let max_level = mesh.max_level();

    loop {
        let new_leaves = apply_refinement(mesh, refine);
        let mut extended = false;

        for la in min_level..max_level {
            let sa = (la - min_level) as usize;
            for lb in la + 2..=max_level {
                let sb = (lb - min_level) as usize;
                let near = new_leaves[sb].expand(1).remap(la);
                let bad = near.intersection(&new_leaves[sa]).difference(&refine[sa]);
                if !bad.is_empty() {
                    refine[sa] = refine[sa].union(&bad);
                    extended = true;
                }
            }
        }
        if !extended {
            return new_leaves
        }
    }
}

fn apply_refinement(mesh: &Mesh, refine: &[LevelSet]) -> Vec<LevelSet> {
    let min_level = mesh.min_level();
    let max_level = mesh.max_level();

    (min_level..=max_level)
        .map(|level| {
            let slot = (level - min_level) as usize;
            let mut leaves = mesh.leaves(level).difference(&refine[slot]);
            if level > min_level {
                leaves = leaves.union(&refine[slot - 1].remap(level));
            }
            leaves
        })
        .collect()
}




/**
 * Install the new leaf sets and rebuild the field on the new layout:
 * surviving leaves copy their values, coarsened parents take the mean of
 * their former children, refined children are predicted from their former
 * parent. Ghost and overleaf values are left for the next refresh cycle.
 */
fn rebuild(field: &mut Field, mesh: &mut Mesh, new_leaves: Vec<LevelSet>) {
    let old_mesh = mesh.clone();
    mesh.try_set_leaves(new_leaves)
        .expect("adaptation pass produced a non-graduated mesh");

    let mut new_field = Field::zeros(mesh, field.num_fields());
    let mut cache = PredictionCache::new();

    mesh.for_each_leaf(|level, (i, j)| {
        let value = if old_mesh.exists(CellKind::Leaf, level, (i, j)) {
            field.get_slice(level, (i, j)).to_vec()
        } else if level < old_mesh.max_level()
            && old_mesh.exists(CellKind::Leaf, level + 1, (2 * i, 2 * j))
        {
            let mut mean = vec![0.0; field.num_fields()];
            for &child in &[(2 * i, 2 * j), (2 * i + 1, 2 * j), (2 * i, 2 * j + 1), (2 * i + 1, 2 * j + 1)] {
                for (m, v) in mean.iter_mut().zip(field.get_slice(level + 1, child)) {
                    *m += 0.25 * v
                }
            }
            mean
        } else {
            prediction::predicted(field, &old_mesh, level, (i, j), &mut cache)
        };
        new_field.get_slice_mut(level, (i, j)).copy_from_slice(&value)
    });

    *field = new_field
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::field::Field;
    use crate::mesh::Mesh;

    fn gaussian_field(mesh: &Mesh) -> Field {
        Field::from_function(mesh, 1, |_, (x, y), q| {
            q[0] = (-500.0 * ((x - 0.5).powi(2) + (y - 0.5).powi(2))).exp()
        })
    }

    #[test]
    fn uniform_field_has_zero_detail_everywhere() {
        let mesh = Mesh::new((0.0..1.0, 0.0..1.0), 3, 5).unwrap();
        let mut field = Field::from_function(&mesh, 1, |_, _, q| q[0] = 1.0);

        projection::project(&mut field, &mesh);
        prediction::fill_ghosts(&mut field, &mesh);

        let mut cache = crate::prediction::PredictionCache::new();
        mesh.leaves(5).for_each_cell(|i, j| {
            assert!(detail(&field, &mesh, 5, (i, j), &mut cache).abs() < 1e-14);
        });
    }

    #[test]
    fn uniform_field_coarsens_to_the_minimum_level() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 3, 5).unwrap();
        let mut field = Field::from_function(&mesh, 1, |_, _, q| q[0] = 1.0);

        adapt(&mut field, &mut mesh, 1e-3, 0.0);
        assert_eq!(mesh.leaves(3).num_cells(), 64);
        assert_eq!(mesh.leaves(4).num_cells(), 0);
        assert_eq!(mesh.leaves(5).num_cells(), 0);
        assert!(mesh.is_partition());
    }

    #[test]
    fn gaussian_bump_keeps_resolution_only_near_the_bump() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 4, 6).unwrap();
        let mut field = gaussian_field(&mesh);

        adapt(&mut field, &mut mesh, 1e-3, 0.0);

        assert!(mesh.is_partition());
        assert!(mesh.check_graduation().is_ok());

        // Far-field cells collapse to the coarsest level.
        assert!(mesh.exists(CellKind::Leaf, 4, (0, 0)));
        assert!(mesh.exists(CellKind::Leaf, 4, (15, 15)));
        assert!(mesh.exists(CellKind::Leaf, 4, (0, 15)));

        // The bump's high-gradient annulus stays at the finest level.
        let mut fine_near_bump = 0;
        mesh.leaves(6).for_each_cell(|i, j| {
            if (24..40).contains(&i) && (24..40).contains(&j) {
                fine_near_bump += 1
            }
        });
        assert!(fine_near_bump > 0);
    }

    #[test]
    fn adaptation_is_idempotent_once_stable() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 4, 6).unwrap();
        let mut field = gaussian_field(&mesh);

        adapt(&mut field, &mut mesh, 1e-3, 0.0);
        let leaves_before = mesh.num_leaves();

        assert!(coarsening(&mut field, &mut mesh, 1e-3));
        assert!(refinement(&mut field, &mut mesh, 1e-3, 0.0));
        assert_eq!(mesh.num_leaves(), leaves_before);
    }

    #[test]
    fn coarsening_conserves_the_volume_weighted_total() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 4, 6).unwrap();
        let mut field = gaussian_field(&mesh);
        let before = field.total(&mesh, 0);

        adapt(&mut field, &mut mesh, 1e-3, 0.0);
        assert!((field.total(&mesh, 0) - before).abs() < 1e-12);
    }

    #[test]
    fn refinement_restores_resolution_when_a_feature_sharpens() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 3, 5).unwrap();
        let mut field = Field::from_function(&mesh, 1, |_, _, q| q[0] = 1.0);
        adapt(&mut field, &mut mesh, 1e-3, 0.0);
        assert_eq!(mesh.leaves(5).num_cells(), 0);

        // Overwrite the coarse field with a sharp bump and re-adapt; the
        // mesh must refine around it without breaking graduation.
        mesh.for_each_leaf(|level, index| {
            let (x, y) = mesh.cell_center(level, index);
            field.get_slice_mut(level, index)[0] =
                1.0 + 5.0 * (-500.0 * ((x - 0.5).powi(2) + (y - 0.5).powi(2))).exp();
        });
        let passes = (mesh.max_level() - mesh.min_level()) as usize;
        for _ in 0..passes {
            if refinement(&mut field, &mut mesh, 1e-3, 0.0) {
                break
            }
        }

        assert!(mesh.leaves(4).num_cells() > 0);
        assert!(mesh.is_partition());
        assert!(mesh.check_graduation().is_ok());
    }
}
