use crate::field::Field;
use crate::mesh::Mesh;
use crate::subset::LevelSet;




/**
 * Restore fine-to-coarse consistency: every storage cell whose four
 * children carry current data is overwritten with the arithmetic mean of
 * the children. Levels are processed finest first, so the averages cascade
 * down through multi-level jumps (a coarse ghost two levels below a leaf
 * region is filled from averages of averages). The linear mean preserves
 * any linear conserved quantity, so resolution transfer alone never
 * creates or destroys mass.
 *
 * Must run before prediction in a refresh cycle, since prediction assumes
 * coarse representatives are current.
 */
pub fn project(field: &mut Field, mesh: &Mesh) {
    let mut available: Option<LevelSet> = None;

    for level in (mesh.min_level() + 1..=mesh.max_level()).rev() {
        let current = match available.take() {
            Some(set) => mesh.leaves(level).union(&set),
            None => mesh.leaves(level).clone(),
        };

        let storage = mesh.leaves(level - 1).union(mesh.ghosts(level - 1));
        let targets = current.remap_strict(level - 1).intersection(&storage);

        let mut values = Vec::new();
        targets.for_each_cell(|i, j| {
            let mut mean = vec![0.0; field.num_fields()];
            for &(ci, cj) in &[(2 * i, 2 * j), (2 * i + 1, 2 * j), (2 * i, 2 * j + 1), (2 * i + 1, 2 * j + 1)] {
                for (m, v) in mean.iter_mut().zip(field.get_slice(level, (ci, cj))) {
                    *m += 0.25 * v
                }
            }
            values.push(((i, j), mean));
        });
        for ((i, j), mean) in values {
            field.get_slice_mut(level - 1, (i, j)).copy_from_slice(&mean)
        }

        available = Some(targets);
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::field::Field;
    use crate::mesh::Mesh;
    use crate::subset::LevelSet;

    #[test]
    fn projection_averages_children_onto_coarse_ghosts() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 2, 3).unwrap();
        mesh.apply_coarsen(3, &LevelSet::from_block(3, 0..8, 0..4)).unwrap();

        let mut field = Field::zeros(&mesh, 1);
        mesh.leaves(3).for_each_cell(|i, j| {
            field.get_slice_mut(3, (i, j))[0] = (i + j) as f64;
        });
        project(&mut field, &mesh);

        // The coarse ghost under the fine leaves at (0, 2) averages its
        // four children (0,4), (1,4), (0,5), (1,5).
        let expected = (4.0 + 5.0 + 5.0 + 6.0) / 4.0;
        assert_eq!(field.value(0, 2, (0, 2)), expected);
    }

    #[test]
    fn projection_cascades_through_two_levels() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 1, 3).unwrap();
        mesh.apply_coarsen(3, &LevelSet::from_block(3, 0..8, 0..2)).unwrap();

        // Rows 0..2 at level 3 became level-2 leaves; everything else
        // stays fine. Level-1 ghosts under the fine region average through
        // level 2.
        let mut field = Field::zeros(&mesh, 1);
        mesh.leaves(3).for_each_cell(|i, j| {
            field.get_slice_mut(3, (i, j))[0] = 8.0;
        });
        mesh.leaves(2).for_each_cell(|i, j| {
            field.get_slice_mut(2, (i, j))[0] = 8.0;
        });
        project(&mut field, &mesh);

        assert_eq!(field.value(0, 1, (0, 0)), 8.0);
        assert_eq!(field.value(0, 1, (1, 1)), 8.0);
    }

    #[test]
    fn projection_conserves_the_volume_weighted_total() {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 2, 3).unwrap();
        mesh.apply_coarsen(3, &LevelSet::from_block(3, 4..8, 4..8)).unwrap();

        let mut field = Field::from_function(&mesh, 1, |_, (x, y), q| {
            q[0] = (-50.0 * ((x - 0.5).powi(2) + (y - 0.5).powi(2))).exp()
        });
        let before = field.total(&mesh, 0);
        project(&mut field, &mesh);
        assert!((field.total(&mesh, 0) - before).abs() < 1e-12);
    }
}
