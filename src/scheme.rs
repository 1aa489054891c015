use log::debug;
use crate::field::Field;
use crate::lattice::{self, LatticeParams, NUM_VEL, OPPOSITE, VELOCITIES};
use crate::mesh::Mesh;
use crate::prediction::{self, FluxStencils, SLOT_VELOCITY};
use crate::projection;
use crate::subset::{difference, intersection, translate, LevelSet, Subset};




/// The four physical domain boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wall {
    North,
    South,
    East,
    West,
}




// ============================================================================
impl Wall {

    /**
     * Whether a population moving with the given velocity streams from
     * outside the domain when its cell sits on this wall.
     */
    fn blocks(self, vel: usize) -> bool {
        let (cx, cy) = VELOCITIES[vel];
        match self {
            Wall::East => cx < 0,
            Wall::West => cx > 0,
            Wall::North => cy < 0,
            Wall::South => cy > 0,
        }
    }

    /**
     * Component of the velocity along the wall tangent, oriented +x for
     * horizontal walls and +y for vertical ones. Fixes the sign of the
     * moving-wall momentum correction.
     */
    fn tangent(self, vel: usize) -> f64 {
        let (cx, cy) = VELOCITIES[vel];
        match self {
            Wall::North | Wall::South => cx as f64,
            Wall::East | Wall::West => cy as f64,
        }
    }
}




/// Closure applied at one physical boundary.
#[derive(Clone, Copy, Debug)]
pub enum WallRule {
    BounceBack,
    MovingWall(f64),
}




/// Per-boundary closure configuration, consumed by the flux scheme's
/// closure-selection logic.
#[derive(Clone, Copy, Debug)]
pub struct BoundaryConfig {
    pub north: WallRule,
    pub south: WallRule,
    pub east: WallRule,
    pub west: WallRule,
}




// ============================================================================
impl BoundaryConfig {

    /**
     * All four walls at rest.
     */
    pub fn bounce_back() -> Self {
        Self {
            north: WallRule::BounceBack,
            south: WallRule::BounceBack,
            east: WallRule::BounceBack,
            west: WallRule::BounceBack,
        }
    }

    /**
     * The lid-driven cavity: the north wall slides in +x at the given
     * speed, the other walls are at rest.
     */
    pub fn lid_driven(u_lid: f64) -> Self {
        Self {
            north: WallRule::MovingWall(u_lid),
            ..Self::bounce_back()
        }
    }

    fn rule(&self, wall: Wall) -> WallRule {
        match wall {
            Wall::North => self.north,
            Wall::South => self.south,
            Wall::East => self.east,
            Wall::West => self.west,
        }
    }
}




/// Compass tag for the boundary-adjacency dispatch: which walls a cell
/// region touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Interior,
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}




/// The eight boundary regions, in traversal order.
pub const BOUNDARY_REGIONS: [Region; 8] = [
    Region::East,
    Region::North,
    Region::West,
    Region::South,
    Region::NorthEast,
    Region::NorthWest,
    Region::SouthWest,
    Region::SouthEast,
];




// ============================================================================
impl Region {

    pub fn walls(self) -> &'static [Wall] {
        match self {
            Region::Interior => &[],
            Region::North => &[Wall::North],
            Region::South => &[Wall::South],
            Region::East => &[Wall::East],
            Region::West => &[Wall::West],
            Region::NorthEast => &[Wall::East, Wall::North],
            Region::NorthWest => &[Wall::West, Wall::North],
            Region::SouthEast => &[Wall::East, Wall::South],
            Region::SouthWest => &[Wall::West, Wall::South],
        }
    }
}




/// How one population of one cell is advected: streamed from its upstream
/// neighbor, or reconstructed by a wall closure.
#[derive(Clone, Copy, Debug)]
enum Advect {
    Stream,
    Bounce { from: usize, lid: f64 },
}




/**
 * Select the closure for one lattice direction in one boundary region: a
 * population whose upstream cell lies outside the domain takes the
 * reflected opposite population, plus `0.5 u ρ` times the tangential
 * velocity component for every moving wall it bounces off. Every direction
 * in every region resolves to exactly one case, so no boundary direction
 * can go unhandled.
 */
fn closure(region: Region, vel: usize, bc: &BoundaryConfig) -> Advect {
    let mut blocked = false;
    let mut lid = 0.0;

    for &wall in region.walls() {
        if wall.blocks(vel) {
            blocked = true;
            if let WallRule::MovingWall(u) = bc.rule(wall) {
                lid += 0.5 * u * wall.tangent(vel);
            }
        }
    }
    if blocked {
        Advect::Bounce { from: OPPOSITE[vel], lid }
    } else {
        Advect::Stream
    }
}




/// Entering flux slots: slot id, velocity served, and the wall(s) the
/// slot's face lies on. A slot is dropped (and replaced by the wall
/// closure) in any region that contains one of its faces.
const IN_SLOTS: [(usize, usize, &[Wall]); 16] = [
    (0, 1, &[Wall::West]),
    (2, 2, &[Wall::South]),
    (4, 3, &[Wall::East]),
    (6, 4, &[Wall::North]),
    (8, 5, &[Wall::West]),
    (9, 5, &[Wall::West, Wall::South]),
    (10, 5, &[Wall::South]),
    (14, 6, &[Wall::South]),
    (15, 6, &[Wall::South, Wall::East]),
    (16, 6, &[Wall::East]),
    (20, 7, &[Wall::East]),
    (21, 7, &[Wall::East, Wall::North]),
    (22, 7, &[Wall::North]),
    (26, 8, &[Wall::North]),
    (27, 8, &[Wall::North, Wall::West]),
    (28, 8, &[Wall::West]),
];




/// Exiting flux slots, valid on every overleaf.
const OUT_SLOTS: [(usize, usize); 16] = [
    (1, 1),
    (3, 2),
    (5, 3),
    (7, 4),
    (11, 5),
    (12, 5),
    (13, 5),
    (17, 6),
    (18, 6),
    (19, 6),
    (23, 7),
    (24, 7),
    (25, 7),
    (29, 8),
    (30, 8),
    (31, 8),
];




/**
 * The cells of `set` (given at `level`) lying in one compass region of the
 * domain boundary: within one cell of the named wall(s) and away from the
 * other walls. Built from the set algebra by translating the full box
 * against itself, as the width-`2^(max_level - level)` strips at the
 * finest level are exactly one cell wide at `level`.
 */
pub fn adjacent_boundary(mesh: &Mesh, level: u32, set: &LevelSet, region: Region) -> LevelSet {
    let max = mesh.max_level();
    let c = 1i64 << (max - level);
    let b = || Subset::from(mesh.initial(max));
    let t = |dx: i64, dy: i64| translate(b(), (dx * c, dy * c), max);
    let strip = |dx: i64, dy: i64| difference(b(), t(dx, dy));

    let expr = match region {
        Region::Interior => b(),
        Region::East => difference(difference(strip(-1, 0), strip(0, -1)), strip(0, 1)),
        Region::West => difference(difference(strip(1, 0), strip(0, -1)), strip(0, 1)),
        Region::North => difference(difference(strip(0, -1), strip(-1, 0)), strip(1, 0)),
        Region::South => difference(difference(strip(0, 1), strip(-1, 0)), strip(1, 0)),
        Region::NorthEast => difference(difference(strip(-1, -1), t(0, -1)), t(-1, 0)),
        Region::NorthWest => difference(difference(strip(1, -1), t(0, -1)), t(1, 0)),
        Region::SouthWest => difference(difference(strip(1, 1), t(0, 1)), t(1, 0)),
        Region::SouthEast => difference(difference(strip(-1, 1), t(0, 1)), t(-1, 0)),
    };
    intersection(expr, set.into()).on(level).materialize()
}




/**
 * Advance the field by one time step with the overleaves-corrected
 * transport-and-collision scheme. At the finest level populations stream
 * directly between neighbors; below it, fluxes are evaluated one level
 * finer than storage through the precomputed stencil tables and the net
 * flux of the four overleaf children is injected conservatively into the
 * coarse leaf. Wall closures override the directions pointing out of the
 * domain in both branches. The relaxation step is local and closes the
 * update.
 */
pub fn step(field: &mut Field, mesh: &Mesh, stencils: &FluxStencils, params: &LatticeParams, bc: &BoundaryConfig) {
    assert_eq!(field.num_fields(), NUM_VEL);

    debug!("projecting");
    projection::project(field, mesh);
    debug!("predicting ghosts");
    prediction::fill_ghosts(field, mesh);
    debug!("predicting overleaves");
    prediction::fill_overleaves(field, mesh);

    let dx = mesh.cell_spacing(mesh.max_level()).0;
    let mut new_f = Field::zeros(mesh, NUM_VEL);
    let mut advected = Field::zeros(mesh, NUM_VEL);
    let mut fluxes = Field::zeros(mesh, NUM_VEL);

    for level in mesh.min_level()..=mesh.max_level() {
        if mesh.leaves(level).is_empty() {
            continue
        }
        if level == mesh.max_level() {
            advect_finest(field, mesh, bc, &mut advected);

            debug!("colliding at the finest level");
            let mut values = Vec::new();
            mesh.leaves(level).for_each_cell(|k, h| {
                values.push(((k, h), params.collide(dx, advected.get_slice(level, (k, h)))));
            });
            for ((k, h), value) in values {
                new_f.get_slice_mut(level, (k, h)).copy_from_slice(&value)
            }
        } else {
            debug!("advecting level {} on overleaves at {}", level, level + 1);
            accumulate_overleaf_fluxes(field, mesh, stencils, bc, level, &mut fluxes);

            debug!("injecting fluxes and colliding at level {}", level);
            let mut values = Vec::new();
            mesh.leaves(level).for_each_cell(|k, h| {
                let mut adv = field.get_slice(level, (k, h)).to_vec();
                for (vel, a) in adv.iter_mut().enumerate() {
                    let sum = fluxes.value(vel, level + 1, (2 * k, 2 * h))
                        + fluxes.value(vel, level + 1, (2 * k + 1, 2 * h))
                        + fluxes.value(vel, level + 1, (2 * k, 2 * h + 1))
                        + fluxes.value(vel, level + 1, (2 * k + 1, 2 * h + 1));
                    *a += 0.25 * sum;
                }
                values.push(((k, h), params.collide(dx, &adv)));
            });
            for ((k, h), value) in values {
                new_f.get_slice_mut(level, (k, h)).copy_from_slice(&value)
            }
        }
    }
    *field = new_f
}




/**
 * The finest-level transport branch: populations stream from their
 * upstream neighbor, except where a wall closure overrides them.
 */
fn advect_finest(field: &Field, mesh: &Mesh, bc: &BoundaryConfig, advected: &mut Field) {
    let level = mesh.max_level();
    let mut covered = LevelSet::new(level);

    let apply = |region: Region, set: &LevelSet, advected: &mut Field| {
        set.for_each_cell(|k, h| {
            let rho = lattice::density(field.get_slice(level, (k, h)));
            let out = advected.get_slice_mut(level, (k, h));

            for vel in 0..NUM_VEL {
                out[vel] = match closure(region, vel, bc) {
                    Advect::Stream => {
                        let (cx, cy) = VELOCITIES[vel];
                        field.value(vel, level, (k - cx, h - cy))
                    }
                    Advect::Bounce { from, lid } => field.value(from, level, (k, h)) + lid * rho,
                };
            }
        })
    };

    for &region in &BOUNDARY_REGIONS {
        let set = adjacent_boundary(mesh, level, mesh.leaves(level), region);
        apply(region, &set, advected);
        covered = covered.union(&set);
    }
    let interior = mesh.leaves(level).difference(&covered);
    apply(Region::Interior, &interior, advected);
}




/**
 * The coarse-level transport branch: accumulate entering and exiting
 * fluxes on the overleaves of every leaf at `level`, replacing entering
 * slots whose faces lie on a wall with the bounce-back or moving-wall
 * closure. Reflections are weighted by the number of wall sub-faces the
 * direction crosses (`2^gap` on one wall, `2^(gap+1) - 1` across a
 * corner), and each moving-wall face contributes the tangential momentum
 * correction; the same rule covers every region.
 */
fn accumulate_overleaf_fluxes(
    field: &Field,
    mesh: &Mesh,
    stencils: &FluxStencils,
    bc: &BoundaryConfig,
    level: u32,
    fluxes: &mut Field,
) {
    let gap = mesh.max_level() - (level + 1);
    let coeff = 1.0 / f64::powi(4.0, gap as i32);
    let face = (1i64 << gap) as f64;
    let double_face = 2.0 * face - 1.0;
    let over = level + 1;

    let children = mesh.leaves(level).remap(over);
    let mut covered = LevelSet::new(over);

    let slot_sum = |slot: usize, vel: usize, k: i64, h: i64| -> f64 {
        debug_assert_eq!(SLOT_VELOCITY[slot], vel);
        let mut sum = 0.0;
        for (&(ox, oy), &w) in stencils.slot(gap, slot).iter() {
            sum += w * field.value(vel, over, (k + ox, h + oy));
        }
        sum
    };

    for &region in &BOUNDARY_REGIONS {
        let set = adjacent_boundary(mesh, over, &children, region);

        set.for_each_cell(|k, h| {
            // Entering fluxes whose faces are not on a wall of this region.
            for &(slot, vel, faces) in &IN_SLOTS {
                if faces.iter().any(|w| region.walls().contains(w)) {
                    continue
                }
                fluxes.add(vel, over, (k, h), coeff * slot_sum(slot, vel, k, h));
            }

            // Wall closures for the blocked directions.
            let rho = lattice::density(field.get_slice(over, (k, h)));
            for vel in 1..NUM_VEL {
                let crossings = region.walls().iter().filter(|w| w.blocks(vel)).count();
                if crossings == 0 {
                    continue
                }
                let weight = if crossings == 2 { double_face } else { face };
                let mut corr = weight * field.value(OPPOSITE[vel], over, (k, h));

                for &wall in region.walls() {
                    if wall.blocks(vel) {
                        if let WallRule::MovingWall(u) = bc.rule(wall) {
                            corr += face * 0.5 * u * wall.tangent(vel) * rho;
                        }
                    }
                }
                fluxes.add(vel, over, (k, h), coeff * corr);
            }
        });
        covered = covered.union(&set);
    }

    // Exiting fluxes are valid everywhere.
    children.for_each_cell(|k, h| {
        for &(slot, vel) in &OUT_SLOTS {
            fluxes.add(vel, over, (k, h), -coeff * slot_sum(slot, vel, k, h));
        }
    });

    // Entering fluxes far from the boundary.
    let far = children.difference(&covered);
    far.for_each_cell(|k, h| {
        for &(slot, vel, _) in &IN_SLOTS {
            fluxes.add(vel, over, (k, h), coeff * slot_sum(slot, vel, k, h));
        }
    });
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::field::Field;
    use crate::lattice::LatticeParams;
    use crate::mesh::Mesh;
    use crate::prediction::FluxStencils;
    use crate::subset::LevelSet;

    const PARAMS: LatticeParams = LatticeParams {
        lambda: 1.0,
        rho0: 1.0,
        mu: 5.0e-6,
        zeta: 5.0e-4,
    };

    fn mixed_level_mesh() -> Mesh {
        let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), 3, 5).unwrap();
        mesh.apply_coarsen(5, &LevelSet::from_block(5, 0..32, 0..16)).unwrap();
        mesh.apply_coarsen(4, &LevelSet::from_block(4, 0..16, 0..4)).unwrap();
        mesh
    }

    fn equilibrium_field(mesh: &Mesh) -> Field {
        Field::from_function(mesh, NUM_VEL, |_, _, q| {
            q.copy_from_slice(&PARAMS.equilibrium(1.0, 0.0, 0.0))
        })
    }

    #[test]
    fn blocked_directions_match_the_compass_regions() {
        let bc = BoundaryConfig::bounce_back();
        let blocked = |region: Region| -> Vec<usize> {
            (1..NUM_VEL)
                .filter(|&v| matches!(closure(region, v, &bc), Advect::Bounce { .. }))
                .collect()
        };

        assert_eq!(blocked(Region::East), vec![3, 6, 7]);
        assert_eq!(blocked(Region::West), vec![1, 5, 8]);
        assert_eq!(blocked(Region::North), vec![4, 7, 8]);
        assert_eq!(blocked(Region::South), vec![2, 5, 6]);
        assert_eq!(blocked(Region::NorthEast), vec![3, 4, 6, 7, 8]);
        assert_eq!(blocked(Region::NorthWest), vec![1, 4, 5, 7, 8]);
        assert_eq!(blocked(Region::SouthEast), vec![2, 3, 5, 6, 7]);
        assert_eq!(blocked(Region::SouthWest), vec![1, 2, 5, 6, 8]);
        assert_eq!(blocked(Region::Interior), Vec::<usize>::new());
    }

    #[test]
    fn moving_lid_corrections_carry_the_tangential_sign() {
        let bc = BoundaryConfig::lid_driven(0.05);

        match closure(Region::North, 7, &bc) {
            Advect::Bounce { from, lid } => {
                assert_eq!(from, 5);
                assert!((lid + 0.025).abs() < 1e-15);
            }
            _ => panic!("direction 7 must bounce at the north wall"),
        }
        match closure(Region::North, 8, &bc) {
            Advect::Bounce { from, lid } => {
                assert_eq!(from, 6);
                assert!((lid - 0.025).abs() < 1e-15);
            }
            _ => panic!("direction 8 must bounce at the north wall"),
        }
        match closure(Region::North, 4, &bc) {
            Advect::Bounce { from, lid } => {
                assert_eq!(from, 2);
                assert_eq!(lid, 0.0);
            }
            _ => panic!("direction 4 must bounce at the north wall"),
        }
    }

    #[test]
    fn boundary_regions_partition_the_boundary_cells() {
        let mesh = mixed_level_mesh();

        for level in mesh.min_level()..=mesh.max_level() {
            let full = mesh.initial(level);
            let mut seen = LevelSet::new(level);
            let mut count = 0;

            for &region in &BOUNDARY_REGIONS {
                let set = adjacent_boundary(&mesh, level, full, region);
                count += set.num_cells();
                seen = seen.union(&set);
            }
            let n = 1i64 << level;
            assert_eq!(count, (4 * (n - 1)) as usize);
            assert_eq!(seen.num_cells(), (4 * (n - 1)) as usize);
            assert!(seen.contains((0, 0)));
            assert!(seen.contains((n - 1, n - 1)));
            assert!(!seen.contains((1, 1)));
        }
    }

    #[test]
    fn resting_equilibrium_is_stationary_with_bounce_back_walls() {
        let mesh = mixed_level_mesh();
        let stencils = FluxStencils::compute(3, 5).unwrap();
        let mut field = equilibrium_field(&mesh);
        let reference = equilibrium_field(&mesh);
        let bc = BoundaryConfig::bounce_back();

        step(&mut field, &mesh, &stencils, &PARAMS, &bc);

        field.for_each_leaf(&mesh, |level, index, _, q| {
            let r = reference.get_slice(level, index);
            for (a, b) in q.iter().zip(r) {
                assert!((a - b).abs() < 1e-12, "drift at level {} cell {:?}", level, index);
            }
        });
    }

    #[test]
    fn one_step_conserves_mass_on_a_mixed_mesh() {
        let mesh = mixed_level_mesh();
        let stencils = FluxStencils::compute(3, 5).unwrap();
        let bc = BoundaryConfig::bounce_back();

        let mut field = Field::from_function(&mesh, NUM_VEL, |_, (x, y), q| {
            let bump = 0.02 * (-100.0 * ((x - 0.5).powi(2) + (y - 0.4).powi(2))).exp();
            q.copy_from_slice(&PARAMS.equilibrium(1.0 + bump, 0.0, 0.0))
        });

        let mass = |f: &Field| -> f64 {
            let mut total = 0.0;
            f.for_each_leaf(&mesh, |level, _, _, q| {
                let (dx, dy) = mesh.cell_spacing(level);
                total += lattice::density(q) * dx * dy;
            });
            total
        };

        let before = mass(&field);
        step(&mut field, &mesh, &stencils, &PARAMS, &bc);
        assert!((mass(&field) - before).abs() < 1e-9);
    }

    #[test]
    fn the_moving_lid_injects_x_momentum() {
        let mesh = mixed_level_mesh();
        let stencils = FluxStencils::compute(3, 5).unwrap();
        let bc = BoundaryConfig::lid_driven(0.05);
        let mut field = equilibrium_field(&mesh);

        step(&mut field, &mesh, &stencils, &PARAMS, &bc);

        let mut qx_total = 0.0;
        field.for_each_leaf(&mesh, |level, _, _, q| {
            let (dx, dy) = mesh.cell_spacing(level);
            let (qx, _) = lattice::momentum(PARAMS.lambda, q);
            qx_total += qx * dx * dy;
        });
        assert!(qx_total > 0.0);
    }
}
