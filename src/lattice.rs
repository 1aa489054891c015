use crate::error::Error;




/// Number of discrete velocities in the D2Q9 lattice.
pub const NUM_VEL: usize = 9;




/// The discrete velocity vectors, in the conventional ordering: rest,
/// the four axis directions counter-clockwise from +x, then the four
/// diagonals counter-clockwise from (+x, +y).
pub const VELOCITIES: [(i64, i64); NUM_VEL] = [
    (0, 0),
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
    (1, -1),
];




/// Index of the opposite velocity, used by the bounce-back closures.
pub const OPPOSITE: [usize; NUM_VEL] = [0, 3, 4, 1, 2, 7, 8, 5, 6];




/**
 * The physical parameters of the transport model: lattice velocity,
 * reference density, and the two viscosities the relaxation rates derive
 * from. The struct is immutable and threaded explicitly through every
 * operator call.
 *
 * Moments follow the Geier cascaded choice; the relaxation rates depend on
 * the finest grid spacing, so they are computed once per run from the
 * mesh, not per cell.
 */
#[derive(Clone, Copy, Debug)]
pub struct LatticeParams {
    pub lambda: f64,
    pub rho0: f64,
    pub mu: f64,
    pub zeta: f64,
}




// ============================================================================
impl LatticeParams {

    /**
     * Square of the lattice sound speed.
     */
    pub fn cs2(&self) -> f64 {
        self.lambda * self.lambda / 3.0
    }

    /**
     * The two relaxation rates at the given (finest) grid spacing: `s1`
     * for the energy-like moments, `s2` for the shear moments.
     */
    pub fn relaxation_rates(&self, dx: f64) -> (f64, f64) {
        let dummy = 3.0 / (self.lambda * self.rho0 * dx);
        let sigma_1 = dummy * (self.zeta - 2.0 * self.mu / 3.0);
        let sigma_2 = dummy * self.mu;
        (1.0 / (0.5 + sigma_1), 1.0 / (0.5 + sigma_2))
    }

    /**
     * Check once, before the run, that the relaxation rates at the finest
     * spacing fall in the stable range.
     */
    pub fn validate(&self, dx: f64) -> Result<(), Error> {
        let (s1, s2) = self.relaxation_rates(dx);
        for &s in &[s1, s2] {
            if !(s > 0.0 && s < 2.0) {
                return Err(Error::UnstableRelaxation(s))
            }
        }
        Ok(())
    }

    /**
     * Apply the local collision: transform to moments, relax the
     * non-conserved moments toward equilibrium, transform back. `dx` is
     * the finest grid spacing, which fixes the relaxation rates.
     */
    pub fn collide(&self, dx: f64, f: &[f64]) -> [f64; NUM_VEL] {
        let (s1, s2) = self.relaxation_rates(dx);
        let cs2 = self.cs2();
        let mut m = moments(self.lambda, f);

        let (rho, qx, qy) = (m[0], m[1], m[2]);
        let (ux, uy) = (qx / rho, qy / rho);

        m[3] = (1.0 - s1) * m[3] + s1 * ((qx * qx + qy * qy) / rho + 2.0 * rho * cs2);
        m[4] = (1.0 - s1) * m[4] + s1 * (qx * (cs2 + uy * uy));
        m[5] = (1.0 - s1) * m[5] + s1 * (qy * (cs2 + ux * ux));
        m[6] = (1.0 - s1) * m[6] + s1 * (rho * (cs2 + ux * ux) * (cs2 + uy * uy));
        m[7] = (1.0 - s2) * m[7] + s2 * ((qx * qx - qy * qy) / rho);
        m[8] = (1.0 - s2) * m[8] + s2 * (qx * qy / rho);

        distributions(self.lambda, &m)
    }

    /**
     * The equilibrium distribution for a given density and momentum.
     */
    pub fn equilibrium(&self, rho: f64, qx: f64, qy: f64) -> [f64; NUM_VEL] {
        let cs2 = self.cs2();
        let (ux, uy) = (qx / rho, qy / rho);
        let m = [
            rho,
            qx,
            qy,
            (qx * qx + qy * qy) / rho + 2.0 * rho * cs2,
            qx * (cs2 + uy * uy),
            qy * (cs2 + ux * ux),
            rho * (cs2 + ux * ux) * (cs2 + uy * uy),
            (qx * qx - qy * qy) / rho,
            qx * qy / rho,
        ];
        distributions(self.lambda, &m)
    }
}




/**
 * Transform distributions to the Geier moment set.
 */
pub fn moments(lambda: f64, f: &[f64]) -> [f64; NUM_VEL] {
    let l1 = lambda;
    let l2 = l1 * lambda;
    let l3 = l2 * lambda;
    let l4 = l3 * lambda;

    [
             f[0] + f[1] + f[2] + f[3] + f[4] + f[5] + f[6] + f[7] + f[8],
        l1 * (f[1] - f[3] + f[5] - f[6] - f[7] + f[8]),
        l1 * (f[2] - f[4] + f[5] + f[6] - f[7] - f[8]),
        l2 * (f[1] + f[2] + f[3] + f[4] + 2.0 * (f[5] + f[6] + f[7] + f[8])),
        l3 * (f[5] - f[6] - f[7] + f[8]),
        l3 * (f[5] + f[6] - f[7] - f[8]),
        l4 * (f[5] + f[6] + f[7] + f[8]),
        l2 * (f[1] - f[2] + f[3] - f[4]),
        l2 * (f[5] - f[6] + f[7] - f[8]),
    ]
}




/**
 * Transform moments back to distributions. Inverse of `moments`.
 */
pub fn distributions(lambda: f64, m: &[f64; NUM_VEL]) -> [f64; NUM_VEL] {
    let r1 = 1.0 / lambda;
    let r2 = r1 / lambda;
    let r3 = r2 / lambda;
    let r4 = r3 / lambda;

    [
        m[0] - r2 * m[3] + r4 * m[6],
         0.5 * r1 * m[1] + 0.25 * r2 * m[3] - 0.5 * r3 * m[4] - 0.5 * r4 * m[6] + 0.25 * r2 * m[7],
         0.5 * r1 * m[2] + 0.25 * r2 * m[3] - 0.5 * r3 * m[5] - 0.5 * r4 * m[6] - 0.25 * r2 * m[7],
        -0.5 * r1 * m[1] + 0.25 * r2 * m[3] + 0.5 * r3 * m[4] - 0.5 * r4 * m[6] + 0.25 * r2 * m[7],
        -0.5 * r1 * m[2] + 0.25 * r2 * m[3] + 0.5 * r3 * m[5] - 0.5 * r4 * m[6] - 0.25 * r2 * m[7],
         0.25 * r3 * m[4] + 0.25 * r3 * m[5] + 0.25 * r4 * m[6] + 0.25 * r2 * m[8],
        -0.25 * r3 * m[4] + 0.25 * r3 * m[5] + 0.25 * r4 * m[6] - 0.25 * r2 * m[8],
        -0.25 * r3 * m[4] - 0.25 * r3 * m[5] + 0.25 * r4 * m[6] + 0.25 * r2 * m[8],
         0.25 * r3 * m[4] - 0.25 * r3 * m[5] + 0.25 * r4 * m[6] - 0.25 * r2 * m[8],
    ]
}




/**
 * Density of a distribution vector.
 */
pub fn density(f: &[f64]) -> f64 {
    f.iter().sum()
}




/**
 * Momentum components of a distribution vector.
 */
pub fn momentum(lambda: f64, f: &[f64]) -> (f64, f64) {
    let m = moments(lambda, f);
    (m[1], m[2])
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    const PARAMS: LatticeParams = LatticeParams {
        lambda: 1.0,
        rho0: 1.0,
        mu: 5.0e-6,
        zeta: 5.0e-4,
    };

    #[test]
    fn moments_and_distributions_are_inverse() {
        let f = [0.1, 0.2, 0.05, 0.15, 0.1, 0.08, 0.02, 0.12, 0.18];
        let g = distributions(1.0, &moments(1.0, &f));
        for (a, b) in f.iter().zip(&g) {
            assert!((a - b).abs() < 1e-14);
        }
    }

    #[test]
    fn equilibrium_carries_the_requested_invariants() {
        let f = PARAMS.equilibrium(1.2, 0.03, -0.02);
        assert!((density(&f) - 1.2).abs() < 1e-14);
        let (qx, qy) = momentum(PARAMS.lambda, &f);
        assert!((qx - 0.03).abs() < 1e-14);
        assert!((qy + 0.02).abs() < 1e-14);
    }

    #[test]
    fn collision_conserves_density_and_momentum() {
        let f = [0.1, 0.2, 0.05, 0.15, 0.1, 0.08, 0.02, 0.12, 0.18];
        let g = PARAMS.collide(1.0 / 64.0, &f);
        assert!((density(&f) - density(&g)).abs() < 1e-14);
        let (px, py) = momentum(1.0, &f);
        let (gx, gy) = momentum(1.0, &g);
        assert!((px - gx).abs() < 1e-14);
        assert!((py - gy).abs() < 1e-14);
    }

    #[test]
    fn equilibrium_is_a_collision_fixed_point() {
        let f = PARAMS.equilibrium(1.0, 0.05, 0.0);
        let g = PARAMS.collide(1.0 / 64.0, &f);
        for (a, b) in f.iter().zip(&g) {
            assert!((a - b).abs() < 1e-13);
        }
    }

    #[test]
    fn unstable_viscosities_are_rejected() {
        let bad = LatticeParams { lambda: 1.0, rho0: 1.0, mu: -1.0, zeta: 1.0e-4 };
        assert!(bad.validate(1.0 / 64.0).is_err());
        assert!(PARAMS.validate(1.0 / 64.0).is_ok());
    }

    #[test]
    fn opposite_table_reverses_every_velocity() {
        for v in 0..NUM_VEL {
            let (cx, cy) = VELOCITIES[v];
            let (ox, oy) = VELOCITIES[OPPOSITE[v]];
            assert_eq!((cx, cy), (-ox, -oy));
            assert_eq!(OPPOSITE[OPPOSITE[v]], v);
        }
    }
}
