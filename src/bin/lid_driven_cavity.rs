use clap::{AppSettings, Clap};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use cascade::adaptation;
use cascade::field::Field;
use cascade::lattice::{self, LatticeParams, NUM_VEL};
use cascade::mesh::Mesh;
use cascade::prediction::FluxStencils;
use cascade::scheme::{self, BoundaryConfig};




/**
 * D2Q9 lattice-Boltzmann simulation of the lid-driven cavity on an
 * adaptive multiresolution mesh.
 */
#[derive(Debug, Clap)]
#[clap(version = "0.1.0", author = "J. Zrake <jzrake@clemson.edu>")]
#[clap(setting = AppSettings::ColoredHelp)]
struct Opts {
    #[clap(long, default_value = "4")]
    min_level: u32,

    #[clap(long, default_value = "8")]
    max_level: u32,

    #[clap(long, default_value = "0.01")]
    epsilon: f64,

    #[clap(long, default_value = "0.0")]
    regularity: f64,

    #[clap(long, default_value = "0.05")]
    lid_speed: f64,

    #[clap(long, default_value = "1000.0")]
    end_time: f64,

    #[clap(long, default_value = "128")]
    save_every: usize,

    #[clap(long, default_value = "warn")]
    log: String,
}




#[derive(serde::Serialize)]
struct CellOutput {
    level: u32,
    x: f64,
    y: f64,
    rho: f64,
    qx: f64,
    qy: f64,
    vel_modulus: f64,
}




#[derive(serde::Serialize)]
struct State {
    iteration: u64,
    time: f64,
    cells: Vec<CellOutput>,
}




// ============================================================================
fn save_solution(
    field: &Field,
    mesh: &Mesh,
    params: &LatticeParams,
    opts: &Opts,
    iteration: u64,
    time: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cells = Vec::new();

    field.for_each_leaf(mesh, |level, _, (x, y), q| {
        let rho = lattice::density(q);
        let (qx, qy) = lattice::momentum(params.lambda, q);
        cells.push(CellOutput {
            level,
            x,
            y,
            rho,
            qx,
            qy,
            vel_modulus: (qx * qx + qy * qy).sqrt() / rho,
        })
    });

    let name = format!(
        "lbm_d2q9_lid_driven_cavity_lmin-{}_lmax-{}_eps-{}_ite-{}.cbor",
        opts.min_level, opts.max_level, opts.epsilon, iteration,
    );
    let state = State { iteration, time, cells };
    let file = std::fs::File::create(&name)?;
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&state, &mut buffer)?;
    info!("wrote {}", name);
    Ok(())
}




// ============================================================================
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();

    let level = match opts.log.as_str() {
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        _ => LevelFilter::Warn,
    };
    SimpleLogger::new().with_level(level).init()?;

    let params = LatticeParams {
        lambda: 1.0,
        rho0: 1.0,
        mu: 5.0e-6,
        zeta: 100.0 * 5.0e-6,
    };
    let bc = BoundaryConfig::lid_driven(opts.lid_speed);

    let mut mesh = Mesh::new((0.0..1.0, 0.0..1.0), opts.min_level, opts.max_level)?;
    let (dx, _) = mesh.cell_spacing(opts.max_level);
    params.validate(dx)?;

    let stencils = FluxStencils::compute(opts.min_level, opts.max_level)?;

    let mut field = Field::from_function(&mesh, NUM_VEL, |_, _, q| {
        q.copy_from_slice(&params.equilibrium(params.rho0, 0.0, 0.0))
    });

    let dt = dx / params.lambda;
    let num_steps = (opts.end_time / dt) as u64;
    let passes = (opts.max_level - opts.min_level) as usize;

    info!(
        "levels [{}, {}], eps {}, {} steps of dt {}",
        opts.min_level, opts.max_level, opts.epsilon, num_steps, dt,
    );

    for iteration in 0..num_steps {
        for _ in 0..passes {
            if adaptation::coarsening(&mut field, &mut mesh, opts.epsilon) {
                break
            }
        }
        for _ in 0..passes {
            if adaptation::refinement(&mut field, &mut mesh, opts.epsilon, opts.regularity) {
                break
            }
        }
        info!("iteration {} with {} leaves", iteration, mesh.num_leaves());

        if iteration % opts.save_every as u64 == 0 {
            save_solution(&field, &mesh, &params, &opts, iteration, iteration as f64 * dt)?;
        }
        scheme::step(&mut field, &mesh, &stencils, &params, &bc);
    }
    save_solution(&field, &mesh, &params, &opts, num_steps, opts.end_time)
}
