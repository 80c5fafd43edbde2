// demos/random_walk.rs

use det_manip::driver::{DriverSettings, MoveKind, RandomWalk};
use det_manip::kernel::PropagatorKernel;
use det_manip::DetManip;
use tracing_subscriber::EnvFilter;

/// Runs the stress walk on the propagator kernel and prints per-move counts.
///
/// Settings can be passed as a JSON string in the first argument, e.g.
/// `cargo run --example random_walk -- '{"n_steps": 20000, "verify_every": 50}'`.
/// Set `RUST_LOG=det_manip=debug` to see growth and drift checks.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match std::env::args().nth(1) {
        Some(json) => match DriverSettings::from_json(&json) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Error reading settings: {}", e);
                std::process::exit(2);
            }
        },
        None => DriverSettings {
            verify_every: 100,
            ..DriverSettings::default()
        },
    };

    let engine = DetManip::new(PropagatorKernel::default(), 100);
    let mut walk = match RandomWalk::new(engine, settings) {
        Ok(walk) => walk,
        Err(e) => {
            eprintln!("Error creating walk: {}", e);
            std::process::exit(2);
        }
    };

    match walk.run() {
        Ok(stats) => {
            println!("{:<16} {:>9} {:>9} {:>9} {:>10} {:>8}", "move", "proposed", "accepted", "rejected", "degenerate", "skipped");
            for kind in MoveKind::ALL {
                let m = stats.get(kind);
                println!(
                    "{:<16} {:>9} {:>9} {:>9} {:>10} {:>8}",
                    format!("{:?}", kind),
                    m.proposed,
                    m.accepted,
                    m.rejected,
                    m.degenerate,
                    m.skipped
                );
            }
            println!("  - Acceptance rate: {:.3}", stats.acceptance_rate());
            println!("  - Consistency checks: {}", stats.verifications);
            println!("  - Max inverse residual: {:e}", stats.max_inverse_residual);
            println!("  - Max determinant error: {:e}", stats.max_determinant_error);
        }
        Err(e) => {
            println!("Error during random walk: {:?}", e);
        }
    }

    let engine = walk.into_engine();
    println!("  - Final size: {}", engine.size());
    println!("  - Final determinant: {:e}", engine.determinant());
}
