use anyhow::{bail, Context, Result};

use ucntrack::*;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(error) = run(&args) {
        eprintln!("Fatal error: {:#}", error);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let cli = match input::parse_cli(args)? {
        Some(cli) => cli,
        None => return Ok(()),
    };

    println!(
        " ########################################################################\n\
         ###                       Welcome to ucntrack,                       ###\n\
         ### a simulation tool for ultra-cold neutrons, protons and electrons ###\n\
         ########################################################################"
    );

    println!("Loading configuration...");
    let (options, geometry, field) = input::input(cli)?;
    std::fs::create_dir_all(&options.outpath)
        .with_context(|| format!("Output error: could not create {}.", options.outpath.display()))?;

    match options.global.simtype {
        SimulationType::MR_THETA_OUT_ANGLE => {
            let config = options.global.mr_solid_angle.as_ref()
                .context("Input error: simtype MR_THETA_OUT_ANGLE needs [global.mr_solid_angle].")?;
            println!("Generating table of micro-roughness reflection probability for all solid angles...");
            diagnostics::print_mr_out_angle(&options.outpath, config);
        }
        SimulationType::MR_THETA_I_ENERGY => {
            let config = options.global.mr_energy.as_ref()
                .context("Input error: simtype MR_THETA_I_ENERGY needs [global.mr_energy].")?;
            println!("Generating table of integrated micro-roughness probability over angle and energy...");
            diagnostics::print_mr_theta_i_energy(&options.outpath, config);
        }
        SimulationType::BF_ONLY => {
            let config = options.global.b_scan.as_ref()
                .context("Input error: simtype BF_ONLY needs [global.b_scan].")?;
            diagnostics::print_bfield(&options.outpath, options.jobnumber, &field, config);
        }
        SimulationType::BF_CUT => {
            let config = options.global.b_cut_plane.as_ref()
                .context("Input error: simtype BF_CUT needs [global.b_cut_plane].")?;
            diagnostics::print_bfield_cut(&options.outpath, options.jobnumber, &field, config);
        }
        SimulationType::GEOMETRY => {
            diagnostics::print_geometry(&options.outpath, options.jobnumber, &geometry, options.seed);
        }
        SimulationType::PARTICLE => {
            if options.global.simcount < 1 {
                bail!("Input error: simcount must be at least 1.");
            }
            let write_tracks = [&options.neutron, &options.proton, &options.electron]
                .iter()
                .any(|k| k.track);
            let write_spin = options.neutron.spin_log;
            let write_reflects = [&options.neutron, &options.proton, &options.electron]
                .iter()
                .any(|k| k.reflect_log);
            let mut writer =
                OutputWriter::new(&options.outpath, options.jobnumber, write_tracks, write_spin, write_reflects);
            let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

            let timer = std::time::Instant::now();
            let summary = run_simulation(&context, &mut writer);
            writer.flush();
            summary.print();
            println!("Simulation: {:.2}s", timer.elapsed().as_secs_f64());
            println!("That's it... Have a nice day!");
        }
    }
    Ok(())
}
