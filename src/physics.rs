use super::*;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

/// Collisions closer together than this count towards the livelock guard.
const COLLISION_TIE_WINDOW: f64 = 1E-10;
/// Consecutive near-coincident collisions before the epsilon push counts as
/// exhausted.
const COLLISION_TIE_LIMIT: usize = 100;

/// Everything immutable a particle needs while being tracked.
pub struct SimulationContext<'a> {
    pub options: &'a Options,
    pub geometry: &'a Geometry,
    pub field: &'a FieldManager,
}

/// Total energy of a dense sample without further field queries.
fn energy_at_sample(kind: ParticleKind, hfs: i32, sample: &DenseSample) -> f64 {
    let m = kind.mass();
    let v2 = sample.velocity().magnitude_squared();
    let mut h = if kind.relativistic() {
        let gamma = 1. / (1. - v2 / (C_0 * C_0)).max(f64::MIN_POSITIVE).sqrt();
        (gamma - 1.) * m * C_0 * C_0
    } else {
        0.5 * m * v2
    };
    if kind == ParticleKind::NEUTRON {
        h += m * GRAV * sample.y[2];
    }
    h += kind.charge() * sample.e.v;
    if hfs != 0 {
        h -= hfs as f64 * kind.magnetic_moment() * sample.b.babs();
    }
    h
}

/// Tracks one particle from its current state to termination and returns its
/// buffered output records plus any decay secondaries still to be simulated.
pub fn simulate_particle(
    mut state: ParticleState,
    context: &SimulationContext,
    rng: &mut McGenerator,
) -> (ParticleRecord, Vec<ParticleState>) {
    let options = context.options;
    let kind_options = options.kind(state.kind);
    let ode_options = kind_options.ode_options();
    let registry = &context.geometry.registry;

    let t_max = options.global.simtime;
    let h_start = state.total_energy(context.field);
    let mut h_max = h_start;
    let t_start = state.t;
    let pos_start = state.pos;
    let vel_start = state.vel;

    let mut spin_tracker = SpinTracker::new(
        options.global.b_target,
        options.global.flipspin,
        kind_options.spin_ode_options(),
    );

    let mut track_rows = Vec::new();
    let mut spin_rows = Vec::new();
    let mut reflect_rows = Vec::new();
    let mut secondaries = Vec::new();

    let mut stop = None;
    let mut last_track_t = f64::NEG_INFINITY;
    let mut last_collision_t = f64::NEG_INFINITY;
    let mut coincident_collisions = 0;

    while stop.is_none() {
        //shrink the macro step near the low-field region so the spin buffer
        //sees a dense field record
        let babs_here = context.field.b_at(&state.pos, state.t).babs();
        let mut macro_step = kind_options.macro_step;
        if state.kind == ParticleKind::NEUTRON && state.hfs != 0 {
            if babs_here < options.global.b_target {
                macro_step /= 100.;
            } else if babs_here < options.global.b_target + 0.1 {
                macro_step /= 10.;
            }
        }
        let t_target = (state.t + macro_step).min(t_max);

        let dense_full = match integrate_step(&mut state, context.field, &ode_options, t_target) {
            Ok(dense) => dense,
            Err(_) => {
                stop = Some(StopCode::INTEGRATION_ERROR);
                break;
            }
        };

        //a decay inside this step truncates it; collisions before the decay
        //time still win
        let decay_pending = state.decay_time <= dense_full.t_end();
        let dense = if decay_pending {
            let samples = dense_full.truncated_samples(state.decay_time);
            let y = samples[samples.len() - 1].y;
            state.set_ode_state(state.decay_time, &y);
            DenseOutput { samples }
        } else {
            dense_full
        };

        let material_during_step = registry.material_of(state.current_solid(registry)).clone();
        let t_step_start = dense.t_start();

        let outcome = surface::resolve_step(&mut state, &dense, context.geometry, rng, &mut reflect_rows);
        let (kept_samples, step_stop) = match outcome {
            surface::StepOutcome::Committed => (dense.samples.clone(), None),
            surface::StepOutcome::Collided { t_star } => {
                if t_star - last_collision_t < COLLISION_TIE_WINDOW {
                    coincident_collisions += 1;
                } else {
                    coincident_collisions = 1;
                }
                last_collision_t = t_star;
                let pending = (coincident_collisions > COLLISION_TIE_LIMIT)
                    .then_some(StopCode::GEOMETRY_PREDICATE_ERROR);
                (dense.truncated_samples(t_star), pending)
            }
            surface::StepOutcome::Stopped { t_star, code } => (dense.truncated_samples(t_star), Some(code)),
        };

        //bookkeeping over the kept part of the step
        state.trajectory_length += particle::path_length(&kept_samples, f64::INFINITY);
        spin_tracker.process(&mut state, &kept_samples, rng, &mut spin_rows);
        for sample in &kept_samples {
            let h = energy_at_sample(state.kind, state.hfs, sample);
            h_max = h_max.max(h);
            if kind_options.track && sample.t - last_track_t >= kind_options.track_interval {
                track_rows.push(TrackRow {
                    particle_index: state.index,
                    kind: state.kind,
                    t: sample.t,
                    y: sample.y,
                    h,
                    b: sample.b,
                    e: sample.e,
                });
                last_track_t = sample.t;
            }
        }

        stop = step_stop;

        //bulk absorption in the material the kept interval ran through
        if stop.is_none() && !material_during_step.vacuum {
            let rate = material_during_step.bulk_absorption_rate();
            let dt = kept_samples[kept_samples.len() - 1].t - t_step_start;
            if rate > 0. && dt > 0. && rng.uniform() < 1. - (-rate * dt).exp() {
                stop = Some(StopCode::BULK_ABSORBED);
            }
        }

        if stop.is_none() {
            let committed = matches!(outcome, surface::StepOutcome::Committed);
            if committed && decay_pending {
                stop = Some(StopCode::DECAYED);
                if options.global.secondaries != 0 {
                    secondaries = source::decay_products(&state, context.geometry, rng);
                }
            } else if !context.geometry.inside_bounding_box(&state.pos) {
                stop = Some(StopCode::LEFT_BOUNDING_BOX);
            } else if state.t >= t_max {
                stop = Some(StopCode::OUT_OF_TIME);
            }
        }
    }

    let stop_code = stop.unwrap_or(StopCode::NOT_CATEGORIZED);
    let h_end = state.total_energy(context.field);
    let record = ParticleRecord {
        end: EndRecord {
            jobnumber: options.jobnumber,
            particle_index: state.index,
            kind: state.kind,
            polarization: state.hfs,
            t_start,
            pos_start,
            vel_start,
            h_start,
            t_end: state.t,
            pos_end: state.pos,
            vel_end: state.vel,
            h_end,
            h_max,
            stop_code,
            spin_flip_probability: SpinTracker::flip_probability(&state),
            number_of_spin_flips: state.number_of_spin_flips,
            number_of_reflections: state.number_of_reflections,
            trajectory_length: state.trajectory_length,
        },
        track_rows,
        spin_rows,
        reflect_rows,
    };
    (record, secondaries)
}

/// Creates and tracks the particle with the given index, including any decay
/// secondaries, all on the particle's own random stream.
pub fn simulate_particle_index(index: u64, context: &SimulationContext) -> Vec<ParticleRecord> {
    let options = context.options;
    let mut rng = McGenerator::new(options.seed, index);
    let mut records = Vec::new();

    match source::create_particle(
        &options.source,
        index,
        0.,
        options.global.neutron_lifetime,
        context.geometry,
        context.field,
        &mut rng,
    ) {
        Ok(state) => {
            let (record, secondaries) = simulate_particle(state, context, &mut rng);
            records.push(record);
            for secondary in secondaries {
                let (record, _) = simulate_particle(secondary, context, &mut rng);
                records.push(record);
            }
        }
        Err(code) => {
            //the source never produced a valid state; log an empty record
            records.push(ParticleRecord {
                end: EndRecord {
                    jobnumber: options.jobnumber,
                    particle_index: index,
                    kind: options.source.particle,
                    polarization: 0,
                    t_start: 0.,
                    pos_start: Vector::zero(),
                    vel_start: Vector::zero(),
                    h_start: 0.,
                    t_end: 0.,
                    pos_end: Vector::zero(),
                    vel_end: Vector::zero(),
                    h_end: 0.,
                    h_max: 0.,
                    stop_code: code,
                    spin_flip_probability: 0.,
                    number_of_spin_flips: 0,
                    number_of_reflections: 0,
                    trajectory_length: 0.,
                },
                track_rows: vec![],
                spin_rows: vec![],
                reflect_rows: vec![],
            });
        }
    }
    records
}

/// Runs the whole tracking simulation: all particles, chunked, optionally in
/// parallel, with records written strictly in particle-index order.
pub fn run_simulation(context: &SimulationContext, writer: &mut OutputWriter) -> Summary {
    let options = context.options;
    let total_count = options.global.simcount;
    println!("Simulating {} {}(s)...", total_count, options.source.particle);

    if options.global.num_threads > 1 {
        //a failure here just means a pool already exists, e.g. in tests
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(options.global.num_threads)
            .build_global();
    }

    let bar = ProgressBar::new(total_count);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}][{bar:40.cyan/blue}][{eta_precise}] {percent}%")
            .progress_chars("#>-"),
    );

    let mut summary = Summary::new();
    let chunk_size = (total_count / options.global.num_chunks).max(1);
    let indices: Vec<u64> = (1..=total_count).collect();

    for chunk in indices.chunks(chunk_size as usize) {
        let finished: Vec<Vec<ParticleRecord>> = if options.global.num_threads > 1 {
            chunk
                .par_iter()
                .map(|&index| {
                    bar.inc(1);
                    simulate_particle_index(index, context)
                })
                .collect()
        } else {
            chunk
                .iter()
                .map(|&index| {
                    bar.inc(1);
                    simulate_particle_index(index, context)
                })
                .collect()
        };

        for records in finished {
            for record in records {
                summary.add(record.end.kind, record.end.stop_code);
                writer.write_particle(&record);
            }
        }
        writer.flush();
    }
    bar.finish();
    summary
}
