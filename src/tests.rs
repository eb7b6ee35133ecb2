#[cfg(test)]
use super::*;
#[cfg(test)]
use float_cmp::*;
#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::path::PathBuf;

#[cfg(test)]
fn test_global(simtime: f64) -> GlobalConfig {
    GlobalConfig {
        simtype: SimulationType::PARTICLE,
        simcount: 1,
        simtime,
        secondaries: 0,
        b_target: 0.1,
        flipspin: true,
        num_threads: 1,
        num_chunks: 1,
        neutron_lifetime: TAU_N,
        b_cut_plane: None,
        b_scan: None,
        mr_solid_angle: None,
        mr_energy: None,
    }
}

#[cfg(test)]
fn test_source(kind: ParticleKind) -> SourceParameters {
    SourceParameters {
        particle: kind,
        volume: SourceVolume::BOX { x_min: 0.29, x_max: 0.31, y_min: -0.01, y_max: 0.01, z_min: 0.9, z_max: 1.1 },
        energy_min: 0.,
        energy_max: 0.,
        energy_unit: "NEV".to_string(),
        spectrum_exponent: 0.,
        angular: AngularDistribution::ISOTROPIC,
        polarization: 0,
        max_tries: 10000,
    }
}

#[cfg(test)]
fn test_options(simtime: f64) -> Options {
    Options {
        jobnumber: 0,
        seed: 12345,
        inpath: PathBuf::from("."),
        outpath: PathBuf::from("."),
        global: test_global(simtime),
        source: test_source(ParticleKind::NEUTRON),
        neutron: KindConfig::defaults(ParticleKind::NEUTRON),
        proton: KindConfig::defaults(ParticleKind::PROTON),
        electron: KindConfig::defaults(ParticleKind::ELECTRON),
    }
}

/// Axis-aligned box with outward-facing triangles.
#[cfg(test)]
fn box_mesh(min: [f64; 3], max: [f64; 3]) -> SolidMesh {
    let (x0, y0, z0) = (min[0], min[1], min[2]);
    let (x1, y1, z1) = (max[0], max[1], max[2]);
    SolidMesh {
        vertices: vec![
            [x0, y0, z0],
            [x1, y0, z0],
            [x1, y1, z0],
            [x0, y1, z0],
            [x0, y0, z1],
            [x1, y0, z1],
            [x1, y1, z1],
            [x0, y1, z1],
        ],
        indices: vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ],
    }
}

#[cfg(test)]
fn vacuum_parameters() -> MaterialParameters {
    MaterialParameters {
        fermi_real: 0.,
        fermi_imag: 0.,
        diffuse: DiffuseModel::LAMBERT { probability: 0. },
        sigma_abs_2200: 0.,
        vacuum: true,
    }
}

#[cfg(test)]
fn wall_parameters(fermi_real: f64, fermi_imag: f64, diffuse_probability: f64) -> MaterialParameters {
    MaterialParameters {
        fermi_real,
        fermi_imag,
        diffuse: DiffuseModel::LAMBERT { probability: diffuse_probability },
        sigma_abs_2200: 0.,
        vacuum: false,
    }
}

/// World vacuum box plus a floor slab of the given material under z = 0.
#[cfg(test)]
fn floor_geometry(floor_material: MaterialParameters) -> Geometry {
    let mut materials = HashMap::new();
    materials.insert("world".to_string(), vacuum_parameters());
    materials.insert("floor".to_string(), floor_material);
    let specs = vec![
        ("world".to_string(), "world".to_string(), 2, None),
        ("floor".to_string(), "floor".to_string(), 3, None),
    ];
    let registry = MaterialRegistry::new(&materials, &specs, None).unwrap();
    let meshes = vec![
        box_mesh([-1., -1., -0.3], [1., 1., 2.]),
        box_mesh([-1., -1., -0.2], [1., 1., 0.]),
    ];
    Geometry::new(registry, &meshes).unwrap()
}

#[cfg(test)]
fn empty_geometry() -> Geometry {
    let registry = MaterialRegistry::new(&HashMap::new(), &[], None).unwrap();
    Geometry::new(registry, &[]).unwrap()
}

#[test]
fn test_free_fall_bounce() {
    //neutron dropped from z = 1 onto a hard floor at z = 0; one full period
    //returns it to the release height
    let options = {
        let mut options = test_options(2. * (2. / GRAV).sqrt());
        options.neutron.reflect_log = true;
        //short chords keep the chord-vs-parabola sagitta below the bounce
        //velocity tolerance
        options.neutron.hmax = 1E-4;
        options.neutron.dxsav = 1E-4;
        options
    };
    let geometry = floor_geometry(wall_parameters(1E5, 0., 0.));
    let field = FieldManager::new();
    let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

    let state = ParticleState::new(
        ParticleKind::NEUTRON,
        1,
        0.,
        Vector::new(0.3, 0., 1.),
        Vector::zero(),
        0,
    );
    let mut rng = McGenerator::new(1, 1);
    let (record, _) = simulate_particle(state, &context, &mut rng);

    assert_eq!(record.end.stop_code.id(), -1);
    assert_eq!(record.end.number_of_reflections, 1);
    assert!((record.end.pos_end.z - 1.).abs() < 1E-4,
        "period did not close: z_end = {}", record.end.pos_end.z);

    //reflection symmetry: specular bounce mirrors v in the normal and
    //conserves speed
    let bounce = &record.reflect_rows[0];
    let v_expected = (2. * GRAV).sqrt();
    assert!(approx_eq!(f64, bounce.v_out.z, v_expected, epsilon = 1E-6));
    assert!(approx_eq!(f64, bounce.v_in.z, -v_expected, epsilon = 1E-6));
    assert!(approx_eq!(f64, bounce.v_in.magnitude(), bounce.v_out.magnitude(), epsilon = 1E-9));
    assert!(!bounce.diffuse);

    //energy conservation over the whole flight
    assert!((record.end.h_end - record.end.h_start).abs() / record.end.h_start.abs() < 1E-7,
        "H drifted: {} -> {}", record.end.h_start, record.end.h_end);
}

#[test]
fn test_total_reflection_below_fermi_threshold() {
    //impact at 4.43 m/s gives E_perp = 102.7 neV; a 105 neV wall reflects
    //every time, whatever the diffuse probability
    let options = test_options(2. * (2. / GRAV).sqrt());
    let geometry = floor_geometry(wall_parameters(105., 0.05, 1.));
    let field = FieldManager::new();
    let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

    for seed in 0..20 {
        let state = ParticleState::new(
            ParticleKind::NEUTRON,
            seed,
            0.,
            Vector::new(0.3, 0., 1.),
            Vector::zero(),
            0,
        );
        let mut rng = McGenerator::new(7, seed);
        let (record, _) = simulate_particle(state, &context, &mut rng);
        assert!(record.end.number_of_reflections >= 1, "no reflection for seed {}", seed);
        assert_ne!(record.end.stop_code.id(), 2, "absorbed despite E_perp < U");
    }
}

#[test]
fn test_transmission_above_fermi_threshold() {
    //a 50 neV wall cannot hold a 102.7 neV impact; the neutron passes the
    //slab and leaves through the bottom of the world
    let options = test_options(3.);
    let geometry = floor_geometry(wall_parameters(50., 0., 0.));
    let field = FieldManager::new();
    let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

    let state = ParticleState::new(
        ParticleKind::NEUTRON,
        1,
        0.,
        Vector::new(0.3, 0., 1.),
        Vector::zero(),
        0,
    );
    let mut rng = McGenerator::new(11, 1);
    let (record, _) = simulate_particle(state, &context, &mut rng);
    assert_eq!(record.end.stop_code.id(), -2);
    assert_eq!(record.end.number_of_reflections, 0);
}

#[test]
fn test_transmission_loss_rate_matches_loss_probability() {
    //per-bounce surface absorption: the empirical rate over many independent
    //transmission attempts reproduces the analytic per-bounce probability
    let geometry = floor_geometry(wall_parameters(50., 0.5, 0.));
    let wall = geometry.registry.material_of(2).clone();
    let speed = 10.;
    let e_perp = 0.5 * M_N * speed * speed;
    let du = wall.fermi_real;
    let p_expected = wall.loss_probability(e_perp, du);
    assert!(p_expected > 0.01 && p_expected < 0.9, "loss probability {} is untestable", p_expected);

    let trials = 2000;
    let mut absorbed = 0;
    for trial in 0..trials {
        let mut state = ParticleState::new(
            ParticleKind::NEUTRON,
            trial,
            0.,
            Vector::new(0., 0., 0.01),
            Vector::new(0., 0., -speed),
            0,
        );
        state.inside = geometry.solids_containing(&state.pos, 0.);
        let dense = DenseOutput {
            samples: vec![
                DenseSample {
                    t: 0.,
                    y: [0., 0., 0.01, 0., 0., -speed],
                    b: BFieldValue::zero(),
                    e: EFieldValue::zero(),
                },
                DenseSample {
                    t: 0.002,
                    y: [0., 0., -0.01, 0., 0., -speed],
                    b: BFieldValue::zero(),
                    e: EFieldValue::zero(),
                },
            ],
        };
        let mut rng = McGenerator::new(99, trial);
        let mut reflects = vec![];
        match surface::resolve_step(&mut state, &dense, &geometry, &mut rng, &mut reflects) {
            surface::StepOutcome::Stopped { code, .. } => {
                assert_eq!(code.id(), 2);
                absorbed += 1;
            }
            surface::StepOutcome::Collided { .. } => {}
            surface::StepOutcome::Committed => panic!("crossing was not detected"),
        }
    }
    let rate = absorbed as f64 / trials as f64;
    let sigma = (p_expected * (1. - p_expected) / trials as f64).sqrt();
    assert!((rate - p_expected).abs() < 5. * sigma,
        "absorption rate {} vs expected {} +- {}", rate, p_expected, sigma);
}

#[test]
fn test_larmor_precession() {
    //spin starting along x in B = 1 uT along z: S_x = cos(gamma B t),
    //S_y = -sin(gamma B t)
    let b = Vector::new(0., 0., 1E-6);
    let mut rhs = |_t: f64, y: &[f64; 3]| Vector::from_array(*y).cross(&b).scale(GAMMA_N).as_array();
    let options = OdeOptions {
        eps: 1E-13,
        h1: 1E-4,
        hmin: 1E-20,
        hmax: f64::INFINITY,
        dxsav: 0.1,
        max_steps: 10_000_000,
        stepper: StepperKind::CASH_KARP,
    };
    let t_end = 10.;
    let solution = odeint([1., 0., 0.], 0., t_end, &options, &mut rhs).unwrap();
    let phase = GAMMA_N * 1E-6 * t_end;
    assert!(approx_eq!(f64, solution.y[0], phase.cos(), epsilon = 1E-6));
    assert!(approx_eq!(f64, solution.y[1], -phase.sin(), epsilon = 1E-6));
    //precession conserves the spin magnitude
    let magnitude = Vector::from_array(solution.y).magnitude();
    assert!(approx_eq!(f64, magnitude, 1., epsilon = 1E-9));
}

#[test]
fn test_adiabatic_spin_transport() {
    //far above b_target the tracker keeps the spin glued to the field and
    //accumulates no flip probability
    let mut state = ParticleState::new(
        ParticleKind::NEUTRON,
        1,
        0.,
        Vector::zero(),
        Vector::zero(),
        -1,
    );
    let options = KindConfig::defaults(ParticleKind::NEUTRON);
    let mut tracker = SpinTracker::new(0.1, true, options.spin_ode_options());
    let mut rng = McGenerator::new(3, 1);
    let mut rows = vec![];
    for step in 0..100 {
        //a slowly turning 1 T field
        let angle = 0.001 * step as f64;
        let b = Vector::new(angle.sin(), 0., angle.cos());
        let samples: Vec<DenseSample> = (0..5)
            .map(|i| DenseSample {
                t: step as f64 * 1E-3 + i as f64 * 2E-4,
                y: [0.; 6],
                b: BFieldValue { b, dbidxj: SquareMatrix3::zero() },
                e: EFieldValue::zero(),
            })
            .collect();
        tracker.process(&mut state, &samples, &mut rng, &mut rows);
    }
    let b_final = Vector::new(0.099_f64.sin(), 0., 0.099_f64.cos());
    assert!(state.spin.dot(&b_final.normalized()) > 1. - 1E-9);
    assert!(approx_eq!(f64, state.spin_survival, 1., epsilon = 1E-12));
    assert!(rows.is_empty(), "no Bloch rows expected in the adiabatic regime");
    assert_eq!(state.number_of_spin_flips, 0);
}

#[test]
fn test_spin_tracker_enters_bloch_regime() {
    //a dip below b_target triggers buffered Bloch integration and BF rows
    let mut state = ParticleState::new(
        ParticleKind::NEUTRON,
        1,
        0.,
        Vector::zero(),
        Vector::zero(),
        -1,
    );
    let options = KindConfig::defaults(ParticleKind::NEUTRON);
    let mut tracker = SpinTracker::new(0.1, false, options.spin_ode_options());
    let mut rng = McGenerator::new(4, 1);
    let mut rows = vec![];
    let make_samples = |t0: f64, babs: f64| -> Vec<DenseSample> {
        (0..10)
            .map(|i| DenseSample {
                t: t0 + i as f64 * 1E-5,
                y: [0.; 6],
                b: BFieldValue { b: Vector::new(0., 0., babs), dbidxj: SquareMatrix3::zero() },
                e: EFieldValue::zero(),
            })
            .collect()
    };
    tracker.process(&mut state, &make_samples(0., 1.), &mut rng, &mut rows);
    tracker.process(&mut state, &make_samples(1E-4, 0.01), &mut rng, &mut rows);
    tracker.process(&mut state, &make_samples(2E-4, 1.), &mut rng, &mut rows);
    assert!(!rows.is_empty(), "Bloch window produced no BF rows");
    //the field direction never changed, so the projection survives
    assert!(state.spin_survival > 1. - 1E-6);
}

#[test]
fn test_proton_cyclotron_radius() {
    //proton circling in a uniform B_z; the orbit radius must hold to 1e-6
    //relative over ten periods
    let b_z = 1E-2;
    let speed = 1E5;
    let radius = M_P * speed / (Q_E * b_z);
    let period = TWO_PI * M_P / (Q_E * b_z);

    let mut options = test_options(10. * period);
    options.proton.eps = 1E-12;
    options.proton.dxsav = 1E-9;
    options.proton.hmax = 1E-8;
    options.proton.macro_step = 1E-6;
    let geometry = empty_geometry();
    let mut field = FieldManager::new();
    field.add_source(
        Box::new(UniformField { b: Vector::new(0., 0., b_z), e: Vector::zero() }),
        Ramp::constant(),
    );
    let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

    let state = ParticleState::new(
        ParticleKind::PROTON,
        1,
        0.,
        Vector::zero(),
        Vector::new(speed, 0., 0.),
        0,
    );
    let mut rng = McGenerator::new(5, 1);
    let (record, _) = simulate_particle(state, &context, &mut rng);
    assert_eq!(record.end.stop_code.id(), -1);

    //guiding center for positive charge and +z field sits at (0, -r)
    let end = record.end.pos_end;
    let r_end = (end.x * end.x + (end.y + radius) * (end.y + radius)).sqrt();
    assert!((r_end - radius).abs() / radius < 1E-6,
        "radius drifted: {} vs {}", r_end, radius);
}

#[test]
fn test_neutron_decay_statistics() {
    //with the lifetime forced to 1 s and simtime 1 s the decayed fraction
    //follows 1 - exp(-1)
    let mut options = test_options(1.);
    options.global.neutron_lifetime = 1.;
    options.neutron.dxsav = 1E-3;
    options.source.volume =
        SourceVolume::BOX { x_min: -0.1, x_max: 0.1, y_min: -0.1, y_max: 0.1, z_min: 0.9, z_max: 1.1 };
    let mut materials = HashMap::new();
    materials.insert("world".to_string(), vacuum_parameters());
    let registry = MaterialRegistry::new(
        &materials,
        &[("world".to_string(), "world".to_string(), 2, None)],
        None,
    )
    .unwrap();
    let geometry = Geometry::new(registry, &[box_mesh([-1., -1., -10.], [1., 1., 2.])]).unwrap();
    let field = FieldManager::new();
    let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

    let trials = 1000;
    let mut decayed = 0;
    for index in 1..=trials {
        let records = simulate_particle_index(index, &context);
        if records[0].end.stop_code.id() == -4 {
            decayed += 1;
        }
    }
    let fraction = decayed as f64 / trials as f64;
    let expected = 1. - (-1.0_f64).exp();
    let sigma = (expected * (1. - expected) / trials as f64).sqrt();
    assert!((fraction - expected).abs() < 5. * sigma,
        "decay fraction {} vs expected {} +- {}", fraction, expected, sigma);
}

#[test]
fn test_collision_ordering() {
    //a segment through two nested boxes crosses four faces, reported in
    //strictly increasing order
    let mut materials = HashMap::new();
    materials.insert("wall".to_string(), wall_parameters(100., 0., 0.));
    let specs = vec![
        ("outer".to_string(), "wall".to_string(), 2, None),
        ("inner".to_string(), "wall".to_string(), 3, None),
    ];
    let registry = MaterialRegistry::new(&materials, &specs, None).unwrap();
    let geometry = Geometry::new(
        registry,
        &[box_mesh([-0.5, -0.5, -0.5], [0.5, 0.5, 0.5]), box_mesh([-0.2, -0.2, -0.2], [0.2, 0.2, 0.2])],
    )
    .unwrap();

    let p1 = Vector::new(-1., 0.013, 0.021);
    let p2 = Vector::new(1., 0.013, 0.021);
    let intersections = geometry.first_intersections(&p1, &p2, 0.);
    assert_eq!(intersections.len(), 4);
    for pair in intersections.windows(2) {
        assert!(pair[0].s < pair[1].s, "intersections out of order");
    }
    assert_eq!(intersections[0].solid_index, 1);
    assert_eq!(intersections[1].solid_index, 2);
    assert_eq!(intersections[2].solid_index, 2);
    assert_eq!(intersections[3].solid_index, 1);
    assert!(intersections[0].entering);
    assert!(!intersections[3].entering);
}

#[test]
fn test_priority_resolution() {
    //inside nested solids the priority maximum wins; closed time windows
    //drop a solid entirely
    let mut materials = HashMap::new();
    materials.insert("wall".to_string(), wall_parameters(100., 0., 0.));
    let specs = vec![
        ("outer".to_string(), "wall".to_string(), 2, None),
        ("inner".to_string(), "wall".to_string(), 3, Some((10., 20.))),
    ];
    let registry = MaterialRegistry::new(&materials, &specs, None).unwrap();
    let geometry = Geometry::new(
        registry,
        &[box_mesh([-0.5, -0.5, -0.5], [0.5, 0.5, 0.5]), box_mesh([-0.2, -0.2, -0.2], [0.2, 0.2, 0.2])],
    )
    .unwrap();

    let center = Vector::new(0.01, 0.02, 0.03);
    assert_eq!(geometry.solid_at(&center, 15.), 2);
    assert_eq!(geometry.solid_at(&center, 0.), 1);
    assert_eq!(geometry.solid_at(&Vector::new(0.4, 0., 0.), 15.), 1);
    assert_eq!(geometry.solid_at(&Vector::new(0.9, 0., 0.), 15.), 0);
}

#[test]
fn test_determinism() {
    //identical seeds give bit-identical end states
    let mut options = test_options(0.5);
    options.global.neutron_lifetime = 1.;
    options.neutron.dxsav = 1E-3;
    options.source.energy_min = 50.;
    options.source.energy_max = 100.;
    let geometry = floor_geometry(wall_parameters(200., 0.01, 0.1));
    let field = FieldManager::new();
    let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

    for index in 1..=5 {
        let first = simulate_particle_index(index, &context);
        let second = simulate_particle_index(index, &context);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.end.t_end.to_bits(), b.end.t_end.to_bits());
            assert_eq!(a.end.pos_end.x.to_bits(), b.end.pos_end.x.to_bits());
            assert_eq!(a.end.pos_end.y.to_bits(), b.end.pos_end.y.to_bits());
            assert_eq!(a.end.pos_end.z.to_bits(), b.end.pos_end.z.to_bits());
            assert_eq!(a.end.stop_code, b.end.stop_code);
            assert_eq!(a.end.number_of_reflections, b.end.number_of_reflections);
        }
    }
}

#[test]
fn test_bicubic_table_reproduces_bilinear_field() {
    //a bilinear field is inside the bicubic model space, so interpolation
    //and derivatives must be exact
    let nr = 5;
    let nz = 6;
    let mut table = format!("{} {}\n", nr, nz);
    for ir in 0..nr {
        for iz in 0..nz {
            let r_cm = 10. + 5. * ir as f64;
            let z_cm = -10. + 4. * iz as f64;
            let r = r_cm * TABLE_LENGTH_CONV;
            let z = z_cm * TABLE_LENGTH_CONV;
            //Bz = 2 + 3r + 5z + 7rz Tesla, written in Gauss
            let bz_gauss = (2. + 3. * r + 5. * z + 7. * r * z) / TABLE_B_CONV;
            table.push_str(&format!("{} {} 0 0 {} 0 0 0\n", r_cm, z_cm, bz_gauss));
        }
    }
    let field = TabulatedField::from_str(&table).unwrap();

    let p = Vector::new(0.17, 0., 0.03);
    let r = 0.17;
    let z = 0.03;
    let value = field.b_field(&p);
    let expected = 2. + 3. * r + 5. * z + 7. * r * z;
    assert!(approx_eq!(f64, value.b.z, expected, epsilon = 1E-9));
    //dBz/dx at phi = 0 is dBz/dr
    assert!(approx_eq!(f64, value.dbidxj.m[2][0], 3. + 7. * z, epsilon = 1E-8));
    assert!(approx_eq!(f64, value.dbidxj.m[2][2], 5. + 7. * r, epsilon = 1E-8));

    //outside the grid the source vanishes
    let outside = field.b_field(&Vector::new(10., 0., 0.));
    assert_eq!(outside.b.magnitude(), 0.);
}

#[test]
fn test_wire_field_against_infinite_wire() {
    //a very long wire reproduces mu0 I / (2 pi d) at its middle
    let current = 1000.;
    let wire = WireSegment::new(Vector::new(0., 0., -1000.), Vector::new(0., 0., 1000.), current);
    let d = 0.3;
    let value = wire.b_field(&Vector::new(d, 0., 0.));
    let expected = MU_0 * current / (TWO_PI * d);
    assert!(approx_eq!(f64, value.b.y, expected, epsilon = expected * 1E-6));
    assert!(value.b.x.abs() < expected * 1E-12);
    assert!(value.b.z.abs() < expected * 1E-12);
}

#[test]
fn test_wire_gradient_against_finite_differences() {
    let wire = WireSegment::new(Vector::new(-0.5, -0.1, -1.), Vector::new(0.3, 0.2, 1.), 2250.);
    let p = Vector::new(0.25, 0.15, 0.1);
    let analytic = wire.b_field(&p).dbidxj;
    let delta = 1E-7;
    for j in 0..3 {
        let mut dp = [0.; 3];
        dp[j] = delta;
        let plus = wire.b_field(&p.add(&Vector::from_array(dp))).b;
        let minus = wire.b_field(&p.sub(&Vector::from_array(dp))).b;
        let numeric = plus.sub(&minus).scale(1. / (2. * delta));
        for (i, component) in [numeric.x, numeric.y, numeric.z].iter().enumerate() {
            assert!(
                (analytic.m[i][j] - component).abs() <= 1E-5 * component.abs().max(1E-9),
                "dB{}/dx{}: analytic {} vs numeric {}",
                i, j, analytic.m[i][j], component
            );
        }
    }
}

#[test]
fn test_ramp_scale_continuity() {
    let ramp = Ramp {
        fill_time: 10.,
        clean_time: 5.,
        rampup_time: 3.,
        full_time: 100.,
        rampdown_time: 4.,
        empty_time: 10.,
        oscillation_fraction: 0.,
        oscillation_frequency: 0.,
    };
    //continuous at every phase join
    for t_join in [10., 15., 18., 118., 122.] {
        let before = ramp.scale(t_join - 1E-9);
        let after = ramp.scale(t_join + 1E-9);
        assert!((before - after).abs() < 1E-6, "discontinuity at t = {}", t_join);
    }
    assert_eq!(ramp.scale(0.), 0.);
    assert!(approx_eq!(f64, ramp.scale(16.5), 0.5, epsilon = 1E-9));
    assert_eq!(ramp.scale(50.), 1.);
    assert!(approx_eq!(f64, ramp.scale(120.), 0.5, epsilon = 1E-9));
    assert_eq!(ramp.scale(1000.), 0.);

    let oscillating = Ramp { oscillation_fraction: 1E-2, oscillation_frequency: 10., ..ramp };
    let t = 50.025;
    let expected = 1. + 1E-2 * (TWO_PI * 10. * t).sin();
    assert!(approx_eq!(f64, oscillating.scale(t), expected, epsilon = 1E-12));
}

#[test]
fn test_dense_output_interpolation() {
    //free fall: the Hermite interpolant inside a step reproduces the
    //parabola without extra derivative evaluations
    let field = FieldManager::new();
    let options = KindConfig::defaults(ParticleKind::NEUTRON).ode_options();
    let mut state = ParticleState::new(
        ParticleKind::NEUTRON,
        1,
        0.,
        Vector::new(0., 0., 1.),
        Vector::zero(),
        0,
    );
    let dense = integrate_step(&mut state, &field, &options, 0.1).unwrap();
    for &t in &[0.013, 0.042, 0.09] {
        let y = dense.state_at(t);
        let z_expected = 1. - 0.5 * GRAV * t * t;
        assert!(approx_eq!(f64, y[2], z_expected, epsilon = 1E-9));
        assert!(approx_eq!(f64, y[5], -GRAV * t, epsilon = 1E-9));
    }
    assert!(approx_eq!(f64, state.pos.z, 1. - 0.5 * GRAV * 0.01, epsilon = 1E-10));
}

#[test]
fn test_bulirsch_stoer_matches_cash_karp() {
    //both drivers integrate a harmonic oscillator to the same answer
    let omega = 3.;
    let mut rhs = |_t: f64, y: &[f64; 2]| [y[1], -omega * omega * y[0]];
    let base = OdeOptions {
        eps: 1E-12,
        h1: 1E-3,
        hmin: 1E-18,
        hmax: 0.1,
        dxsav: 0.01,
        max_steps: 1_000_000,
        stepper: StepperKind::CASH_KARP,
    };
    let t_end = 7.;
    let ck = odeint([1., 0.], 0., t_end, &base, &mut rhs).unwrap();
    let bs_options = OdeOptions { stepper: StepperKind::BULIRSCH_STOER, ..base };
    let bs = odeint([1., 0.], 0., t_end, &bs_options, &mut rhs).unwrap();
    let expected = (omega * t_end).cos();
    assert!(approx_eq!(f64, ck.y[0], expected, epsilon = 1E-8));
    assert!(approx_eq!(f64, bs.y[0], expected, epsilon = 1E-8));
    assert!(approx_eq!(f64, ck.y[0], bs.y[0], epsilon = 1E-8));
}

#[test]
fn test_stepsize_floor_reported() {
    //a right-hand side too stiff for the floor must error out, not loop
    let mut rhs = |t: f64, _y: &[f64; 1]| [if (t * 1E12) as u64 % 2 == 0 { 1E12 } else { -1E12 }];
    let options = OdeOptions {
        eps: 1E-13,
        h1: 1E-3,
        hmin: 1E-6,
        hmax: 1.,
        dxsav: 0.1,
        max_steps: 1000,
        stepper: StepperKind::CASH_KARP,
    };
    assert!(odeint([0.], 0., 1., &options, &mut rhs).is_err());
}

#[test]
fn test_rng_streams_are_deterministic_and_independent() {
    let mut a = McGenerator::new(42, 7);
    let mut b = McGenerator::new(42, 7);
    let mut c = McGenerator::new(42, 8);
    let mut same = true;
    for _ in 0..100 {
        let x = a.uniform();
        assert_eq!(x, b.uniform());
        if x != c.uniform() {
            same = false;
        }
    }
    assert!(!same, "different particle indices produced the same stream");
}

#[test]
fn test_cosine_direction_statistics() {
    let normal = Vector::new(0., 0., 1.);
    let mut rng = McGenerator::new(1, 1);
    let mut sum = 0.;
    let n = 20000;
    for _ in 0..n {
        let direction = rng.cosine_direction(&normal);
        assert!(direction.z > 0.);
        assert!(approx_eq!(f64, direction.magnitude(), 1., epsilon = 1E-12));
        sum += direction.z;
    }
    //cosine-weighted emission has <cos theta> = 2/3
    assert!((sum / n as f64 - 2. / 3.).abs() < 0.01);
}

#[test]
fn test_loss_probability_properties() {
    let lossless = Material::new("clean", &wall_parameters(100., 0., 0.));
    assert_eq!(lossless.loss_probability(50. * NEV, 100. * NEV), 0.);

    let lossy = Material::new("dirty", &wall_parameters(100., 1., 0.));
    let lossier = Material::new("dirtier", &wall_parameters(100., 2., 0.));
    let p1 = lossy.loss_probability(150. * NEV, 100. * NEV);
    let p2 = lossier.loss_probability(150. * NEV, 100. * NEV);
    assert!(p1 > 0. && p2 > p1 && p2 < 1.);
}

#[test]
fn test_mr_distribution_symmetry() {
    let v_abs = 5.;
    let cos_theta_in = (0.5_f64).cos();
    let u_step = 100. * NEV;
    let (b, w) = (2E-9, 20E-9);
    for theta in [0.2, 0.7, 1.2] {
        for phi in [0.3, 1.1, 2.5] {
            let plus = microroughness::mr_dist(v_abs, cos_theta_in, u_step, b, w, theta, phi);
            let minus = microroughness::mr_dist(v_abs, cos_theta_in, u_step, b, w, theta, -phi);
            assert!(approx_eq!(f64, plus, minus, epsilon = 1E-15));
            assert!(plus >= 0.);
        }
    }
    let total = microroughness::mr_prob(v_abs, cos_theta_in, u_step, b, w);
    assert!((0. ..=1.).contains(&total));
}

#[test]
fn test_stop_code_ids() {
    assert_eq!(StopCode::NOT_CATEGORIZED.id(), 0);
    assert_eq!(StopCode::BULK_ABSORBED.id(), 1);
    assert_eq!(StopCode::SURFACE_ABSORBED.id(), 2);
    assert_eq!(StopCode::OUT_OF_TIME.id(), -1);
    assert_eq!(StopCode::LEFT_BOUNDING_BOX.id(), -2);
    assert_eq!(StopCode::INTEGRATION_ERROR.id(), -3);
    assert_eq!(StopCode::DECAYED.id(), -4);
    assert_eq!(StopCode::NO_INITIAL_POSITION.id(), -5);
    assert_eq!(StopCode::GEOMETRY_PREDICATE_ERROR.id(), -6);
    assert_eq!(StopCode::GEOMETRY_ERROR.id(), -7);
}

#[test]
fn test_charged_particles_absorb_on_contact() {
    let options = test_options(1.);
    let geometry = floor_geometry(wall_parameters(100., 0., 0.));
    let field = FieldManager::new();
    let context = SimulationContext { options: &options, geometry: &geometry, field: &field };

    let state = ParticleState::new(
        ParticleKind::PROTON,
        1,
        0.,
        Vector::new(0.3, 0., 0.05),
        Vector::new(0., 0., -1000.),
        0,
    );
    let mut rng = McGenerator::new(6, 1);
    let (record, _) = simulate_particle(state, &context, &mut rng);
    assert_eq!(record.end.stop_code.id(), 2);
    assert!(record.end.pos_end.z.abs() < 1E-6);
}

#[test]
fn test_source_rejects_filled_volume() {
    //a source volume buried in a wall can never place a particle
    let mut options = test_options(1.);
    options.source.volume =
        SourceVolume::BOX { x_min: -0.5, x_max: 0.5, y_min: -0.5, y_max: 0.5, z_min: -0.15, z_max: -0.05 };
    options.source.max_tries = 100;
    let geometry = floor_geometry(wall_parameters(100., 0., 0.));
    let field = FieldManager::new();
    let mut rng = McGenerator::new(8, 1);
    let result = source::create_particle(&options.source, 1, 0., TAU_N, &geometry, &field, &mut rng);
    assert!(matches!(result, Err(StopCode::NO_INITIAL_POSITION)));
}
