use super::*;

/// What happened to the integrator step after the collision scan.
#[derive(Clone, Copy, Debug)]
pub enum StepOutcome {
    /// No surface crossed; the full step stands.
    Committed,
    /// A collision was resolved at t_star; the state was rewound there, the
    /// surface response applied, and the rest of the step discarded.
    Collided { t_star: f64 },
    /// The surface response terminated the particle.
    Stopped { t_star: f64, code: StopCode },
}

/// One surface interaction, logged to reflect.out.
pub struct ReflectRecord {
    pub t: f64,
    pub pos: Vector,
    pub v_in: Vector,
    pub v_out: Vector,
    pub normal: Vector,
    pub solid_index: usize,
    pub diffuse: bool,
}

/// Scans an accepted step for the earliest surface intersection and resolves
/// it. The scan walks the dense-output chords, so the chord length is bounded
/// by the sample cadence.
pub fn resolve_step(
    state: &mut ParticleState,
    dense: &DenseOutput,
    geometry: &Geometry,
    rng: &mut McGenerator,
    reflect_log: &mut Vec<ReflectRecord>,
) -> StepOutcome {
    for pair in dense.samples.windows(2) {
        let p1 = pair[0].position();
        let p2 = pair[1].position();
        let intersections = geometry.first_intersections(&p1, &p2, pair[0].t);
        let hit = match intersections.first() {
            Some(hit) => *hit,
            None => continue,
        };

        let t_star = pair[0].t + hit.s * (pair[1].t - pair[0].t);
        let y_star = dense.state_at(t_star);
        //place the particle exactly on the triangle; the velocity comes from
        //the dense interpolation
        let hit_point = p1.add(&p2.sub(&p1).scale(hit.s));
        state.t = t_star;
        state.pos = hit_point;
        state.vel = Vector::new(y_star[3], y_star[4], y_star[5]);

        return apply_surface_response(state, &hit, geometry, rng, reflect_log);
    }
    StepOutcome::Committed
}

fn apply_surface_response(
    state: &mut ParticleState,
    hit: &Intersection,
    geometry: &Geometry,
    rng: &mut McGenerator,
    reflect_log: &mut Vec<ReflectRecord>,
) -> StepOutcome {
    let registry = &geometry.registry;
    let t_star = state.t;

    //update the inside-set and decide whether the active material changes
    let current = state.current_solid(registry);
    let mut new_inside = state.inside.clone();
    if hit.entering {
        if !new_inside.contains(&hit.solid_index) {
            new_inside.push(hit.solid_index);
        }
    } else {
        new_inside.retain(|&i| i != hit.solid_index);
        if new_inside.is_empty() {
            new_inside.push(0);
        }
    }
    let new_current = new_inside
        .iter()
        .copied()
        .max_by_key(|&i| (registry.priority_of(i), i))
        .unwrap_or(0);

    if new_current == current {
        //crossing a lower-priority boundary inside a higher-priority solid
        //changes nothing material-wise
        state.inside = new_inside;
        push_off_surface(state, hit);
        return StepOutcome::Collided { t_star };
    }

    let leaving = registry.material_of(current);
    let entering = registry.material_of(new_current);

    //normal oriented against the motion
    let v = state.vel;
    let normal = if v.dot(&hit.normal) > 0. { hit.normal.scale(-1.) } else { hit.normal };

    match state.kind {
        ParticleKind::PROTON | ParticleKind::ELECTRON => {
            if entering.vacuum {
                state.inside = new_inside;
                push_off_surface(state, hit);
                StepOutcome::Collided { t_star }
            } else {
                //charged particles are absorbed on first contact with any
                //non-vacuum material
                StepOutcome::Stopped { t_star, code: StopCode::SURFACE_ABSORBED }
            }
        }
        //the neutron machine also covers vacuum-like targets: their zero
        //potentials make the transmission branch a no-op
        ParticleKind::NEUTRON => {
            neutron_surface_response(state, hit, normal, leaving, entering, new_inside, new_current, rng, reflect_log)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn neutron_surface_response(
    state: &mut ParticleState,
    hit: &Intersection,
    normal: Vector,
    leaving: &Material,
    entering: &Material,
    new_inside: Vec<usize>,
    new_solid: usize,
    rng: &mut McGenerator,
    reflect_log: &mut Vec<ReflectRecord>,
) -> StepOutcome {
    let t_star = state.t;
    let v = state.vel;
    let v_normal = v.dot(&normal);
    let v_perp = normal.scale(v_normal);
    let v_tangential = v.sub(&v_perp);
    let e_perp = 0.5 * M_N * v_normal * v_normal;
    let du = entering.fermi_real - leaving.fermi_real;
    let cos_theta_in = (-v_normal / v.magnitude().max(f64::MIN_POSITIVE)).clamp(0., 1.);

    if e_perp < du {
        //reflection; the entering wall material sets the diffuse model
        let p_diffuse = match entering.diffuse {
            DiffuseModel::LAMBERT { probability } => probability,
            DiffuseModel::MICRO_ROUGHNESS { b, w } => {
                microroughness::mr_prob(v.magnitude(), cos_theta_in, du, b, w)
            }
        };
        let diffuse = rng.uniform() < p_diffuse;
        let v_out = if diffuse {
            let speed = v.magnitude();
            let direction = match entering.diffuse {
                DiffuseModel::LAMBERT { .. } => rng.cosine_direction(&normal),
                DiffuseModel::MICRO_ROUGHNESS { b, w } => {
                    let (theta, phi) = microroughness::mr_sample(rng, speed, cos_theta_in, du, b, w);
                    //phi = 0 in the plane of incidence
                    let mut t1 = v_tangential.normalized();
                    if t1.magnitude() == 0. {
                        t1 = mc::tangent_basis(&normal).0;
                    }
                    let t2 = normal.cross(&t1);
                    t1.scale(theta.sin() * phi.cos())
                        .add(&t2.scale(theta.sin() * phi.sin()))
                        .add(&normal.scale(theta.cos()))
                }
            };
            direction.scale(speed)
        } else {
            //specular: flip the normal component
            v.sub(&v_perp.scale(2.))
        };

        reflect_log.push(ReflectRecord {
            t: t_star,
            pos: state.pos,
            v_in: v,
            v_out,
            normal,
            solid_index: new_solid,
            diffuse,
        });
        state.vel = v_out;
        state.number_of_reflections += 1;
        push_off_surface(state, hit);
        StepOutcome::Collided { t_star }
    } else {
        //transmission attempt; per-bounce loss from the imaginary potential
        if rng.uniform() < entering.loss_probability(e_perp, du) {
            return StepOutcome::Stopped { t_star, code: StopCode::SURFACE_ABSORBED };
        }
        //rescale the normal component to conserve energy across the step
        let v_normal_new = -(v_normal * v_normal - 2. * du / M_N).max(0.).sqrt();
        state.vel = v_tangential.add(&normal.scale(v_normal_new));
        state.inside = new_inside;
        push_off_surface(state, hit);
        StepOutcome::Collided { t_star }
    }
}

/// Nudges the particle off the triangle along its outgoing velocity so the
/// next scan does not re-detect the crossing it just resolved.
fn push_off_surface(state: &mut ParticleState, hit: &Intersection) {
    let direction = if state.vel.magnitude() > 0. {
        state.vel.normalized()
    } else {
        hit.normal
    };
    state.pos = state.pos.add(&direction.scale(SURFACE_PUSH));
}
