use super::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn open_table(path: &std::path::PathBuf, header: &str) -> BufWriter<File> {
    let file = File::create(path)
        .with_context(|| format!("Output error: could not open {}.", path.display()))
        .unwrap();
    let mut stream = BufWriter::new(file);
    writeln!(stream, "{}", header).unwrap();
    stream
}

/// BF_ONLY mode: tabulate B on an (r, z) grid in the phi = 0 plane, then
/// estimate the phase-space volume accessible to neutrons of each energy for
/// the ramp-heating analysis.
pub fn print_bfield(outpath: &Path, jobnumber: u64, field: &FieldManager, scan: &BScanConfig) {
    let path = outpath.join(format!("{:06}BF.out", jobnumber));
    let mut stream = open_table(&path, "r phi z Bx By Bz 0 0 Babs");

    const E_MAX_NEV: usize = 108;
    let mut volume_with_field = [0.; E_MAX_NEV + 1];
    let mut r = scan.r_min;
    while r <= scan.r_max {
        let mut z = scan.z_min;
        while z <= scan.z_max {
            let b = field.b_at(&Vector::new(r, 0., z), scan.t);
            let babs = b.babs();
            writeln!(stream, "{} 0 {} {} {} {} 0 0 {}", r, z, b.b.x, b.b.y, b.b.z, babs).unwrap();

            for (e, volume) in volume_with_field.iter_mut().enumerate() {
                //energy left after climbing to z against gravity and the field
                let e_test = e as f64 * NEV - M_N * GRAV * z - MU_N * babs;
                if e_test >= 0. {
                    *volume += std::f64::consts::PI * scan.dz
                        * ((r + 0.5 * scan.dr) * (r + 0.5 * scan.dr) - (r - 0.5 * scan.dr) * (r - 0.5 * scan.dr));
                }
            }
            z += scan.dz;
        }
        r += scan.dr;
    }
    stream.flush().unwrap();

    //isentropic estimate of the heating from phase-space compression
    println!("\nE [neV], volume without field, with field, 'heating'");
    for (e, volume_b) in volume_with_field.iter().enumerate() {
        let volume = (e as f64 * NEV / (M_N * GRAV))
            * std::f64::consts::PI
            * (scan.r_max * scan.r_max - scan.r_min * scan.r_min);
        let heating = if *volume_b > 0. {
            e as f64 * (volume / volume_b).powf(2. / 3.) - e as f64
        } else {
            0.
        };
        println!("{} {:.17} {:.17} {:.17}", e, volume, volume_b, heating);
    }
}

/// BF_CUT mode: fields and gradients on a planar cut spanned by three points.
pub fn print_bfield_cut(outpath: &Path, jobnumber: u64, field: &FieldManager, cut: &BCutConfig) {
    let path = outpath.join(format!("{:06}BFCut.out", jobnumber));
    let mut stream = open_table(
        &path,
        "x y z Bx dBxdx dBxdy dBxdz By dBydx dBydy dBydz Bz dBzdx dBzdy dBzdz Ex Ey Ez V",
    );

    let p0 = Vector::from_array(cut.p0);
    let u = Vector::from_array(cut.p1).sub(&p0);
    let v = Vector::from_array(cut.p2).sub(&p0);
    let field_calls = std::time::Instant::now();
    for i in 0..cut.n1 {
        for j in 0..cut.n2 {
            let p = p0
                .add(&u.scale(i as f64 / cut.n1 as f64))
                .add(&v.scale(j as f64 / cut.n2 as f64));
            let b = field.b_at(&p, cut.t);
            let e = field.e_at(&p, cut.t);
            let d = &b.dbidxj.m;
            writeln!(
                stream,
                "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
                p.x, p.y, p.z,
                b.b.x, d[0][0], d[0][1], d[0][2],
                b.b.y, d[1][0], d[1][1], d[1][2],
                b.b.z, d[2][0], d[2][1], d[2][2],
                e.e.x, e.e.y, e.e.z, e.v,
            )
            .unwrap();
        }
    }
    stream.flush().unwrap();
    let elapsed = field_calls.elapsed().as_secs_f64();
    let calls = (cut.n1 * cut.n2) as f64;
    println!("Evaluated B and E {} times in {:.3}s ({:.3}ms per call)", calls, elapsed, elapsed / calls * 1000.);
}

/// GEOMETRY mode: shoot random unit segments through the bounding box and
/// print every surface crossing, to visualize the loaded geometry.
pub fn print_geometry(outpath: &Path, jobnumber: u64, geometry: &Geometry, seed: u64) {
    let path = outpath.join(format!("{:06}geometry.out", jobnumber));
    let mut stream = open_table(&path, "x y z ID");

    let (bbox_min, bbox_max) = geometry.bounding_box();
    if !bbox_min.x.is_finite() {
        println!("No surfaces loaded, nothing to sample.");
        return;
    }
    let mut rng = McGenerator::new(seed, 0);
    let count = 1_000_000;
    let mut collision_count = 0;
    let timer = std::time::Instant::now();
    for _ in 0..count {
        let p1 = Vector::new(
            rng.uniform_range(bbox_min.x, bbox_max.x),
            rng.uniform_range(bbox_min.y, bbox_max.y),
            rng.uniform_range(bbox_min.z, bbox_max.z),
        );
        let p2 = p1.add(&rng.isotropic_direction());
        let intersections = geometry.first_intersections(&p1, &p2, 0.);
        if !intersections.is_empty() {
            collision_count += 1;
            for hit in intersections {
                let p = p1.add(&p2.sub(&p1).scale(hit.s));
                writeln!(stream, "{} {} {} {}", p.x, p.y, p.z, hit.solid_index).unwrap();
            }
        }
    }
    stream.flush().unwrap();
    let elapsed = timer.elapsed().as_secs_f64() * 1000.;
    println!(
        "{} tests, {} collisions in {:.3}ms ({:.6}ms per test)",
        count, collision_count, elapsed, elapsed / count as f64
    );
}

/// MR_THETA_OUT_ANGLE mode: the micro-roughness distribution over all
/// outgoing solid angles for one incident angle and energy.
pub fn print_mr_out_angle(outpath: &Path, config: &MrSolidAngleConfig) {
    let path = outpath.join(format!(
        "MR-SldAngDRP-F{}-En{}-b{}-w{}-th{}.out",
        config.fermi, config.energy, config.b, config.w, config.theta_i
    ));
    let mut stream = open_table(&path, "phi_out theta_out mrdrp");

    let v_abs = (2. * config.energy * NEV / M_N).sqrt();
    let u_step = config.fermi * NEV;
    let cos_theta_in = config.theta_i.cos();
    let pi = std::f64::consts::PI;
    for i in 0..100 {
        let phi = -pi + TWO_PI * i as f64 / 100.;
        for j in 0..100 {
            let theta = (pi / 2.) * j as f64 / 100.;
            //the sin factor normalizes for the size of the surface elements
            let drp = microroughness::mr_dist(v_abs, cos_theta_in, u_step, config.b, config.w, theta, phi)
                * theta.sin();
            writeln!(stream, "{} {} {}", phi, theta, drp).unwrap();
        }
    }
    stream.flush().unwrap();
}

/// MR_THETA_I_ENERGY mode: the integrated micro-roughness probability over a
/// grid of incident angles and energies.
pub fn print_mr_theta_i_energy(outpath: &Path, config: &MrEnergyConfig) {
    let path = outpath.join(format!("MR-Tot-DRP-F{}-b{}-w{}.out", config.fermi, config.b, config.w));
    let mut stream = open_table(&path, "theta_i neut_en totmrdrp");

    let u_step = config.fermi * NEV;
    let mut previous_progress = 0;
    for i in 0..100 {
        let progress = i / 10;
        if progress > previous_progress {
            println!("{}0%", progress);
            previous_progress = progress;
        }
        let theta = config.theta_start + (config.theta_end - config.theta_start) * i as f64 / 100.;
        for j in 0..100 {
            let energy = config.energy_start + (config.energy_end - config.energy_start) * j as f64 / 100.;
            let v_abs = (2. * energy * NEV / M_N).sqrt();
            let total = microroughness::mr_prob(v_abs, theta.cos(), u_step, config.b, config.w);
            writeln!(stream, "{} {} {}", theta, energy, total).unwrap();
        }
    }
    stream.flush().unwrap();
}
