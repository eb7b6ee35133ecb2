use super::*;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const WRITE_BUFFER_SIZE: usize = 8192;
/// track.out rolls to a new file after this many rows.
const TRACK_ROLL_ROWS: usize = 40000;
/// BF.out rolls to a new file after this many rows.
const BF_ROLL_ROWS: usize = 100000;

/// One row of track.out.
pub struct TrackRow {
    pub particle_index: u64,
    pub kind: ParticleKind,
    pub t: f64,
    pub y: [f64; 6],
    pub h: f64,
    pub b: BFieldValue,
    pub e: EFieldValue,
}

/// One row of end.out.
pub struct EndRecord {
    pub jobnumber: u64,
    pub particle_index: u64,
    pub kind: ParticleKind,
    pub polarization: i32,
    pub t_start: f64,
    pub pos_start: Vector,
    pub vel_start: Vector,
    pub h_start: f64,
    pub t_end: f64,
    pub pos_end: Vector,
    pub vel_end: Vector,
    pub h_end: f64,
    pub h_max: f64,
    pub stop_code: StopCode,
    pub spin_flip_probability: f64,
    pub number_of_spin_flips: usize,
    pub number_of_reflections: usize,
    pub trajectory_length: f64,
}

/// Everything one finished particle wants written, buffered so that worker
/// threads can run ahead while files are written strictly in particle-index
/// order.
pub struct ParticleRecord {
    pub end: EndRecord,
    pub track_rows: Vec<TrackRow>,
    pub spin_rows: Vec<spin::SpinLogRow>,
    pub reflect_rows: Vec<surface::ReflectRecord>,
}

/// A space-separated output file that rolls over to a numbered successor at
/// a fixed row count to bound file sizes.
struct RollingWriter {
    directory: PathBuf,
    jobnumber: u64,
    base_name: &'static str,
    header: &'static str,
    max_rows: usize,
    stream: BufWriter<File>,
    rows: usize,
    file_count: usize,
}

impl RollingWriter {
    fn new(directory: &Path, jobnumber: u64, base_name: &'static str, header: &'static str, max_rows: usize) -> RollingWriter {
        let stream = open_stream(&rolled_path(directory, jobnumber, base_name, 1), header);
        RollingWriter {
            directory: directory.to_path_buf(),
            jobnumber,
            base_name,
            header,
            max_rows,
            stream,
            rows: 0,
            file_count: 1,
        }
    }

    fn write_row(&mut self, row: &str) {
        if self.rows >= self.max_rows {
            self.stream.flush().unwrap();
            self.file_count += 1;
            self.stream = open_stream(
                &rolled_path(&self.directory, self.jobnumber, self.base_name, self.file_count),
                self.header,
            );
            self.rows = 0;
        }
        writeln!(self.stream, "{}", row)
            .unwrap_or_else(|_| panic!("Output error: could not write to {}.", self.base_name));
        self.rows += 1;
    }

    fn flush(&mut self) {
        self.stream.flush().unwrap();
    }
}

fn rolled_path(directory: &Path, jobnumber: u64, base_name: &str, file_count: usize) -> PathBuf {
    directory.join(format!("{:06}{}{:03}.out", jobnumber, base_name, file_count))
}

fn open_stream(path: &Path, header: &str) -> BufWriter<File> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Output error: could not open {}.", path.display()))
        .unwrap();
    let mut stream = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    writeln!(stream, "{}", header).unwrap();
    stream
}

/// All output streams of a tracking run, opened once up front.
pub struct OutputWriter {
    end_stream: BufWriter<File>,
    track: Option<RollingWriter>,
    spin: Option<RollingWriter>,
    reflect: Option<BufWriter<File>>,
}

impl OutputWriter {
    pub fn new(outpath: &Path, jobnumber: u64, write_tracks: bool, write_spin: bool, write_reflects: bool) -> OutputWriter {
        let end_stream = open_stream(
            &outpath.join(format!("{:06}end.out", jobnumber)),
            "jobnumber particle kind polarisation tstart xstart ystart zstart vxstart vystart vzstart Hstart \
             tend xend yend zend vxend vyend vzend Hend Hmax stopID spinflipprob NSF nrefl trajlength",
        );
        let track = write_tracks.then(|| {
            RollingWriter::new(
                outpath,
                jobnumber,
                "track",
                "particle t x y z vx vy vz H Bx dBxdx dBxdy dBxdz By dBydx dBydy dBydz Bz dBzdx dBzdy dBzdz Babs Ex Ey Ez V",
                TRACK_ROLL_ROWS,
            )
        });
        let spin = write_spin.then(|| {
            RollingWriter::new(outpath, jobnumber, "BF", "t Babs Polar logPolar Sx Sy Sz Bx By Bz", BF_ROLL_ROWS)
        });
        let reflect = write_reflects.then(|| {
            open_stream(
                &outpath.join(format!("{:06}reflect.out", jobnumber)),
                "t x y z vxin vyin vzin vxout vyout vzout nx ny nz solid diffuse",
            )
        });
        OutputWriter { end_stream, track, spin, reflect }
    }

    /// Writes all of one particle's records; rows are already in
    /// integration-time order.
    pub fn write_particle(&mut self, record: &ParticleRecord) {
        if let Some(track) = &mut self.track {
            for row in &record.track_rows {
                let b = &row.b;
                let d = &b.dbidxj.m;
                track.write_row(&format!(
                    "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
                    row.particle_index,
                    row.t,
                    row.y[0], row.y[1], row.y[2], row.y[3], row.y[4], row.y[5],
                    row.h / NEV,
                    b.b.x, d[0][0], d[0][1], d[0][2],
                    b.b.y, d[1][0], d[1][1], d[1][2],
                    b.b.z, d[2][0], d[2][1], d[2][2],
                    b.babs(),
                    row.e.e.x, row.e.e.y, row.e.e.z, row.e.v,
                ));
            }
        }
        if let Some(spin) = &mut self.spin {
            for row in &record.spin_rows {
                spin.write_row(&format!(
                    "{} {} {} {} {} {} {} {} {} {}",
                    row.t, row.babs, row.polarization, row.log_polarization,
                    row.spin.x, row.spin.y, row.spin.z, row.b.x, row.b.y, row.b.z,
                ));
            }
        }
        if let Some(reflect) = &mut self.reflect {
            for row in &record.reflect_rows {
                writeln!(
                    reflect,
                    "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
                    row.t,
                    row.pos.x, row.pos.y, row.pos.z,
                    row.v_in.x, row.v_in.y, row.v_in.z,
                    row.v_out.x, row.v_out.y, row.v_out.z,
                    row.normal.x, row.normal.y, row.normal.z,
                    row.solid_index,
                    row.diffuse as i32,
                )
                .expect("Output error: could not write to reflect.out.");
            }
        }

        let end = &record.end;
        writeln!(
            self.end_stream,
            "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
            end.jobnumber,
            end.particle_index,
            end.kind,
            end.polarization,
            end.t_start,
            end.pos_start.x, end.pos_start.y, end.pos_start.z,
            end.vel_start.x, end.vel_start.y, end.vel_start.z,
            end.h_start / NEV,
            end.t_end,
            end.pos_end.x, end.pos_end.y, end.pos_end.z,
            end.vel_end.x, end.vel_end.y, end.vel_end.z,
            end.h_end / NEV,
            end.h_max / NEV,
            end.stop_code.id(),
            end.spin_flip_probability,
            end.number_of_spin_flips,
            end.number_of_reflections,
            end.trajectory_length,
        )
        .expect("Output error: could not write to end.out.");

        //flushing per particle bounds what an interrupt can lose
        self.flush();
    }

    pub fn flush(&mut self) {
        self.end_stream.flush().unwrap();
        if let Some(track) = &mut self.track {
            track.flush();
        }
        if let Some(spin) = &mut self.spin {
            spin.flush();
        }
        if let Some(reflect) = &mut self.reflect {
            reflect.flush().unwrap();
        }
    }
}

/// Per-kind stop-code counters, printed as the run summary.
pub struct Summary {
    counts: HashMap<(&'static str, i32), usize>,
}

impl Summary {
    pub fn new() -> Summary {
        Summary { counts: HashMap::new() }
    }

    pub fn add(&mut self, kind: ParticleKind, stop_code: StopCode) {
        *self.counts.entry((kind.name(), stop_code.id())).or_insert(0) += 1;
    }

    pub fn print(&self) {
        println!("\nThe simulated particles suffered following fates:");
        let mut kinds: Vec<&'static str> = self.counts.keys().map(|&(kind, _)| kind).collect();
        kinds.sort();
        kinds.dedup();
        for kind in kinds {
            for code in StopCode::all() {
                let count = self.counts.get(&(kind, code.id())).copied().unwrap_or(0);
                println!("{:4}: {:6} {:>10}(s) {}", code.id(), count, kind, code);
            }
            println!();
        }
    }
}

impl Default for Summary {
    fn default() -> Self {
        Summary::new()
    }
}
