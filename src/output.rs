//! Whitespace-column output sinks: end, snapshot, track and hit logs.
//!
//! Files are created lazily on first write, one per species and sink
//! kind, named `<jobnumber><species><kind>.out` under the run directory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::{BFieldValue, EFieldValue};
use crate::field_manager::FieldManager;
use crate::particle::{Particle, State};

/// Immutable run-wide context threaded through construction sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub out_dir: PathBuf,
    pub job_number: u64,
}

/// Which logs to produce and when to take snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub end_log: bool,
    pub track_log: bool,
    pub hit_log: bool,
    pub snapshot_log: bool,
    /// Sorted ascending by [`Output::new`].
    pub snapshot_times: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Sink {
    End,
    Snapshot,
    Track,
    Hit,
}

impl Sink {
    fn suffix(&self) -> &'static str {
        match self {
            Sink::End => "end",
            Sink::Snapshot => "snapshot",
            Sink::Track => "track",
            Sink::Hit => "hit",
        }
    }

    fn header(&self) -> &'static str {
        match self {
            Sink::End | Sink::Snapshot => {
                "jobnumber particle tstart xstart ystart zstart \
                 vxstart vystart vzstart polstart Hstart Estart \
                 tend xend yend zend vxend vyend vzend \
                 polend Hend Eend stopID Nspinflip ComputingTime \
                 Nhit Nstep trajlength Hmax"
            }
            Sink::Track => {
                "particle polarisation t x y z vx vy vz H E \
                 Bx dBxdx dBxdy dBxdz By dBydx dBydy dBydz \
                 Bz dBzdx dBzdy dBzdz Babs dBdx dBdy dBdz Ex Ey Ez V"
            }
            Sink::Hit => {
                "jobnumber particle t x y z v1x v1y v1z pol1 \
                 v2x v2y v2z pol2 nx ny nz solid1 solid2"
            }
        }
    }
}

/// Lazily-created log files for one run. Writers are keyed by species
/// name and sink kind so each species gets its own files.
pub struct Output {
    context: Option<RunContext>,
    pub config: OutputConfig,
    writers: HashMap<(String, Sink), BufWriter<File>>,
}

impl Output {
    pub fn new(context: RunContext, mut config: OutputConfig) -> Output {
        config.snapshot_times.sort_by(f64::total_cmp);
        Output {
            context: Some(context),
            config,
            writers: HashMap::new(),
        }
    }

    /// Sink that never writes anything; for embedding and tests.
    pub fn disabled() -> Output {
        Output {
            context: None,
            config: OutputConfig::default(),
            writers: HashMap::new(),
        }
    }

    fn writer(&mut self, species: &str, sink: Sink) -> Result<Option<&mut BufWriter<File>>> {
        let context = match &self.context {
            Some(c) => c,
            None => return Ok(None),
        };
        let key = (species.to_string(), sink);
        if !self.writers.contains_key(&key) {
            let path = context.out_dir.join(format!(
                "{:012}{}{}.out",
                context.job_number,
                species,
                sink.suffix()
            ));
            tracing::info!(file = %path.display(), "creating output file");
            let mut w = BufWriter::new(File::create(path)?);
            writeln!(w, "{}", sink.header())?;
            self.writers.insert(key.clone(), w);
        }
        Ok(self.writers.get_mut(&key))
    }

    /// The end-of-integration record for a particle.
    pub fn write_end(&mut self, p: &Particle, field: Option<&FieldManager>) -> Result<()> {
        if !self.config.end_log {
            return Ok(());
        }
        let job = self.context.as_ref().map(|c| c.job_number).unwrap_or(0);
        let line = end_record(job, p, p.t_end, &p.y_end, p.pol_end, field);
        if let Some(w) = self.writer(p.species.name, Sink::End)? {
            writeln!(w, "{}", line)?;
            w.flush()?;
        }
        Ok(())
    }

    /// A snapshot of the running particle, in the end-record layout.
    pub fn write_snapshot(
        &mut self,
        p: &Particle,
        t: f64,
        y: &State,
        pol: i8,
        field: Option<&FieldManager>,
    ) -> Result<()> {
        if !self.config.snapshot_log {
            return Ok(());
        }
        let job = self.context.as_ref().map(|c| c.job_number).unwrap_or(0);
        let line = end_record(job, p, t, y, pol, field);
        if let Some(w) = self.writer(p.species.name, Sink::Snapshot)? {
            writeln!(w, "{}", line)?;
        }
        Ok(())
    }

    /// One sample of the particle track with the local field values.
    #[allow(clippy::too_many_arguments)]
    pub fn write_track(
        &mut self,
        p: &Particle,
        t: f64,
        y: &State,
        pol: i8,
        h_ev: f64,
        e_ev: f64,
        b: &BFieldValue,
        e: &EFieldValue,
    ) -> Result<()> {
        if !self.config.track_log {
            return Ok(());
        }
        let mut line = format!(
            "{} {} {} {} {} {} {} {} {} {} {}",
            p.number, pol, t, y[0], y[1], y[2], y[3], y[4], y[5], h_ev, e_ev
        );
        for row in &b.comp {
            for v in row {
                line.push_str(&format!(" {}", v));
            }
        }
        line.push_str(&format!(" {} {} {} {}", e.e[0], e.e[1], e.e[2], e.v));
        if let Some(w) = self.writer(p.species.name, Sink::Track)? {
            writeln!(w, "{}", line)?;
        }
        Ok(())
    }

    /// One material-boundary crossing with the states on both sides.
    #[allow(clippy::too_many_arguments)]
    pub fn write_hit(
        &mut self,
        p: &Particle,
        t: f64,
        y1: &State,
        pol1: i8,
        y2: &State,
        pol2: i8,
        normal: &Vector3<f64>,
        leaving_id: u32,
        entering_id: u32,
    ) -> Result<()> {
        if !self.config.hit_log {
            return Ok(());
        }
        let job = self.context.as_ref().map(|c| c.job_number).unwrap_or(0);
        let line = format!(
            "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
            job,
            p.number,
            t,
            y1[0],
            y1[1],
            y1[2],
            y1[3],
            y1[4],
            y1[5],
            pol1,
            y2[3],
            y2[4],
            y2[5],
            pol2,
            normal.x,
            normal.y,
            normal.z,
            leaving_id,
            entering_id
        );
        if let Some(w) = self.writer(p.species.name, Sink::Hit)? {
            writeln!(w, "{}", line)?;
        }
        Ok(())
    }

    /// Flush all open writers.
    pub fn flush(&mut self) -> Result<()> {
        for w in self.writers.values_mut() {
            w.flush()?;
        }
        Ok(())
    }
}

fn end_record(
    job: u64,
    p: &Particle,
    t: f64,
    y: &State,
    pol: i8,
    field: Option<&FieldManager>,
) -> String {
    let e_kin = p.species.ekin_ev(&crate::particle::velocity(y));
    let h = e_kin + p.species.epot_ev(t, y, pol, field);
    format!(
        "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
        job,
        p.number,
        p.t_start,
        p.y_start[0],
        p.y_start[1],
        p.y_start[2],
        p.y_start[3],
        p.y_start[4],
        p.y_start[5],
        p.pol_start,
        p.h_start_ev(field),
        p.e_start_ev(),
        t,
        y[0],
        y[1],
        y[2],
        y[3],
        y[4],
        y[5],
        pol,
        h,
        e_kin,
        p.status.code(),
        p.n_spinflip,
        p.computing_time,
        p.n_hit,
        p.n_step,
        p.traj_length,
        p.h_max
    )
}
