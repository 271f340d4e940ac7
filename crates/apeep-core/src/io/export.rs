//! Per-frame outputs written to a project directory.
//!
//! Layout under the output root:
//!
//! - `flat_fielded/<frame>.png`, `enhanced/<frame>.png`,
//!   `segmented/<frame>.png`, `masked/<frame>.png` when enabled
//! - `particles/<frame>/<particle id>.png`
//! - `particles/ecotaxa_particles.tsv`, one row per particle

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::{debug, info};

use crate::error::Result;
use crate::filters::histogram::min_max_stretch;
use crate::frame::{ImageProvenance, LabeledMask};
use crate::io::environ::EnvironmentTable;
use crate::io::image_io::{save_mask_png, save_masked_png, save_png};
use crate::io::scale_bar::add_scale_bar;
use crate::measure::{ParticleRecord, RegionProperty};

pub const PARTICLES_TSV: &str = "ecotaxa_particles.tsv";

const DATE_FORMAT: &str = "%Y%m%d";
const TIME_FORMAT: &str = "%H%M%S";

/// Columns every particle row starts with, all text.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "object_id",
    "img_file_name",
    "sample_id",
    "acq_id",
    "object_date",
    "object_time",
    "object_avi_file",
    "object_frame",
    "object_line_in_frame",
];

/// Everything produced for one processed frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameOutput<'a> {
    pub provenance: &'a ImageProvenance,
    pub flat_fielded: &'a Array2<f32>,
    pub enhanced: Option<&'a Array2<f32>>,
    pub labels: Option<&'a LabeledMask>,
    pub particles: &'a [ParticleRecord],
}

impl FrameOutput<'_> {
    pub fn name(&self) -> &str {
        &self.provenance.name
    }
}

/// Receives the results of the pipeline, frame by frame.
pub trait FrameSink {
    /// Called once before the first frame with the environmental data
    /// that particles will be joined to (possibly empty).
    fn begin(&mut self, _environment: &EnvironmentTable) -> Result<()> {
        Ok(())
    }

    fn write_frame(&mut self, frame: &FrameOutput<'_>) -> Result<()>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What [`DiskExporter`] writes.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    pub flat_fielded: bool,
    pub enhanced: bool,
    pub segmented: bool,
    pub masked: bool,
    pub particles: bool,
    pub properties: Vec<RegionProperty>,
    /// Pixel size in mm; adds a scale bar to particle images when set.
    pub px2mm: Option<f64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            flat_fielded: false,
            enhanced: false,
            segmented: false,
            masked: false,
            particles: true,
            properties: vec![RegionProperty::Area],
            px2mm: None,
        }
    }
}

struct EnvColumn {
    header: String,
    numeric: bool,
}

/// Writes frames, masks and particles as image files plus an
/// EcoTaxa-compatible particle table.
pub struct DiskExporter {
    root: PathBuf,
    options: ExportOptions,
    env_columns: Vec<EnvColumn>,
    table: Option<BufWriter<File>>,
    rows: usize,
}

impl DiskExporter {
    /// Directories are created on first use, so nothing is written
    /// before the first frame.
    pub fn new(root: &Path, options: ExportOptions) -> Self {
        Self {
            root: root.to_path_buf(),
            options,
            env_columns: Vec::new(),
            table: None,
            rows: 0,
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.root.join("particles").join(PARTICLES_TSV)
    }

    /// Path of `<dir>/<name>.png`, creating `dir` if needed.
    fn image_path(&self, dir: &str, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(dir);
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(format!("{name}.png")))
    }

    /// Full header of the particle table.
    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        for prop in &self.options.properties {
            cols.extend(prop.columns().into_iter().map(|c| format!("object_{c}")));
        }
        cols.extend(self.env_columns.iter().map(|c| c.header.clone()));
        cols
    }

    fn column_types(&self) -> Vec<&'static str> {
        let mut types = vec!["[t]"; REQUIRED_COLUMNS.len()];
        for prop in &self.options.properties {
            types.extend(std::iter::repeat_n("[f]", prop.columns().len()));
        }
        types.extend(
            self.env_columns
                .iter()
                .map(|c| if c.numeric { "[f]" } else { "[t]" }),
        );
        types
    }

    /// Open the particle table for appending; a new or empty table gets
    /// the header and type rows first.
    fn open_table(&self) -> Result<BufWriter<File>> {
        let path = self.table_path();
        let fresh = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        if fresh {
            writeln!(writer, "{}", self.columns().join("\t"))?;
            writeln!(writer, "{}", self.column_types().join("\t"))?;
        } else {
            debug!(file = %path.display(), "appending to existing particle table");
        }
        Ok(writer)
    }

    fn particle_row(&self, provenance: &ImageProvenance, record: &ParticleRecord) -> Vec<String> {
        let p = &record.particle;
        let loc = &record.location;
        let mut row = vec![
            p.id.clone(),
            format!("{}/{}.png", provenance.name, p.id),
            provenance.transect.clone(),
            provenance.name.clone(),
            loc.time.format(DATE_FORMAT).to_string(),
            loc.time.format(TIME_FORMAT).to_string(),
            loc.file.clone(),
            loc.frame_index.to_string(),
            loc.line_in_frame.to_string(),
        ];
        for prop in &self.options.properties {
            row.extend(prop.values(&p.region).into_iter().map(|v| v.to_string()));
        }
        for i in 0..self.env_columns.len() {
            let value = record
                .environment
                .as_ref()
                .and_then(|e| e.values.get(i).cloned().flatten())
                .unwrap_or_default();
            row.push(value);
        }
        row
    }

    fn write_particles(&mut self, frame: &FrameOutput<'_>) -> Result<()> {
        let dir = self.root.join("particles").join(frame.name());
        std::fs::create_dir_all(&dir)?;
        for record in frame.particles {
            let p = &record.particle;
            let path = dir.join(format!("{}.png", p.id));
            match self.options.px2mm {
                Some(px2mm) => save_png(&add_scale_bar(&p.image, px2mm), &path)?,
                None => save_png(&p.image, &path)?,
            }
        }

        let rows: Vec<String> = frame
            .particles
            .iter()
            .map(|r| self.particle_row(frame.provenance, r).join("\t"))
            .collect();
        if self.table.is_none() {
            self.table = Some(self.open_table()?);
        }
        let Some(table) = self.table.as_mut() else {
            return Ok(());
        };
        for row in &rows {
            writeln!(table, "{row}")?;
        }
        table.flush()?;
        self.rows += rows.len();
        Ok(())
    }
}

impl FrameSink for DiskExporter {
    fn begin(&mut self, environment: &EnvironmentTable) -> Result<()> {
        self.env_columns = environment
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| EnvColumn {
                header: format!("object_env_{}", sanitize_column(name)),
                numeric: environment.column_is_numeric(i),
            })
            .collect();
        Ok(())
    }

    fn write_frame(&mut self, frame: &FrameOutput<'_>) -> Result<()> {
        let name = frame.name();
        if self.options.flat_fielded {
            save_png(&min_max_stretch(frame.flat_fielded), &self.image_path("flat_fielded", name)?)?;
        }
        if let (true, Some(enhanced)) = (self.options.enhanced, frame.enhanced) {
            save_png(enhanced, &self.image_path("enhanced", name)?)?;
        }
        if let Some(labels) = frame.labels {
            if self.options.segmented {
                save_mask_png(labels, &self.image_path("segmented", name)?)?;
            }
            if self.options.masked {
                let base = frame.enhanced.unwrap_or(frame.flat_fielded);
                save_masked_png(base, labels, &self.image_path("masked", name)?)?;
            }
        }
        if self.options.particles && !frame.particles.is_empty() {
            self.write_particles(frame)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(table) = self.table.as_mut() {
            table.flush()?;
        }
        if self.rows > 0 {
            info!(rows = self.rows, file = %self.table_path().display(), "particle table written");
        }
        Ok(())
    }
}

/// Lowercase `name` and replace anything but letters and digits with `_`.
pub fn sanitize_column(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
