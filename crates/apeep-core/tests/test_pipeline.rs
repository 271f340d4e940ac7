mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use apeep_core::detection::{label_components, BoundingBox, Detection, Detector, SegmentPipeline};
use apeep_core::error::{ApeepError, Result};
use apeep_core::io::export::{DiskExporter, PARTICLES_TSV};
use apeep_core::pipeline::{run_pipeline, run_pipeline_reported, ProgressReporter};
use ndarray::ArrayView2;

use common::*;

const T0: &str = "2023-01-01 12:00:00";

/// One file of four frames; the second frame holds a 8-line x 6-pixel
/// dark rectangle on its lines 8..16.
fn square_acquisition(raw: &std::path::Path) {
    let frames = vec![
        uniform_frame(WATER),
        frame_with_square(8..16, 5..11),
        uniform_frame(WATER),
        uniform_frame(WATER),
    ];
    write_video(raw, time(T0), &frames);
}

fn environment(raw: &std::path::Path) {
    write_environ(
        raw,
        "ISIIS201.txt",
        "01/01/23",
        &["Time", "Depth (m)", "Comment"],
        &[
            &["11:59:59.00", "4.0", "start"],
            &["12:00:00.00", "4.5", "ok"],
            &["12:00:01.00", "5.0", "ok"],
        ],
    );
}

#[test]
fn test_uniform_files_give_no_particles() {
    let (project, raw) = project();
    for s in 0..3 {
        let start = time(T0) + chrono::Duration::milliseconds(64 * s);
        write_video(&raw, start, &[uniform_frame(WATER), uniform_frame(WATER)]);
    }

    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&small_config(), project.path(), None, &mut sink).unwrap();

    // 192 lines in 32-line frames.
    assert_eq!(summary.frames_assembled, 6);
    assert_eq!(summary.frames_processed, 6);
    assert_eq!(summary.particles, 0);
    assert!(sink.finished);
    assert_eq!(sink.environment_columns, Some(Vec::new()));
    for frame in &sink.frames {
        assert_eq!(frame.flat_fielded.dim(), (WIDTH, LINES));
        assert!(frame.flat_fielded.iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(frame.labels.as_ref().is_some_and(|l| l.iter().all(|&v| v == 0)));
    }
}

#[test]
fn test_dark_square_is_one_located_particle() {
    let (project, raw) = project();
    square_acquisition(&raw);

    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&exact_config(), project.path(), None, &mut sink).unwrap();
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.particles, 1);

    let with_particles: Vec<_> = sink.frames.iter().filter(|f| !f.particles.is_empty()).collect();
    assert_eq!(with_particles.len(), 1);
    let frame = with_particles[0];
    assert_eq!(frame.provenance.end.frame_index, 1);

    let p = &frame.particles[0];
    assert_eq!(p.particle.region.area, 48);
    // Lines become columns; sensor pixels 5..11 become rows 5..=10.
    assert_eq!(p.particle.region.bbox, (5, 8, 11, 16));
    assert_eq!(p.location.file, "20230101120000.000.avi");
    assert_eq!(p.location.frame_index, 1);
    assert_eq!(p.location.line_in_frame, 8);
    assert_eq!(p.location.time, time("2023-01-01 12:00:00.040"));
    assert!(p.environment.is_none());
}

#[test]
fn test_particles_joined_to_environment() {
    let (project, raw) = project();
    square_acquisition(&raw);
    environment(&raw);

    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&exact_config(), project.path(), None, &mut sink).unwrap();
    assert_eq!(summary.particles_with_environment, 1);
    assert_eq!(
        sink.environment_columns,
        Some(vec!["Time".into(), "Depth (m)".into(), "Comment".into()])
    );

    let record = sink.particles().next().unwrap().environment.clone().unwrap();
    assert_eq!(record.time, time("2023-01-01 12:00:00"));
    assert_eq!(record.values[1].as_deref(), Some("4.5"));
}

#[test]
fn test_environment_outside_tolerance_is_not_joined() {
    let (project, raw) = project();
    square_acquisition(&raw);
    environment(&raw);

    let mut config = exact_config();
    config.environ.tolerance_s = 0.01;
    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&config, project.path(), None, &mut sink).unwrap();
    assert_eq!(summary.particles, 1);
    assert_eq!(summary.particles_with_environment, 0);
}

#[test]
fn test_particles_located_across_two_files() {
    let (project, raw) = project();
    let t_b = time("2023-01-01 12:00:00.032");
    write_video(&raw, time(T0), &[frame_with_square(24..32, 2..8)]);
    write_video(&raw, t_b, &[frame_with_square(8..16, 9..13)]);

    let mut config = exact_config();
    config.enhance.image_size = 24;
    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&config, project.path(), None, &mut sink).unwrap();
    // 64 lines in 24-line frames.
    assert_eq!(summary.frames_processed, 2);
    assert_eq!(summary.particles, 2);

    let frame = &sink.frames[1];
    assert!(frame.provenance.spans_two_files());
    let mut points: Vec<_> = frame.particles.iter().map(|p| p.location.clone()).collect();
    points.sort_by_key(|p| p.time);

    assert_eq!(points[0].file, "20230101120000.000.avi");
    assert_eq!((points[0].frame_index, points[0].line_in_frame), (0, 24));
    assert_eq!(points[0].time, time("2023-01-01 12:00:00.024"));
    assert_eq!(points[1].file, "20230101120000.032.avi");
    assert_eq!((points[1].frame_index, points[1].line_in_frame), (0, 8));
    assert_eq!(points[1].time, time("2023-01-01 12:00:00.040"));
}

#[test]
fn test_subsampling_keeps_every_other_frame() {
    let (project, raw) = project();
    write_video(&raw, time(T0), &vec![uniform_frame(WATER); 6]);

    let mut config = small_config();
    config.subsample.interval = 2;
    config.subsample.offset = 1;
    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&config, project.path(), None, &mut sink).unwrap();
    assert_eq!(summary.frames_assembled, 6);
    assert_eq!(summary.frames_processed, 3);

    let ends: Vec<usize> = sink.frames.iter().map(|f| f.provenance.end.frame_index).collect();
    assert_eq!(ends, vec![1, 3, 5]);
}

#[test]
fn test_disabled_segmentation_only_assembles() {
    let (project, raw) = project();
    square_acquisition(&raw);

    let mut config = exact_config();
    config.segment.enabled = false;
    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&config, project.path(), None, &mut sink).unwrap();
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.particles, 0);
    assert!(sink.frames.iter().all(|f| f.labels.is_none()));
}

#[test]
fn test_missing_input_is_fatal_before_output() {
    let project = tempfile::tempdir().unwrap();
    let mut sink = CollectingSink::default();
    let err = run_pipeline(&small_config(), project.path(), None, &mut sink).unwrap_err();
    assert!(matches!(err, ApeepError::InputDirMissing(_)));
    assert!(sink.environment_columns.is_none());
    assert!(!sink.finished);
}

#[test]
fn test_semantic_pipeline_needs_detector() {
    let (project, raw) = project();
    square_acquisition(&raw);

    let mut config = exact_config();
    config.segment.pipeline = SegmentPipeline::Semantic;
    let mut sink = CollectingSink::default();
    let err = run_pipeline(&config, project.path(), None, &mut sink).unwrap_err();
    assert!(matches!(err, ApeepError::InvalidConfig(_)));
    assert!(sink.frames.is_empty());
}

/// Reports each dark blob of a tile.
struct BlobDetector;

impl Detector for BlobDetector {
    fn predict(&self, tile: ArrayView2<f32>) -> Result<Vec<Detection>> {
        let (labels, stats) = label_components(&tile.mapv(|v| v < 0.5));
        Ok(stats
            .iter()
            .map(|s| Detection {
                score: 0.95,
                bbox: BoundingBox::new(s.bbox.2, s.bbox.0, s.bbox.3 + 1, s.bbox.1 + 1),
                mask: labels.mapv(|l| l == s.label),
            })
            .collect())
    }
}

#[test]
fn test_combined_pipeline_with_detector() {
    let (project, raw) = project();
    square_acquisition(&raw);

    let mut config = exact_config();
    config.segment.pipeline = SegmentPipeline::Both;
    config.semantic.tile_rows = 1;
    config.semantic.tile_cols = 2;
    config.semantic.tile_size = 16;
    config.semantic.dilate = 0;
    config.semantic.erode = 0;
    config.semantic.min_area = 10;
    let mut sink = CollectingSink::default();
    let summary = run_pipeline(&config, project.path(), Some(&BlobDetector), &mut sink).unwrap();
    assert_eq!(summary.particles, 1);
    assert_eq!(sink.particles().next().unwrap().particle.region.area, 48);
}

#[derive(Default)]
struct CountingReporter {
    frames: AtomicUsize,
    stages: AtomicUsize,
}

impl ProgressReporter for CountingReporter {
    fn begin_stage(&self, _stage: apeep_core::pipeline::PipelineStage, _total: Option<usize>) {
        self.stages.fetch_add(1, Ordering::SeqCst);
    }

    fn frame_done(&self, _name: &str, _particles: usize) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_reporter_sees_every_frame() {
    let (project, raw) = project();
    square_acquisition(&raw);

    let reporter = Arc::new(CountingReporter::default());
    let mut sink = CollectingSink::default();
    run_pipeline_reported(&exact_config(), project.path(), None, &mut sink, reporter.clone()).unwrap();
    assert_eq!(reporter.frames.load(Ordering::SeqCst), 4);
    assert_eq!(reporter.stages.load(Ordering::SeqCst), 4);
}

// ---------------------------------------------------------------------------
// Disk export
// ---------------------------------------------------------------------------

fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}

#[test]
fn test_disk_export_writes_table_and_images() {
    let (project, raw) = project();
    square_acquisition(&raw);
    environment(&raw);

    let mut config = exact_config();
    config.segment.write_image = true;
    config.measure.properties = vec![
        apeep_core::measure::RegionProperty::Area,
        apeep_core::measure::RegionProperty::Bbox,
    ];
    let mut exporter = DiskExporter::new(project.path(), config.export_options());
    run_pipeline(&config, project.path(), None, &mut exporter).unwrap();

    let table = project.path().join("particles").join(PARTICLES_TSV);
    let lines = read_lines(&table);
    assert_eq!(lines.len(), 3);

    let header: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(header[0], "object_id");
    assert!(header.contains(&"object_area"));
    assert!(header.contains(&"object_bbox_3"));
    assert_eq!(header.last(), Some(&"object_env_comment"));

    let types: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(types.len(), header.len());
    assert_eq!(types[0], "[t]");
    let depth = header.iter().position(|h| *h == "object_env_depth_m").unwrap();
    assert_eq!(types[depth], "[f]");
    assert_eq!(types.last(), Some(&"[t]"));

    let row: Vec<&str> = lines[2].split('\t').collect();
    assert_eq!(row.len(), header.len());
    let col = |name: &str| row[header.iter().position(|h| *h == name).unwrap()];
    assert_eq!(col("sample_id"), "raw");
    assert_eq!(col("object_date"), "20230101");
    assert_eq!(col("object_time"), "120000");
    assert_eq!(col("object_avi_file"), "20230101120000.000.avi");
    assert_eq!(col("object_frame"), "1");
    assert_eq!(col("object_line_in_frame"), "8");
    assert_eq!(col("object_area"), "48");
    assert_eq!(col("object_env_depth_m"), "4.5");

    let image = project.path().join("particles").join(col("img_file_name"));
    assert!(image.is_file());
    let segmented = std::fs::read_dir(project.path().join("segmented")).unwrap().count();
    assert_eq!(segmented, 4);
    assert!(!project.path().join("flat_fielded").exists());
}

#[test]
fn test_disk_export_appends_to_existing_table() {
    let (project, raw) = project();
    square_acquisition(&raw);

    let config = exact_config();
    for _ in 0..2 {
        let mut exporter = DiskExporter::new(project.path(), config.export_options());
        run_pipeline(&config, project.path(), None, &mut exporter).unwrap();
    }

    let lines = read_lines(&project.path().join("particles").join(PARTICLES_TSV));
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("object_id\t"));
    assert!(!lines[2].starts_with("object_id"));
    assert_eq!(lines[2], lines[3]);
}

#[test]
fn test_no_particles_no_table() {
    let (project, raw) = project();
    write_video(&raw, time(T0), &[uniform_frame(WATER), uniform_frame(WATER)]);

    let config = small_config();
    let mut exporter = DiskExporter::new(project.path(), config.export_options());
    run_pipeline(&config, project.path(), None, &mut exporter).unwrap();
    assert!(!project.path().join("particles").exists());
}

#[test]
fn test_scale_bar_added_to_particle_images() {
    let (project, raw) = project();
    square_acquisition(&raw);

    let mut config = exact_config();
    config.measure.px2mm = Some(0.5);
    let mut exporter = DiskExporter::new(project.path(), config.export_options());
    let mut sink = CollectingSink::default();
    run_pipeline(&config, project.path(), None, &mut sink).unwrap();
    run_pipeline(&config, project.path(), None, &mut exporter).unwrap();

    let p = sink.particles().next().unwrap();
    let dir = project.path().join("particles").join(&sink.frames[1].provenance.name);
    let saved = apeep_core::io::image_io::load_image(&dir.join(format!("{}.png", p.particle.id))).unwrap();
    let (h, w) = p.particle.image.dim();
    assert!(saved.nrows() > h);
    assert!(saved.ncols() >= w);
}
