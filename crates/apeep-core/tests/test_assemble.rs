mod common;

use std::sync::Arc;

use apeep_core::assemble::{frame_name, line_time, FrameAssembler, Orientation};
use apeep_core::flatfield::FlatFieldTracker;
use apeep_core::frame::{LineBlock, SourceFile};
use apeep_core::stream::{LineStream, StreamOptions};
use approx::assert_relative_eq;
use ndarray::{Array1, Array2};

use common::*;

fn source(name: &str, start: &str) -> Arc<SourceFile> {
    Arc::new(SourceFile {
        path: format!("/raw/{name}").into(),
        name: name.into(),
        start_time: time(start),
        lines_per_frame: LINES,
        width: WIDTH,
        frame_count: 2,
    })
}

/// Blocks of `n` lines covering every frame of `source`, in order.
fn blocks(source: &Arc<SourceFile>, n: usize, value: f32) -> Vec<LineBlock> {
    let total = source.frame_count * source.lines_per_frame;
    (0..total / n)
        .map(|k| {
            let last = (k + 1) * n - 1;
            LineBlock {
                data: Array2::from_elem((n, WIDTH), value),
                source: Arc::clone(source),
                frame_index: last / LINES,
                line_index: last % LINES,
            }
        })
        .collect()
}

#[test]
fn test_baseline_follows_recurrence_over_stream() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<Array2<u8>> = (0..3)
        .map(|f| Array2::from_shape_fn((LINES, WIDTH), |(r, c)| (50 + f * 20 + r + c) as u8))
        .collect();
    write_video(dir.path(), time("2023-01-01 12:00:00"), &frames);

    let options = StreamOptions {
        block_size: 8,
        ..StreamOptions::default()
    };
    let mut stream = LineStream::open(dir.path(), options).unwrap();
    let window: Vec<LineBlock> = stream.by_ref().take(4).collect();
    let mut tracker = FlatFieldTracker::from_window(&window, 32).unwrap();

    // Initial baseline: column means of the first 32 lines.
    let mut expected = Array1::<f64>::zeros(WIDTH);
    for block in &window {
        for row in block.data.rows() {
            for (e, &v) in expected.iter_mut().zip(row.iter()) {
                *e += v as f64;
            }
        }
    }
    expected /= 32.0;
    for (a, b) in tracker.baseline().iter().zip(expected.iter()) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }

    for block in window.into_iter().chain(stream) {
        let mut colsum = Array1::<f64>::zeros(WIDTH);
        for row in block.data.rows() {
            for (s, &v) in colsum.iter_mut().zip(row.iter()) {
                *s += v as f64;
            }
        }
        for (e, &c) in expected.iter_mut().zip(colsum.iter()) {
            *e += (c - *e * 8.0) / 32.0;
        }

        let raw = block.data.clone();
        let out = tracker.process(block);
        assert_eq!(tracker.baseline(), &expected);
        assert_relative_eq!(
            out.data[[3, 5]] as f64,
            raw[[3, 5]] as f64 / expected[5],
            max_relative = 1e-6
        );
    }
}

#[test]
fn test_uniform_input_normalizes_to_one() {
    let src = source("a.avi", "2023-01-01 12:00:00");
    let all = blocks(&src, 8, 0.6);
    let mut tracker = FlatFieldTracker::from_window(&all[..4], 32).unwrap();
    for block in all {
        let out = tracker.process(block);
        assert!(out.data.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}

#[test]
fn test_frame_completion_count() {
    let src = source("a.avi", "2023-01-01 12:00:00");
    let mut assembler = FrameAssembler::new(32, WIDTH, Orientation::Right, SCAN_PER_S, "t1").unwrap();

    let mut done = Vec::new();
    for block in blocks(&src, 8, 1.0) {
        if let Some(frame) = assembler.push(&block).unwrap() {
            done.push(frame);
        }
    }
    // 64 lines in blocks of 8, 32-line frames.
    assert_eq!(done.len(), 2);
    assert_eq!(assembler.filled(), 0);
    assert_eq!(done[0].data.dim(), (WIDTH, 32));
    assert_eq!(done[0].provenance.transect, "t1");
}

#[test]
fn test_consecutive_frames_share_boundary_time() {
    let src = source("a.avi", "2023-01-01 12:00:00");
    let mut assembler = FrameAssembler::new(16, WIDTH, Orientation::Right, SCAN_PER_S, "t1").unwrap();
    let frames: Vec<_> = blocks(&src, 8, 1.0)
        .iter()
        .filter_map(|b| assembler.push(b).unwrap())
        .collect();
    assert_eq!(frames.len(), 4);
    for pair in frames.windows(2) {
        assert_eq!(pair[1].provenance.start_time, pair[0].provenance.end_time);
    }
}

#[test]
fn test_frame_times_and_name() {
    let src = source("a.avi", "2023-01-01 12:00:00");
    let mut assembler = FrameAssembler::new(32, WIDTH, Orientation::Right, SCAN_PER_S, "t1").unwrap();
    let frames: Vec<_> = blocks(&src, 8, 1.0)
        .iter()
        .filter_map(|b| assembler.push(b).unwrap())
        .collect();

    // The first frame ends on line 31: 31 ms after the file start, and
    // starts 32 lines earlier.
    let first = &frames[0].provenance;
    assert_eq!(first.end_time, time("2023-01-01 12:00:00.031"));
    assert_eq!(first.start_time, time("2023-01-01 11:59:59.999"));
    assert_eq!(first.name, "2023-01-01_11-59-59_999000");
    assert_eq!(frames[1].provenance.name, "2023-01-01_12-00-00_031000");
    assert_eq!((first.start.frame_index, first.start.line_index), (0, 0));
    assert_eq!((first.end.frame_index, first.end.line_index), (0, 31));
}

#[test]
fn test_timestamps_do_not_depend_on_block_size() {
    let src = source("a.avi", "2023-01-01 12:00:00.5");
    let names = |n: usize| -> Vec<String> {
        let mut assembler = FrameAssembler::new(32, WIDTH, Orientation::Left, 28_000.0, "t").unwrap();
        blocks(&src, n, 1.0)
            .iter()
            .filter_map(|b| assembler.push(b).unwrap())
            .map(|f| f.provenance.name)
            .collect()
    };
    assert_eq!(names(4), names(16));
    assert_eq!(names(8), names(32));
}

#[test]
fn test_frame_spanning_two_files() {
    let a = source("a.avi", "2023-01-01 12:00:00");
    let b = source("b.avi", "2023-01-01 12:00:00.064");
    let mut assembler = FrameAssembler::new(24, WIDTH, Orientation::Right, SCAN_PER_S, "t").unwrap();

    let mut frames = Vec::new();
    for block in blocks(&a, 8, 1.0).iter().chain(blocks(&b, 8, 1.0).iter()) {
        if let Some(f) = assembler.push(block).unwrap() {
            frames.push(f);
        }
    }
    // 128 lines, 24-line frames: five frames, the third spans both files.
    assert_eq!(frames.len(), 5);
    let third = &frames[2].provenance;
    assert!(third.spans_two_files());
    assert_eq!(third.start.source.name, "a.avi");
    assert_eq!(third.end.source.name, "b.avi");
    // Times come from the file holding the last line.
    assert_eq!(third.end_time, time("2023-01-01 12:00:00.071"));
    assert!(!frames[0].provenance.spans_two_files());
}

#[test]
fn test_oversized_block_rejected() {
    let src = source("a.avi", "2023-01-01 12:00:00");
    let mut assembler = FrameAssembler::new(8, WIDTH, Orientation::Right, SCAN_PER_S, "t").unwrap();
    let all = blocks(&src, 16, 1.0);
    assert!(assembler.push(&all[0]).is_err());
    assert!(FrameAssembler::new(0, WIDTH, Orientation::Right, SCAN_PER_S, "t").is_err());
}

#[test]
fn test_line_time_before_file_start() {
    let start = time("2023-01-01 00:00:00");
    assert_eq!(line_time(start, -1, 1000.0), time("2022-12-31 23:59:59.999"));
    assert_eq!(line_time(start, 28_000, 28_000.0), time("2023-01-01 00:00:01"));
    assert_eq!(frame_name(time("2023-01-01 00:00:01.5")), "2023-01-01_00-00-01_500000");
}
