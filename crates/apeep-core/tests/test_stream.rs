mod common;

use apeep_core::error::ApeepError;
use apeep_core::io::avi::AviReader;
use apeep_core::stream::{list_source_files, parse_start_time, LineStream, StreamOptions};
use ndarray::Array2;

use common::*;

fn options(block_size: usize) -> StreamOptions {
    StreamOptions {
        block_size,
        ..StreamOptions::default()
    }
}

/// Frame whose every line holds its own global index within the stream.
fn numbered_frame(first_line: usize) -> Array2<u8> {
    Array2::from_shape_fn((LINES, WIDTH), |(r, _)| (first_line + r) as u8)
}

#[test]
fn test_avi_round_trip_keeps_row_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_avi(&dir.path().join("a.avi"), &[numbered_frame(0), numbered_frame(32)]);
    let reader = AviReader::open(&path).unwrap();
    assert_eq!(reader.frame_count(), 2);
    assert!(!reader.is_truncated());
    assert_eq!(reader.header.width as usize, WIDTH);
    assert_eq!(reader.header.height as usize, LINES);
    let second = reader.read_channel(1, Default::default()).unwrap();
    assert_eq!(second, numbered_frame(32));
}

#[test]
fn test_blocks_cross_frame_and_file_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let t0 = time("2023-01-01 12:00:00.000");
    let t1 = time("2023-01-01 12:00:00.064");
    write_video(dir.path(), t0, &[numbered_frame(0), numbered_frame(32)]);
    write_video(dir.path(), t1, &[numbered_frame(64), numbered_frame(96)]);

    let stream = LineStream::open(dir.path(), options(8)).unwrap();
    assert_eq!(stream.width(), WIDTH);
    assert_eq!(stream.lines_per_frame(), LINES);

    let blocks: Vec<_> = stream.collect();
    assert_eq!(blocks.len(), 16);

    for (k, block) in blocks.iter().enumerate() {
        assert_eq!(block.data.dim(), (8, WIDTH));
        for r in 0..8 {
            let expected = (k * 8 + r) as f32 / 255.0;
            assert_eq!(block.data[[r, 0]], expected, "block {k} line {r}");
        }
        let within_file = k % 8;
        assert_eq!(block.frame_index, within_file / 4);
        assert_eq!(block.line_index, (within_file % 4) * 8 + 7);
        let expected_start = if k < 8 { t0 } else { t1 };
        assert_eq!(block.source.start_time, expected_start);
    }
}

#[test]
fn test_first_line_of_block() {
    let dir = tempfile::tempdir().unwrap();
    write_video(dir.path(), time("2023-01-01 12:00:00"), &[numbered_frame(0), numbered_frame(32)]);
    let blocks: Vec<_> = LineStream::open(dir.path(), options(16)).unwrap().collect();
    let third = &blocks[2];
    assert_eq!((third.frame_index, third.line_index), (1, 15));
    let first = third.first_line();
    assert_eq!((first.frame_index, first.line_index), (1, 0));
    assert_eq!(first.line_in_file(), 32);
}

#[test]
fn test_missing_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = LineStream::open(&dir.path().join("nope"), options(8)).err().unwrap();
    assert!(matches!(err, ApeepError::InputDirMissing(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_directory_without_videos_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "nothing here").unwrap();
    let err = LineStream::open(dir.path(), options(8)).err().unwrap();
    assert!(matches!(err, ApeepError::NoSourceFiles(_)));
}

#[test]
fn test_block_size_must_divide_frame_height() {
    let dir = tempfile::tempdir().unwrap();
    write_video(dir.path(), time("2023-01-01 12:00:00"), &[uniform_frame(WATER)]);
    let err = LineStream::open(dir.path(), options(12)).err().unwrap();
    assert!(matches!(err, ApeepError::InvalidConfig(_)));
}

#[test]
fn test_unreadable_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("20230101115959.000.avi"), b"not a video at all").unwrap();
    write_video(dir.path(), time("2023-01-01 12:00:00"), &[uniform_frame(WATER)]);
    write_avi(&dir.path().join("garbage_name.avi"), &[uniform_frame(WATER)]);

    let blocks: Vec<_> = LineStream::open(dir.path(), options(8)).unwrap().collect();
    assert_eq!(blocks.len(), 4);
    assert!(blocks.iter().all(|b| b.source.name == "20230101120000.000.avi"));
}

#[test]
fn test_truncated_file_keeps_complete_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_video(
        dir.path(),
        time("2023-01-01 12:00:00"),
        &[numbered_frame(0), numbered_frame(32), numbered_frame(64)],
    );
    let len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 100).unwrap();

    let reader = AviReader::open(&path).unwrap();
    assert!(reader.is_truncated());
    assert_eq!(reader.frame_count(), 2);

    let blocks: Vec<_> = LineStream::open(dir.path(), options(8)).unwrap().collect();
    assert_eq!(blocks.len(), 8);
}

#[test]
fn test_trailing_partial_block_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    write_video(dir.path(), time("2023-01-01 12:00:00"), &[uniform_frame(WATER)]);
    // 32 lines in blocks of 32: one block; in blocks of 16: two.
    assert_eq!(LineStream::open(dir.path(), options(32)).unwrap().count(), 1);
    assert_eq!(LineStream::open(dir.path(), options(16)).unwrap().count(), 2);
}

#[test]
fn test_files_listed_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_video(dir.path(), time("2023-01-01 12:00:02"), &[uniform_frame(WATER)]);
    write_video(dir.path(), time("2023-01-01 12:00:01"), &[uniform_frame(WATER)]);
    std::fs::write(dir.path().join("ISIIS201.txt"), "").unwrap();

    let files = list_source_files(dir.path(), "AVI").unwrap();
    assert_eq!(files.len(), 2);
    let first = parse_start_time(&files[0], "%Y%m%d%H%M%S%.f").unwrap();
    assert_eq!(first, time("2023-01-01 12:00:01"));
}

#[test]
fn test_start_time_with_fraction() {
    let t = parse_start_time(
        std::path::Path::new("/data/20230101120000.250.avi"),
        "%Y%m%d%H%M%S%.f",
    )
    .unwrap();
    assert_eq!(t, time("2023-01-01 12:00:00.250"));
    assert!(parse_start_time(std::path::Path::new("abc.avi"), "%Y%m%d%H%M%S%.f").is_err());
}
