//! Model-assisted segmentation.
//!
//! A frame is cut into a grid of overlapping tiles, each tile goes through
//! an instance detector, and detections of the same particle seen by
//! several tiles are merged. The kept boxes are then pasted on a white
//! canvas which is thresholded like any other frame: the model decides
//! where to look, grey levels decide particle outlines.

use ndarray::{s, Array2, ArrayView2, Zip};
use tracing::debug;

use crate::error::{ApeepError, Result};
use crate::frame::LabeledMask;

use super::config::{SegmentParams, SemanticConfig};
use super::regular::segment_regular;

/// Axis-aligned box in pixel coordinates, `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl BoundingBox {
    pub fn new(x0: usize, y0: usize, x1: usize, y1: usize) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Whether the two boxes share at least one coordinate. Boxes that
    /// only touch along an edge count as intersecting.
    pub fn intersects(&self, other: &Self) -> bool {
        self.x0.max(other.x0) <= self.x1.min(other.x1)
            && self.y0.max(other.y0) <= self.y1.min(other.y1)
    }

    /// Common area of the two boxes, if not empty.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let b = Self::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        );
        (b.x0 < b.x1 && b.y0 < b.y1).then_some(b)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    pub fn translate(&self, dx: usize, dy: usize) -> Self {
        Self::new(self.x0 + dx, self.y0 + dy, self.x1 + dx, self.y1 + dy)
    }

    /// Grow by `margin` on every side, clipped to a `height x width` frame.
    pub fn expand(&self, margin: usize, height: usize, width: usize) -> Self {
        Self::new(
            self.x0.saturating_sub(margin),
            self.y0.saturating_sub(margin),
            (self.x1 + margin).min(width),
            (self.y1 + margin).min(height),
        )
    }
}

/// One instance found by a detector in a tile.
#[derive(Clone, Debug)]
pub struct Detection {
    /// Confidence in [0, 1].
    pub score: f32,
    /// Tile-local box.
    pub bbox: BoundingBox,
    /// Tile-sized instance mask.
    pub mask: Array2<bool>,
}

/// Instance detection backend.
///
/// Tiles are grey images in [0, 1]. Implementations may run any model; the
/// masks they return must have the shape of the tile.
pub trait Detector {
    fn predict(&self, tile: ArrayView2<f32>) -> Result<Vec<Detection>>;
}

/// Position of one tile in the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub row: usize,
    pub col: usize,
    /// Frame coordinates of the tile.
    pub rect: BoundingBox,
}

/// Fixed grid of overlapping square tiles.
///
/// Tile centres are evenly spread so that the first and last tiles of each
/// axis touch the frame edges. An axis shorter than the tile gets a single
/// tile clipped to the frame.
#[derive(Clone, Copy, Debug)]
pub struct TileGrid {
    pub rows: usize,
    pub cols: usize,
    pub size: usize,
}

impl TileGrid {
    pub fn new(rows: usize, cols: usize, size: usize) -> Self {
        Self { rows, cols, size }
    }

    /// Tiles covering a `height x width` frame, in row-major order.
    pub fn tiles(&self, height: usize, width: usize) -> Vec<Tile> {
        let ys = axis_starts(height, self.rows, self.size);
        let xs = axis_starts(width, self.cols, self.size);
        let mut tiles = Vec::with_capacity(ys.len() * xs.len());
        for (row, &(y0, y1)) in ys.iter().enumerate() {
            for (col, &(x0, x1)) in xs.iter().enumerate() {
                tiles.push(Tile {
                    row,
                    col,
                    rect: BoundingBox::new(x0, y0, x1, y1),
                });
            }
        }
        tiles
    }
}

/// Start and end of each tile along an axis of `len` pixels.
fn axis_starts(len: usize, count: usize, size: usize) -> Vec<(usize, usize)> {
    if len == 0 || count == 0 || size == 0 {
        return Vec::new();
    }
    if len <= size || count == 1 {
        let extent = size.min(len);
        return vec![(0, extent)];
    }
    let step = (len - size) as f64 / (count - 1) as f64;
    (0..count)
        .map(|i| {
            let centre = (size as f64 / 2.0 + i as f64 * step).round() as usize;
            let start = centre.saturating_sub(size / 2).min(len - size);
            (start, start + size)
        })
        .collect()
}

/// A detection translated into frame coordinates.
#[derive(Clone, Debug)]
pub struct TileDetection {
    pub tile: Tile,
    pub score: f32,
    /// Frame coordinates.
    pub bbox: BoundingBox,
    /// Tile-local mask, shaped like `tile.rect`.
    pub mask: Array2<bool>,
}

/// Final detection after overlap resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedDetection {
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Run `detector` on every tile of the grid and keep detections scoring at
/// least `score_threshold`, translated to frame coordinates.
pub fn predict_tiles(
    frame: &Array2<f32>,
    grid: &TileGrid,
    detector: &dyn Detector,
    score_threshold: f32,
) -> Result<Vec<TileDetection>> {
    let (h, w) = frame.dim();
    let mut detections = Vec::new();

    for tile in grid.tiles(h, w) {
        let r = tile.rect;
        let view = frame.slice(s![r.y0..r.y1, r.x0..r.x1]);
        for det in detector.predict(view)? {
            if det.score < score_threshold {
                continue;
            }
            if det.mask.dim() != (r.height(), r.width()) {
                return Err(ApeepError::Detector(format!(
                    "mask of shape {:?} for a {}x{} tile",
                    det.mask.dim(),
                    r.height(),
                    r.width()
                )));
            }
            let bbox = BoundingBox::new(
                det.bbox.x0.min(r.width()),
                det.bbox.y0.min(r.height()),
                det.bbox.x1.min(r.width()),
                det.bbox.y1.min(r.height()),
            )
            .translate(r.x0, r.y0);
            detections.push(TileDetection {
                tile,
                score: det.score,
                bbox,
                mask: det.mask,
            });
        }
    }

    debug!(detections = detections.len(), "tiles predicted");
    Ok(detections)
}

/// Intersection over union of the masks of two detections, restricted to
/// the area covered by both of their tiles.
pub fn seam_iou(a: &TileDetection, b: &TileDetection) -> f32 {
    let Some(seam) = a.tile.rect.intersection(&b.tile.rect) else {
        return 0.0;
    };
    let (ma, mb) = (local_view(a, &seam), local_view(b, &seam));

    let mut inter = 0usize;
    let mut union = 0usize;
    Zip::from(ma).and(mb).for_each(|&x, &y| {
        inter += (x && y) as usize;
        union += (x || y) as usize;
    });
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

fn local_view<'a>(d: &'a TileDetection, seam: &BoundingBox) -> ArrayView2<'a, bool> {
    let (ox, oy) = (d.tile.rect.x0, d.tile.rect.y0);
    d.mask
        .slice(s![seam.y0 - oy..seam.y1 - oy, seam.x0 - ox..seam.x1 - ox])
}

/// Merge detections of the same particle made by overlapping tiles.
///
/// 1. Pairs whose boxes intersect are candidate duplicates.
/// 2. A candidate pair is a true duplicate when the IoU of their masks in
///    the shared tile area exceeds `overlap_threshold`. That area is the
///    whole tile for detections of the same tile, and the seam strip or
///    corner for neighbouring tiles.
/// 3. A detection that is a true duplicate of both members of a pair that
///    is not itself a duplicate bridges two distinct particles: it is
///    dropped, and the two smaller detections are kept.
/// 4. Remaining groups of true duplicates become one detection with the
///    union of their boxes and the mean of their scores.
/// 5. Every other detection is kept unchanged.
///
/// Output is ordered by the first detection index of each group.
pub fn resolve_overlaps(detections: &[TileDetection], overlap_threshold: f32) -> Vec<ResolvedDetection> {
    let n = detections.len();
    let mut true_pairs = Vec::new();
    let mut false_pairs = Vec::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (&detections[i], &detections[j]);
            if !a.bbox.intersects(&b.bbox) {
                continue;
            }
            let iou = seam_iou(a, b);
            debug!(i, j, iou, "candidate overlap");
            if iou > overlap_threshold {
                true_pairs.push((i, j));
            } else {
                false_pairs.push((i, j));
            }
        }
    }

    let mut duplicates_of = vec![Vec::new(); n];
    for &(i, j) in &true_pairs {
        duplicates_of[i].push(j);
        duplicates_of[j].push(i);
    }

    let mut bridging = vec![false; n];
    for &(i, j) in &false_pairs {
        for &k in &duplicates_of[i] {
            if duplicates_of[j].contains(&k) {
                bridging[k] = true;
            }
        }
    }
    if bridging.iter().any(|&b| b) {
        debug!(
            dropped = bridging.iter().filter(|&&b| b).count(),
            "detections bridging distinct particles"
        );
    }

    let mut parent: Vec<usize> = (0..n).collect();
    for &(i, j) in &true_pairs {
        if bridging[i] || bridging[j] {
            continue;
        }
        let (ri, rj) = (find(&parent, i), find(&parent, j));
        if ri != rj {
            parent[ri.max(rj)] = ri.min(rj);
        }
    }

    // Roots are always the smallest index of their group.
    let mut resolved = Vec::new();
    for root in (0..n).filter(|&i| !bridging[i] && find(&parent, i) == i) {
        let members: Vec<&TileDetection> = (0..n)
            .filter(|&i| !bridging[i] && find(&parent, i) == root)
            .map(|i| &detections[i])
            .collect();
        let bbox = members
            .iter()
            .skip(1)
            .fold(members[0].bbox, |acc, d| acc.union(&d.bbox));
        let score = members.iter().map(|d| d.score).sum::<f32>() / members.len() as f32;
        resolved.push(ResolvedDetection { score, bbox });
    }
    resolved
}

fn find(parent: &[usize], mut x: usize) -> usize {
    while parent[x] != x {
        x = parent[x];
    }
    x
}

/// White canvas holding only the content of `boxes`, each grown by
/// `margin` pixels so particles can still be dilated.
pub fn extract_rois(frame: &Array2<f32>, boxes: &[BoundingBox], margin: usize) -> Array2<f32> {
    let (h, w) = frame.dim();
    let mut canvas = Array2::from_elem((h, w), 1.0f32);
    for b in boxes {
        let r = b.expand(margin, h, w);
        if r.is_empty() {
            continue;
        }
        canvas
            .slice_mut(s![r.y0..r.y1, r.x0..r.x1])
            .assign(&frame.slice(s![r.y0..r.y1, r.x0..r.x1]));
    }
    canvas
}

/// Model-assisted segmentation of a frame.
///
/// `threshold` is the grey level chosen for the frame; morphology and area
/// bounds come from `params` (usually [`SemanticConfig::params`]).
pub fn segment_semantic(
    frame: &Array2<f32>,
    threshold: f32,
    detector: &dyn Detector,
    config: &SemanticConfig,
    params: &SegmentParams,
) -> Result<LabeledMask> {
    let grid = TileGrid::new(config.tile_rows, config.tile_cols, config.tile_size);
    let detections = predict_tiles(frame, &grid, detector, config.score_threshold)?;
    let resolved = resolve_overlaps(&detections, config.overlap_threshold);
    debug!(
        predicted = detections.len(),
        kept = resolved.len(),
        "overlaps resolved"
    );
    let boxes: Vec<BoundingBox> = resolved.iter().map(|d| d.bbox).collect();
    let rois = extract_rois(frame, &boxes, config.roi_margin);
    Ok(segment_regular(&rois, threshold, params))
}
