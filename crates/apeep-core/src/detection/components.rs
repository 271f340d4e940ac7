use ndarray::Array2;

use crate::frame::LabeledMask;

use super::config::AreaFilter;

/// Statistics for a single connected component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentStats {
    /// Unique label for this component.
    pub label: u32,
    /// Number of pixels in the component.
    pub area: usize,
    /// Bounding box: (min_row, max_row, min_col, max_col), inclusive.
    pub bbox: (usize, usize, usize, usize),
}

/// Connected component labeling of a binary mask with 8-connectivity,
/// using two-pass labeling with union-find.
///
/// Labels are 1..=n, numbered in raster order of each component's first
/// pixel. Returns the label image and the per-label statistics, in label
/// order.
pub fn label_components(mask: &Array2<bool>) -> (LabeledMask, Vec<ComponentStats>) {
    let (h, w) = mask.dim();
    let mut labels = LabeledMask::zeros((h, w));
    if h == 0 || w == 0 {
        return (labels, Vec::new());
    }

    let mut next_label: u32 = 1;
    // Union-find parent array. Index 0 unused; labels start at 1.
    let mut parent: Vec<u32> = vec![0];

    // Pass 1: assign provisional labels from the already visited
    // neighbours (left, upper-left, up, upper-right).
    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }

            let mut neighbours = [0u32; 4];
            if col > 0 {
                neighbours[0] = labels[[row, col - 1]];
            }
            if row > 0 {
                if col > 0 {
                    neighbours[1] = labels[[row - 1, col - 1]];
                }
                neighbours[2] = labels[[row - 1, col]];
                if col + 1 < w {
                    neighbours[3] = labels[[row - 1, col + 1]];
                }
            }

            let smallest = neighbours.iter().copied().filter(|&l| l > 0).min();
            match smallest {
                None => {
                    parent.push(next_label);
                    labels[[row, col]] = next_label;
                    next_label += 1;
                }
                Some(min) => {
                    labels[[row, col]] = min;
                    for &n in neighbours.iter().filter(|&&l| l > 0 && l != min) {
                        union(&mut parent, min, n);
                    }
                }
            }
        }
    }

    // Flatten parent references.
    for i in 1..next_label as usize {
        parent[i] = find(&parent, i as u32);
    }

    // Pass 2: resolve labels to sequential ids in raster order and collect stats.
    let mut final_id = vec![0u32; next_label as usize];
    let mut stats: Vec<ComponentStats> = Vec::new();

    for row in 0..h {
        for col in 0..w {
            let lbl = labels[[row, col]];
            if lbl == 0 {
                continue;
            }
            let root = parent[lbl as usize] as usize;
            if final_id[root] == 0 {
                stats.push(ComponentStats {
                    label: stats.len() as u32 + 1,
                    area: 0,
                    bbox: (row, row, col, col),
                });
                final_id[root] = stats.len() as u32;
            }
            let id = final_id[root];
            labels[[row, col]] = id;

            let entry = &mut stats[id as usize - 1];
            entry.area += 1;
            entry.bbox.0 = entry.bbox.0.min(row);
            entry.bbox.1 = entry.bbox.1.max(row);
            entry.bbox.2 = entry.bbox.2.min(col);
            entry.bbox.3 = entry.bbox.3.max(col);
        }
    }

    (labels, stats)
}

/// Keep the components whose area passes `filter` and renumber them
/// 1..=k, preserving their relative order.
pub fn filter_by_area(
    labels: &LabeledMask,
    stats: &[ComponentStats],
    filter: AreaFilter,
) -> (LabeledMask, Vec<ComponentStats>) {
    let mut remap = vec![0u32; stats.len() + 1];
    let mut kept = Vec::new();
    for s in stats.iter().filter(|s| filter.accepts(s.area)) {
        let id = kept.len() as u32 + 1;
        remap[s.label as usize] = id;
        kept.push(ComponentStats {
            label: id,
            ..s.clone()
        });
    }
    let relabeled = labels.mapv(|l| remap.get(l as usize).copied().unwrap_or(0));
    (relabeled, kept)
}

/// Label a binary mask and drop components outside the area bounds.
pub fn label_and_filter(mask: &Array2<bool>, filter: AreaFilter) -> LabeledMask {
    let (labels, stats) = label_components(mask);
    filter_by_area(&labels, &stats, filter).0
}

/// Number of distinct positive labels of a mask.
pub fn count_labels(labels: &LabeledMask) -> usize {
    let mut seen: Vec<u32> = labels.iter().copied().filter(|&l| l > 0).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        // Merge larger root into smaller root to keep labels consistent.
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
