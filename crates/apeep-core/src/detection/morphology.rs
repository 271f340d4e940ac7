use ndarray::Array2;

/// Half-widths of the rows of a disk of radius `radius`: for each row
/// offset `dy` in `-radius..=radius`, the largest `dx` with
/// `dx² + dy² <= radius²`.
fn disk_half_widths(radius: usize) -> Vec<(isize, usize)> {
    let r = radius as isize;
    (-r..=r)
        .map(|dy| {
            let rem = (r * r - dy * dy) as f64;
            (dy, rem.sqrt().floor() as usize)
        })
        .collect()
}

/// Binary dilation with a disk structuring element.
///
/// Each horizontal run of foreground pixels is painted, widened by the
/// disk half-width, onto every row the disk covers.
pub fn dilate_disk(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    if radius == 0 {
        return mask.clone();
    }
    let (h, w) = mask.dim();
    let mut result = Array2::from_elem((h, w), false);
    let disk = disk_half_widths(radius);

    for (row, line) in mask.rows().into_iter().enumerate() {
        let mut col = 0;
        while col < w {
            if !line[col] {
                col += 1;
                continue;
            }
            let start = col;
            while col < w && line[col] {
                col += 1;
            }
            let end = col - 1;

            for &(dy, half) in &disk {
                let r = row as isize + dy;
                if r < 0 || r >= h as isize {
                    continue;
                }
                let c0 = start.saturating_sub(half);
                let c1 = (end + half).min(w - 1);
                for c in c0..=c1 {
                    result[[r as usize, c]] = true;
                }
            }
        }
    }

    result
}

/// Binary erosion with a disk structuring element: a pixel stays set only
/// if every pixel of the disk around it is set. Pixels outside the image
/// count as set, so objects touching the border are not eaten from it.
pub fn erode_disk(mask: &Array2<bool>, radius: usize) -> Array2<bool> {
    if radius == 0 {
        return mask.clone();
    }
    let background = mask.mapv(|v| !v);
    dilate_disk(&background, radius).mapv(|v| !v)
}

/// Morphological closing used to fill gaps in particles: dilation, then
/// erosion, with possibly different radii.
pub fn close(mask: &Array2<bool>, dilate: usize, erode: usize) -> Array2<bool> {
    erode_disk(&dilate_disk(mask, dilate), erode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_shape() {
        // disk(1) is a plus sign, disk(2) a 5x5 square minus corners.
        assert_eq!(disk_half_widths(1), vec![(-1, 0), (0, 1), (1, 0)]);
        let d2: Vec<usize> = disk_half_widths(2).into_iter().map(|(_, w)| w).collect();
        assert_eq!(d2, vec![0, 1, 2, 1, 0]);
    }

    #[test]
    fn test_dilate_single_pixel() {
        let mut mask = Array2::from_elem((7, 7), false);
        mask[[3, 3]] = true;
        let d = dilate_disk(&mask, 2);
        assert_eq!(d.iter().filter(|&&v| v).count(), 13);
        assert!(d[[1, 3]] && d[[3, 1]] && !d[[1, 2]]);
    }

    #[test]
    fn test_erode_keeps_border_objects() {
        let mask = Array2::from_elem((5, 5), true);
        let e = erode_disk(&mask, 1);
        assert!(e.iter().all(|&v| v));
    }

    #[test]
    fn test_close_fills_gap() {
        let mut mask = Array2::from_elem((9, 9), false);
        for c in 1..8 {
            if c != 4 {
                mask[[4, c]] = true;
            }
        }
        let closed = close(&mask, 2, 1);
        assert!(closed[[4, 4]]);
    }
}
