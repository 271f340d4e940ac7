use ndarray::Zip;

use crate::frame::LabeledMask;

use super::components::label_components;

/// Union of two particle masks, relabeled from scratch.
///
/// Particles of either mask that touch or nest inside one another become
/// a single particle; labels of the inputs are discarded.
pub fn merge_masks(a: &LabeledMask, b: &LabeledMask) -> LabeledMask {
    let union = Zip::from(a).and(b).map_collect(|&x, &y| x > 0 || y > 0);
    label_components(&union).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nested_regions_become_one() {
        let outer = array![[1u32, 1, 1], [1, 0, 1], [1, 1, 1]];
        let inner = array![[0u32, 0, 0], [0, 7, 0], [0, 0, 0]];
        let merged = merge_masks(&outer, &inner);
        assert!(merged.iter().all(|&l| l == 1));
    }

    #[test]
    fn test_disjoint_regions_stay_apart() {
        let a = array![[1u32, 0, 0, 0]];
        let b = array![[0u32, 0, 0, 3]];
        let merged = merge_masks(&a, &b);
        assert_eq!(merged, array![[1, 0, 0, 2]]);
    }
}
