use ndarray::Array2;
use std::collections::VecDeque;

use crate::types::Mask;

/// Pixel offsets of a disk structuring element
pub fn disk_offsets(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let mut offsets = Vec::new();
    for di in -r..=r {
        for dj in -r..=r {
            if di * di + dj * dj <= r * r {
                offsets.push((di, dj));
            }
        }
    }
    offsets
}

/// Binary dilation with a disk of `radius` pixels
pub fn dilate(mask: &Mask, radius: usize) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let (height, width) = mask.dim();
    let offsets = disk_offsets(radius);
    let mut result = Array2::from_elem((height, width), false);

    for ((i, j), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        for &(di, dj) in &offsets {
            let ii = i as isize + di;
            let jj = j as isize + dj;
            if ii >= 0 && ii < height as isize && jj >= 0 && jj < width as isize {
                result[[ii as usize, jj as usize]] = true;
            }
        }
    }

    result
}

/// 8-connected component labelling.
///
/// Returns the label image (0 = background, labels start at 1) and the pixel
/// count of every label (index 0 unused).
pub fn label_components(mask: &Mask) -> (Array2<u32>, Vec<usize>) {
    let (height, width) = mask.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut sizes = vec![0usize];
    let mut queue = VecDeque::new();

    for i in 0..height {
        for j in 0..width {
            if !mask[[i, j]] || labels[[i, j]] != 0 {
                continue;
            }

            let label = sizes.len() as u32;
            let mut count = 0usize;
            labels[[i, j]] = label;
            queue.push_back((i, j));

            while let Some((ci, cj)) = queue.pop_front() {
                count += 1;
                for di in -1isize..=1 {
                    for dj in -1isize..=1 {
                        if di == 0 && dj == 0 {
                            continue;
                        }
                        let ni = ci as isize + di;
                        let nj = cj as isize + dj;
                        if ni < 0 || nj < 0 || ni >= height as isize || nj >= width as isize {
                            continue;
                        }
                        let (ni, nj) = (ni as usize, nj as usize);
                        if mask[[ni, nj]] && labels[[ni, nj]] == 0 {
                            labels[[ni, nj]] = label;
                            queue.push_back((ni, nj));
                        }
                    }
                }
            }

            sizes.push(count);
        }
    }

    (labels, sizes)
}

/// Drop connected regions smaller than `min_pixels`
pub fn remove_small_objects(mask: &Mask, min_pixels: usize) -> Mask {
    if min_pixels <= 1 {
        return mask.clone();
    }
    let (labels, sizes) = label_components(mask);
    let removed = sizes.iter().skip(1).filter(|&&s| s < min_pixels).count();
    log::debug!(
        "Removing {} of {} connected regions below {} pixels",
        removed,
        sizes.len() - 1,
        min_pixels
    );
    labels.mapv(|l| l != 0 && sizes[l as usize] >= min_pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dilation_disk() {
        let mut mask = Array2::from_elem((7, 7), false);
        mask[[3, 3]] = true;

        let dilated = dilate(&mask, 2);
        assert!(dilated[[3, 5]]);
        assert!(dilated[[1, 3]]);
        assert!(dilated[[2, 2]]);
        // (1,1) is sqrt(8) > 2 away
        assert!(!dilated[[1, 1]]);
        assert_eq!(dilated.iter().filter(|&&v| v).count(), 13);
    }

    #[test]
    fn test_components_are_eight_connected() {
        let mut mask = Array2::from_elem((5, 5), false);
        mask[[0, 0]] = true;
        mask[[1, 1]] = true; // diagonal neighbour
        mask[[4, 4]] = true;

        let (labels, sizes) = label_components(&mask);
        assert_eq!(sizes.len(), 3);
        assert_eq!(labels[[0, 0]], labels[[1, 1]]);
        assert_ne!(labels[[0, 0]], labels[[4, 4]]);
        assert_eq!(sizes[labels[[0, 0]] as usize], 2);
    }

    #[test]
    fn test_remove_small_objects() {
        let mut mask = Array2::from_elem((10, 10), false);
        for i in 0..4 {
            for j in 0..4 {
                mask[[i, j]] = true;
            }
        }
        mask[[8, 8]] = true;

        let cleaned = remove_small_objects(&mask, 5);
        assert!(cleaned[[0, 0]]);
        assert!(!cleaned[[8, 8]]);
    }
}
