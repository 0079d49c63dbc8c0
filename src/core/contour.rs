//! Marching-squares iso-line tracing with linear sub-pixel interpolation.

use std::collections::HashMap;

use crate::types::{Mask, Raster};

/// Iso-line in fractional pixel coordinates (row, col)
#[derive(Debug, Clone, PartialEq)]
pub struct PixelContour {
    pub points: Vec<(f64, f64)>,
    pub closed: bool,
}

/// Cell edge identifier, shared by the two cells either side of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EdgeKey {
    /// Edge along row `r` between columns `c` and `c + 1`
    Horizontal(usize, usize),
    /// Edge along column `c` between rows `r` and `r + 1`
    Vertical(usize, usize),
}

/// Trace every iso-line of `field` at `level`.
///
/// Cells with a non-finite corner, or a corner outside `mask`, are skipped, so
/// contours end where the valid area ends.
pub fn find_contours(field: &Raster, level: f32, mask: Option<&Mask>) -> Vec<PixelContour> {
    let (height, width) = field.dim();
    if height < 2 || width < 2 {
        return Vec::new();
    }

    let usable = |r: usize, c: usize| {
        field[[r, c]].is_finite() && mask.map_or(true, |m| m[[r, c]])
    };
    let interp = |v0: f32, v1: f32| -> f64 {
        let dv = v1 - v0;
        if dv.abs() <= f32::EPSILON {
            0.5
        } else {
            (((level - v0) / dv) as f64).clamp(0.0, 1.0)
        }
    };

    let mut positions: HashMap<EdgeKey, (f64, f64)> = HashMap::new();
    let mut segments: Vec<(EdgeKey, EdgeKey)> = Vec::new();

    for r in 0..height - 1 {
        for c in 0..width - 1 {
            if !(usable(r, c) && usable(r, c + 1) && usable(r + 1, c + 1) && usable(r + 1, c)) {
                continue;
            }
            let tl = field[[r, c]];
            let tr = field[[r, c + 1]];
            let br = field[[r + 1, c + 1]];
            let bl = field[[r + 1, c]];

            let case = (tl > level) as u8
                | ((tr > level) as u8) << 1
                | ((br > level) as u8) << 2
                | ((bl > level) as u8) << 3;
            if case == 0 || case == 15 {
                continue;
            }

            let top = EdgeKey::Horizontal(r, c);
            let bottom = EdgeKey::Horizontal(r + 1, c);
            let left = EdgeKey::Vertical(r, c);
            let right = EdgeKey::Vertical(r, c + 1);

            let mut point = |key: EdgeKey| {
                positions.entry(key).or_insert_with(|| match key {
                    EdgeKey::Horizontal(row, col) => {
                        (row as f64, col as f64 + interp(field[[row, col]], field[[row, col + 1]]))
                    }
                    EdgeKey::Vertical(row, col) => {
                        (row as f64 + interp(field[[row, col]], field[[row + 1, col]]), col as f64)
                    }
                });
                key
            };

            let centre_above = (tl + tr + br + bl) / 4.0 > level;
            match case {
                1 | 14 => segments.push((point(left), point(top))),
                2 | 13 => segments.push((point(top), point(right))),
                3 | 12 => segments.push((point(left), point(right))),
                4 | 11 => segments.push((point(right), point(bottom))),
                6 | 9 => segments.push((point(top), point(bottom))),
                7 | 8 => segments.push((point(left), point(bottom))),
                5 => {
                    if centre_above {
                        segments.push((point(top), point(right)));
                        segments.push((point(bottom), point(left)));
                    } else {
                        segments.push((point(left), point(top)));
                        segments.push((point(right), point(bottom)));
                    }
                }
                10 => {
                    if centre_above {
                        segments.push((point(left), point(top)));
                        segments.push((point(right), point(bottom)));
                    } else {
                        segments.push((point(top), point(right)));
                        segments.push((point(bottom), point(left)));
                    }
                }
                _ => {}
            }
        }
    }

    let chains = join_segments(&segments);
    chains
        .into_iter()
        .map(|(keys, closed)| PixelContour {
            points: keys.iter().filter_map(|k| positions.get(k).copied()).collect(),
            closed,
        })
        .collect()
}

/// Chain undirected segments sharing edge keys into polylines
fn join_segments(segments: &[(EdgeKey, EdgeKey)]) -> Vec<(Vec<EdgeKey>, bool)> {
    let mut by_edge: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
    for (idx, (a, b)) in segments.iter().enumerate() {
        by_edge.entry(*a).or_default().push(idx);
        by_edge.entry(*b).or_default().push(idx);
    }

    let mut used = vec![false; segments.len()];
    let mut chains = Vec::new();

    let next_segment = |key: EdgeKey, used: &[bool]| -> Option<usize> {
        by_edge
            .get(&key)
            .and_then(|candidates| candidates.iter().copied().find(|&s| !used[s]))
    };
    let other_end = |seg: usize, key: EdgeKey| -> EdgeKey {
        let (a, b) = segments[seg];
        if a == key {
            b
        } else {
            a
        }
    };

    for start in 0..segments.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let (first, second) = segments[start];
        let mut forward = vec![first, second];

        // Walk forward from the second endpoint
        let mut tail = second;
        while let Some(seg) = next_segment(tail, &used) {
            used[seg] = true;
            tail = other_end(seg, tail);
            forward.push(tail);
            if tail == first {
                break;
            }
        }

        if forward.len() > 2 && forward.last() == Some(&first) {
            forward.pop();
            chains.push((forward, true));
            continue;
        }

        // Open chain: extend backwards from the first endpoint
        let mut backward = Vec::new();
        let mut head = first;
        while let Some(seg) = next_segment(head, &used) {
            used[seg] = true;
            head = other_end(seg, head);
            backward.push(head);
        }
        backward.reverse();
        backward.extend(forward);
        chains.push((backward, false));
    }

    chains
}
