//! Planar geometry helpers on projected coordinates

use num_traits::Float;

use crate::types::Point;

/// Length of a point sequence, optionally closing back to the first point
pub fn polyline_length(points: &[Point], closed: bool) -> f64 {
    let mut length: f64 = points.windows(2).map(|w| w[0].distance(&w[1])).sum();
    if closed && points.len() > 2 {
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            length += last.distance(first);
        }
    }
    length
}

/// Distance from `p` to the segment `a`-`b`
pub fn point_segment_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * dx, a.y + t * dy);
    p.distance(&proj)
}

/// Shortest distance from `p` to any segment of `line`
pub fn distance_to_polyline(p: &Point, line: &[Point]) -> f64 {
    match line.len() {
        0 => f64::INFINITY,
        1 => p.distance(&line[0]),
        _ => line
            .windows(2)
            .map(|w| point_segment_distance(p, &w[0], &w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Unsigned shoelace area of a ring (closed or open)
pub fn polygon_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..ring.len() {
        let a = &ring[i];
        let b = &ring[(i + 1) % ring.len()];
        twice_area += a.x * b.y - b.x * a.y;
    }
    twice_area.abs() / 2.0
}

/// Median of the finite values in `values` (reorders the slice)
pub fn median<F: Float>(values: &mut [F]) -> Option<F> {
    let mut n = 0;
    for i in 0..values.len() {
        if values[i].is_finite() {
            values.swap(n, i);
            n += 1;
        }
    }
    if n == 0 {
        return None;
    }
    let finite = &mut values[..n];
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = n / 2;
    if n % 2 == 1 {
        Some(finite[mid])
    } else {
        let two = F::one() + F::one();
        Some((finite[mid - 1] + finite[mid]) / two)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_closed_length_counts_closing_segment() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert_relative_eq!(polyline_length(&square, false), 30.0);
        assert_relative_eq!(polyline_length(&square, true), 40.0);
        assert_relative_eq!(polygon_area(&square), 100.0);
    }

    #[test]
    fn test_distance_to_polyline() {
        let line = vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)];
        assert_relative_eq!(distance_to_polyline(&Point::new(50.0, 7.0), &line), 7.0);
        assert_relative_eq!(distance_to_polyline(&Point::new(103.0, 4.0), &line), 5.0);
    }

    #[test]
    fn test_median_ignores_nan() {
        let mut values = vec![5.0, f64::NAN, 1.0, 3.0];
        assert_eq!(median(&mut values), Some(3.0));
        let mut even = vec![4.0f32, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut even), Some(2.5));
        let mut empty: Vec<f64> = vec![f64::NAN];
        assert_eq!(median(&mut empty), None);
    }
}
