use geo::{
    Coord, EuclideanDistance, EuclideanLength, Line, LineInterpolatePoint,
    LineLocatePoint, LineString, Point, Polygon,
};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

// --- Metric Geometry Functions (planar XY space) ---

pub fn coord_distance(a: Coord, b: Coord) -> f64 {
    Point::from(a).euclidean_distance(&Point::from(b))
}

/// Euclidean length of a polyline.
pub fn polyline_length_metric(coords: &[Coord]) -> f64 {
    coords
        .windows(2)
        .map(|w| Line::new(w[0], w[1]).euclidean_length())
        .sum()
}

/// Distance along the polyline at each of its vertices, starting at 0.
pub fn cumulative_lengths(coords: &[Coord]) -> Vec<f64> {
    if coords.is_empty() {
        return Vec::new();
    }
    let mut cum = Vec::with_capacity(coords.len());
    cum.push(0.0);
    let mut acc = 0.0;
    for w in coords.windows(2) {
        acc += Line::new(w[0], w[1]).euclidean_length();
        cum.push(acc);
    }
    cum
}

/// Project a point onto the segment `a`-`b`.
/// Returns (fraction_along_segment, distance_from_segment, projected_point).
pub fn project_point_to_segment(p: Coord, a: Coord, b: Coord) -> (f64, f64, Coord) {
    let line = Line::new(a, b);
    let p = Point::from(p);
    let t = line.line_locate_point(&p).unwrap_or(0.0);
    let projected = line.line_interpolate_point(t).unwrap_or_else(|| Point::from(a));
    (t, p.euclidean_distance(&projected), projected.0)
}

/// Project point to polyline in metric space.
/// Returns (distance_along_polyline, distance_from_polyline, projected_point).
pub fn project_point_to_polyline_metric(
    point: Coord,
    coords: &[Coord],
) -> Option<(f64, f64, Coord)> {
    if coords.len() < 2 {
        return coords
            .first()
            .map(|&c| (0.0, coord_distance(point, c), c));
    }

    let ls = LineString::from(coords.to_vec());
    let p = Point::from(point);

    let fraction = ls.line_locate_point(&p)?;
    let projected = ls.line_interpolate_point(fraction)?;

    let distance_along = fraction * ls.euclidean_length();
    let distance_to_line = p.euclidean_distance(&projected);

    Some((distance_along, distance_to_line, projected.0))
}

/// Shortest distance between two segments; 0 when they touch or cross.
pub fn segment_distance(a0: Coord, a1: Coord, b0: Coord, b1: Coord) -> f64 {
    Line::new(a0, a1).euclidean_distance(&Line::new(b0, b1))
}

/// Point at `dist` along the polyline, given its cumulative lengths.
pub fn interpolate_at_distance(coords: &[Coord], cum: &[f64], dist: f64) -> Coord {
    let (Some(&first), Some(&last), Some(&total)) = (coords.first(), coords.last(), cum.last())
    else {
        return Coord { x: 0.0, y: 0.0 };
    };
    if dist <= 0.0 || coords.len() < 2 {
        return first;
    }
    if dist >= total {
        return last;
    }
    // first vertex strictly past `dist`
    let i = cum.partition_point(|&d| d <= dist).clamp(1, coords.len() - 1);
    let seg_len = cum[i] - cum[i - 1];
    if seg_len <= f64::EPSILON {
        return coords[i];
    }
    Line::new(coords[i - 1], coords[i])
        .line_interpolate_point((dist - cum[i - 1]) / seg_len)
        .map_or(coords[i], |p| p.0)
}

/// Interpolate along polyline in metric space, `fraction` in [0, 1].
pub fn interpolate_along_polyline_metric(coords: &[Coord], fraction: f64) -> Coord {
    if coords.len() < 2 {
        return coords.first().copied().unwrap_or(Coord { x: 0.0, y: 0.0 });
    }
    LineString::from(coords.to_vec())
        .line_interpolate_point(fraction.clamp(0.0, 1.0))
        .map_or(coords[0], |p| p.0)
}

/// Extract the sub-polyline between two distances along the line, keeping
/// every original vertex strictly inside the range.
pub fn extract_sub_polyline(coords: &[Coord], cum: &[f64], start: f64, end: f64) -> Vec<Coord> {
    let p_start = interpolate_at_distance(coords, cum, start);
    if start >= end {
        return vec![p_start];
    }

    let mut result = vec![p_start];
    for (i, &d) in cum.iter().enumerate() {
        // Epsilon to avoid duplicating start/end points landing on vertices
        if d > start + 1e-9 && d < end - 1e-9 {
            result.push(coords[i]);
        }
    }
    result.push(interpolate_at_distance(coords, cum, end));
    result
}

/// Largest distance from a vertex of either polyline to the other polyline.
pub fn hausdorff_distance_metric(a: &[Coord], b: &[Coord]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return f64::INFINITY;
    }
    let (la, lb) = (LineString::from(a.to_vec()), LineString::from(b.to_vec()));
    let directed = |source: &[Coord], target: &LineString| -> f64 {
        source
            .iter()
            .map(|&p| Point::from(p).euclidean_distance(target))
            .fold(0.0f64, f64::max)
    };
    directed(a, &lb).max(directed(b, &la))
}

/// Azimuth of the direction `a` -> `b` in radians, clockwise from +Y, in [0, 2π).
pub fn azimuth(a: Coord, b: Coord) -> f64 {
    (b.x - a.x).atan2(b.y - a.y).rem_euclid(TAU)
}

/// Undirected difference between two azimuths, in [0, π].
pub fn azimuth_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % TAU;
    if diff > PI { TAU - diff } else { diff }
}

/// Angle between the lines two edges leave a node along, ignoring their
/// direction: 0 for a straight continuation or two parallel departures,
/// π/2 for a right angle.
pub fn line_angle(departure_a: f64, departure_b: f64) -> f64 {
    let d = azimuth_difference(departure_a, departure_b);
    d.min(PI - d).clamp(0.0, FRAC_PI_2)
}

/// Regular polygon approximating a circle of `radius` around `center`.
pub fn circle_polygon(center: Coord, radius: f64, segments: usize) -> Polygon {
    let mut ring: Vec<Coord> = (0..segments)
        .map(|i| {
            let theta = TAU * i as f64 / segments as f64;
            Coord {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            }
        })
        .collect();
    ring.push(ring[0]);
    Polygon::new(LineString::new(ring), vec![])
}

/// Zero-area polygon collapsed onto a single point.
pub fn point_polygon(center: Coord) -> Polygon {
    Polygon::new(LineString::new(vec![center; 4]), vec![])
}

/// Drop consecutive coordinates closer than `tolerance`.
pub fn dedup_consecutive(coords: &mut Vec<Coord>, tolerance: f64) {
    coords.dedup_by(|b, a| coord_distance(*a, *b) <= tolerance);
}

pub fn is_closed(coords: &[Coord], tolerance: f64) -> bool {
    coords.len() > 2 && coord_distance(coords[0], coords[coords.len() - 1]) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    #[test]
    fn test_projection_onto_polyline() {
        let line = vec![c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0)];
        let (along, dist, p) = project_point_to_polyline_metric(c(12.0, 5.0), &line).unwrap();
        assert!((along - 15.0).abs() < 1e-9);
        assert!((dist - 2.0).abs() < 1e-9);
        assert!(coord_distance(p, c(10.0, 5.0)) < 1e-9);
    }

    #[test]
    fn test_sub_polyline_keeps_interior_vertices() {
        let line = vec![c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0)];
        let cum = cumulative_lengths(&line);
        let sub = extract_sub_polyline(&line, &cum, 5.0, 15.0);
        assert_eq!(sub, vec![c(5.0, 0.0), c(10.0, 0.0), c(10.0, 5.0)]);
    }

    #[test]
    fn test_azimuths() {
        let o = c(0.0, 0.0);
        assert!((azimuth(o, c(0.0, 1.0)) - 0.0).abs() < 1e-12);
        assert!((azimuth(o, c(1.0, 0.0)) - PI / 2.0).abs() < 1e-12);
        assert!((azimuth(o, c(-1.0, 0.0)) - 3.0 * PI / 2.0).abs() < 1e-12);
        assert!((azimuth_difference(0.1, TAU - 0.1) - 0.2).abs() < 1e-12);
        // north and south departures continue each other
        assert!(line_angle(0.0, PI).abs() < 1e-12);
        assert!((line_angle(0.0, 2f64.to_radians()) - 2f64.to_radians()).abs() < 1e-12);
        assert!((line_angle(0.0, 92f64.to_radians()) - 88f64.to_radians()).abs() < 1e-12);
        assert!((line_angle(0.0, FRAC_PI_2) - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_segment_distance() {
        let d = segment_distance(c(0.0, 0.0), c(10.0, 0.0), c(5.0, 3.0), c(5.0, 1.0));
        assert!((d - 1.0).abs() < 1e-12);
        let crossing = segment_distance(c(0.0, 0.0), c(10.0, 0.0), c(5.0, -1.0), c(5.0, 1.0));
        assert_eq!(crossing, 0.0);
        let touching = segment_distance(c(0.0, 0.0), c(10.0, 0.0), c(10.0, 0.0), c(10.0, 5.0));
        assert_eq!(touching, 0.0);
    }

    #[test]
    fn test_hausdorff_ignores_vertex_density() {
        let a = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let b = vec![c(0.0, 0.0), c(3.0, 0.0), c(7.0, 0.0), c(10.0, 0.0)];
        assert!(hausdorff_distance_metric(&a, &b) < 1e-12);
    }

    #[test]
    fn test_interpolation_along_cumulative_lengths() {
        let line = vec![c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0)];
        let cum = cumulative_lengths(&line);
        assert_eq!(cum, vec![0.0, 10.0, 20.0]);
        assert!(coord_distance(interpolate_at_distance(&line, &cum, 15.0), c(10.0, 5.0)) < 1e-9);
        assert_eq!(interpolate_at_distance(&line, &cum, 25.0), c(10.0, 10.0));
        assert!(coord_distance(interpolate_along_polyline_metric(&line, 0.25), c(5.0, 0.0)) < 1e-9);
    }

    #[test]
    fn test_segment_projection_clamps_to_ends() {
        let (t, d, p) = project_point_to_segment(c(-3.0, 4.0), c(0.0, 0.0), c(10.0, 0.0));
        assert_eq!(t, 0.0);
        assert!((d - 5.0).abs() < 1e-12);
        assert_eq!(p, c(0.0, 0.0));
    }

    #[test]
    fn test_circle_polygon_is_closed() {
        let poly = circle_polygon(c(1.0, 1.0), 2.0, 8);
        let ring = &poly.exterior().0;
        assert_eq!(ring.len(), 9);
        assert_eq!(ring[0], ring[8]);
    }
}
