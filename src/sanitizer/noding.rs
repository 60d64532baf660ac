// ===========================================================================
// Stages 3-5: intersections, candidate vertices and feature splitting
// ===========================================================================
use super::segment_graph::SplitSegment;
use crate::error::{MorphologyError, Result};
use crate::geometry_utils::{
    cumulative_lengths, extract_sub_polyline, is_closed, polyline_length_metric,
    project_point_to_segment,
};
use crate::partition::Partition;
use crate::progress::Stage;
use crate::spatial::{expanded_envelope, point_index, segment_index};
use geo::line_intersection::{LineIntersection, line_intersection};
use geo::{Coord, Line};
use log::debug;

#[derive(Debug, Default)]
pub(crate) struct Intersections {
    /// Point-like crossings and touches.
    pub points: Vec<Coord>,
    /// Line-like overlaps, i.e. coincident tracings of the same street.
    pub overlaps: Vec<Line>,
}

fn adjacent(a: usize, b: usize, segment_count: usize, closed: bool) -> bool {
    let (lo, hi) = (a.min(b), a.max(b));
    hi == lo + 1 || (closed && lo == 0 && hi + 1 == segment_count)
}

/// Every pairwise intersection between feature segments, including a
/// feature crossing itself. Neighbouring segments of one feature only share
/// their common vertex and are skipped.
pub(crate) fn pairwise_intersections(lines: &[Vec<Coord>], tolerance: f64) -> Intersections {
    let tree = segment_index(lines);
    let mut found = Intersections::default();

    for (feature, coords) in lines.iter().enumerate() {
        let closed = is_closed(coords, 0.0);
        let segment_count = coords.len() - 1;
        for (index, w) in coords.windows(2).enumerate() {
            let envelope = expanded_envelope(w, tolerance);
            for other in tree.locate_in_envelope_intersecting(&envelope) {
                if (other.feature, other.index) <= (feature, index) {
                    continue;
                }
                if other.feature == feature && adjacent(index, other.index, segment_count, closed) {
                    continue;
                }
                let a = Line::new(w[0], w[1]);
                let b = Line::new(other.start, other.end);
                match line_intersection(a, b) {
                    Some(LineIntersection::SinglePoint { intersection, .. }) => {
                        found.points.push(intersection)
                    }
                    Some(LineIntersection::Collinear { intersection }) => {
                        found.overlaps.push(intersection)
                    }
                    None => {}
                }
            }
        }
    }

    debug!(
        "Found {} point intersections and {} overlaps",
        found.points.len(),
        found.overlaps.len()
    );
    found
}

/// Feature endpoints, point intersections and overlap endpoints, with
/// coordinates closer than `tolerance` merged onto the earliest of them.
/// Endpoints come first so that vertices keep the exact input coordinates.
pub(crate) fn candidate_vertices(
    lines: &[Vec<Coord>],
    intersections: &Intersections,
    tolerance: f64,
) -> Vec<Coord> {
    let mut raw: Vec<Coord> = Vec::with_capacity(
        lines.len() * 2 + intersections.points.len() + intersections.overlaps.len() * 2,
    );
    for coords in lines {
        raw.push(coords[0]);
        raw.push(coords[coords.len() - 1]);
    }
    raw.extend(intersections.points.iter().copied());
    for overlap in &intersections.overlaps {
        raw.push(overlap.start);
        raw.push(overlap.end);
    }

    let tree = point_index(&raw);
    let mut partition = Partition::new(raw.len());
    for (i, p) in raw.iter().enumerate() {
        for near in tree.locate_within_distance([p.x, p.y], tolerance * tolerance) {
            partition.resolve(i, near.id);
        }
    }
    partition.update();

    let candidates: Vec<Coord> = partition.classes().keys().map(|&root| raw[root]).collect();
    debug!("{} raw vertex candidates, {} after dedup", raw.len(), candidates.len());
    candidates
}

/// Cut every feature at each candidate vertex lying on it. A feature
/// passing through the same vertex twice is cut there twice, and a closed
/// feature ends with the segment returning to its first vertex.
pub(crate) fn split_features(
    lines: &[Vec<Coord>],
    candidates: &[Coord],
    tolerance: f64,
) -> Result<Vec<SplitSegment>> {
    let tree = point_index(candidates);
    let mut segments = Vec::new();

    for (feature, coords) in lines.iter().enumerate() {
        let cum = cumulative_lengths(coords);

        // (distance along feature, vertex id)
        let mut stops: Vec<(f64, usize)> = Vec::new();
        for (index, w) in coords.windows(2).enumerate() {
            let seg_len = cum[index + 1] - cum[index];
            let envelope = expanded_envelope(w, tolerance);
            for candidate in tree.locate_in_envelope_intersecting(&envelope) {
                let (t, dist, _) = project_point_to_segment(candidate.point, w[0], w[1]);
                if dist <= tolerance {
                    stops.push((cum[index] + t * seg_len, candidate.id));
                }
            }
        }
        stops.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        stops.dedup_by(|b, a| a.1 == b.1 && (b.0 - a.0).abs() <= tolerance);

        if stops.len() < 2 {
            return Err(MorphologyError::consistency(
                Stage::Sanitize,
                format!("feature #{} has no vertex at one of its ends", feature),
            ));
        }

        for pair in stops.windows(2) {
            let (t0, v0) = pair[0];
            let (t1, v1) = pair[1];
            if v0 == v1 && t1 - t0 <= tolerance {
                continue;
            }
            let mut geometry = extract_sub_polyline(coords, &cum, t0, t1);
            if geometry.len() < 2 {
                geometry.push(geometry[0]);
            }
            let last = geometry.len() - 1;
            geometry[0] = candidates[v0];
            geometry[last] = candidates[v1];
            segments.push(SplitSegment {
                feature,
                start: v0,
                end: v1,
                length: polyline_length_metric(&geometry),
                coords: geometry,
                alive: true,
            });
        }
    }

    debug!("Split {} features into {} segments", lines.len(), segments.len());
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    #[test]
    fn crossing_features_produce_a_point() {
        let lines = vec![
            vec![c(0.0, 0.0), c(10.0, 0.0)],
            vec![c(5.0, -5.0), c(5.0, 5.0)],
        ];
        let found = pairwise_intersections(&lines, 1e-9);
        assert_eq!(found.points, vec![c(5.0, 0.0)]);
        assert!(found.overlaps.is_empty());
    }

    #[test]
    fn coincident_tracings_produce_an_overlap() {
        let lines = vec![
            vec![c(0.0, 0.0), c(10.0, 0.0)],
            vec![c(5.0, 0.0), c(15.0, 0.0)],
        ];
        let found = pairwise_intersections(&lines, 1e-9);
        assert_eq!(found.overlaps.len(), 1);
        let overlap = found.overlaps[0];
        let mut xs = [overlap.start.x, overlap.end.x];
        xs.sort_by(f64::total_cmp);
        assert_eq!(xs, [5.0, 10.0]);
    }

    #[test]
    fn self_crossing_is_detected() {
        let lines = vec![vec![
            c(0.0, 0.0),
            c(10.0, 0.0),
            c(10.0, 5.0),
            c(5.0, 5.0),
            c(5.0, -5.0),
        ]];
        let found = pairwise_intersections(&lines, 1e-9);
        assert_eq!(found.points, vec![c(5.0, 0.0)]);
    }

    #[test]
    fn candidates_are_deduplicated() {
        let lines = vec![
            vec![c(0.0, 0.0), c(10.0, 0.0)],
            vec![c(10.0, 0.0), c(10.0, 10.0)],
        ];
        let found = pairwise_intersections(&lines, 1e-9);
        let candidates = candidate_vertices(&lines, &found, 1e-9);
        assert_eq!(candidates, vec![c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0)]);
    }

    #[test]
    fn closed_feature_gets_a_closing_segment() {
        let ring = vec![c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0), c(0.0, 10.0), c(0.0, 0.0)];
        let candidates = vec![c(0.0, 0.0), c(10.0, 10.0)];
        let segments = split_features(&[ring], &candidates, 1e-9).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!((segments[0].start, segments[0].end), (0, 1));
        assert_eq!((segments[1].start, segments[1].end), (1, 0));
        assert!((segments[0].length - 20.0).abs() < 1e-9);
        assert!((segments[1].length - 20.0).abs() < 1e-9);
    }

    #[test]
    fn feature_is_cut_at_interior_vertex() {
        let line = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let candidates = vec![c(0.0, 0.0), c(10.0, 0.0), c(4.0, 0.0)];
        let segments = split_features(&[line], &candidates, 1e-9).unwrap();
        let ends: Vec<(usize, usize)> = segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ends, vec![(0, 2), (2, 1)]);
        assert_eq!(segments[0].coords, vec![c(0.0, 0.0), c(4.0, 0.0)]);
    }
}
