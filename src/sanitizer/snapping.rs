// ===========================================================================
// Stages 1-2: isolated fragment removal and near-miss snapping
// ===========================================================================
use crate::geometry_utils::{
    coord_distance, dedup_consecutive, is_closed, project_point_to_segment, segment_distance,
};
use crate::spatial::{expanded_envelope, segment_index};
use geo::Coord;
use log::debug;

/// Indices of the features that come within `snap_distance` of another one.
/// A dataset of one feature is kept whole.
pub(crate) fn drop_isolated(lines: &[Vec<Coord>], snap_distance: f64) -> Vec<usize> {
    if lines.len() < 2 {
        return (0..lines.len()).collect();
    }
    let tree = segment_index(lines);

    let mut kept = Vec::with_capacity(lines.len());
    for (feature, coords) in lines.iter().enumerate() {
        let has_neighbour = coords.windows(2).any(|w| {
            let envelope = expanded_envelope(w, snap_distance);
            tree.locate_in_envelope_intersecting(&envelope)
                .filter(|candidate| candidate.feature != feature)
                .any(|candidate| {
                    segment_distance(w[0], w[1], candidate.start, candidate.end) <= snap_distance
                })
        });
        if has_neighbour {
            kept.push(feature);
        } else {
            debug!("Dropping isolated feature #{}", feature);
        }
    }
    kept
}

/// Snap every kept feature onto its neighbours, in order. Features processed
/// earlier act as the reference for later ones, so two dangling ends that
/// nearly meet end up on the same coordinate.
///
/// Vertices move onto the nearest neighbouring vertex within `snap_distance`;
/// the ends of open features that find no vertex move onto the nearest
/// neighbouring segment instead.
pub(crate) fn snap_features(lines: &[Vec<Coord>], kept: &[usize], snap_distance: f64) -> Vec<Vec<Coord>> {
    let mut snapped: Vec<Vec<Coord>> = kept.iter().map(|&f| lines[f].clone()).collect();
    // positions move by at most snap_distance, so a doubled margin on the
    // pre-snap index still finds every live neighbour
    let tree = segment_index(&snapped);
    let mut moved = 0usize;

    for i in 0..snapped.len() {
        let envelope = expanded_envelope(&snapped[i], 2.0 * snap_distance);
        let mut neighbours: Vec<usize> = tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|s| s.feature)
            .filter(|&f| f != i)
            .collect();
        neighbours.sort_unstable();
        neighbours.dedup();
        if neighbours.is_empty() {
            continue;
        }

        let reference: Vec<&[Coord]> = neighbours.iter().map(|&f| snapped[f].as_slice()).collect();
        let closed = is_closed(&snapped[i], 0.0);
        let last = snapped[i].len() - 1;
        let mut coords = snapped[i].clone();

        for (k, coord) in coords.iter_mut().enumerate() {
            if let Some(target) = nearest_vertex(*coord, &reference, snap_distance) {
                if target != *coord {
                    *coord = target;
                    moved += 1;
                }
                continue;
            }
            if !closed && (k == 0 || k == last) {
                if let Some(target) = nearest_on_segments(*coord, &reference, snap_distance) {
                    *coord = target;
                    moved += 1;
                }
            }
        }

        dedup_consecutive(&mut coords, 0.0);
        let open = coords.len() >= 2 && coord_distance(coords[0], coords[coords.len() - 1]) > 0.0;
        if open || is_closed(&coords, 0.0) {
            snapped[i] = coords;
        } else {
            debug!("Feature #{} would collapse when snapped, keeping it unsnapped", kept[i]);
        }
    }

    debug!("Snapped {} vertices", moved);
    snapped
}

fn nearest_vertex(p: Coord, reference: &[&[Coord]], snap_distance: f64) -> Option<Coord> {
    let mut best: Option<(f64, Coord)> = None;
    for coords in reference {
        for &q in coords.iter() {
            let d = coord_distance(p, q);
            if d <= snap_distance && best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, q));
            }
        }
    }
    best.map(|(_, q)| q)
}

fn nearest_on_segments(p: Coord, reference: &[&[Coord]], snap_distance: f64) -> Option<Coord> {
    let mut best: Option<(f64, Coord)> = None;
    for coords in reference {
        for w in coords.windows(2) {
            let (_, d, projected) = project_point_to_segment(p, w[0], w[1]);
            if d <= snap_distance && best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, projected));
            }
        }
    }
    best.map(|(_, q)| q)
}
