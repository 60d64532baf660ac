//! Raw line features -> consistent planar graph.
//!
//! Stages run strictly in order and each one commits before the next starts:
//! isolated fragments are dropped, near misses snapped, features noded at
//! every intersection, duplicates collapsed, pass-through vertices merged,
//! short segments contracted and everything outside the largest connected
//! component pruned.

mod noding;
mod segment_graph;
mod snapping;

use crate::config::SanitizeConfig;
use crate::error::{InputError, MorphologyError, Result};
use crate::geometry_utils::{dedup_consecutive, interpolate_along_polyline_metric, project_point_to_polyline_metric};
use crate::graph_types::{Edge, PlanarGraph, RawFeature, Vertex};
use crate::progress::{NoProgress, Progress, Stage};
use crate::spatial::{expanded_envelope, segment_index};
use geo::{Coord, LineString};
use log::{debug, info, warn};
use segment_graph::SegmentGraph;

/// Sanitize with the two named distances. The numerical tolerance is the
/// default one, scaled down for snap distances too small to sit above it.
pub fn sanitize(raw: &[RawFeature], snap_distance: f64, min_edge_length: f64) -> Result<PlanarGraph> {
    let config = SanitizeConfig {
        snap_distance,
        min_edge_length,
        tolerance: SanitizeConfig::default()
            .tolerance
            .min(snap_distance * 1e-3),
    };
    sanitize_with(raw, &config, &mut NoProgress)
}

pub fn sanitize_with(
    raw: &[RawFeature],
    config: &SanitizeConfig,
    progress: &mut dyn Progress,
) -> Result<PlanarGraph> {
    config.validate()?;
    let lines = prepare_features(raw)?;
    info!("Sanitizing {} raw features", lines.len());

    progress.report(Stage::Sanitize, "dropping isolated features", 0.0);
    let kept = snapping::drop_isolated(&lines, config.snap_distance);
    if kept.len() < lines.len() {
        warn!("Dropped {} isolated features", lines.len() - kept.len());
    }

    progress.report(Stage::Sanitize, "snapping", 0.1);
    let snapped = snapping::snap_features(&lines, &kept, config.snap_distance);

    progress.report(Stage::Sanitize, "intersecting", 0.2);
    let intersections = noding::pairwise_intersections(&snapped, config.tolerance);
    let candidates = noding::candidate_vertices(&snapped, &intersections, config.tolerance);

    progress.report(Stage::Sanitize, "splitting", 0.4);
    let segments = noding::split_features(&snapped, &candidates, config.tolerance)?;
    let mut graph = SegmentGraph::new(candidates, segments, config.tolerance);
    graph.check_endpoints("splitting")?;

    progress.report(Stage::Sanitize, "collapsing duplicates", 0.5);
    graph.collapse_duplicates(config.snap_distance);
    graph.recompute_degrees();

    progress.report(Stage::Sanitize, "merging pass-through vertices", 0.6);
    let merged = graph.merge_pass_through()?;
    graph.check_endpoints("merging")?;
    graph.verify_degrees("merging")?;
    debug!(
        "{} segments left after merging {} pass-through vertices",
        graph.alive_segment_count(),
        merged
    );

    progress.report(Stage::Sanitize, "removing short segments", 0.7);
    graph.remove_short_segments(config.min_edge_length);
    graph.check_endpoints("short segment removal")?;
    graph.verify_degrees("short segment removal")?;

    progress.report(Stage::Sanitize, "pruning components", 0.8);
    let component = graph.keep_largest_component()?;

    progress.report(Stage::Sanitize, "emitting", 0.9);
    let planar = emit(raw, &lines, &kept, graph, component, config.snap_distance);
    planar.check_invariants()?;
    if planar.edges.is_empty() {
        return Err(MorphologyError::degenerate(
            Stage::Sanitize,
            "no edges survived pruning",
        ));
    }

    progress.report(Stage::Sanitize, "done", 1.0);
    info!(
        "Sanitized graph: {} vertices, {} edges",
        planar.vertices.len(),
        planar.edges.len()
    );
    Ok(planar)
}

/// Validated coordinates of every raw feature, consecutive repeats removed.
fn prepare_features(raw: &[RawFeature]) -> Result<Vec<Vec<Coord>>, InputError> {
    if raw.is_empty() {
        return Err(InputError::EmptyDataset);
    }
    raw.iter()
        .enumerate()
        .map(|(feature, f)| {
            let mut coords = f.polyline.0.clone();
            if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(InputError::InvalidGeometry {
                    feature,
                    reason: "non-finite coordinate",
                });
            }
            dedup_consecutive(&mut coords, 0.0);
            if coords.len() < 2 {
                return Err(InputError::InvalidGeometry {
                    feature,
                    reason: "fewer than two distinct points",
                });
            }
            Ok(coords)
        })
        .collect()
}

/// Dense vertices and edges of the surviving component. Every edge takes
/// its attributes from the first raw feature covering its midpoint, falling
/// back to the feature it was cut from.
fn emit(
    raw: &[RawFeature],
    lines: &[Vec<Coord>],
    kept: &[usize],
    graph: SegmentGraph,
    component: usize,
    snap_distance: f64,
) -> PlanarGraph {
    let mut remap: Vec<Option<usize>> = vec![None; graph.vertices.len()];
    let mut vertices = Vec::new();
    for (old, vertex) in graph.vertices.iter().enumerate() {
        if vertex.alive && vertex.degree > 0 {
            remap[old] = Some(vertices.len());
            vertices.push(Vertex {
                id: vertices.len(),
                point: vertex.point,
                degree: vertex.degree,
            });
        }
    }

    let coverage = segment_index(lines);
    let mut edges = Vec::new();
    for segment in graph.segments.iter().filter(|s| s.alive) {
        let (Some(start), Some(end)) = (remap[segment.start], remap[segment.end]) else {
            continue;
        };
        let midpoint = interpolate_along_polyline_metric(&segment.coords, 0.5);
        let mut covering: Vec<usize> = coverage
            .locate_in_envelope_intersecting(&expanded_envelope(&[midpoint], snap_distance))
            .map(|s| s.feature)
            .collect();
        covering.sort_unstable_by_key(|&f| (raw[f].id, f));
        covering.dedup();
        let source = covering
            .into_iter()
            .find(|&f| {
                project_point_to_polyline_metric(midpoint, &lines[f])
                    .is_some_and(|(_, d, _)| d <= snap_distance)
            })
            .unwrap_or(kept[segment.feature]);
        let feature = &raw[source];

        let degree_sum = vertices[start].degree + vertices[end].degree;
        edges.push(Edge {
            id: edges.len(),
            start_vertex: start,
            end_vertex: end,
            geometry: LineString::new(segment.coords.clone()),
            length: segment.length,
            connectivity: degree_sum.saturating_sub(2),
            component,
            source_feature: Some(feature.id),
            attributes: feature.attributes.clone(),
            elevation: feature.elevation,
        });
    }

    PlanarGraph { vertices, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_types::Attributes;

    fn feature(id: u64, coords: &[(f64, f64)]) -> RawFeature {
        RawFeature::new(id, LineString::from(coords.to_vec()))
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let err = sanitize(&[], 0.5, 1.0).unwrap_err();
        assert_eq!(err, MorphologyError::Input(InputError::EmptyDataset));
    }

    #[test]
    fn tiny_snap_distance_is_accepted() {
        let raw = vec![
            feature(1, &[(0.0, 0.0), (20.0, 0.0)]),
            feature(2, &[(10.0, -10.0), (10.0, 10.0)]),
        ];
        let graph = sanitize(&raw, 1e-7, 1.0).unwrap();
        assert_eq!(graph.edges.len(), 4);
    }

    #[test]
    fn non_positive_snap_distance_names_itself() {
        let raw = vec![feature(1, &[(0.0, 0.0), (20.0, 0.0)])];
        let err = sanitize(&raw, 0.0, 1.0).unwrap_err();
        assert!(matches!(
            err,
            MorphologyError::Input(InputError::OutOfRange {
                name: "snap_distance",
                ..
            })
        ));
    }

    #[test]
    fn single_point_feature_is_rejected() {
        let raw = vec![feature(1, &[(0.0, 0.0), (0.0, 0.0)])];
        let err = sanitize(&raw, 0.5, 1.0).unwrap_err();
        assert!(matches!(
            err,
            MorphologyError::Input(InputError::InvalidGeometry { feature: 0, .. })
        ));
    }

    #[test]
    fn crossing_streets_form_a_four_way_junction() {
        let raw = vec![
            feature(1, &[(0.0, 0.0), (20.0, 0.0)]),
            feature(2, &[(10.0, -10.0), (10.0, 10.0)]),
        ];
        let graph = sanitize(&raw, 0.5, 1.0).unwrap();
        assert_eq!(graph.edges.len(), 4);
        assert_eq!(graph.vertices.len(), 5);
        let center = graph
            .vertices
            .iter()
            .find(|v| v.point == Coord { x: 10.0, y: 0.0 })
            .unwrap();
        assert_eq!(center.degree, 4);
        for edge in &graph.edges {
            assert_eq!(edge.connectivity, 3);
            assert!((edge.length - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn duplicated_tracing_is_collapsed() {
        let raw = vec![
            feature(1, &[(0.0, 0.0), (20.0, 0.0)]),
            feature(2, &[(0.0, 0.0), (20.0, 0.0)]),
            feature(3, &[(10.0, 0.0), (10.0, 10.0)]),
        ];
        let graph = sanitize(&raw, 0.5, 1.0).unwrap();
        assert_eq!(graph.edges.len(), 3);
        graph.check_invariants().unwrap();
    }

    #[test]
    fn edges_inherit_attributes_of_covering_feature() {
        let mut attrs = Attributes::new();
        attrs.insert("name".to_string(), "Main Street".to_string());
        let raw = vec![
            feature(7, &[(0.0, 0.0), (20.0, 0.0)])
                .with_attributes(attrs.clone())
                .with_elevation(12.5),
            feature(8, &[(10.0, 0.0), (10.0, 10.0)]),
        ];
        let graph = sanitize(&raw, 0.5, 1.0).unwrap();
        let horizontal: Vec<&Edge> = graph
            .edges
            .iter()
            .filter(|e| e.source_feature == Some(7))
            .collect();
        assert_eq!(horizontal.len(), 2);
        for edge in horizontal {
            assert_eq!(edge.attributes.as_ref(), Some(&attrs));
            assert_eq!(edge.elevation, Some(12.5));
        }
    }
}
