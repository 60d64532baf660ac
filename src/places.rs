//! Intersection clusters ("places") built from buffered graph vertices.

use crate::config::PlaceConfig;
use crate::error::{InputError, MorphologyError, Result};
use crate::geometry_utils::{circle_polygon, point_polygon};
use crate::graph_types::{PlaceEdge, Place, PlaceGraph, PlaceKind, PlanarGraph};
use crate::partition::Partition;
use crate::progress::{NoProgress, Progress, Stage, fraction};
use crate::spatial::{IndexedEnvelope, expanded_envelope, point_index};
use geo::{BooleanOps, Contains, ConvexHull, Coord, Intersects, MultiPolygon, Point, Polygon};
use log::{debug, info, warn};
use rstar::{AABB, RTree};
use std::collections::BTreeSet;

pub fn build_places(
    graph: &PlanarGraph,
    buffer_size: f64,
    polygons: Option<&[Polygon]>,
) -> Result<PlaceGraph> {
    let config = PlaceConfig {
        buffer_size,
        ..Default::default()
    };
    build_places_with(graph, &config, polygons, &mut NoProgress)
}

pub fn build_places_with(
    graph: &PlanarGraph,
    config: &PlaceConfig,
    polygons: Option<&[Polygon]>,
    progress: &mut dyn Progress,
) -> Result<PlaceGraph> {
    config.validate()?;
    let supplied = polygons.unwrap_or_default();
    validate_polygons(supplied)?;
    if graph.vertices.is_empty() {
        return Err(MorphologyError::degenerate(Stage::Places, "graph has no vertices"));
    }
    graph.check_invariants_during(Stage::Places)?;

    progress.report(Stage::Places, "buffering", 0.0);
    let buffers: Vec<Polygon> = graph
        .vertices
        .iter()
        .filter(|v| v.degree > 1)
        .map(|v| circle_polygon(v.point, config.buffer_size, config.buffer_segments))
        .collect();
    debug!("Buffered {} intersection vertices", buffers.len());

    progress.report(Stage::Places, "union", 0.2);
    let merged = chunked_union(buffers, config.union_chunk_size);
    let candidates: Vec<Polygon> = merged.0.iter().map(|p| p.convex_hull()).collect();
    debug!("{} candidate places after union", candidates.len());

    progress.report(Stage::Places, "merging supplied polygons", 0.5);
    let shapes = if supplied.is_empty() {
        candidates
            .into_iter()
            .map(|p| (p, PlaceKind::Cluster))
            .collect()
    } else {
        merge_supplied(graph, candidates, supplied, config.union_chunk_size)
    };

    progress.report(Stage::Places, "assigning vertices", 0.7);
    let (places, vertex_places) = assign_vertices(graph, shapes);
    if places.is_empty() {
        return Err(MorphologyError::degenerate(Stage::Places, "no places produced"));
    }

    progress.report(Stage::Places, "deriving place edges", 0.9);
    let place_edges = derive_place_edges(graph, &places, &vertex_places);

    progress.report(Stage::Places, "done", 1.0);
    info!(
        "Built {} places ({} singletons) and {} place edges",
        places.len(),
        places.iter().filter(|p| p.kind == PlaceKind::Singleton).count(),
        place_edges.len()
    );
    Ok(PlaceGraph {
        places,
        place_edges,
        vertex_places,
    })
}

fn validate_polygons(polygons: &[Polygon]) -> Result<(), InputError> {
    for (index, polygon) in polygons.iter().enumerate() {
        let ring = &polygon.exterior().0;
        if ring.len() < 4 {
            return Err(InputError::InvalidPolygon {
                index,
                reason: "exterior ring has fewer than four coordinates",
            });
        }
        if ring.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(InputError::InvalidPolygon {
                index,
                reason: "non-finite coordinate",
            });
        }
    }
    Ok(())
}

/// Union polygons `chunk_size` at a time, then union the partial results
/// the same way until one remains, so no single union ever holds more than
/// one chunk of operands.
pub fn chunked_union(polygons: Vec<Polygon>, chunk_size: usize) -> MultiPolygon {
    let chunk_size = chunk_size.max(2);
    let mut layer: Vec<MultiPolygon> = polygons
        .chunks(chunk_size)
        .map(|chunk| union_all(chunk.iter().map(|p| MultiPolygon::new(vec![p.clone()]))))
        .collect();
    while layer.len() > 1 {
        debug!("Reducing {} partial unions", layer.len());
        layer = layer
            .chunks(chunk_size)
            .map(|chunk| union_all(chunk.iter().cloned()))
            .collect();
    }
    layer.pop().unwrap_or_else(|| MultiPolygon::new(Vec::new()))
}

fn union_all(parts: impl Iterator<Item = MultiPolygon>) -> MultiPolygon {
    parts
        .reduce(|acc, next| acc.union(&next))
        .unwrap_or_else(|| MultiPolygon::new(Vec::new()))
}

/// Merge candidate clusters into the caller's polygons. A candidate joins a
/// polygon only when one of its own intersection vertices, or a vertex
/// linked to one of them by an edge, lies inside that polygon. Each merged
/// group is unioned and split back into convex pieces.
fn merge_supplied(
    graph: &PlanarGraph,
    candidates: Vec<Polygon>,
    supplied: &[Polygon],
    chunk_size: usize,
) -> Vec<(Polygon, PlaceKind)> {
    let adjacency = graph.adjacency();
    let points: Vec<Coord> = graph.vertices.iter().map(|v| v.point).collect();
    let vertex_tree = point_index(&points);
    let n = candidates.len();

    let mut partition = Partition::new(n + supplied.len());
    for (ci, candidate) in candidates.iter().enumerate() {
        let envelope = expanded_envelope(&candidate.exterior().0, 0.0);
        let mut connected: BTreeSet<usize> = BTreeSet::new();
        for v in vertex_tree.locate_in_envelope_intersecting(&envelope) {
            if graph.vertices[v.id].degree > 1 && candidate.intersects(&Point::from(v.point)) {
                connected.insert(v.id);
                connected.extend(adjacency[v.id].iter().copied());
            }
        }
        for (pi, polygon) in supplied.iter().enumerate() {
            if !polygon.intersects(candidate) {
                continue;
            }
            let linked = connected
                .iter()
                .any(|&v| polygon.intersects(&Point::from(points[v])));
            if linked {
                partition.resolve(ci, n + pi);
            }
        }
    }
    partition.update();

    let mut shapes = Vec::new();
    for (_, members) in partition.classes() {
        match members.as_slice() {
            [only] if *only < n => shapes.push((candidates[*only].clone(), PlaceKind::Cluster)),
            [only] => {
                let polygon = &supplied[*only - n];
                let covers_vertex = points
                    .iter()
                    .any(|&p| polygon.intersects(&Point::from(p)));
                if covers_vertex {
                    shapes.push((polygon.clone(), PlaceKind::Supplied));
                } else {
                    warn!("Supplied polygon {} covers no vertex, ignoring it", *only - n);
                }
            }
            group => {
                let parts: Vec<Polygon> = group
                    .iter()
                    .map(|&m| {
                        if m < n {
                            candidates[m].clone()
                        } else {
                            supplied[m - n].clone()
                        }
                    })
                    .collect();
                for piece in chunked_union(parts, chunk_size).0 {
                    shapes.push((piece.convex_hull(), PlaceKind::Supplied));
                }
            }
        }
    }
    shapes
}

/// Give every vertex the lowest-id place covering it, creating singleton
/// places for the rest. Returns the places and the place of each vertex.
fn assign_vertices(graph: &PlanarGraph, shapes: Vec<(Polygon, PlaceKind)>) -> (Vec<Place>, Vec<usize>) {
    let mut places: Vec<Place> = shapes
        .into_iter()
        .enumerate()
        .map(|(id, (polygon, kind))| Place {
            id,
            polygon,
            member_vertices: Vec::new(),
            kind,
        })
        .collect();

    let tree = RTree::bulk_load(
        places
            .iter()
            .map(|p| IndexedEnvelope {
                id: p.id,
                envelope: expanded_envelope(&p.polygon.exterior().0, 0.0),
            })
            .collect(),
    );

    let mut vertex_places = Vec::with_capacity(graph.vertices.len());
    for (done, vertex) in graph.vertices.iter().enumerate() {
        let point = Point::from(vertex.point);
        let mut hits: Vec<usize> = tree
            .locate_in_envelope_intersecting(&AABB::from_point([vertex.point.x, vertex.point.y]))
            .map(|e| e.id)
            .collect();
        hits.sort_unstable();
        let place_id = match hits.into_iter().find(|&id| places[id].polygon.intersects(&point)) {
            Some(id) => id,
            None => {
                let id = places.len();
                places.push(Place {
                    id,
                    polygon: point_polygon(vertex.point),
                    member_vertices: Vec::new(),
                    kind: PlaceKind::Singleton,
                });
                id
            }
        };
        places[place_id].member_vertices.push(vertex.id);
        vertex_places.push(place_id);
        if done % 10_000 == 0 {
            debug!("Assigned {:.0}% of vertices", fraction(done, graph.vertices.len()) * 100.0);
        }
    }

    // supplied polygons may overlap clusters and end up without members
    let before = places.len();
    places.retain(|p| !p.member_vertices.is_empty());
    if places.len() < before {
        let mut remap = vec![0; before];
        for (new_id, place) in places.iter_mut().enumerate() {
            remap[place.id] = new_id;
            place.id = new_id;
        }
        for place_id in &mut vertex_places {
            *place_id = remap[*place_id];
        }
    }
    (places, vertex_places)
}

/// Re-express every edge between places. Edges running entirely inside a
/// single non-singleton place are internal to it and dropped.
fn derive_place_edges(graph: &PlanarGraph, places: &[Place], vertex_places: &[usize]) -> Vec<PlaceEdge> {
    let mut place_edges = Vec::with_capacity(graph.edges.len());
    let mut internal = 0;
    for edge in &graph.edges {
        let start_place = vertex_places[edge.start_vertex];
        let end_place = vertex_places[edge.end_vertex];
        let place = &places[start_place];
        if start_place == end_place
            && place.kind != PlaceKind::Singleton
            && place.polygon.contains(&edge.geometry)
        {
            internal += 1;
            continue;
        }
        place_edges.push(PlaceEdge {
            id: place_edges.len(),
            edge_id: edge.id,
            start_place,
            end_place,
            geometry: edge.geometry.clone(),
            length: edge.length,
            way_id: None,
            attributes: edge.attributes.clone(),
        });
    }
    if internal > 0 {
        debug!("Dropped {} edges internal to a place", internal);
    }
    place_edges
}
