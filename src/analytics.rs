//! Hop-distance measures over the way adjacency graph.

use crate::graph_types::WaySet;
use log::debug;
use std::collections::VecDeque;

/// Ways sharing at least one place, per way. Sorted, without self-links.
pub fn way_adjacency(ways: &WaySet) -> Vec<Vec<usize>> {
    let place_count = ways
        .place_edges
        .iter()
        .map(|pe| pe.start_place.max(pe.end_place) + 1)
        .max()
        .unwrap_or(0);
    let mut at_place: Vec<Vec<usize>> = vec![Vec::new(); place_count];
    for pe in &ways.place_edges {
        if let Some(way) = pe.way_id {
            at_place[pe.start_place].push(way);
            at_place[pe.end_place].push(way);
        }
    }

    let mut adjacency = vec![Vec::new(); ways.ways.len()];
    for mut present in at_place {
        present.sort_unstable();
        present.dedup();
        for &a in &present {
            adjacency[a].extend(present.iter().copied().filter(|&b| b != a));
        }
    }
    for list in &mut adjacency {
        list.sort_unstable();
        list.dedup();
    }
    adjacency
}

/// Breadth-first hop counts from `source`; `None` for unreachable ways.
pub fn shortest_path_lengths(adjacency: &[Vec<usize>], source: usize) -> Vec<Option<usize>> {
    let mut distance = vec![None; adjacency.len()];
    if source >= adjacency.len() {
        return distance;
    }
    distance[source] = Some(0);
    let mut queue = VecDeque::from([source]);
    while let Some(current) = queue.pop_front() {
        let next = distance[current].unwrap_or(0) + 1;
        for &neighbour in &adjacency[current] {
            if distance[neighbour].is_none() {
                distance[neighbour] = Some(next);
                queue.push_back(neighbour);
            }
        }
    }
    distance
}

/// Sum of hop distances from `source` to every reachable way.
pub fn topological_radius(adjacency: &[Vec<usize>], source: usize) -> usize {
    shortest_path_lengths(adjacency, source)
        .into_iter()
        .flatten()
        .sum()
}

/// Fill `topological_radius` and `accessibility` on every way. Accessibility
/// weights each hop distance by the length of the way it reaches.
pub fn annotate_ways(ways: &mut WaySet) {
    let adjacency = way_adjacency(ways);
    let lengths: Vec<f64> = ways.ways.iter().map(|w| w.length).collect();
    for way in &mut ways.ways {
        let distances = shortest_path_lengths(&adjacency, way.id);
        let mut radius = 0;
        let mut accessibility = 0.0;
        for (target, hops) in distances.into_iter().enumerate() {
            if let Some(hops) = hops {
                radius += hops;
                accessibility += hops as f64 * lengths[target];
            }
        }
        way.topological_radius = Some(radius);
        way.accessibility = Some(accessibility);
    }
    debug!("Annotated {} ways with topological radius", ways.ways.len());
}
