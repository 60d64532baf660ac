//! Continuation chains ("ways") built by pairing place edges at every place.
//!
//! The builder moves through its states by value:
//! `WayBuilder::new` -> [`WayBuilder::pair`] -> [`PairedWays::partition`] ->
//! [`PartitionedWays::materialize`].

use crate::analytics;
use crate::config::WayConfig;
use crate::error::{MorphologyError, Result};
use crate::geometry_utils::{azimuth, coord_distance, line_angle};
use crate::graph_types::{PlaceEdge, PlaceGraph, Way, WaySet};
use crate::partition::Partition;
use crate::progress::{NoProgress, Progress, Stage, fraction};
use ahash::AHashSet;
use geo::{Coord, LineString};
use log::{debug, info};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::f64::consts::FRAC_PI_2;

pub fn build_ways(places: &PlaceGraph, angle_threshold_deg: f64) -> Result<WaySet> {
    let config = WayConfig {
        angle_threshold_deg,
        ..Default::default()
    };
    build_ways_with(places, &config, &mut NoProgress)
}

pub fn build_ways_with(
    places: &PlaceGraph,
    config: &WayConfig,
    progress: &mut dyn Progress,
) -> Result<WaySet> {
    let mut ways = WayBuilder::new(places, config)?
        .pair(progress)
        .partition()
        .materialize()?;
    if config.compute_radius {
        progress.report(Stage::Analytics, "topological radius", 0.0);
        analytics::annotate_ways(&mut ways);
        progress.report(Stage::Analytics, "done", 1.0);
    }
    progress.report(Stage::Ways, "done", 1.0);
    Ok(ways)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    Start,
    End,
}

impl Side {
    fn opposite(self) -> Side {
        match self {
            Side::Start => Side::End,
            Side::End => Side::Start,
        }
    }
}

/// One end of a place edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndRef {
    pub place_edge: usize,
    pub side: Side,
}

impl EndRef {
    fn slot(self) -> usize {
        self.place_edge * 2
            + match self.side {
                Side::Start => 0,
                Side::End => 1,
            }
    }

    fn other(self) -> EndRef {
        EndRef {
            place_edge: self.place_edge,
            side: self.side.opposite(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PlaceEnd {
    end: EndRef,
    departure: f64,
    point: Coord,
}

fn place_of(edge: &PlaceEdge, side: Side) -> usize {
    match side {
        Side::Start => edge.start_place,
        Side::End => edge.end_place,
    }
}

/// Departure azimuth of an edge leaving its place through `side`, and the
/// coordinate at that end.
fn departure(edge: &PlaceEdge, side: Side) -> Option<(f64, Coord)> {
    let coords = &edge.geometry.0;
    if coords.len() < 2 {
        return None;
    }
    let (a, b) = match side {
        Side::Start => (coords[0], coords[1]),
        Side::End => (coords[coords.len() - 1], coords[coords.len() - 2]),
    };
    Some((azimuth(a, b), a))
}

/// Unpaired state: every place edge end grouped by the place it touches.
pub struct WayBuilder<'a> {
    places: &'a PlaceGraph,
    config: &'a WayConfig,
    ends: Vec<Vec<PlaceEnd>>,
}

impl<'a> WayBuilder<'a> {
    pub fn new(places: &'a PlaceGraph, config: &'a WayConfig) -> Result<Self> {
        config.validate()?;
        if places.place_edges.is_empty() {
            return Err(MorphologyError::degenerate(Stage::Ways, "no place edges to chain"));
        }
        let mut ends = vec![Vec::new(); places.places.len()];
        for (id, edge) in places.place_edges.iter().enumerate() {
            if edge.id != id {
                return Err(MorphologyError::consistency(
                    Stage::Ways,
                    format!("place edge at index {} carries id {}", id, edge.id),
                ));
            }
            for side in [Side::Start, Side::End] {
                let place = place_of(edge, side);
                let (departure, point) = departure(edge, side).ok_or_else(|| {
                    MorphologyError::consistency(
                        Stage::Ways,
                        format!("place edge {} has fewer than two coordinates", id),
                    )
                })?;
                let slot = ends.get_mut(place).ok_or_else(|| {
                    MorphologyError::consistency(
                        Stage::Ways,
                        format!("place edge {} references missing place {}", id, place),
                    )
                })?;
                slot.push(PlaceEnd {
                    end: EndRef {
                        place_edge: id,
                        side,
                    },
                    departure,
                    point,
                });
            }
        }
        Ok(Self {
            places,
            config,
            ends,
        })
    }

    /// Pair edge ends at every place.
    pub fn pair(self, progress: &mut dyn Progress) -> PairedWays<'a> {
        let n = self.places.place_edges.len();
        let mut paired = PairedWays {
            places: self.places,
            partition: Partition::new(n),
            partner: vec![None; 2 * n],
            corrections: vec![0.0; n],
            pairs: 0,
        };
        let threshold = self.config.angle_threshold_rad();
        let total = self.ends.len();
        for (place, ends) in self.ends.iter().enumerate() {
            match ends.as_slice() {
                [] | [_] => {}
                [a, b] => paired.join(a, b),
                _ => pair_by_deviation(ends, threshold, self.config.gap_weight, &mut paired),
            }
            if place % 1_000 == 0 {
                progress.report(Stage::Ways, "pairing", 0.8 * fraction(place, total));
            }
        }
        debug!("Made {} pairings across {} places", paired.pairs, total);
        paired
    }
}

/// Deviation coefficient of pairing two ends: the angle between their lines
/// (in [0, π/2]) and the endpoint gap, each normalized, blended by
/// `gap_weight`.
pub fn deviation_coefficient(angle: f64, gap: f64, max_gap: f64, gap_weight: f64) -> f64 {
    let gap_term = if max_gap > 0.0 { gap / max_gap } else { 0.0 };
    (1.0 - gap_weight) * angle / FRAC_PI_2 + gap_weight * gap_term
}

/// Smallest coefficient first; equal coefficients fall back to the lower
/// local index pair. Over-threshold candidates are skipped, not terminal.
fn pair_by_deviation(ends: &[PlaceEnd], threshold: f64, gap_weight: f64, paired: &mut PairedWays) {
    let mut candidates = Vec::new();
    let mut max_gap: f64 = 0.0;
    for i in 0..ends.len() {
        for j in (i + 1)..ends.len() {
            let angle = line_angle(ends[i].departure, ends[j].departure);
            let gap = coord_distance(ends[i].point, ends[j].point);
            max_gap = max_gap.max(gap);
            candidates.push((i, j, angle, gap));
        }
    }

    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize, usize, usize)>> = candidates
        .iter()
        .enumerate()
        .map(|(k, &(i, j, angle, gap))| {
            let coefficient = deviation_coefficient(angle, gap, max_gap, gap_weight);
            Reverse((OrderedFloat(coefficient), i, j, k))
        })
        .collect();

    let mut used = vec![false; ends.len()];
    while let Some(Reverse((_, i, j, k))) = heap.pop() {
        if used[i] || used[j] {
            continue;
        }
        let angle = candidates[k].2;
        if angle >= threshold {
            continue;
        }
        used[i] = true;
        used[j] = true;
        paired.join(&ends[i], &ends[j]);
    }
}

/// Paired state: each edge end knows its continuation, if any.
pub struct PairedWays<'a> {
    places: &'a PlaceGraph,
    partition: Partition,
    partner: Vec<Option<EndRef>>,
    corrections: Vec<f64>,
    pairs: usize,
}

impl<'a> PairedWays<'a> {
    fn join(&mut self, a: &PlaceEnd, b: &PlaceEnd) {
        let half_gap = coord_distance(a.point, b.point) / 2.0;
        self.partition.resolve(a.end.place_edge, b.end.place_edge);
        self.partner[a.end.slot()] = Some(b.end);
        self.partner[b.end.slot()] = Some(a.end);
        self.corrections[a.end.place_edge] += half_gap;
        self.corrections[b.end.place_edge] += half_gap;
        self.pairs += 1;
    }

    pub fn partner(&self, end: EndRef) -> Option<EndRef> {
        self.partner.get(end.slot()).copied().flatten()
    }

    /// Length added to a place edge for the gaps bridged at its ends.
    pub fn correction(&self, place_edge: usize) -> f64 {
        self.corrections.get(place_edge).copied().unwrap_or(0.0)
    }

    pub fn partition(mut self) -> PartitionedWays<'a> {
        self.partition.update();
        PartitionedWays { paired: self }
    }
}

/// Partitioned state: place edges grouped into their future ways.
pub struct PartitionedWays<'a> {
    paired: PairedWays<'a>,
}

impl PartitionedWays<'_> {
    pub fn way_count(&self) -> usize {
        self.paired.partition.num_partitions()
    }

    pub fn same_way(&self, a: usize, b: usize) -> bool {
        self.paired.partition.same(a, b)
    }

    pub fn materialize(self) -> Result<WaySet> {
        let paired = &self.paired;
        let edges = &paired.places.place_edges;
        let mut ways = Vec::with_capacity(self.way_count());
        let mut place_edges = edges.clone();

        for (_, members) in paired.partition.classes() {
            let id = ways.len();
            let way = walk_class(paired, id, &members)?;
            for &m in &way.members {
                place_edges[m].way_id = Some(id);
            }
            ways.push(way);
        }
        if ways.is_empty() {
            return Err(MorphologyError::degenerate(Stage::Ways, "no ways produced"));
        }

        connect_ways(&mut ways, &place_edges, paired.places.places.len());
        info!(
            "Built {} ways from {} place edges ({} closed)",
            ways.len(),
            place_edges.len(),
            ways.iter().filter(|w| w.closed).count()
        );
        Ok(WaySet { ways, place_edges })
    }
}

/// Walk one class from a free end, or from the lowest start end when every
/// end is paired, and merge the oriented member geometries.
fn walk_class(paired: &PairedWays, id: usize, members: &[usize]) -> Result<Way> {
    let edges = &paired.places.place_edges;
    let terminus = members
        .iter()
        .flat_map(|&m| {
            [Side::Start, Side::End].map(|side| EndRef {
                place_edge: m,
                side,
            })
        })
        .find(|&end| paired.partner(end).is_none());
    let closed = terminus.is_none();
    let first = terminus.unwrap_or(EndRef {
        place_edge: members[0],
        side: Side::Start,
    });

    let mut order = Vec::with_capacity(members.len());
    let mut coords: Vec<Coord> = Vec::new();
    let mut length = 0.0;
    let mut entry = first;
    let exit = loop {
        if order.len() >= members.len() {
            return Err(MorphologyError::consistency(
                Stage::Ways,
                format!("walk of way {} does not terminate", id),
            ));
        }
        let edge = &edges[entry.place_edge];
        order.push(entry.place_edge);
        length += edge.length + paired.correction(entry.place_edge);
        let mut piece = edge.geometry.0.clone();
        if entry.side == Side::End {
            piece.reverse();
        }
        if let (Some(&last), Some(&next)) = (coords.last(), piece.first()) {
            if coord_distance(last, next) == 0.0 {
                piece.remove(0);
            }
        }
        coords.extend(piece);

        let exit = entry.other();
        match paired.partner(exit) {
            Some(next) if next == first => break exit,
            Some(next) => entry = next,
            None => break exit,
        }
    };

    if order.len() != members.len() {
        return Err(MorphologyError::consistency(
            Stage::Ways,
            format!(
                "walk of way {} covered {} of {} members",
                id,
                order.len(),
                members.len()
            ),
        ));
    }

    let start_place = place_of(&edges[first.place_edge], first.side);
    let end_place = place_of(&edges[exit.place_edge], exit.side);
    Ok(Way {
        id,
        geometry: LineString::new(coords),
        length,
        attributes: edges[order[0]].attributes.clone(),
        members: order,
        degree: 0,
        connectivity: 0,
        start_place,
        end_place,
        closed,
        topological_radius: None,
        accessibility: None,
    })
}

/// Degree and connectivity of every way from the place edge ends that meet
/// at its places.
fn connect_ways(ways: &mut [Way], place_edges: &[PlaceEdge], place_count: usize) {
    // way id of every edge end incident at each place
    let mut at_place: Vec<Vec<usize>> = vec![Vec::new(); place_count];
    for pe in place_edges {
        if let Some(way) = pe.way_id {
            at_place[pe.start_place].push(way);
            at_place[pe.end_place].push(way);
        }
    }

    for way in ways.iter_mut() {
        let mut touched: AHashSet<usize> = AHashSet::new();
        for &m in &way.members {
            touched.insert(place_edges[m].start_place);
            touched.insert(place_edges[m].end_place);
        }
        let mut others: AHashSet<usize> = AHashSet::new();
        let mut connectivity = 0;
        for &place in &touched {
            for &other in &at_place[place] {
                if other != way.id {
                    others.insert(other);
                    connectivity += 1;
                }
            }
        }
        way.degree = others.len();
        way.connectivity = connectivity;
    }
}
