// ===========================================================================
// Stages 6-10: working graph of split segments
// ===========================================================================
//
// Vertices and segments live in flat vectors and are never removed, only
// flagged dead, so ids stay stable across every stage. Dense ids are
// assigned once at emission.
use crate::error::{MorphologyError, Result};
use crate::geometry_utils::{
    coord_distance, hausdorff_distance_metric, interpolate_along_polyline_metric,
    polyline_length_metric,
};
use crate::partition::Partition;
use crate::progress::Stage;
use ahash::AHashMap;
use geo::Coord;
use log::{debug, warn};

#[derive(Debug, Clone)]
pub(crate) struct WorkVertex {
    pub point: Coord,
    pub degree: usize,
    pub alive: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SplitSegment {
    /// Index into the kept feature list.
    pub feature: usize,
    pub start: usize,
    pub end: usize,
    pub coords: Vec<Coord>,
    pub length: f64,
    pub alive: bool,
}

impl SplitSegment {
    pub fn is_loop(&self) -> bool {
        self.start == self.end
    }

    /// Coordinates walked from `from_vertex` to the other end.
    fn oriented_from(&self, from_vertex: usize) -> Vec<Coord> {
        if self.start == from_vertex {
            self.coords.clone()
        } else {
            self.coords.iter().rev().copied().collect()
        }
    }

    fn refresh_length(&mut self) {
        self.length = polyline_length_metric(&self.coords);
    }
}

pub(crate) struct SegmentGraph {
    pub vertices: Vec<WorkVertex>,
    pub segments: Vec<SplitSegment>,
    tolerance: f64,
}

impl SegmentGraph {
    pub fn new(points: Vec<Coord>, segments: Vec<SplitSegment>, tolerance: f64) -> Self {
        let vertices = points
            .into_iter()
            .map(|point| WorkVertex {
                point,
                degree: 0,
                alive: true,
            })
            .collect();
        let mut graph = Self {
            vertices,
            segments,
            tolerance,
        };
        graph.recompute_degrees();
        graph
    }

    pub fn alive_segment_count(&self) -> usize {
        self.segments.iter().filter(|s| s.alive).count()
    }

    /// Alive segment ids incident to each vertex; a self-loop is listed twice.
    fn incidence(&self) -> Vec<Vec<usize>> {
        let mut incidence = vec![Vec::new(); self.vertices.len()];
        for (id, segment) in self.segments.iter().enumerate() {
            if segment.alive {
                incidence[segment.start].push(id);
                incidence[segment.end].push(id);
            }
        }
        incidence
    }

    /// Degree from surviving segments. Vertices left without any incident
    /// segment are retired.
    pub fn recompute_degrees(&mut self) {
        let incidence = self.incidence();
        for (vertex, incident) in self.vertices.iter_mut().zip(incidence) {
            vertex.degree = incident.len();
            if vertex.degree == 0 {
                vertex.alive = false;
            }
        }
    }

    pub fn verify_degrees(&self, step: &str) -> Result<()> {
        for (id, (vertex, incident)) in self.vertices.iter().zip(self.incidence()).enumerate() {
            if incident.is_empty() {
                continue;
            }
            if !vertex.alive || vertex.degree != incident.len() {
                return Err(MorphologyError::consistency(
                    Stage::Sanitize,
                    format!(
                        "after {}: vertex {} has degree {} but {} incident segment ends",
                        step,
                        id,
                        vertex.degree,
                        incident.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Every surviving segment must start and end on a surviving vertex
    /// whose point coincides with the segment's end coordinates.
    pub fn check_endpoints(&self, step: &str) -> Result<()> {
        for (id, segment) in self.segments.iter().enumerate() {
            if !segment.alive {
                continue;
            }
            let ends = [
                (segment.start, segment.coords.first()),
                (segment.end, segment.coords.last()),
            ];
            for (vertex_id, coord) in ends {
                let resolved = self
                    .vertices
                    .get(vertex_id)
                    .filter(|v| v.alive)
                    .zip(coord)
                    .is_some_and(|(v, c)| coord_distance(v.point, *c) <= self.tolerance);
                if !resolved {
                    return Err(MorphologyError::consistency(
                        Stage::Sanitize,
                        format!(
                            "after {}: segment {} has an unresolved end at vertex {}",
                            step, id, vertex_id
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Collapse segments that join the same two vertices along the same
    /// geometry (within `equality_tolerance`) onto their lowest id.
    pub fn collapse_duplicates(&mut self, equality_tolerance: f64) -> usize {
        let mut groups: AHashMap<(usize, usize), Vec<usize>> = AHashMap::new();
        for (id, segment) in self.segments.iter().enumerate() {
            if segment.alive {
                let key = (segment.start.min(segment.end), segment.start.max(segment.end));
                groups.entry(key).or_default().push(id);
            }
        }

        let mut partition = Partition::new(self.segments.len());
        for members in groups.values().filter(|m| m.len() > 1) {
            for (i, &a) in members.iter().enumerate() {
                for &b in &members[i + 1..] {
                    if partition.same(a, b) {
                        continue;
                    }
                    let sa = &self.segments[a];
                    let sb = &self.segments[b];
                    if (sa.length - sb.length).abs() <= 2.0 * equality_tolerance
                        && hausdorff_distance_metric(&sa.coords, &sb.coords) <= equality_tolerance
                    {
                        partition.resolve(a, b);
                    }
                }
            }
        }
        partition.update();

        let mut removed = 0;
        for (root, members) in partition.classes() {
            for &id in members.iter().filter(|&&id| id != root) {
                self.segments[id].alive = false;
                removed += 1;
            }
        }
        debug!("Collapsed {} duplicate segments", removed);
        removed
    }

    /// Fuse chains of segments meeting at degree-2 vertices into single
    /// segments. Returns the number of pass-through vertices removed.
    pub fn merge_pass_through(&mut self) -> Result<usize> {
        let incidence = self.incidence();
        let mut pass_through = vec![false; self.vertices.len()];
        let mut partition = Partition::new(self.segments.len());

        for (v, incident) in incidence.iter().enumerate() {
            if !self.vertices[v].alive || incident.len() != 2 || incident[0] == incident[1] {
                continue;
            }
            pass_through[v] = true;
            partition.resolve(incident[0], incident[1]);
        }
        partition.update();

        let mut removed_vertices = 0;
        let mut dropped_rings = 0;
        for (root, members) in partition.classes() {
            if members.len() < 2 {
                continue;
            }
            let Some(chain) = self.walk_chain(root, &members, &pass_through, &incidence)? else {
                // every vertex on the ring is a pass-through: nothing left to attach it to
                for &id in &members {
                    let segment = &mut self.segments[id];
                    segment.alive = false;
                    self.vertices[segment.start].alive = false;
                    self.vertices[segment.end].alive = false;
                }
                dropped_rings += 1;
                continue;
            };

            let mut coords: Vec<Coord> = Vec::new();
            for &(id, from) in &chain.pieces {
                let piece = self.segments[id].oriented_from(from);
                let skip = usize::from(!coords.is_empty());
                coords.extend(piece.into_iter().skip(skip));
            }
            for &(_, from) in chain.pieces.iter().skip(1) {
                self.vertices[from].alive = false;
                removed_vertices += 1;
            }

            for &id in &members {
                self.segments[id].alive = false;
            }
            let merged = &mut self.segments[root];
            merged.start = chain.start;
            merged.end = chain.end;
            merged.coords = coords;
            merged.alive = true;
            merged.refresh_length();
        }

        if dropped_rings > 0 {
            warn!("Dropped {} rings not connected to any vertex", dropped_rings);
        }
        debug!("Merged away {} pass-through vertices", removed_vertices);
        self.recompute_degrees();
        Ok(removed_vertices)
    }

    /// Order the members of one pass-through class from a terminal vertex.
    /// A ring anchored at a junction therefore starts and ends on that
    /// junction. Returns `None` for a ring made only of pass-through vertices.
    fn walk_chain(
        &self,
        root: usize,
        members: &[usize],
        pass_through: &[bool],
        incidence: &[Vec<usize>],
    ) -> Result<Option<Chain>> {
        let start = members.iter().find_map(|&id| {
            let s = &self.segments[id];
            if !pass_through[s.start] {
                Some((id, s.start))
            } else if !pass_through[s.end] {
                Some((id, s.end))
            } else {
                None
            }
        });
        let Some((mut current, mut from)) = start else {
            return Ok(None);
        };

        let chain_start = from;
        let mut pieces = Vec::with_capacity(members.len());
        loop {
            pieces.push((current, from));
            if pieces.len() > members.len() {
                break;
            }
            let segment = &self.segments[current];
            let exit = if segment.start == from { segment.end } else { segment.start };
            if !pass_through[exit] {
                if pieces.len() != members.len() {
                    break;
                }
                return Ok(Some(Chain {
                    pieces,
                    start: chain_start,
                    end: exit,
                }));
            }
            let Some(&next) = incidence[exit].iter().find(|&&id| id != current) else {
                break;
            };
            current = next;
            from = exit;
        }

        Err(MorphologyError::consistency(
            Stage::Sanitize,
            format!(
                "pass-through chain {} could not be walked across its {} segments",
                root,
                members.len()
            ),
        ))
    }

    /// Collapse segments shorter than `min_length`, shortest first, into a
    /// new vertex at their midpoint, until none remain.
    pub fn remove_short_segments(&mut self, min_length: f64) -> usize {
        if min_length <= 0.0 {
            return 0;
        }
        let mut incidence = self.incidence();
        let mut removed = 0;

        loop {
            let mut short: Vec<(f64, usize)> = self
                .segments
                .iter()
                .enumerate()
                .filter(|(_, s)| s.alive && s.length < min_length)
                .map(|(id, s)| (s.length, id))
                .collect();
            if short.is_empty() {
                break;
            }
            short.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let mut changed = false;
            for (_, id) in short {
                let segment = &self.segments[id];
                if !segment.alive || segment.length >= min_length {
                    continue;
                }
                let u = segment.start;
                if segment.is_loop() {
                    self.segments[id].alive = false;
                    incidence[u].retain(|&s| s != id);
                } else {
                    let midpoint = interpolate_along_polyline_metric(&segment.coords, 0.5);
                    self.contract(id, midpoint, &mut incidence);
                }
                removed += 1;
                changed = true;
            }
            if !changed {
                break;
            }
        }

        debug!("Removed {} short segments", removed);
        self.recompute_degrees();
        removed
    }

    /// Replace both ends of segment `id` by a new vertex at `point` and
    /// re-point every other segment touching them.
    fn contract(&mut self, id: usize, point: Coord, incidence: &mut Vec<Vec<usize>>) {
        let (u, v) = (self.segments[id].start, self.segments[id].end);
        let w = self.vertices.len();
        self.vertices.push(WorkVertex {
            point,
            degree: 0,
            alive: true,
        });
        incidence.push(Vec::new());
        self.segments[id].alive = false;
        self.vertices[u].alive = false;
        self.vertices[v].alive = false;

        let mut touching: Vec<usize> = incidence[u]
            .iter()
            .chain(incidence[v].iter())
            .copied()
            .filter(|&s| s != id)
            .collect();
        touching.sort_unstable();
        touching.dedup();
        incidence[u].clear();
        incidence[v].clear();

        for s in touching {
            let segment = &mut self.segments[s];
            if segment.start == u || segment.start == v {
                segment.start = w;
                segment.coords[0] = point;
                incidence[w].push(s);
            }
            if segment.end == u || segment.end == v {
                segment.end = w;
                let last = segment.coords.len() - 1;
                segment.coords[last] = point;
                incidence[w].push(s);
            }
            segment.refresh_length();
        }
        self.vertices[w].degree = incidence[w].len();
    }

    /// Label connected components by frontier expansion and kill every
    /// segment outside the largest one (most segments, earliest on ties).
    /// Returns the surviving component label.
    pub fn keep_largest_component(&mut self) -> Result<usize> {
        let incidence = self.incidence();
        let mut labels: Vec<Option<usize>> = vec![None; self.segments.len()];
        let mut sizes: Vec<usize> = Vec::new();

        for seed in 0..self.segments.len() {
            if !self.segments[seed].alive || labels[seed].is_some() {
                continue;
            }
            let label = sizes.len();
            let mut size = 0;
            let mut frontier = vec![seed];
            labels[seed] = Some(label);
            while let Some(id) = frontier.pop() {
                size += 1;
                let segment = &self.segments[id];
                for vertex in [segment.start, segment.end] {
                    for &next in &incidence[vertex] {
                        if labels[next].is_none() {
                            labels[next] = Some(label);
                            frontier.push(next);
                        }
                    }
                }
            }
            sizes.push(size);
        }

        let Some((largest, _)) = sizes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        else {
            return Err(MorphologyError::degenerate(
                Stage::Sanitize,
                "no segments left to form a component",
            ));
        };

        let mut pruned = 0;
        for (segment, label) in self.segments.iter_mut().zip(&labels) {
            if segment.alive && *label != Some(largest) {
                segment.alive = false;
                pruned += 1;
            }
        }
        if sizes.len() > 1 {
            debug!(
                "Kept component {} of {} ({} segments), pruned {} segments",
                largest,
                sizes.len(),
                sizes[largest],
                pruned
            );
        }
        self.recompute_degrees();
        Ok(largest)
    }
}

struct Chain {
    /// (segment id, vertex the walk enters it from)
    pieces: Vec<(usize, usize)>,
    start: usize,
    end: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    fn seg(start: usize, end: usize, coords: Vec<Coord>) -> SplitSegment {
        SplitSegment {
            feature: 0,
            start,
            end,
            length: polyline_length_metric(&coords),
            coords,
            alive: true,
        }
    }

    #[test]
    fn degree_counts_self_loops_twice() {
        let points = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let segments = vec![
            seg(0, 1, vec![c(0.0, 0.0), c(10.0, 0.0)]),
            seg(1, 1, vec![c(10.0, 0.0), c(15.0, 5.0), c(15.0, -5.0), c(10.0, 0.0)]),
        ];
        let graph = SegmentGraph::new(points, segments, 1e-9);
        assert_eq!(graph.vertices[0].degree, 1);
        assert_eq!(graph.vertices[1].degree, 3);
    }

    #[test]
    fn segment_off_its_vertex_is_unresolved() {
        let points = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let segments = vec![seg(0, 1, vec![c(0.0, 0.0), c(9.0, 0.0)])];
        let graph = SegmentGraph::new(points, segments, 1e-9);
        let err = graph.check_endpoints("splitting").unwrap_err();
        assert!(matches!(
            err,
            MorphologyError::GraphConsistency {
                stage: Stage::Sanitize,
                ..
            }
        ));
    }

    #[test]
    fn segment_on_retired_vertex_is_unresolved() {
        let points = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let segments = vec![seg(0, 1, vec![c(0.0, 0.0), c(10.0, 0.0)])];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        graph.vertices[1].alive = false;
        assert!(graph.check_endpoints("merging").is_err());
    }

    #[test]
    fn stale_degree_is_reported() {
        let points = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let segments = vec![seg(0, 1, vec![c(0.0, 0.0), c(10.0, 0.0)])];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        graph.verify_degrees("merging").unwrap();
        graph.vertices[0].degree = 2;
        let err = graph.verify_degrees("merging").unwrap_err();
        assert!(matches!(err, MorphologyError::GraphConsistency { .. }));
    }

    #[test]
    fn duplicates_collapse_to_lowest_id() {
        let points = vec![c(0.0, 0.0), c(10.0, 0.0)];
        let segments = vec![
            seg(0, 1, vec![c(0.0, 0.0), c(10.0, 0.0)]),
            seg(1, 0, vec![c(10.0, 0.0), c(5.0, 0.0), c(0.0, 0.0)]),
            seg(0, 1, vec![c(0.0, 0.0), c(5.0, 3.0), c(10.0, 0.0)]),
        ];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        assert_eq!(graph.collapse_duplicates(0.01), 1);
        assert!(graph.segments[0].alive);
        assert!(!graph.segments[1].alive);
        assert!(graph.segments[2].alive);
    }

    #[test]
    fn chain_of_pass_through_vertices_merges() {
        // 0 -- 1 -- 2 -- 3 with a spur at 3 so the end stays a real node
        let points = vec![c(0.0, 0.0), c(10.0, 0.0), c(20.0, 0.0), c(30.0, 0.0), c(30.0, 10.0), c(40.0, 0.0)];
        let segments = vec![
            seg(1, 2, vec![c(10.0, 0.0), c(20.0, 0.0)]),
            seg(1, 0, vec![c(10.0, 0.0), c(0.0, 0.0)]),
            seg(2, 3, vec![c(20.0, 0.0), c(30.0, 0.0)]),
            seg(3, 4, vec![c(30.0, 0.0), c(30.0, 10.0)]),
            seg(3, 5, vec![c(30.0, 0.0), c(40.0, 0.0)]),
        ];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        assert_eq!(graph.merge_pass_through().unwrap(), 2);
        graph.check_endpoints("merge").unwrap();
        graph.verify_degrees("merge").unwrap();

        let merged = &graph.segments[0];
        assert!(merged.alive);
        assert_eq!((merged.start, merged.end), (0, 3));
        assert_eq!(
            merged.coords,
            vec![c(0.0, 0.0), c(10.0, 0.0), c(20.0, 0.0), c(30.0, 0.0)]
        );
        assert!((merged.length - 30.0).abs() < 1e-9);
        assert!(!graph.vertices[1].alive);
        assert!(!graph.vertices[2].alive);
        assert_eq!(graph.alive_segment_count(), 3);
    }

    #[test]
    fn loop_back_to_a_junction_stays_anchored() {
        // a loop leaving vertex 0 through pass-through vertices 1 and 2
        let points = vec![c(0.0, 0.0), c(10.0, 0.0), c(10.0, 10.0), c(-10.0, 0.0)];
        let segments = vec![
            seg(0, 1, vec![c(0.0, 0.0), c(10.0, 0.0)]),
            seg(1, 2, vec![c(10.0, 0.0), c(10.0, 10.0)]),
            seg(2, 0, vec![c(10.0, 10.0), c(0.0, 0.0)]),
            seg(0, 3, vec![c(0.0, 0.0), c(-10.0, 0.0)]),
        ];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        graph.merge_pass_through().unwrap();
        let ring = &graph.segments[0];
        assert!(ring.is_loop());
        assert_eq!(ring.start, 0);
        assert_eq!(ring.coords[0], c(0.0, 0.0));
        assert_eq!(*ring.coords.last().unwrap(), c(0.0, 0.0));
        assert_eq!(graph.vertices[0].degree, 3);
    }

    #[test]
    fn free_floating_ring_is_dropped() {
        let points = vec![c(0.0, 0.0), c(10.0, 0.0), c(5.0, 5.0)];
        let segments = vec![
            seg(0, 1, vec![c(0.0, 0.0), c(10.0, 0.0)]),
            seg(1, 2, vec![c(10.0, 0.0), c(5.0, 5.0)]),
            seg(2, 0, vec![c(5.0, 5.0), c(0.0, 0.0)]),
        ];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        graph.merge_pass_through().unwrap();
        assert_eq!(graph.alive_segment_count(), 0);
    }

    #[test]
    fn short_segment_collapses_into_midpoint() {
        // star around a 2-unit segment 1-2
        let points = vec![c(-10.0, 0.0), c(0.0, 0.0), c(2.0, 0.0), c(12.0, 0.0), c(0.0, 10.0), c(2.0, -10.0)];
        let segments = vec![
            seg(0, 1, vec![c(-10.0, 0.0), c(0.0, 0.0)]),
            seg(1, 2, vec![c(0.0, 0.0), c(2.0, 0.0)]),
            seg(2, 3, vec![c(2.0, 0.0), c(12.0, 0.0)]),
            seg(4, 1, vec![c(0.0, 10.0), c(0.0, 0.0)]),
            seg(2, 5, vec![c(2.0, 0.0), c(2.0, -10.0)]),
        ];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        assert_eq!(graph.remove_short_segments(5.0), 1);
        graph.check_endpoints("short segments").unwrap();
        graph.verify_degrees("short segments").unwrap();

        let w = graph.vertices.len() - 1;
        assert_eq!(graph.vertices[w].point, c(1.0, 0.0));
        assert_eq!(graph.vertices[w].degree, 4);
        assert!(!graph.vertices[1].alive && !graph.vertices[2].alive);
        for id in [0, 2, 3, 4] {
            let s = &graph.segments[id];
            assert!(s.start == w || s.end == w, "segment {} must touch the new vertex", id);
        }
    }

    #[test]
    fn largest_component_survives() {
        let points = vec![c(0.0, 0.0), c(10.0, 0.0), c(20.0, 0.0), c(100.0, 0.0), c(110.0, 0.0)];
        let segments = vec![
            seg(3, 4, vec![c(100.0, 0.0), c(110.0, 0.0)]),
            seg(0, 1, vec![c(0.0, 0.0), c(10.0, 0.0)]),
            seg(1, 2, vec![c(10.0, 0.0), c(20.0, 0.0)]),
        ];
        let mut graph = SegmentGraph::new(points, segments, 1e-9);
        let label = graph.keep_largest_component().unwrap();
        assert_eq!(label, 1);
        assert!(!graph.segments[0].alive);
        assert!(!graph.vertices[3].alive && !graph.vertices[4].alive);
        assert_eq!(graph.alive_segment_count(), 2);
    }
}
