// ===========================================================================
// Entity shapes flowing between the pipeline stages
// ===========================================================================
use crate::error::{MorphologyError, Result};
use crate::progress::Stage;
use geo_types::{Coord, LineString, Polygon};
use std::collections::BTreeMap;

pub type Attributes = BTreeMap<String, String>;

/// Caller-owned input line. Never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFeature {
    pub id: u64,
    pub polyline: LineString,
    pub attributes: Option<Attributes>,
    /// Passed through to the edges this feature covers.
    pub elevation: Option<f64>,
}

impl RawFeature {
    pub fn new(id: u64, polyline: LineString) -> Self {
        Self {
            id,
            polyline,
            attributes: None,
            elevation: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vertex {
    pub id: usize,
    pub point: Coord,
    /// Incident edge ends; a self-loop counts twice.
    pub degree: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: usize,
    pub start_vertex: usize,
    pub end_vertex: usize,
    pub geometry: LineString,
    pub length: f64,
    /// Other edge ends meeting this edge at its two vertices.
    pub connectivity: usize,
    pub component: usize,
    /// Id of the raw feature whose attributes this edge inherited.
    pub source_feature: Option<u64>,
    pub attributes: Option<Attributes>,
    pub elevation: Option<f64>,
}

impl Edge {
    pub fn is_loop(&self) -> bool {
        self.start_vertex == self.end_vertex
    }
}

/// Output of the sanitizer. Ids are dense: `vertices[i].id == i`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanarGraph {
    pub vertices: Vec<Vertex>,
    pub edges: Vec<Edge>,
}

impl PlanarGraph {
    /// Edge ids incident to each vertex; a self-loop is listed twice.
    pub fn incidence(&self) -> Vec<Vec<usize>> {
        let mut incidence = vec![Vec::new(); self.vertices.len()];
        for edge in &self.edges {
            if let Some(list) = incidence.get_mut(edge.start_vertex) {
                list.push(edge.id);
            }
            if let Some(list) = incidence.get_mut(edge.end_vertex) {
                list.push(edge.id);
            }
        }
        incidence
    }

    /// Neighbouring vertex ids of each vertex, sorted and deduplicated.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.vertices.len()];
        for edge in &self.edges {
            if edge.is_loop() {
                continue;
            }
            adjacency[edge.start_vertex].push(edge.end_vertex);
            adjacency[edge.end_vertex].push(edge.start_vertex);
        }
        for list in &mut adjacency {
            list.sort_unstable();
            list.dedup();
        }
        adjacency
    }

    /// Checks the invariants the sanitizer guarantees: resolved endpoints,
    /// degrees matching incidence and a single component.
    pub fn check_invariants(&self) -> Result<()> {
        self.check_invariants_during(Stage::Sanitize)
    }

    /// Same checks, with failures attributed to `stage`.
    pub(crate) fn check_invariants_during(&self, stage: Stage) -> Result<()> {
        for (i, vertex) in self.vertices.iter().enumerate() {
            if vertex.id != i {
                return Err(MorphologyError::consistency(
                    stage,
                    format!("vertex at index {} carries id {}", i, vertex.id),
                ));
            }
        }
        for (i, edge) in self.edges.iter().enumerate() {
            if edge.id != i {
                return Err(MorphologyError::consistency(
                    stage,
                    format!("edge at index {} carries id {}", i, edge.id),
                ));
            }
            if edge.start_vertex >= self.vertices.len() || edge.end_vertex >= self.vertices.len() {
                return Err(MorphologyError::consistency(
                    stage,
                    format!("edge {} references a missing vertex", edge.id),
                ));
            }
        }
        for (vertex, incident) in self.vertices.iter().zip(self.incidence()) {
            if vertex.degree != incident.len() {
                return Err(MorphologyError::consistency(
                    stage,
                    format!(
                        "vertex {} has degree {} but {} incident edge ends",
                        vertex.id,
                        vertex.degree,
                        incident.len()
                    ),
                ));
            }
        }
        if let Some(first) = self.edges.first() {
            if self.edges.iter().any(|e| e.component != first.component) {
                return Err(MorphologyError::consistency(
                    stage,
                    "edges span more than one component",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PlaceKind {
    /// Hull of unioned vertex buffers.
    Cluster,
    /// Caller-supplied polygon, possibly merged with clusters.
    Supplied,
    /// Degenerate place around a single vertex no other place covers.
    Singleton,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    pub id: usize,
    pub polygon: Polygon,
    pub member_vertices: Vec<usize>,
    pub kind: PlaceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceEdge {
    pub id: usize,
    /// Edge of the planar graph this place edge re-expresses.
    pub edge_id: usize,
    pub start_place: usize,
    pub end_place: usize,
    pub geometry: LineString,
    pub length: f64,
    /// Filled by the way builder.
    pub way_id: Option<usize>,
    pub attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaceGraph {
    pub places: Vec<Place>,
    pub place_edges: Vec<PlaceEdge>,
    /// Place of every planar-graph vertex, indexed by vertex id.
    pub vertex_places: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Way {
    pub id: usize,
    pub geometry: LineString,
    /// Member lengths plus the gap corrections applied at every join.
    pub length: f64,
    /// Member place edges in walking order.
    pub members: Vec<usize>,
    /// Distinct other ways sharing a place with this one.
    pub degree: usize,
    /// Place-edge ends of other ways at this way's places.
    pub connectivity: usize,
    pub start_place: usize,
    pub end_place: usize,
    pub closed: bool,
    pub topological_radius: Option<usize>,
    pub accessibility: Option<f64>,
    pub attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WaySet {
    pub ways: Vec<Way>,
    /// Place edges with `way_id` resolved.
    pub place_edges: Vec<PlaceEdge>,
}
