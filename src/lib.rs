// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

//! Street network planarization and hierarchical aggregation.
//!
//! Raw line features are sanitized into a planar graph, the graph's
//! intersections are clustered into places, and the edges between places
//! are chained into ways by pairing the straightest continuations.

#[macro_use]
extern crate serde;

pub mod analytics;
pub mod config;
pub mod error;
pub mod geometry_utils;
pub mod graph_types;
pub mod partition;
pub mod pipeline;
pub mod places;
pub mod progress;
pub mod sanitizer;
pub mod spatial;
pub mod ways;

pub use config::{PipelineConfig, PlaceConfig, SanitizeConfig, WayConfig};
pub use error::{InputError, MorphologyError, Result};
pub use graph_types::{
    Attributes, Edge, Place, PlaceEdge, PlaceGraph, PlaceKind, PlanarGraph, RawFeature, Vertex,
    Way, WaySet,
};
pub use partition::Partition;
pub use pipeline::Pipeline;
pub use places::{build_places, build_places_with};
pub use progress::{LogProgress, NoProgress, Progress, Stage};
pub use sanitizer::{sanitize, sanitize_with};
pub use ways::{build_ways, build_ways_with};
