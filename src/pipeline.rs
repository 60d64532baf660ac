//! Batch driver owning each stage's committed output.

use crate::config::PipelineConfig;
use crate::error::{InputError, Result};
use crate::graph_types::{PlaceGraph, PlanarGraph, RawFeature, WaySet};
use crate::places::build_places_with;
use crate::progress::{NoProgress, Progress, Stage};
use crate::sanitizer::sanitize_with;
use crate::ways::build_ways_with;
use geo::Polygon;
use log::info;

/// Runs sanitize, places and ways in order. A stage only replaces its own
/// output once it succeeds, so after an error the earlier outputs are still
/// there to inspect.
pub struct Pipeline {
    config: PipelineConfig,
    progress: Box<dyn Progress>,
    graph: Option<PlanarGraph>,
    places: Option<PlaceGraph>,
    ways: Option<WaySet>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress: Box::new(NoProgress),
            graph: None,
            places: None,
            ways: None,
        })
    }

    pub fn with_progress(mut self, progress: impl Progress + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Sanitize `raw`, discarding any outputs of a previous run.
    pub fn sanitize(&mut self, raw: &[RawFeature]) -> Result<&PlanarGraph> {
        let graph = sanitize_with(raw, &self.config.sanitize, self.progress.as_mut())?;
        self.places = None;
        self.ways = None;
        Ok(&*self.graph.insert(graph))
    }

    pub fn build_places(&mut self, polygons: Option<&[Polygon]>) -> Result<&PlaceGraph> {
        let graph = self
            .graph
            .as_ref()
            .ok_or(InputError::StageNotRun(Stage::Sanitize))?;
        let places = build_places_with(graph, &self.config.places, polygons, self.progress.as_mut())?;
        self.ways = None;
        Ok(&*self.places.insert(places))
    }

    pub fn build_ways(&mut self) -> Result<&WaySet> {
        let places = self
            .places
            .as_ref()
            .ok_or(InputError::StageNotRun(Stage::Places))?;
        let ways = build_ways_with(places, &self.config.ways, self.progress.as_mut())?;
        Ok(&*self.ways.insert(ways))
    }

    /// All three stages back to back.
    pub fn run(&mut self, raw: &[RawFeature], polygons: Option<&[Polygon]>) -> Result<&WaySet> {
        self.sanitize(raw)?;
        self.build_places(polygons)?;
        self.build_ways()?;
        let ways = self
            .ways
            .as_ref()
            .ok_or(InputError::StageNotRun(Stage::Ways))?;
        info!("Pipeline finished with {} ways", ways.ways.len());
        Ok(ways)
    }

    pub fn graph(&self) -> Option<&PlanarGraph> {
        self.graph.as_ref()
    }

    pub fn places(&self) -> Option<&PlaceGraph> {
        self.places.as_ref()
    }

    pub fn ways(&self) -> Option<&WaySet> {
        self.ways.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MorphologyError;
    use crate::progress::LogProgress;
    use geo::line_string;

    fn cross() -> Vec<RawFeature> {
        vec![
            RawFeature::new(1, line_string![(x: -50.0, y: 0.0), (x: 50.0, y: 0.0)]),
            RawFeature::new(2, line_string![(x: 0.0, y: -50.0), (x: 0.0, y: 50.0)]),
        ]
    }

    #[test]
    fn places_before_sanitize_is_rejected() {
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let err = pipeline.build_places(None).unwrap_err();
        assert_eq!(err, MorphologyError::Input(InputError::StageNotRun(Stage::Sanitize)));
    }

    #[test]
    fn ways_before_places_is_rejected() {
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        pipeline.sanitize(&cross()).unwrap();
        let err = pipeline.build_ways().unwrap_err();
        assert_eq!(err, MorphologyError::Input(InputError::StageNotRun(Stage::Places)));
    }

    #[test]
    fn failed_stage_keeps_earlier_output() {
        let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        pipeline.sanitize(&cross()).unwrap();
        let err = pipeline.sanitize(&[]).unwrap_err();
        assert!(matches!(err, MorphologyError::Input(InputError::EmptyDataset)));
        assert_eq!(pipeline.graph().map(|g| g.edges.len()), Some(4));
    }

    #[test]
    fn straight_crossing_yields_two_ways() {
        let mut pipeline = Pipeline::new(PipelineConfig::default())
            .unwrap()
            .with_progress(LogProgress);
        let ways = pipeline.run(&cross(), None).unwrap();
        assert_eq!(ways.ways.len(), 2);
        assert!(ways.ways.iter().all(|w| w.degree == 1));
        assert!(pipeline.places().is_some());
    }

    #[test]
    fn every_stage_reports_completion() {
        let finished = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = finished.clone();
        let mut pipeline = Pipeline::new(PipelineConfig::default())
            .unwrap()
            .with_progress(move |stage: Stage, _step: &str, fraction: f64| {
                if fraction >= 1.0 {
                    sink.borrow_mut().push(stage);
                }
            });
        pipeline.run(&cross(), None).unwrap();
        assert_eq!(*finished.borrow(), vec![Stage::Sanitize, Stage::Places, Stage::Ways]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.ways.angle_threshold_deg = 200.0;
        assert!(Pipeline::new(config).is_err());
    }
}
