use crate::error::{InputError, Result};

fn positive(name: &'static str, value: f64) -> Result<(), InputError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(InputError::OutOfRange {
            name,
            expected: "a positive finite number",
            value,
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), InputError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(InputError::OutOfRange {
            name,
            expected: "a non-negative finite number",
            value,
        })
    }
}

/// Tolerances for turning raw features into a planar graph. All distances
/// are in the units of the input coordinates.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Radius within which dangling ends and near-miss vertices are snapped.
    pub snap_distance: f64,
    /// Split segments shorter than this are collapsed into a midpoint vertex.
    pub min_edge_length: f64,
    /// Numerical tolerance for "lies on" and coordinate equality tests.
    pub tolerance: f64,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            snap_distance: 0.2,
            min_edge_length: 4.0,
            tolerance: 1e-6,
        }
    }
}

impl SanitizeConfig {
    pub fn validate(&self) -> Result<()> {
        positive("snap_distance", self.snap_distance)?;
        non_negative("min_edge_length", self.min_edge_length)?;
        positive("tolerance", self.tolerance)?;
        if self.tolerance >= self.snap_distance {
            return Err(InputError::OutOfRange {
                name: "tolerance",
                expected: "smaller than snap_distance",
                value: self.tolerance,
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PlaceConfig {
    /// Radius of the buffer drawn around every intersection vertex.
    pub buffer_size: f64,
    /// Number of sides of the polygon approximating each buffer circle.
    pub buffer_segments: usize,
    /// Buffers unioned per partial result before the partials are combined.
    pub union_chunk_size: usize,
}

impl Default for PlaceConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4.0,
            buffer_segments: 16,
            union_chunk_size: 64,
        }
    }
}

impl PlaceConfig {
    pub fn validate(&self) -> Result<()> {
        positive("buffer_size", self.buffer_size)?;
        if self.buffer_segments < 4 {
            return Err(InputError::OutOfRange {
                name: "buffer_segments",
                expected: "at least 4",
                value: self.buffer_segments as f64,
            }
            .into());
        }
        if self.union_chunk_size < 2 {
            return Err(InputError::OutOfRange {
                name: "union_chunk_size",
                expected: "at least 2",
                value: self.union_chunk_size as f64,
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WayConfig {
    /// Largest deviation from a straight continuation, in degrees, that still
    /// pairs two edges at a place.
    pub angle_threshold_deg: f64,
    /// Share of the deviation coefficient given to the endpoint gap; the rest
    /// goes to the angle.
    pub gap_weight: f64,
    /// Compute topological radius and accessibility for every way.
    pub compute_radius: bool,
}

impl Default for WayConfig {
    fn default() -> Self {
        Self {
            angle_threshold_deg: 60.0,
            gap_weight: 0.25,
            compute_radius: false,
        }
    }
}

impl WayConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.angle_threshold_deg.is_finite()
            && self.angle_threshold_deg > 0.0
            && self.angle_threshold_deg <= 180.0)
        {
            return Err(InputError::OutOfRange {
                name: "angle_threshold_deg",
                expected: "within (0, 180]",
                value: self.angle_threshold_deg,
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.gap_weight) {
            return Err(InputError::OutOfRange {
                name: "gap_weight",
                expected: "within [0, 1]",
                value: self.gap_weight,
            }
            .into());
        }
        Ok(())
    }

    pub fn angle_threshold_rad(&self) -> f64 {
        self.angle_threshold_deg.to_radians()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub sanitize: SanitizeConfig,
    pub places: PlaceConfig,
    pub ways: WayConfig,
}

impl PipelineConfig {
    /// Parses a JSON document; missing sections and fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_json::from_str(json).map_err(|e| InputError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sanitize.validate()?;
        self.places.validate()?;
        self.ways.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MorphologyError;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn non_positive_snap_distance_is_rejected() {
        let config = SanitizeConfig {
            snap_distance: 0.0,
            ..Default::default()
        };
        match config.validate() {
            Err(MorphologyError::Input(InputError::OutOfRange { name, .. })) => {
                assert_eq!(name, "snap_distance")
            }
            other => panic!("expected out of range error, got {:?}", other),
        }
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config =
            PipelineConfig::from_json_str(r#"{"ways": {"angle_threshold_deg": 10.0}}"#).unwrap();
        assert_eq!(config.ways.angle_threshold_deg, 10.0);
        assert_eq!(config.ways.gap_weight, WayConfig::default().gap_weight);
        assert_eq!(config.sanitize, SanitizeConfig::default());
    }

    #[test]
    fn json_with_invalid_threshold_fails_validation() {
        let err = PipelineConfig::from_json_str(r#"{"ways": {"angle_threshold_deg": 270.0}}"#)
            .unwrap_err();
        assert!(matches!(err, MorphologyError::Input(InputError::OutOfRange { .. })));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = PipelineConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, MorphologyError::Input(InputError::Config(_))));
    }
}
