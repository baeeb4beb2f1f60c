//! Directions geometry and the turn-by-turn animation state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::field_value::{as_finite_number, lookup_path};

pub const ARRIVED_MESSAGE: &str = "Arrived at location.";

const MIN_TICK_MS: u64 = 120;
const ANIMATION_BUDGET_MS: u64 = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min: LatLng,
    pub max: LatLng,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteStep {
    pub instruction: String,
    /// Index of the last coordinate belonging to this step.
    pub end_waypoint: Option<usize>,
    pub distance_m: Option<f64>,
    pub duration_s: Option<f64>,
}

/// First feature of a directions GeoJSON response.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteGeometry {
    pub coordinates: Vec<LatLng>,
    pub steps: Vec<RouteStep>,
}

impl RouteGeometry {
    pub fn from_geojson(raw: &Value) -> Result<Self, CoreError> {
        let feature = lookup_path(raw, "features.0")
            .ok_or_else(|| CoreError::InvalidRoute("response has no route feature".into()))?;
        let coords = lookup_path(feature, "geometry.coordinates")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::InvalidRoute("route feature has no coordinates".into()))?;

        let mut coordinates = Vec::with_capacity(coords.len());
        for pair in coords {
            let lng = lookup_path(pair, "0").and_then(as_finite_number);
            let lat = lookup_path(pair, "1").and_then(as_finite_number);
            match (lat, lng) {
                (Some(lat), Some(lng)) => coordinates.push(LatLng::new(lat, lng)),
                _ => return Err(CoreError::InvalidRoute("non-numeric coordinate".into())),
            }
        }
        if coordinates.is_empty() {
            return Err(CoreError::InvalidRoute("route has no coordinates".into()));
        }

        let steps = lookup_path(feature, "properties.segments")
            .and_then(Value::as_array)
            .map(|segments| {
                segments
                    .iter()
                    .filter_map(|segment| segment.get("steps").and_then(Value::as_array))
                    .flatten()
                    .map(parse_step)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { coordinates, steps })
    }

    /// Bounding box of the line. `None` for a geometry with no coordinates.
    pub fn extent(&self) -> Option<Extent> {
        let first = *self.coordinates.first()?;
        Some(self.coordinates.iter().fold(
            Extent { min: first, max: first },
            |acc, c| Extent {
                min: LatLng::new(acc.min.lat.min(c.lat), acc.min.lng.min(c.lng)),
                max: LatLng::new(acc.max.lat.max(c.lat), acc.max.lng.max(c.lng)),
            },
        ))
    }
}

fn parse_step(step: &Value) -> RouteStep {
    RouteStep {
        instruction: step
            .get("instruction")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        end_waypoint: lookup_path(step, "way_points.1")
            .and_then(Value::as_u64)
            .map(|w| w as usize),
        distance_m: step.get("distance").and_then(as_finite_number),
        duration_s: step.get("duration").and_then(as_finite_number),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnimationFrame {
    Moved {
        position: LatLng,
        instruction: Option<String>,
    },
    Arrived,
}

/// Marker walk along route coordinates, one coordinate per tick.
#[derive(Debug, Clone)]
pub struct RouteAnimation {
    coordinates: Vec<LatLng>,
    steps: Vec<RouteStep>,
    coord_index: usize,
    step_index: usize,
    next_waypoint: Option<usize>,
    shown_initial: bool,
    finished: bool,
}

impl RouteAnimation {
    /// Needs at least two coordinates to have anywhere to go.
    pub fn new(geometry: &RouteGeometry) -> Option<Self> {
        if geometry.coordinates.len() < 2 {
            return None;
        }
        Some(Self {
            coordinates: geometry.coordinates.clone(),
            steps: geometry.steps.clone(),
            coord_index: 0,
            step_index: 0,
            next_waypoint: geometry.steps.first().and_then(|s| s.end_waypoint),
            shown_initial: false,
            finished: false,
        })
    }

    pub fn start_position(&self) -> LatLng {
        self.coordinates[0]
    }

    pub fn tick_delay(&self) -> Duration {
        let per_coord = ANIMATION_BUDGET_MS / self.coordinates.len() as u64;
        Duration::from_millis(per_coord.max(MIN_TICK_MS))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn advance(&mut self) -> AnimationFrame {
        if self.finished {
            return AnimationFrame::Arrived;
        }
        self.coord_index += 1;
        if self.coord_index >= self.coordinates.len() {
            self.finished = true;
            return AnimationFrame::Arrived;
        }

        let mut instruction = None;
        if !self.shown_initial && !self.steps.is_empty() {
            instruction = non_empty(&self.steps[0].instruction);
            self.shown_initial = true;
        }
        if self.next_waypoint.is_some_and(|w| self.coord_index >= w) {
            if let Some(step) = self.steps.get(self.step_index) {
                instruction = non_empty(&step.instruction).or(instruction);
            }
            self.step_index += 1;
            self.next_waypoint = self.steps.get(self.step_index).and_then(|s| s.end_waypoint);
        }

        AnimationFrame::Moved {
            position: self.coordinates[self.coord_index],
            instruction,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
