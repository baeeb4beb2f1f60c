use std::cell::{Cell, RefCell};

use serde_json::{Value, json};
use uwan_core::LatLng;
use uwan_core::route::Extent;
use uwan_engine::EngineError;
use uwan_engine::navigation::{LayerHandle, MapSurface};
use uwan_engine::routing::{Geolocator, Position, PositionOptions};

#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    AddLine { layer: LayerHandle, points: usize },
    AddPoint { layer: LayerHandle, position: LatLng },
    Move { layer: LayerHandle, position: LatLng },
    Remove(LayerHandle),
    Fit(Extent),
    Show { text: String, sticky: bool },
    Hide,
}

/// Map surface that logs every call.
#[derive(Default)]
pub struct RecordingMap {
    events: RefCell<Vec<MapEvent>>,
    next_layer: Cell<LayerHandle>,
}

impl RecordingMap {
    pub fn events(&self) -> Vec<MapEvent> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn instructions(&self) -> Vec<(String, bool)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                MapEvent::Show { text, sticky } => Some((text.clone(), *sticky)),
                _ => None,
            })
            .collect()
    }

    pub fn moves(&self) -> Vec<LatLng> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                MapEvent::Move { position, .. } => Some(*position),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: MapEvent) {
        self.events.borrow_mut().push(event);
    }

    fn allocate(&self) -> LayerHandle {
        let layer = self.next_layer.get() + 1;
        self.next_layer.set(layer);
        layer
    }
}

impl MapSurface for RecordingMap {
    fn add_line_layer(&self, coordinates: &[LatLng]) -> LayerHandle {
        let layer = self.allocate();
        self.record(MapEvent::AddLine {
            layer,
            points: coordinates.len(),
        });
        layer
    }

    fn add_point_layer(&self, position: LatLng) -> LayerHandle {
        let layer = self.allocate();
        self.record(MapEvent::AddPoint { layer, position });
        layer
    }

    fn move_point(&self, layer: LayerHandle, position: LatLng) {
        self.record(MapEvent::Move { layer, position });
    }

    fn remove_layer(&self, layer: LayerHandle) {
        self.record(MapEvent::Remove(layer));
    }

    fn fit_extent(&self, extent: Extent) {
        self.record(MapEvent::Fit(extent));
    }

    fn show_instruction(&self, text: &str, sticky: bool) {
        self.record(MapEvent::Show {
            text: text.to_string(),
            sticky,
        });
    }

    fn hide_instruction(&self) {
        self.record(MapEvent::Hide);
    }
}

/// Geolocator returning a fixed answer and counting calls.
pub struct ScriptedGeolocator {
    answer: Result<LatLng, String>,
    calls: Cell<usize>,
    last_options: Cell<Option<PositionOptions>>,
}

impl ScriptedGeolocator {
    pub fn at(position: LatLng) -> Self {
        Self {
            answer: Ok(position),
            calls: Cell::new(0),
            last_options: Cell::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            calls: Cell::new(0),
            last_options: Cell::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn last_options(&self) -> Option<PositionOptions> {
        self.last_options.get()
    }
}

impl Geolocator for ScriptedGeolocator {
    async fn current_position(&self, options: PositionOptions) -> Result<Position, EngineError> {
        self.calls.set(self.calls.get() + 1);
        self.last_options.set(Some(options));
        match &self.answer {
            Ok(coords) => Ok(Position {
                coords: *coords,
                accuracy: Some(5.0),
            }),
            Err(message) => Err(EngineError::Geolocation(format!("Unable to retrieve your location ({message})"))),
        }
    }
}

/// Directions response in the shape the routing service returns. `points`
/// are `(lat, lng)`; each step is `(instruction, end waypoint)`.
pub fn route_geojson(points: &[(f64, f64)], steps: &[(&str, usize)]) -> Value {
    let coordinates: Vec<Value> = points.iter().map(|(lat, lng)| json!([lng, lat])).collect();
    let mut start = 0;
    let steps: Vec<Value> = steps
        .iter()
        .map(|(instruction, end)| {
            let step = json!({"instruction": instruction, "way_points": [start, end]});
            start = *end;
            step
        })
        .collect();
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": {"type": "LineString", "coordinates": coordinates},
            "properties": {"segments": [{"steps": steps}]}
        }]
    })
}
