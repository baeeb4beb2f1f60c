//! Draws routes on the map collaborator and walks a marker along them.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use uwan_core::route::{ARRIVED_MESSAGE, AnimationFrame, Extent, RouteAnimation};
use uwan_core::{IncidentRecord, LatLng, RouteGeometry};

use crate::error::EngineError;
use crate::http::Transport;
use crate::routing::{Geolocator, RoutePlan, RouteService};

pub type LayerHandle = u64;

/// Rendering side of the map. Implementations own their interior mutability.
pub trait MapSurface {
    fn add_line_layer(&self, coordinates: &[LatLng]) -> LayerHandle;
    fn add_point_layer(&self, position: LatLng) -> LayerHandle;
    fn move_point(&self, layer: LayerHandle, position: LatLng);
    fn remove_layer(&self, layer: LayerHandle);
    fn fit_extent(&self, extent: Extent);
    /// Non-sticky messages are hidden by the surface after a short while.
    fn show_instruction(&self, text: &str, sticky: bool);
    fn hide_instruction(&self);
}

struct ActiveAnimation {
    generation: u64,
    marker: LayerHandle,
    task: JoinHandle<()>,
}

type AnimationSlot = Rc<RefCell<Option<ActiveAnimation>>>;

pub struct Navigator<M> {
    map: Rc<M>,
    route_layer: Cell<Option<LayerHandle>>,
    animation: AnimationSlot,
    generation: Cell<u64>,
}

impl<M: MapSurface + 'static> Navigator<M> {
    pub fn new(map: Rc<M>) -> Self {
        Self {
            map,
            route_layer: Cell::new(None),
            animation: Rc::new(RefCell::new(None)),
            generation: Cell::new(0),
        }
    }

    pub fn map(&self) -> &Rc<M> {
        &self.map
    }

    pub fn route_layer(&self) -> Option<LayerHandle> {
        self.route_layer.get()
    }

    pub fn is_animating(&self) -> bool {
        self.animation.borrow().is_some()
    }

    /// Replace the current route layer and fit the view to it. An empty
    /// geometry still replaces the layer but leaves the view alone.
    pub fn draw_route(&self, geometry: &RouteGeometry) {
        self.clear_animation(false);
        if let Some(previous) = self.route_layer.take() {
            self.map.remove_layer(previous);
        }
        let layer = self.map.add_line_layer(&geometry.coordinates);
        self.route_layer.set(Some(layer));
        if let Some(extent) = geometry.extent() {
            self.map.fit_extent(extent);
        }
    }

    /// Replaces any running animation. Returns false when the route is too
    /// short to animate. Must run inside a `LocalSet`.
    pub fn start_animation(&self, geometry: &RouteGeometry) -> bool {
        let Some(mut animation) = RouteAnimation::new(geometry) else {
            return false;
        };
        self.clear_animation(false);

        let marker = self.map.add_point_layer(animation.start_position());
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let delay = animation.tick_delay();
        let map = Rc::clone(&self.map);
        let slot = Rc::clone(&self.animation);

        let task = tokio::task::spawn_local(async move {
            let mut ticker = time::interval_at(Instant::now() + delay, delay);
            loop {
                ticker.tick().await;
                match animation.advance() {
                    AnimationFrame::Moved { position, instruction } => {
                        map.move_point(marker, position);
                        if let Some(text) = instruction {
                            map.show_instruction(&text, true);
                        }
                    }
                    AnimationFrame::Arrived => break,
                }
            }
            let current = slot.borrow().as_ref().is_some_and(|a| a.generation == generation);
            if current {
                slot.borrow_mut().take();
                map.remove_layer(marker);
                map.hide_instruction();
                map.show_instruction(ARRIVED_MESSAGE, false);
            }
        });

        *self.animation.borrow_mut() = Some(ActiveAnimation {
            generation,
            marker,
            task,
        });
        true
    }

    /// Stop the animation and remove its marker.
    pub fn clear_animation(&self, preserve_instruction: bool) {
        let active = self.animation.borrow_mut().take();
        if let Some(active) = active {
            active.task.abort();
            self.map.remove_layer(active.marker);
        }
        if !preserve_instruction {
            self.map.hide_instruction();
        }
    }

    pub async fn show_route_to_incident<T, G>(
        &self,
        routes: &RouteService<T, G>,
        incident: &IncidentRecord,
    ) -> Result<Rc<RoutePlan>, EngineError>
    where
        T: Transport,
        G: Geolocator,
    {
        let plan = routes.route_to_incident(incident).await.inspect_err(|e| {
            tracing::warn!(id = %incident.id, error = %e, "routing failed");
        })?;
        self.draw_route(&plan.geometry);
        Ok(plan)
    }

    pub async fn drive_to_incident<T, G>(
        &self,
        routes: &RouteService<T, G>,
        incident: &IncidentRecord,
    ) -> Result<Rc<RoutePlan>, EngineError>
    where
        T: Transport,
        G: Geolocator,
    {
        let plan = self.show_route_to_incident(routes, incident).await?;
        self.start_animation(&plan.geometry);
        Ok(plan)
    }
}
