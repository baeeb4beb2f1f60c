//! Directions client, responder origin and the per-incident route cache.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{Value, json};
use uwan_core::{CoreError, IncidentRecord, LatLng, RouteGeometry};

use crate::config::RoutingConfig;
use crate::error::EngineError;
use crate::http::{HttpMethod, HttpRequest, Transport};

const GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub max_age: Option<Duration>,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: GEOLOCATION_TIMEOUT,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub coords: LatLng,
    pub accuracy: Option<f64>,
}

/// One-shot device position. Failures are `EngineError::Geolocation`.
pub trait Geolocator {
    fn current_position(&self, options: PositionOptions) -> impl Future<Output = Result<Position, EngineError>>;
}

/// For hosts without a position source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeolocation;

impl Geolocator for NoGeolocation {
    async fn current_position(&self, _options: PositionOptions) -> Result<Position, EngineError> {
        Err(EngineError::Geolocation("Geolocation is not supported on this device.".into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    pub responder: LatLng,
    pub geometry: RouteGeometry,
    /// Directions response as received.
    pub raw: Value,
}

pub struct RouteService<T, G> {
    transport: T,
    geolocator: G,
    config: RoutingConfig,
    cache: RefCell<HashMap<String, Rc<RoutePlan>>>,
}

impl<T: Transport, G: Geolocator> RouteService<T, G> {
    pub fn new(transport: T, geolocator: G, config: RoutingConfig) -> Self {
        Self {
            transport,
            geolocator,
            config,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn geolocator(&self) -> &G {
        &self.geolocator
    }

    pub fn cached_routes(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    pub async fn fetch_route(&self, start: LatLng, end: LatLng) -> Result<Value, EngineError> {
        if self.config.api_key.trim().is_empty() {
            return Err(EngineError::Configuration("OpenRouteService API key is not configured.".into()));
        }

        let url = format!("{}/{}/geojson", self.config.endpoint.trim_end_matches('/'), self.config.profile);
        let mut request = HttpRequest::new(HttpMethod::Post, url);
        request.headers.push(("Authorization".into(), self.config.api_key.clone()));
        request.headers.push(("Content-Type".into(), "application/json".into()));
        request.body = Some(json!({
            "coordinates": [[start.lng, start.lat], [end.lng, end.lat]],
        }));

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(EngineError::RemoteStatus {
                context: "Routing request",
                status: response.status,
            });
        }
        let raw = serde_json::from_str(&response.body).map_err(CoreError::from)?;
        Ok(raw)
    }

    /// Device position when enabled, falling back to the fixed location.
    pub async fn responder_origin(&self) -> Result<LatLng, EngineError> {
        let responder = &self.config.responder;
        if responder.use_geolocation {
            return match self.geolocator.current_position(PositionOptions::default()).await {
                Ok(position) => Ok(position.coords),
                Err(e) => match responder.location {
                    Some(fixed) => {
                        tracing::warn!(error = %e, "geolocation failed, using fixed responder location");
                        Ok(fixed)
                    }
                    None => Err(e),
                },
            };
        }
        responder
            .location
            .ok_or_else(|| EngineError::Configuration("Responder location is not configured.".into()))
    }

    /// Routes are cached per incident only when the responder origin is fixed.
    pub async fn route_to_incident(&self, incident: &IncidentRecord) -> Result<Rc<RoutePlan>, EngineError> {
        let location = incident
            .location
            .ok_or_else(|| EngineError::MissingLocation(incident.id.to_string()))?;
        let cache_key = (!self.config.responder.use_geolocation).then(|| cache_key(incident, location.lat, location.lng));

        if let Some(key) = &cache_key {
            if let Some(plan) = self.cache.borrow().get(key) {
                tracing::debug!(key = key.as_str(), "route cache hit");
                return Ok(Rc::clone(plan));
            }
        }

        let responder = self.responder_origin().await?;
        let raw = self.fetch_route(responder, LatLng::new(location.lat, location.lng)).await?;
        let geometry = RouteGeometry::from_geojson(&raw)?;
        let plan = Rc::new(RoutePlan {
            responder,
            geometry,
            raw,
        });

        if let Some(key) = cache_key {
            self.cache.borrow_mut().insert(key, Rc::clone(&plan));
        }
        Ok(plan)
    }
}

fn cache_key(incident: &IncidentRecord, lat: f64, lng: f64) -> String {
    if incident.id.is_empty() {
        format!("{lat},{lng}")
    } else {
        incident.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uwan_core::{IncidentStatus, Location};

    #[test]
    fn cache_key_prefers_id() {
        let mut incident = IncidentRecord::new("a".into(), IncidentStatus::NeedHelp, "2024-01-01T00:00:00.000Z");
        incident.location = Location::new(14.5, 121.0, None);
        assert_eq!(cache_key(&incident, 14.5, 121.0), "a");
        incident.id = "".into();
        assert_eq!(cache_key(&incident, 14.5, 121.0), "14.5,121");
    }

    #[test]
    fn default_position_options() {
        let options = PositionOptions::default();
        assert!(options.high_accuracy);
        assert_eq!(options.timeout, Duration::from_secs(15));
        assert_eq!(options.max_age, None);
    }
}
