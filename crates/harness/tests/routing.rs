use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use serde_json::json;
use tokio::task::LocalSet;
use tokio::time;
use uwan_core::route::ARRIVED_MESSAGE;
use uwan_core::{LatLng, RouteGeometry};
use uwan_engine::config::{ResponderConfig, RoutingConfig};
use uwan_engine::navigation::Navigator;
use uwan_engine::routing::{NoGeolocation, RouteService};
use uwan_engine::{EngineError, HttpMethod};
use uwan_harness::{MapEvent, RecordingMap, ScriptedGeolocator, ScriptedTransport, incident, incident_at, route_geojson};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const BASE: LatLng = LatLng { lat: 14.55, lng: 121.02 };

async fn in_local<F: Future<Output = TestResult>>(f: F) -> TestResult {
    LocalSet::new().run_until(f).await
}

fn routing(use_geolocation: bool, location: Option<LatLng>) -> RoutingConfig {
    RoutingConfig {
        api_key: "ors-test-key".into(),
        responder: ResponderConfig {
            use_geolocation,
            location,
        },
        ..Default::default()
    }
}

fn sample_route() -> serde_json::Value {
    route_geojson(
        &[(14.55, 121.02), (14.56, 121.03), (14.57, 121.03), (14.58, 121.04)],
        &[("Head north on Rizal Ave", 1), ("Turn right onto Mabini St", 3), ("Arrive at destination", 3)],
    )
}

// ============================================================================
// Route service
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn missing_api_key_fails_before_any_request() -> TestResult {
    let transport = ScriptedTransport::new();
    let mut config = routing(false, Some(BASE));
    config.api_key = String::new();
    let routes = RouteService::new(transport.clone(), NoGeolocation, config);

    let target = incident_at("a", "2024-01-01T00:00:00Z", 14.58, 121.04);
    let err = routes.route_to_incident(&target).await.err().ok_or("expected error")?;
    assert!(matches!(err, EngineError::Configuration(_)));
    assert_eq!(err.to_string(), "configuration error: OpenRouteService API key is not configured.");
    assert_eq!(transport.request_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn directions_request_shape() -> TestResult {
    let transport = ScriptedTransport::new();
    transport.respond(HttpMethod::Post, 200, sample_route());
    let routes = RouteService::new(transport.clone(), NoGeolocation, routing(false, Some(BASE)));

    let raw = routes.fetch_route(BASE, LatLng::new(14.58, 121.04)).await?;
    assert_eq!(RouteGeometry::from_geojson(&raw)?.coordinates.len(), 4);

    let request = &transport.requests()[0];
    assert_eq!(
        request.url,
        "https://api.openrouteservice.org/v2/directions/driving-car/geojson"
    );
    assert_eq!(request.header("authorization"), Some("ors-test-key"));
    assert_eq!(
        request.body,
        Some(json!({"coordinates": [[121.02, 14.55], [121.04, 14.58]]}))
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn routing_status_errors_carry_the_code() -> TestResult {
    let transport = ScriptedTransport::new();
    transport.respond(HttpMethod::Post, 403, json!({"error": "quota"}));
    let routes = RouteService::new(transport, NoGeolocation, routing(false, Some(BASE)));
    let err = routes.fetch_route(BASE, BASE).await.err().ok_or("expected error")?;
    assert_eq!(err.to_string(), "Routing request failed (403)");
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn fixed_origin_routes_are_cached_per_incident() -> TestResult {
    let transport = ScriptedTransport::new();
    transport.set_default(HttpMethod::Post, 200, sample_route());
    let routes = RouteService::new(transport.clone(), NoGeolocation, routing(false, Some(BASE)));
    let target = incident_at("a", "2024-01-01T00:00:00Z", 14.58, 121.04);

    let first = routes.route_to_incident(&target).await?;
    let second = routes.route_to_incident(&target).await?;
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(first.responder, BASE);
    assert_eq!(transport.request_count(), 1);
    assert_eq!(routes.cached_routes(), 1);

    let other = incident_at("b", "2024-01-01T00:00:00Z", 14.60, 121.05);
    routes.route_to_incident(&other).await?;
    assert_eq!(transport.request_count(), 2);

    routes.clear_cache();
    routes.route_to_incident(&target).await?;
    assert_eq!(transport.request_count(), 3);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn geolocated_routes_are_not_cached() -> TestResult {
    let transport = ScriptedTransport::new();
    transport.set_default(HttpMethod::Post, 200, sample_route());
    let here = LatLng::new(14.50, 121.00);
    let geolocator = ScriptedGeolocator::at(here);
    let routes = RouteService::new(transport.clone(), geolocator, routing(true, None));
    let target = incident_at("a", "2024-01-01T00:00:00Z", 14.58, 121.04);

    let plan = routes.route_to_incident(&target).await?;
    routes.route_to_incident(&target).await?;
    assert_eq!(plan.responder, here);
    assert_eq!(transport.request_count(), 2);
    assert_eq!(routes.cached_routes(), 0);

    assert_eq!(routes.geolocator().calls(), 2);
    let options = routes.geolocator().last_options().ok_or("geolocator never asked")?;
    assert!(options.high_accuracy);
    assert_eq!(options.timeout, Duration::from_secs(15));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn responder_origin_fallbacks() -> TestResult {
    let geolocator = ScriptedGeolocator::failing("permission denied");
    let routes = RouteService::new(ScriptedTransport::new(), geolocator, routing(true, Some(BASE)));
    assert_eq!(routes.responder_origin().await?, BASE);

    let geolocator = ScriptedGeolocator::failing("permission denied");
    let routes = RouteService::new(ScriptedTransport::new(), geolocator, routing(true, None));
    let err = routes.responder_origin().await.err().ok_or("expected error")?;
    assert_eq!(err.to_string(), "Unable to retrieve your location (permission denied)");

    let routes = RouteService::new(ScriptedTransport::new(), NoGeolocation, routing(false, None));
    let err = routes.responder_origin().await.err().ok_or("expected error")?;
    assert_eq!(err.to_string(), "configuration error: Responder location is not configured.");
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn incidents_without_location_cannot_be_routed() -> TestResult {
    let transport = ScriptedTransport::new();
    let routes = RouteService::new(transport.clone(), NoGeolocation, routing(false, Some(BASE)));
    let err = routes
        .route_to_incident(&incident("a", "2024-01-01T00:00:00Z"))
        .await
        .err()
        .ok_or("expected error")?;
    assert_eq!(err.to_string(), "no coordinates stored for incident a");
    assert_eq!(transport.request_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn unusable_route_payload_is_an_error() -> TestResult {
    let transport = ScriptedTransport::new();
    transport.respond(HttpMethod::Post, 200, json!({"features": []}));
    transport.respond_raw(HttpMethod::Post, 200, "not json");
    let routes = RouteService::new(transport, NoGeolocation, routing(false, Some(BASE)));
    let target = incident_at("a", "2024-01-01T00:00:00Z", 14.58, 121.04);

    assert!(matches!(routes.route_to_incident(&target).await, Err(EngineError::Core(_))));
    assert!(matches!(routes.route_to_incident(&target).await, Err(EngineError::Core(_))));
    assert_eq!(routes.cached_routes(), 0);
    Ok(())
}

// ============================================================================
// Navigator
// ============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn draw_route_replaces_previous_layer() -> TestResult {
    in_local(async {
        let map = Rc::new(RecordingMap::default());
        let navigator = Navigator::new(Rc::clone(&map));
        let route = RouteGeometry::from_geojson(&sample_route())?;

        navigator.draw_route(&route);
        let first = navigator.route_layer().ok_or("no route layer")?;
        navigator.draw_route(&route);
        let second = navigator.route_layer().ok_or("no route layer")?;
        assert_ne!(first, second);

        let events = map.events();
        assert!(events.contains(&MapEvent::Remove(first)));
        assert!(events.contains(&MapEvent::AddLine { layer: second, points: 4 }));
        assert_eq!(events.last(), Some(&MapEvent::Fit(route.extent().ok_or("no extent")?)));
        Ok(())
    })
    .await
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn empty_geometry_draws_without_fitting() -> TestResult {
    in_local(async {
        let map = Rc::new(RecordingMap::default());
        let navigator = Navigator::new(Rc::clone(&map));
        let empty = RouteGeometry {
            coordinates: Vec::new(),
            steps: Vec::new(),
        };

        navigator.draw_route(&empty);
        let layer = navigator.route_layer().ok_or("no route layer")?;
        let events = map.events();
        assert!(events.contains(&MapEvent::AddLine { layer, points: 0 }));
        assert!(!events.iter().any(|e| matches!(e, MapEvent::Fit(_))));
        assert!(!navigator.start_animation(&empty));
        Ok(())
    })
    .await
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn animation_walks_the_route_with_instructions() -> TestResult {
    in_local(async {
        let map = Rc::new(RecordingMap::default());
        let navigator = Navigator::new(Rc::clone(&map));
        let route = RouteGeometry::from_geojson(&sample_route())?;

        assert!(navigator.start_animation(&route));
        assert!(navigator.is_animating());
        // 8000 ms over 4 coordinates.
        time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(map.moves(), vec![LatLng::new(14.56, 121.03)]);

        time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(map.moves().len(), 3);
        assert!(navigator.is_animating());

        time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(map.moves().len(), 3);
        assert!(!navigator.is_animating());
        assert_eq!(
            map.instructions(),
            vec![
                ("Head north on Rizal Ave".to_string(), true),
                ("Turn right onto Mabini St".to_string(), true),
                (ARRIVED_MESSAGE.to_string(), false),
            ]
        );
        let events = map.events();
        let marker = events
            .iter()
            .find_map(|e| match e {
                MapEvent::AddPoint { layer, .. } => Some(*layer),
                _ => None,
            })
            .ok_or("no marker")?;
        assert!(events.contains(&MapEvent::Remove(marker)));
        Ok(())
    })
    .await
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn restarting_or_clearing_stops_the_previous_walk() -> TestResult {
    in_local(async {
        let map = Rc::new(RecordingMap::default());
        let navigator = Navigator::new(Rc::clone(&map));
        let route = RouteGeometry::from_geojson(&sample_route())?;

        navigator.start_animation(&route);
        time::sleep(Duration::from_millis(2_100)).await;
        navigator.start_animation(&route);
        time::sleep(Duration::from_millis(2_100)).await;
        // One move from each walk; the first walk is gone.
        assert_eq!(map.moves().len(), 2);

        navigator.clear_animation(true);
        assert!(!navigator.is_animating());
        let moves = map.moves().len();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(map.moves().len(), moves);
        assert!(!map.instructions().iter().any(|(text, _)| text == ARRIVED_MESSAGE));
        assert_ne!(map.events().last(), Some(&MapEvent::Hide));

        let single = RouteGeometry {
            coordinates: vec![BASE],
            steps: Vec::new(),
        };
        assert!(!navigator.start_animation(&single));
        Ok(())
    })
    .await
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn drive_to_incident_routes_draws_and_animates() -> TestResult {
    in_local(async {
        let transport = ScriptedTransport::new();
        transport.set_default(HttpMethod::Post, 200, sample_route());
        let routes = RouteService::new(transport.clone(), NoGeolocation, routing(false, Some(BASE)));
        let map = Rc::new(RecordingMap::default());
        let navigator = Navigator::new(Rc::clone(&map));
        let target = incident_at("a", "2024-01-01T00:00:00Z", 14.58, 121.04);

        let plan = navigator.show_route_to_incident(&routes, &target).await?;
        assert_eq!(plan.geometry.coordinates.len(), 4);
        assert!(navigator.route_layer().is_some());
        assert!(!navigator.is_animating());

        navigator.drive_to_incident(&routes, &target).await?;
        assert!(navigator.is_animating());
        assert_eq!(transport.request_count(), 1);

        let missing = incident("b", "2024-01-01T00:00:00Z");
        assert!(matches!(
            navigator.drive_to_incident(&routes, &missing).await,
            Err(EngineError::MissingLocation(_))
        ));
        Ok(())
    })
    .await
}
