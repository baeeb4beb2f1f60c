pub mod map;
pub mod network;
pub mod peer;

pub use map::{MapEvent, RecordingMap, ScriptedGeolocator, route_geojson};
pub use network::{Scripted, ScriptedTransport};
pub use peer::{
    CREATE_ENDPOINT, FailingStorage, LIST_ENDPOINT, RecordingObserver, TestClient, TestEngine, incident, incident_at,
    raw_incident, remote_config,
};
