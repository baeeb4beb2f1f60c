pub mod display;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod incident;
pub mod normalize;
pub mod role;
pub mod route;
pub mod timestamp;

pub use error::{CallbackError, CoreError};
pub use ids::IncidentId;
pub use incident::{IncidentDraft, IncidentRecord, IncidentStatus, Location};
pub use normalize::{CanonicalField, FieldMap, FieldResolver, canonicalize, normalize};
pub use role::{Role, RoleProfile};
pub use route::{LatLng, RouteGeometry};
