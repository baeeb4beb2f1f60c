use crate::ids::IncidentId;
use crate::incident::{IncidentRecord, IncidentStatus};
use crate::route::LatLng;

/// Human-readable location line for lists, popups and notifications.
pub fn location_text(incident: &IncidentRecord) -> String {
    let Some(loc) = incident.location else {
        return "No location captured".to_string();
    };
    let accuracy = loc
        .accuracy
        .map(|a| format!(" ±{} m", a.round() as i64))
        .unwrap_or_default();
    format!("{:.5}, {:.5}{accuracy}", loc.lat, loc.lng)
}

/// Alert text shown to administrators when a report arrives.
pub fn new_incident_message(incident: &IncidentRecord) -> String {
    let mut message = format!(
        "New status report received\nReporter: {}\nStatus: {}\n",
        incident.name,
        incident.status.label()
    );
    if let Some(households) = incident.households {
        message.push_str(&format!("Households / occupants: {households}\n"));
    }
    if incident.location.is_some() {
        message.push_str(&format!("Location: {}\n", location_text(incident)));
    }
    if !incident.notes.is_empty() {
        message.push_str(&format!("Notes: {}", incident.notes));
    }
    message.trim().to_string()
}

/// A point to draw on the incident layer.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentFeature {
    pub id: IncidentId,
    pub status: IncidentStatus,
    pub position: LatLng,
}

/// Incidents that can be placed on the map, in list order.
pub fn incident_features(incidents: &[IncidentRecord]) -> Vec<IncidentFeature> {
    incidents
        .iter()
        .filter_map(|incident| {
            let loc = incident.location?;
            Some(IncidentFeature {
                id: incident.id.clone(),
                status: incident.status,
                position: LatLng::new(loc.lat, loc.lng),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;
    use crate::incident::Location;

    fn incident() -> IncidentRecord {
        let mut record = IncidentRecord::new("n1".into(), IncidentStatus::NeedEvacuation, "2024-01-01T00:00:00.000Z");
        record.name = "Carla".into();
        record
    }

    #[test]
    fn location_text_formats() {
        let mut record = incident();
        assert_eq!(location_text(&record), "No location captured");
        record.location = Location::new(14.599512, 120.984222, Some(8.6));
        assert_eq!(location_text(&record), "14.59951, 120.98422 ±9 m");
        record.location = Location::new(1.0, 2.0, None);
        assert_eq!(location_text(&record), "1.00000, 2.00000");
    }

    #[test]
    fn notification_includes_optional_lines() {
        let mut record = incident();
        assert_eq!(
            new_incident_message(&record),
            "New status report received\nReporter: Carla\nStatus: Need Evacuation"
        );
        record.households = NonZeroU32::new(3);
        record.notes = "two elderly".into();
        let message = new_incident_message(&record);
        assert!(message.contains("Households / occupants: 3"));
        assert!(message.ends_with("Notes: two elderly"));
    }

    #[test]
    fn features_skip_unlocated_incidents() {
        let mut located = incident();
        located.location = Location::new(1.0, 2.0, None);
        let features = incident_features(&[incident(), located]);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].position, LatLng::new(1.0, 2.0));
    }
}
