use uwan_core::IncidentRecord;

/// Presentation-side callbacks fired by the engine after a merge.
pub trait IncidentObserver {
    /// The incident set changed; `incidents` is the full set, newest first.
    fn incidents_changed(&self, incidents: &[IncidentRecord]) {
        let _ = incidents;
    }

    /// One call per newly added record, only for roles that manage data.
    fn new_incident(&self, incident: &IncidentRecord) {
        let _ = incident;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl IncidentObserver for NoopObserver {}
