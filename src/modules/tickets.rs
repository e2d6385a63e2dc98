use super::FeatureModule;

/// Tickets and incidents tab. Ships no descriptor or routes of its own; the
/// registry lists it with default metadata.
pub struct TicketsModule;

impl FeatureModule for TicketsModule {
    fn id(&self) -> &'static str {
        "tickets"
    }
}
