/// Fetched-results controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Key path used to group results into sections; `None` yields one
    /// section named "All".
    pub section_key_path: Option<String>,

    /// Capacity of the change-type event stream before slow listeners lag
    pub event_capacity: usize,

    /// Fold notifications queued during a replay into a single follow-up pass
    pub coalesce_notifications: bool,
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self {
            section_key_path: None,
            event_capacity: 256,
            coalesce_notifications: true,
        }
    }

    /// Set the section key path
    pub fn section_key_path(mut self, key_path: &str) -> Self {
        self.section_key_path = Some(key_path.to_string());
        self
    }

    /// Set the event stream capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Enable or disable notification coalescing
    pub fn coalesce_notifications(mut self, enabled: bool) -> Self {
        self.coalesce_notifications = enabled;
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.section_key_path, None);
        assert!(config.coalesce_notifications);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_builder() {
        let config = ControllerConfig::new()
            .section_key_path("role")
            .event_capacity(0)
            .coalesce_notifications(false);
        assert_eq!(config.section_key_path.as_deref(), Some("role"));
        assert_eq!(config.event_capacity, 1);
        assert!(!config.coalesce_notifications);
    }
}
