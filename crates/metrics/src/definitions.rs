//! Metric name and label definitions.
//!
//! All metric names used by the dispatch engine live here so that the set of
//! exported series is documented in one place.

/// Message dispatch metrics
pub mod dispatch {
    /// Notifications handed to the coordinator
    pub const NOTIFICATIONS_TOTAL: &str = "switchboard_dispatch_notifications_total";
    /// Notifications rejected before deduplication
    pub const INVALID_TOTAL: &str = "switchboard_dispatch_invalid_total";
    /// Notifications ignored as duplicates
    pub const DUPLICATES_TOTAL: &str = "switchboard_dispatch_duplicates_total";
    /// Messages assigned to an agent (label `kind`: affinity / selected)
    pub const ASSIGNMENTS_TOTAL: &str = "switchboard_dispatch_assignments_total";
    /// Customers moved from one agent to another
    pub const REASSIGNMENTS_TOTAL: &str = "switchboard_dispatch_reassignments_total";
    /// Routing attempts that found no online agent
    pub const NO_AGENT_TOTAL: &str = "switchboard_dispatch_no_agent_total";
    /// Deliveries the sink refused
    pub const DELIVERY_ERRORS_TOTAL: &str = "switchboard_dispatch_delivery_errors_total";
    /// End-to-end route duration in seconds
    pub const ROUTE_DURATION_SECONDS: &str = "switchboard_dispatch_route_duration_seconds";
}

/// Agent registry metrics
pub mod agents {
    /// Number of agents currently in the online ordering structure
    pub const ONLINE: &str = "switchboard_agents_online";
    /// Online/offline transitions (label `status`)
    pub const TRANSITIONS_TOTAL: &str = "switchboard_agents_transitions_total";
}

/// Shared state store metrics
pub mod store {
    /// Store operations that failed or timed out (label `operation`)
    pub const ERRORS_TOTAL: &str = "switchboard_store_errors_total";
    /// Time spent waiting for a scoped lease in seconds
    pub const LEASE_WAIT_SECONDS: &str = "switchboard_store_lease_wait_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const KIND: &str = "kind";
    pub const STATUS: &str = "status";
    pub const OPERATION: &str = "operation";
    pub const ERROR_TYPE: &str = "error_type";
}

/// Histogram buckets
pub mod buckets {
    /// Route duration buckets (in seconds), 100µs to 5s
    pub const ROUTE_DURATION: &[f64] = &[
        0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
    ];

    /// Lease wait buckets (in seconds), 10µs to 5s
    pub const LEASE_WAIT: &[f64] = &[
        0.00001, 0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
    ];
}
