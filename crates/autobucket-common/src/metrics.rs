//! Metrics for the autobucket controllers
//!
//! OpenTelemetry instruments covering reconcile timing, reconcile errors,
//! cloud adapter calls, and objects purged from destroyed buckets. Nothing is
//! exported unless a meter provider is installed by [`crate::telemetry`].

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("autobucket"));

// ============================================================================
// Reconcile Metrics
// ============================================================================

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: bucket, provisioner
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("autobucket_reconcile_duration_seconds")
        .with_description("Duration of reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `controller`: bucket, provisioner
/// - `error_kind`: kube, conflict, adapter, ...
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("autobucket_reconcile_errors_total")
        .with_description("Total number of reconciliation errors")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Cloud Adapter Metrics
// ============================================================================

/// Counter of cloud adapter calls
///
/// Labels:
/// - `cloud`: gcp
/// - `operation`: create, delete
/// - `result`: success, error
pub static ADAPTER_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("autobucket_adapter_operations_total")
        .with_description("Total number of cloud storage adapter operations")
        .with_unit("{operations}")
        .build()
});

/// Counter of objects removed while destroying buckets
pub static PURGED_OBJECTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("autobucket_purged_objects_total")
        .with_description("Total number of objects deleted while destroying buckets")
        .with_unit("{objects}")
        .build()
});

// ============================================================================
// Label Types
// ============================================================================

/// Adapter operation label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterOperation {
    /// create_bucket
    Create,
    /// delete_bucket
    Delete,
}

impl AdapterOperation {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

// ============================================================================
// Recording Helpers
// ============================================================================

/// Times one reconcile and records its outcome
pub struct ReconcileTimer {
    controller: &'static str,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconcile for the named controller
    pub fn start(controller: &'static str) -> Self {
        Self {
            controller,
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record error completion
    pub fn error(self, error_kind: &'static str) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "error"),
            ],
        );
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("error_kind", error_kind),
            ],
        );
    }
}

/// Record one cloud adapter call
pub fn record_adapter_operation(cloud: &str, operation: AdapterOperation, success: bool) {
    ADAPTER_OPERATIONS.add(
        1,
        &[
            KeyValue::new("cloud", cloud.to_string()),
            KeyValue::new("operation", operation.as_str()),
            KeyValue::new("result", if success { "success" } else { "error" }),
        ],
    );
}

/// Record objects deleted from a bucket being destroyed
pub fn record_purged_objects(count: u64) {
    if count > 0 {
        PURGED_OBJECTS.add(count, &[]);
    }
}
