//! Finalizer list manipulation
//!
//! Edits are computed locally on a copy of `metadata.finalizers` and written
//! back in one patch, so unrelated finalizers owned by other controllers are
//! always preserved.

use kube::api::ObjectMeta;

/// Ordered, duplicate-free view of an object's finalizers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FinalizerSet(Vec<String>);

impl FinalizerSet {
    /// Copy the finalizers from object metadata
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        let mut set = Self::default();
        for f in meta.finalizers.iter().flatten() {
            set.add(f);
        }
        set
    }

    /// Whether `finalizer` is present
    pub fn contains(&self, finalizer: &str) -> bool {
        self.0.iter().any(|f| f == finalizer)
    }

    /// Append `finalizer` if missing; returns whether the set changed
    pub fn add(&mut self, finalizer: &str) -> bool {
        if self.contains(finalizer) {
            return false;
        }
        self.0.push(finalizer.to_string());
        true
    }

    /// Drop `finalizer` if present; returns whether the set changed
    pub fn remove(&mut self, finalizer: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|f| f != finalizer);
        self.0.len() != before
    }

    /// Finalizers in order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consume into the list form stored in metadata
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}
