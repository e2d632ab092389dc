//! Bundle identifier generation

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Length of generated identifiers
pub const BUNDLE_ID_LENGTH: usize = 7;

/// Source of the `APPIMAGE_UUID` value
pub trait BundleIdGenerator {
    fn generate(&self) -> String;
}

/// Random alphanumeric identifier drawn from the OS RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBundleId;

impl BundleIdGenerator for RandomBundleId {
    fn generate(&self) -> String {
        OsRng
            .sample_iter(&Alphanumeric)
            .take(BUNDLE_ID_LENGTH)
            .map(char::from)
            .collect()
    }
}

/// Always returns the same identifier
#[derive(Debug, Clone)]
pub struct FixedBundleId(pub String);

impl FixedBundleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl BundleIdGenerator for FixedBundleId {
    fn generate(&self) -> String {
        self.0.clone()
    }
}
