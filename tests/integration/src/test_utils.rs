//! Test utilities for end-to-end verifier tests

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use pcrbind_core::{Config, MeasurementSet};
use pcrbind_identity::{OfflineVerifier, StaticMeasurementSource};

pub use pcrbind_core::current_timestamp_ms;

static LOGGING: Once = Once::new();

/// Install a test subscriber once; output is captured by the test harness.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("pcrbind=debug"))
            .with_test_writer()
            .try_init();
    });
}

/// The reference measurement state used across the suite.
pub fn baseline_measurements() -> MeasurementSet {
    MeasurementSet::from_pairs([(0, "aa"), (1, "bb"), (7, "cc")])
}

/// Verifier backed by a [`StaticMeasurementSource`] in a private temp directory.
///
/// The directory is removed when the fixture is dropped.
pub struct TestVerifier {
    pub verifier: Arc<OfflineVerifier>,
    pub source: Arc<StaticMeasurementSource>,
    dir: PathBuf,
}

impl TestVerifier {
    /// Fixture reading PCRs 0, 1 and 7.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        init_test_logging();

        let dir = std::env::temp_dir().join(format!("pcrbind_e2e_{}", uuid::Uuid::new_v4()));
        let mut config = Config::default_config().with_storage_dir(&dir);
        config.measurement.default_pcrs = vec![0, 1, 7];
        adjust(&mut config);

        let source = Arc::new(StaticMeasurementSource::new());
        let verifier = OfflineVerifier::with_source(config, source.clone())
            .expect("Failed to open verifier");

        Self {
            verifier: Arc::new(verifier),
            source,
            dir,
        }
    }

    /// Set `device_id` to the baseline state and enroll it.
    pub fn enroll_baseline(&self, device_id: &str) {
        self.source.set(device_id, baseline_measurements());
        self.verifier
            .enroll(device_id)
            .expect("Failed to enroll device");
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.verifier.config().storage.database_path()
    }
}

impl Default for TestVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestVerifier {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}
