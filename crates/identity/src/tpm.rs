//! Trusted Platform Module (TPM) PCR reader.
//!
//! Reads PCR values from the Linux kernel's sysfs export
//! (`/sys/class/tpm/tpm0/pcr-<bank>/<index>`, one hex digest per file).
//! Any failure to reach the TPM is reported as unavailability so callers can
//! fall back rather than crash.

use std::path::{Path, PathBuf};

use pcrbind_core::{MeasurementConfig, MeasurementSet, PcrIndex};
use tracing::debug;

use crate::error::SourceError;
use crate::measurement::{check_indices, MeasurementSource, SourceKind};

/// Hardware-backed measurement source.
#[derive(Debug, Clone)]
pub struct SysfsPcrSource {
    bank_dir: PathBuf,
}

impl SysfsPcrSource {
    /// `sysfs_root` is normally `/sys`; `bank` is e.g. `sha256`.
    pub fn new(sysfs_root: impl AsRef<Path>, bank: &str) -> Self {
        Self {
            bank_dir: sysfs_root
                .as_ref()
                .join("class/tpm/tpm0")
                .join(format!("pcr-{bank}")),
        }
    }

    pub fn from_config(config: &MeasurementConfig) -> Self {
        Self::new(&config.sysfs_root, &config.pcr_bank)
    }

    pub fn bank_dir(&self) -> &Path {
        &self.bank_dir
    }

    /// Whether the PCR bank is exported and PCR 0 is readable.
    pub fn probe(&self) -> bool {
        self.read_pcr(0).is_ok()
    }

    fn read_pcr(&self, index: PcrIndex) -> Result<Vec<u8>, SourceError> {
        let path = self.bank_dir.join(index.to_string());
        let text = std::fs::read_to_string(&path).map_err(|e| {
            SourceError::Unavailable(format!("reading {}: {e}", path.display()))
        })?;
        let value = hex::decode(text.trim()).map_err(|e| {
            SourceError::Unavailable(format!("PCR {index} has malformed value: {e}"))
        })?;
        if value.is_empty() {
            return Err(SourceError::Unavailable(format!("PCR {index} is empty")));
        }
        Ok(value)
    }
}

impl MeasurementSource for SysfsPcrSource {
    fn read(&self, device_id: &str, indices: &[PcrIndex]) -> Result<MeasurementSet, SourceError> {
        check_indices(indices)?;
        let measurements = indices
            .iter()
            .map(|&index| self.read_pcr(index).map(|value| (index, value)))
            .collect::<Result<MeasurementSet, _>>()?;
        debug!(device_id = %device_id, count = measurements.len(), "Read hardware PCRs");
        Ok(measurements)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Hardware
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs() -> PathBuf {
        let root = std::env::temp_dir().join(format!("pcrbind_sysfs_{}", uuid::Uuid::new_v4()));
        let bank = root.join("class/tpm/tpm0/pcr-sha256");
        std::fs::create_dir_all(&bank).unwrap();
        for index in [0u8, 1, 7] {
            let value = hex::encode_upper([index + 1; 32]);
            std::fs::write(bank.join(index.to_string()), format!("{value}\n")).unwrap();
        }
        root
    }

    #[test]
    fn test_reads_kernel_export_format() {
        let root = fake_sysfs();
        let source = SysfsPcrSource::new(&root, "sha256");

        assert!(source.probe());
        let set = source.read("host", &[0, 1, 7]).unwrap();
        assert_eq!(set.indices(), vec![0, 1, 7]);
        assert_eq!(set.get(7), Some([8u8; 32].as_slice()));

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_missing_register_is_unavailable() {
        let root = fake_sysfs();
        let source = SysfsPcrSource::new(&root, "sha256");
        assert!(matches!(
            source.read("host", &[0, 2]),
            Err(SourceError::Unavailable(_))
        ));
        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_absent_tpm_is_unavailable() {
        let source = SysfsPcrSource::new("/nonexistent-sysfs-root", "sha256");
        assert!(!source.probe());
        assert!(matches!(
            source.read("host", &[0]),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_malformed_value_is_unavailable() {
        let root = fake_sysfs();
        let bank = root.join("class/tpm/tpm0/pcr-sha256");
        std::fs::write(bank.join("3"), "not-hex\n").unwrap();

        let source = SysfsPcrSource::new(&root, "sha256");
        assert!(matches!(
            source.read("host", &[3]),
            Err(SourceError::Unavailable(_))
        ));
        std::fs::remove_dir_all(root).ok();
    }

    #[cfg(feature = "hardware-tpm-tests")]
    #[test]
    fn test_host_tpm_is_stable_across_reads() {
        let source = SysfsPcrSource::new("/sys", "sha256");
        if !source.probe() {
            eprintln!("Skipping hardware TPM test: no PCR bank exported.");
            return;
        }
        let first = source.read("host", &[0, 7]).unwrap();
        let second = source.read("host", &[0, 7]).unwrap();
        assert_eq!(first, second);
    }
}
