//! Measurement sources: where PCR values come from.
//!
//! One capability, [`MeasurementSource`], with interchangeable variants:
//!
//! - [`SysfsPcrSource`]: the host's hardware TPM, via the kernel's PCR export
//! - [`SimulatedPcrSource`]: deterministic per-device values from a host seed
//! - [`FallbackSource`]: hardware first, simulator when hardware is unavailable
//! - [`StaticMeasurementSource`]: caller-supplied values, for harnesses
//!
//! The variant is chosen once at startup by [`select_source`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use pcrbind_core::logging::SECURITY_TARGET;
use pcrbind_core::{Config, MeasurementMode, MeasurementSet, PcrIndex, PCR_BANK_SIZE};
use tracing::{info, warn};

use crate::error::{IdentityResult, SourceError};
use crate::simulator::SimulatedPcrSource;
use crate::tpm::SysfsPcrSource;

/// Kind of measurement root backing a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Hardware,
    Simulated,
    Static,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Hardware => "hardware",
            SourceKind::Simulated => "simulated",
            SourceKind::Static => "static",
        })
    }
}

/// Capability to read the current value of a set of PCRs.
pub trait MeasurementSource: Send + Sync + fmt::Debug {
    /// Read `indices` for `device_id`. Failures are reported as
    /// [`SourceError::Unavailable`], never by panicking.
    fn read(&self, device_id: &str, indices: &[PcrIndex]) -> Result<MeasurementSet, SourceError>;

    fn kind(&self) -> SourceKind;
}

pub(crate) fn check_indices(indices: &[PcrIndex]) -> Result<(), SourceError> {
    match indices.iter().find(|&&index| index >= PCR_BANK_SIZE) {
        Some(&index) => Err(SourceError::InvalidIndex(index)),
        None => Ok(()),
    }
}

/// Hardware with transparent fallback to the simulator.
#[derive(Debug)]
pub struct FallbackSource {
    hardware: Option<SysfsPcrSource>,
    simulator: SimulatedPcrSource,
}

impl FallbackSource {
    pub fn new(hardware: Option<SysfsPcrSource>, simulator: SimulatedPcrSource) -> Self {
        Self {
            hardware,
            simulator,
        }
    }
}

impl MeasurementSource for FallbackSource {
    fn read(&self, device_id: &str, indices: &[PcrIndex]) -> Result<MeasurementSet, SourceError> {
        if let Some(hardware) = &self.hardware {
            match hardware.read(device_id, indices) {
                Ok(measurements) => return Ok(measurements),
                Err(SourceError::Unavailable(reason)) => {
                    warn!(
                        target: SECURITY_TARGET,
                        device_id = %device_id,
                        %reason,
                        "Hardware PCR read unavailable, using simulated measurements"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        self.simulator.read(device_id, indices)
    }

    fn kind(&self) -> SourceKind {
        if self.hardware.is_some() {
            SourceKind::Hardware
        } else {
            SourceKind::Simulated
        }
    }
}

/// Measurement values supplied by the caller, per device.
#[derive(Debug, Default)]
pub struct StaticMeasurementSource {
    devices: RwLock<HashMap<String, MeasurementSet>>,
}

impl StaticMeasurementSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full measurement state of a device.
    pub fn set(&self, device_id: impl Into<String>, measurements: MeasurementSet) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.into(), measurements);
    }

    /// Change a single register of a device, returning the previous value.
    pub fn update(
        &self,
        device_id: &str,
        index: PcrIndex,
        value: impl Into<Vec<u8>>,
    ) -> Option<Vec<u8>> {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device_id.to_string())
            .or_default()
            .insert(index, value)
    }

    pub fn remove(&self, device_id: &str) -> Option<MeasurementSet> {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id)
    }
}

impl MeasurementSource for StaticMeasurementSource {
    fn read(&self, device_id: &str, indices: &[PcrIndex]) -> Result<MeasurementSet, SourceError> {
        check_indices(indices)?;
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let state = devices
            .get(device_id)
            .ok_or_else(|| SourceError::Unavailable(format!("no measurements for {device_id}")))?;

        indices
            .iter()
            .map(|&index| {
                state
                    .get(index)
                    .map(|value| (index, value.to_vec()))
                    .ok_or_else(|| SourceError::Unavailable(format!("PCR {index} not set")))
            })
            .collect()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Static
    }
}

/// Pick the measurement source for this process according to `config`.
///
/// `hardware` mode fails if no TPM PCR bank is exported; `auto` falls back to
/// the simulator; `simulated` never touches hardware.
pub fn select_source(config: &Config) -> IdentityResult<Arc<dyn MeasurementSource>> {
    let measurement = &config.measurement;
    match measurement.mode {
        MeasurementMode::Simulated => {
            warn!("STATUS: MeasurementSource :: Hardware Root of Trust :: SIMULATED");
            Ok(Arc::new(SimulatedPcrSource::from_config(config)?))
        }
        MeasurementMode::Hardware => {
            let hardware = SysfsPcrSource::from_config(measurement);
            if !hardware.probe() {
                return Err(SourceError::Unavailable(format!(
                    "no TPM PCR bank at {}",
                    hardware.bank_dir().display()
                ))
                .into());
            }
            info!("STATUS: MeasurementSource :: Hardware Root of Trust :: ACTIVE");
            Ok(Arc::new(hardware))
        }
        MeasurementMode::Auto => {
            let hardware = SysfsPcrSource::from_config(measurement);
            let simulator = SimulatedPcrSource::from_config(config)?;
            if hardware.probe() {
                info!("STATUS: MeasurementSource :: Hardware Root of Trust :: ACTIVE");
                Ok(Arc::new(FallbackSource::new(Some(hardware), simulator)))
            } else {
                warn!("STATUS: MeasurementSource :: Hardware Root of Trust :: SIMULATED");
                Ok(Arc::new(FallbackSource::new(None, simulator)))
            }
        }
    }
}
