//! Deterministic PCR simulator used when no hardware TPM is present.
//!
//! Values must be reproducible: the snapshot captured at enrollment has to be
//! re-derivable at verification time. Each value is a keyed BLAKE3 hash of the
//! device id and register index under a 32-byte host seed, so a device always
//! reads the same values on the same host, and different devices read
//! unrelated values.
//!
//! The seed comes from configuration, or is generated once with the OS RNG and
//! persisted as hex next to the fingerprint database.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use pcrbind_core::{Config, MeasurementSet, PcrIndex, SIMULATOR_SEED_LEN};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{IdentityError, IdentityResult, SourceError};
use crate::measurement::{check_indices, MeasurementSource, SourceKind};

const SIMULATED_PCR_DOMAIN: &[u8] = b"pcrbind.simulated-pcr.v1";

/// Seeded, deterministic measurement source.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SimulatedPcrSource {
    seed: [u8; SIMULATOR_SEED_LEN],
}

impl std::fmt::Debug for SimulatedPcrSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPcrSource").finish_non_exhaustive()
    }
}

impl SimulatedPcrSource {
    pub fn new(seed: [u8; SIMULATOR_SEED_LEN]) -> Self {
        Self { seed }
    }

    /// Seed from `measurement.simulator_seed`, else from the persisted seed
    /// file under the storage directory (created on first use).
    pub fn from_config(config: &Config) -> IdentityResult<Self> {
        if let Some(seed) = config.measurement.simulator_seed_bytes()? {
            return Ok(Self::new(seed));
        }
        let seed = load_or_create_seed(&config.storage.simulator_seed_path())?;
        Ok(Self::new(seed))
    }

    fn value(&self, device_id: &str, index: PcrIndex) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_keyed(&self.seed);
        hasher.update(SIMULATED_PCR_DOMAIN);
        hasher.update(&(device_id.len() as u64).to_be_bytes());
        hasher.update(device_id.as_bytes());
        hasher.update(&[index]);
        *hasher.finalize().as_bytes()
    }
}

impl MeasurementSource for SimulatedPcrSource {
    fn read(&self, device_id: &str, indices: &[PcrIndex]) -> Result<MeasurementSet, SourceError> {
        check_indices(indices)?;
        Ok(indices
            .iter()
            .map(|&index| (index, self.value(device_id, index).to_vec()))
            .collect())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Simulated
    }
}

fn parse_seed(text: &str, path: &Path) -> IdentityResult<[u8; SIMULATOR_SEED_LEN]> {
    let bytes = hex::decode(text.trim()).map_err(|e| {
        IdentityError::Source(SourceError::Unavailable(format!(
            "seed file {} is not hex: {e}",
            path.display()
        )))
    })?;
    bytes.try_into().map_err(|_| {
        IdentityError::Source(SourceError::Unavailable(format!(
            "seed file {} must hold {SIMULATOR_SEED_LEN} bytes",
            path.display()
        )))
    })
}

/// Read the host seed, creating it atomically if it does not exist yet.
fn load_or_create_seed(path: &Path) -> IdentityResult<[u8; SIMULATOR_SEED_LEN]> {
    if path.exists() {
        let text = std::fs::read_to_string(path)?;
        return parse_seed(&text, path);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut seed = [0u8; SIMULATOR_SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    let mut encoded = hex::encode(seed);

    // Write a private temp file, then hard-link it into place. Each creator
    // owns a distinct temp name, and linking never replaces an existing seed,
    // so the seed file only ever appears fully written.
    let mut suffix = [0u8; 8];
    OsRng.fill_bytes(&mut suffix);
    let tmp = path.with_extension(format!(
        "tmp-{}-{}",
        std::process::id(),
        hex::encode(suffix)
    ));
    {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        let written = file
            .write_all(encoded.as_bytes())
            .and_then(|()| file.sync_all());
        if let Err(e) = written {
            std::fs::remove_file(&tmp).ok();
            encoded.zeroize();
            return Err(e.into());
        }
    }
    encoded.zeroize();

    let linked = std::fs::hard_link(&tmp, path);
    std::fs::remove_file(&tmp).ok();
    match linked {
        Ok(()) => {
            info!(path = %path.display(), "Created simulator seed");
            Ok(seed)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            seed.zeroize();
            let text = std::fs::read_to_string(path)?;
            parse_seed(&text, path)
        }
        Err(e) => Err(e.into()),
    }
}
