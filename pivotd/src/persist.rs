//! Calibration persistence.
//!
//! The control core only exposes `get_calibration`/`load_calibration`;
//! keeping the results across restarts is this collaborator's job. The
//! file is TOML next to the main configuration:
//!
//! ```toml
//! [axes.x]
//! min_voltage = 0.12
//! max_voltage = 3.20
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pivot_common::calibration::CalibrationMapping;
use pivot_common::shared::SharedState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse calibration file: {0}")]
    Parse(String),

    #[error("failed to encode calibration file: {0}")]
    Encode(String),
}

/// On-disk calibration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CalibrationFile {
    #[serde(default)]
    pub axes: BTreeMap<String, CalibrationMapping>,
}

/// The calibration file lives next to the main configuration.
pub fn calibration_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("calibration.toml")
}

/// Load the file; a missing file is an empty document, not an error.
pub fn load(path: &Path) -> Result<CalibrationFile, PersistError> {
    if !path.exists() {
        return Ok(CalibrationFile::default());
    }
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| PersistError::Parse(e.to_string()))
}

pub fn save(path: &Path, file: &CalibrationFile) -> Result<(), PersistError> {
    let text = toml::to_string_pretty(file).map_err(|e| PersistError::Encode(e.to_string()))?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Push persisted mappings into the shared state. Mappings that fail the
/// invariant (hand-edited files) are skipped with a warning.
pub fn restore_into(shared: &SharedState, file: &CalibrationFile) {
    for (name, mapping) in &file.axes {
        let Some(axis) = shared.axis_by_name(name) else {
            warn!(axis = %name, "calibration for unconfigured axis ignored");
            continue;
        };
        match shared.load_calibration(axis, *mapping) {
            Ok(()) => info!(
                axis = %name,
                min_v = mapping.min_voltage,
                max_v = mapping.max_voltage,
                "calibration restored"
            ),
            Err(e) => warn!(axis = %name, error = %e, "persisted calibration rejected"),
        }
    }
}

/// Update one axis entry on disk, keeping the others.
pub fn record(
    path: &Path,
    name: &str,
    mapping: CalibrationMapping,
) -> Result<(), PersistError> {
    let mut file = load(path)?;
    file.axes.insert(name.to_string(), mapping);
    save(path, &file)
}
