use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::climate::{ClimateState, FanSpeed, Mode};

/// Physical AC units with a recorded code table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum Model {
    #[serde(rename = "MSZ-GE25VA")]
    #[strum(serialize = "MSZ-GE25VA")]
    MszGe25va,
    #[serde(rename = "MSC-GE35VB")]
    #[strum(serialize = "MSC-GE35VB")]
    MscGe35vb,
}

impl Model {
    pub fn code_file(&self) -> String {
        format!("{}.json", self)
    }
}

#[derive(Error, Debug)]
pub enum CodeError {
    #[error("failed to read code table {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse code table {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("no code table loaded for model {0}")]
    ModelNotLoaded(Model),

    #[error("no infrared code recorded for mode {mode}, fan {fan}, {temperature}C")]
    NotFound {
        mode: Mode,
        fan: FanSpeed,
        temperature: u8,
    },
}

/// Code table for one model, shaped `{mode: {fan: {"16".."31": hex}}, "off": hex}`.
///
/// "off" is a single code: the remote encodes power in the mode, so turning
/// the unit off doesn't carry fan or temperature information.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeTable {
    off: String,
    #[serde(flatten)]
    modes: HashMap<String, HashMap<String, HashMap<String, String>>>,
}

impl CodeTable {
    pub fn lookup(&self, mode: Mode, fan: FanSpeed, temperature: u8) -> Result<&str, CodeError> {
        if mode == Mode::Off {
            return Ok(&self.off);
        }

        self.modes
            .get(&mode.to_string())
            .and_then(|fans| fans.get(&fan.to_string()))
            .and_then(|temps| temps.get(&temperature.to_string()))
            .map(String::as_str)
            .ok_or(CodeError::NotFound {
                mode,
                fan,
                temperature,
            })
    }
}

/// All code tables, loaded once at startup and shared read-only from then on.
#[derive(Debug, Clone)]
pub struct CodeSet {
    tables: HashMap<Model, CodeTable>,
}

impl CodeSet {
    /// Loads `<model>.json` for every supported model from `dir`.
    pub fn load(dir: &Path) -> Result<Self, CodeError> {
        let mut tables = HashMap::new();
        for model in Model::iter() {
            let path = dir.join(model.code_file());
            let data = fs::read_to_string(&path).map_err(|source| CodeError::Read {
                path: path.clone(),
                source,
            })?;
            let table =
                serde_json::from_str(&data).map_err(|source| CodeError::Parse { path, source })?;
            tables.insert(model, table);
        }
        Ok(Self { tables })
    }

    pub fn table(&self, model: Model) -> Result<&CodeTable, CodeError> {
        self.tables
            .get(&model)
            .ok_or(CodeError::ModelNotLoaded(model))
    }

    /// Resolves a logical state to the raw infrared code to transmit.
    ///
    /// The table is the single source of truth for which states are supported:
    /// a combination that isn't recorded fails with [`CodeError::NotFound`],
    /// it is never rounded to a neighboring entry.
    pub fn resolve(&self, model: Model, state: &ClimateState) -> Result<&str, CodeError> {
        self.table(model)?
            .lookup(state.mode, state.fan, state.target_temperature)
    }
}
