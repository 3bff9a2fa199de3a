use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::codes::{CodeError, CodeSet, Model};
use crate::dispatch::{DispatchError, Dispatcher, SendOutcome};
use crate::tuya::{Command, TuyaError};

pub const MIN_TEMPERATURE: u8 = 16;
pub const MAX_TEMPERATURE: u8 = 31;
pub const DEFAULT_TEMPERATURE: u8 = 22;

/// Operating modes. Power is encoded by the mode: there is no independent
/// power bit in the infrared protocol, `Off` is a mode of its own.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mode {
    Off,
    Cool,
    Heat,
    Dry,
    Fan,
    /// Heat/cool, the remote's "auto" position. Also the mode the unit powers
    /// on into when a fan or temperature command arrives while it is off.
    Auto,
}

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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FanSpeed {
    Auto,
    Quiet,
    Low,
    Medium,
    High,
    Highest,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SwingMode {
    Off,
    On,
}

impl Default for SwingMode {
    fn default() -> Self {
        SwingMode::Off
    }
}

/// Logical desired state of one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateState {
    pub mode: Mode,
    pub fan: FanSpeed,
    pub target_temperature: u8,
    pub swing: SwingMode,
}

impl Default for ClimateState {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            fan: FanSpeed::Medium,
            target_temperature: DEFAULT_TEMPERATURE,
            swing: SwingMode::Off,
        }
    }
}

impl ClimateState {
    pub fn is_on(&self) -> bool {
        self.mode != Mode::Off
    }
}

impl fmt::Display for ClimateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fan={} {}C swing={}",
            self.mode, self.fan, self.target_temperature, self.swing
        )
    }
}

/// State persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub mode: Mode,
    pub fan: FanSpeed,
    pub target_temperature: u8,
    #[serde(default)]
    pub swing: SwingMode,
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed state file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode state for {path}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Snapshot {
    pub fn of(state: &ClimateState) -> Self {
        Self {
            mode: state.mode,
            fan: state.fan,
            target_temperature: state.target_temperature,
            swing: state.swing,
        }
    }

    /// Reads a previously persisted snapshot; `None` if there isn't one yet.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SnapshotError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| SnapshotError::Malformed {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let data =
            serde_json::to_string_pretty(self).map_err(|source| SnapshotError::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        fs::write(path, data).map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Code(#[from] CodeError),

    #[error(transparent)]
    Encode(#[from] TuyaError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// One infrared-controlled air conditioner.
///
/// Owns the logical state, resolves every state change to a code from the
/// shared table and hands the encoded command to the dispatcher. State is
/// published optimistically: observers see the new state as soon as the
/// command is accepted, while the transmission itself finishes (or fails)
/// on the dispatch worker.
pub struct ClimateUnit {
    name: String,
    model: Model,
    codes: Arc<CodeSet>,
    state: ClimateState,
    last_on_mode: Mode,
    measured: Arc<RwLock<Option<f32>>>,
    sensor_task: Option<JoinHandle<()>>,
    dispatcher: Dispatcher,
}

impl ClimateUnit {
    pub fn new(
        name: impl Into<String>,
        model: Model,
        codes: Arc<CodeSet>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            name: name.into(),
            model,
            codes,
            state: ClimateState::default(),
            last_on_mode: Mode::Auto,
            measured: Arc::new(RwLock::new(None)),
            sensor_task: None,
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn state(&self) -> &ClimateState {
        &self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::of(&self.state)
    }

    /// Last reading from the external temperature sensor, if one is attached.
    pub fn measured_temperature(&self) -> Option<f32> {
        *self.measured.read().expect("measured-temperature lock")
    }

    /// Applies persisted state. Called once at startup, before any command;
    /// never transmits anything.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.state.mode = snapshot.mode;
        self.state.fan = snapshot.fan;
        self.state.target_temperature = snapshot
            .target_temperature
            .clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
        self.state.swing = snapshot.swing;
        if snapshot.mode != Mode::Off {
            self.last_on_mode = snapshot.mode;
        }
        info!(unit = %self.name, state = %self.state, "restored persisted state");
    }

    /// Subscribes to an external temperature feed. Readings only update the
    /// measured temperature; they never trigger a transmission. Malformed
    /// readings are logged and ignored, keeping the previous value.
    pub fn attach_sensor(&mut self, mut readings: watch::Receiver<String>) {
        let measured = Arc::clone(&self.measured);
        let unit = self.name.clone();
        self.sensor_task = Some(tokio::spawn(async move {
            while readings.changed().await.is_ok() {
                let raw = readings.borrow_and_update().clone();
                match raw.trim().parse::<f32>() {
                    Ok(value) => {
                        *measured.write().expect("measured-temperature lock") = Some(value);
                    }
                    Err(err) => {
                        warn!(%unit, value = %raw, %err, "ignoring unreadable temperature reading");
                    }
                }
            }
        }));
    }

    pub async fn set_mode(&mut self, mode: Mode) -> Result<SendOutcome, CommandError> {
        self.state.mode = mode;
        if mode != Mode::Off {
            self.last_on_mode = mode;
        }
        self.apply().await
    }

    /// Sets the fan speed. The remote has no standalone fan command while the
    /// unit is off, so this powers it on into auto if needed.
    pub async fn set_fan(&mut self, fan: FanSpeed) -> Result<SendOutcome, CommandError> {
        self.state.fan = fan;
        if self.state.mode == Mode::Off {
            self.state.mode = Mode::Auto;
            self.last_on_mode = Mode::Auto;
        }
        self.apply().await
    }

    /// Sets the target temperature, clamped to the unit's declared bounds.
    /// Powers the unit on into auto if it was off.
    pub async fn set_target_temperature(&mut self, temp: u8) -> Result<SendOutcome, CommandError> {
        self.state.target_temperature = temp.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
        if self.state.mode == Mode::Off {
            self.state.mode = Mode::Auto;
            self.last_on_mode = Mode::Auto;
        }
        self.apply().await
    }

    pub async fn set_swing(&mut self, swing: SwingMode) -> Result<SendOutcome, CommandError> {
        self.state.swing = swing;
        self.apply().await
    }

    /// Powers on into the last mode the unit ran in.
    pub async fn turn_on(&mut self) -> Result<SendOutcome, CommandError> {
        self.set_mode(self.last_on_mode).await
    }

    pub async fn turn_off(&mut self) -> Result<SendOutcome, CommandError> {
        self.set_mode(Mode::Off).await
    }

    async fn apply(&mut self) -> Result<SendOutcome, CommandError> {
        // The state above is already visible to observers; a transmission
        // failure does not roll it back.
        info!(unit = %self.name, state = %self.state, "state updated");

        let code = self.codes.resolve(self.model, &self.state)?;
        let command = Command::from_ir_code(code)?;
        let outcome = self.dispatcher.send(command).await?;
        if outcome == SendOutcome::Dropped {
            info!(unit = %self.name, "command dropped, no blaster session yet");
        }
        Ok(outcome)
    }

    /// Stops the sensor subscription and drains the dispatcher.
    pub fn shutdown(mut self) {
        if let Some(task) = self.sensor_task.take() {
            task.abort();
        }
        self.dispatcher.shutdown();
    }
}
