pub mod climate;
pub mod codes;
pub mod config;
pub mod dispatch;
pub mod tuya;

pub use climate::{ClimateState, ClimateUnit, FanSpeed, Mode, Snapshot, SwingMode};
pub use codes::{CodeError, CodeSet, Model};
pub use dispatch::{DispatchError, Dispatcher, SendOutcome};
pub use tuya::{Command, DeviceApi, DeviceConfig, TuyaSession};
