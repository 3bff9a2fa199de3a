use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rust_tuyapi::tuyadevice::TuyaDevice;
use rust_tuyapi::{Payload, PayloadStruct};
use serde_json::json;
use thiserror::Error;

/// Data point carrying the "replay a learned key" request.
const DP_CONTROL: &str = "1";
/// Data point carrying the base64 infrared payload.
const DP_KEY: &str = "7";

const CONTROL_STUDY_KEY: &str = "study_key";

#[derive(Error, Debug)]
pub enum TuyaError {
    #[error("infrared code is not valid hex: {0}")]
    BadCode(#[from] hex::FromHexError),

    #[error("device session error: {0}")]
    Session(#[from] rust_tuyapi::error::ErrorKind),
}

/// An encoded "replay learned infrared code" command, ready to hand to the
/// device session. Encoding is deterministic: the same raw code always
/// produces the same command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    key: String,
}

impl Command {
    /// Hex-decodes a raw code from the table and re-encodes it into the
    /// base64 form the blaster expects.
    pub fn from_ir_code(ir_code: &str) -> Result<Self, TuyaError> {
        let raw = hex::decode(ir_code.trim())?;
        Ok(Self {
            key: base64::encode(raw),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The dps envelope: `{"1": "study_key", "7": <base64 payload>}`.
    pub fn dps(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            (DP_CONTROL.to_string(), json!(CONTROL_STUDY_KEY)),
            (DP_KEY.to_string(), json!(self.key)),
        ])
    }
}

/// Connection parameters for one blaster.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: String,
    pub local_key: String,
    pub address: IpAddr,
    pub version: String,
}

/// The transmit side of a blaster session.
///
/// Production code goes through [`TuyaSession`]; tests substitute an
/// in-memory implementation.
pub trait DeviceApi: Send {
    fn send(&mut self, command: &Command) -> Result<(), TuyaError>;
}

/// Session to a physical blaster, backed by the `rust-tuyapi` client.
/// Framing, encryption and transmission all live in that crate; this only
/// builds the control payload.
pub struct TuyaSession {
    config: DeviceConfig,
    device: TuyaDevice,
    seq: u32,
}

impl TuyaSession {
    pub fn connect(config: DeviceConfig) -> Result<Self, TuyaError> {
        let device = TuyaDevice::create(
            &config.version,
            Some(&config.local_key),
            config.address,
        )?;
        Ok(Self {
            config,
            device,
            seq: 0,
        })
    }
}

impl DeviceApi for TuyaSession {
    fn send(&mut self, command: &Command) -> Result<(), TuyaError> {
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let payload = Payload::Struct(PayloadStruct {
            dev_id: self.config.device_id.clone(),
            gw_id: Some(self.config.device_id.clone()),
            uid: None,
            t: Some(t),
            dp_id: None,
            dps: Some(command.dps()),
        });

        self.seq = self.seq.wrapping_add(1);
        self.device.set(payload, self.seq)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_hex_to_base64() {
        let command = Command::from_ir_code("48656c6c6f").unwrap();
        assert_eq!(command.key(), "SGVsbG8=");
    }

    #[test]
    fn encode_is_deterministic() {
        let a = Command::from_ir_code("a1b2c3d4").unwrap();
        let b = Command::from_ir_code("a1b2c3d4").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn envelope_shape() {
        let command = Command::from_ir_code("ff00").unwrap();
        let dps = command.dps();
        assert_eq!(dps.len(), 2);
        assert_eq!(dps["1"], json!("study_key"));
        assert_eq!(dps["7"], json!(base64::encode(hex::decode("ff00").unwrap())));
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(matches!(
            Command::from_ir_code("not-hex"),
            Err(TuyaError::BadCode(_))
        ));
    }
}
