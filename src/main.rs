use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tuya_ir_ac::climate::{ClimateUnit, FanSpeed, Mode, Snapshot, SwingMode};
use tuya_ir_ac::codes::CodeSet;
use tuya_ir_ac::config;
use tuya_ir_ac::dispatch::Dispatcher;
use tuya_ir_ac::tuya::{DeviceApi, TuyaSession};

#[derive(Parser)]
#[command(about = "Control an infrared AC through a Tuya Wi-Fi blaster")]
struct Cli {
    /// Unit configuration file
    #[arg(short, long, default_value = "tuya-ir-ac.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Change mode, fan speed and/or target temperature
    Set {
        #[arg(long)]
        mode: Option<Mode>,
        #[arg(long)]
        fan: Option<FanSpeed>,
        #[arg(long)]
        temperature: Option<u8>,
        #[arg(long)]
        swing: Option<SwingMode>,
    },
    /// Power on into the last used mode
    On,
    /// Power off
    Off,
    /// Print the restored state without transmitting anything
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    let config = config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let codes = Arc::new(
        CodeSet::load(&config.codes_dir)
            .with_context(|| format!("loading code tables from {}", config.codes_dir.display()))?,
    );

    let device = config.device();
    let dispatcher = Dispatcher::spawn(move || {
        TuyaSession::connect(device.clone()).map(|s| Box::new(s) as Box<dyn DeviceApi>)
    });

    let mut unit = ClimateUnit::new(&config.name, config.model, codes, dispatcher);

    let state_path = config.state_path();
    if let Some(snapshot) = Snapshot::load(&state_path)? {
        unit.restore(snapshot);
    }

    match cli.command {
        CliCommand::Show => {
            println!("{}: {}", unit.name(), unit.state());
            if let Some(sensor) = &config.temperature_sensor {
                println!("temperature sensor: {sensor}");
            }
        }
        CliCommand::On => {
            unit.turn_on().await?;
        }
        CliCommand::Off => {
            unit.turn_off().await?;
        }
        CliCommand::Set {
            mode,
            fan,
            temperature,
            swing,
        } => {
            if let Some(mode) = mode {
                unit.set_mode(mode).await?;
            }
            if let Some(fan) = fan {
                unit.set_fan(fan).await?;
            }
            if let Some(temperature) = temperature {
                unit.set_target_temperature(temperature).await?;
            }
            if let Some(swing) = swing {
                unit.set_swing(swing).await?;
            }
        }
    }

    unit.snapshot().save(&state_path)?;
    unit.shutdown();
    Ok(())
}
