use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SupportedStreamConfig};

fn host() -> cpal::Host {
    cpal::default_host()
}

/// The input device called `name`, or the host's default.
pub fn input_device(name: Option<&str>) -> Result<Device> {
    let host = host();
    tracing::debug!("Host: {:?}", host.id());
    match name {
        Some(target) => find(host.input_devices()?, target),
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device")),
    }
}

/// The output device called `name`, or the host's default.
pub fn output_device(name: Option<&str>) -> Result<Device> {
    let host = host();
    match name {
        Some(target) => find(host.output_devices()?, target),
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device")),
    }
}

fn find(mut devices: impl Iterator<Item = Device>, target: &str) -> Result<Device> {
    devices
        .find(|device| device.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("audio device `{}` not found", target))
}

/// One line per input device: ` * name(2ch, 48000hz) [default]`.
pub fn available_inputs() -> Result<Vec<String>> {
    let host = host();
    let default = host.default_input_device().and_then(|d| d.name().ok());
    describe(
        host.input_devices().context("Failed to list input devices")?,
        default,
        |device| device.default_input_config(),
    )
}

pub fn available_outputs() -> Result<Vec<String>> {
    let host = host();
    let default = host.default_output_device().and_then(|d| d.name().ok());
    describe(
        host.output_devices().context("Failed to list output devices")?,
        default,
        |device| device.default_output_config(),
    )
}

fn describe<E>(
    devices: impl Iterator<Item = Device>,
    default: Option<String>,
    config: impl Fn(&Device) -> Result<SupportedStreamConfig, E>,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for device in devices {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        let mut line = match config(&device) {
            Ok(cfg) => format!(" * {}({}ch, {}hz)", name, cfg.channels(), cfg.sample_rate().0),
            Err(_) => format!(" * {}(no default config)", name),
        };
        if default.as_deref() == Some(name.as_str()) {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines)
}
