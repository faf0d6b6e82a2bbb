// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use tracing::{error, info};

use super::mixer::AudioMixer;

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host the device belongs to.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The default output configuration of the device.
    config: cpal::SupportedStreamConfig,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, Rate={}) ({})",
            self.name,
            self.channels(),
            self.sample_rate(),
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<Device>, Box<dyn Error>> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(config) = device.default_output_config() else {
                    continue;
                };
                devices.push(Device {
                    name: device.name()?,
                    host_id,
                    device,
                    config,
                });
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the output device with the given name.
    pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
        match Device::list()?
            .into_iter()
            .find(|device| device.name.trim() == name)
        {
            Some(device) => Ok(device),
            None => Err(format!("no device found with name {}", name).into()),
        }
    }

    /// Gets the default output device of the default host.
    pub fn default_output() -> Result<Device, Box<dyn Error>> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or("no default output device")?;
        let config = device.default_output_config()?;
        Ok(Device {
            name: device.name()?,
            host_id: host.id(),
            device,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    /// Starts an output stream driven by the given mixer. The stream plays
    /// until the returned handle is dropped.
    pub fn start(&self, mixer: AudioMixer) -> Result<cpal::Stream, Box<dyn Error>> {
        let config = self.config.config();
        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&self.device, &config, mixer)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&self.device, &config, mixer)?,
            cpal::SampleFormat::I32 => build_stream::<i32>(&self.device, &config, mixer)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&self.device, &config, mixer)?,
            other => return Err(format!("unsupported sample format {}", other).into()),
        };
        stream.play()?;
        info!(
            device = %self.name,
            channels = config.channels,
            sample_rate = config.sample_rate,
            "Output stream started"
        );
        Ok(stream)
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: AudioMixer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            mixer.process(&mut scratch);
            for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(*sample);
            }
        },
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}
