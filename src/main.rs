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
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use looptone::audio::{self, decode};
use looptone::audio::mixer::{self, AudioMixer};
use looptone::capture::ExportFormat;
use looptone::config::EngineConfig;
use looptone::metronome::CONTROL_TICK;
use looptone::midi::{self, NoteEvent};
use looptone::Engine;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Extra time rendered after the last release so tails are not cut off.
const RENDER_TAIL: f64 = 0.2;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A looping sample instrument."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyzes a recording and prints its pitch, trim and loop points.
    Analyze {
        /// The recording to analyze.
        file: PathBuf,
        /// Print YAML instead of JSON.
        #[arg(long)]
        yaml: bool,
    },
    /// Exports the prepared recording, or just its loop region.
    Export {
        /// The recording to export.
        file: PathBuf,
        /// Where to write the export.
        out: PathBuf,
        /// Export only the loop region.
        #[arg(short, long = "loop")]
        loop_region: bool,
        /// The export format (wav or encoded).
        #[arg(short, long, default_value = "wav")]
        format: ExportFormat,
    },
    /// Renders a chord of notes offline into a WAV file.
    Render {
        /// The recording to play.
        file: PathBuf,
        /// Where to write the rendered performance.
        out: PathBuf,
        /// The MIDI notes to play, e.g. 60,64,67.
        #[arg(short, long, value_delimiter = ',', default_value = "60")]
        notes: Vec<u8>,
        /// How long to hold the notes, e.g. 2s or 1500ms.
        #[arg(long, default_value = "2s")]
        hold: String,
        /// Note velocity from 0 to 1.
        #[arg(short, long, default_value_t = 0.8)]
        velocity: f32,
        /// Sync the loop to this tempo.
        #[arg(short, long)]
        bpm: Option<u32>,
        /// The instrument config.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Plays a recording as a live instrument.
    Play {
        /// The recording to play.
        file: PathBuf,
        /// The instrument config.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// The output device to play through. Defaults to the system default.
        #[arg(short, long)]
        device: Option<String>,
        /// The MIDI input to play from.
        #[arg(short, long)]
        midi: Option<String>,
        /// Run a metronome at this volume.
        #[arg(long)]
        metronome: Option<f32>,
        /// Stop after this long, e.g. 30s. Runs until killed otherwise.
        #[arg(long)]
        duration: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { file, yaml } => {
            let (mut engine, _) = offline_engine(&file, EngineConfig::default())?;
            let analysis = engine.load_async(fs::read(&file)?).await?;
            if yaml {
                print!("{}", serde_yml::to_string(&analysis)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            }
        }
        Commands::Export {
            file,
            out,
            loop_region,
            format,
        } => {
            let (mut engine, _) = offline_engine(&file, EngineConfig::default())?;
            engine.load(&fs::read(&file)?)?;
            let bytes = if loop_region {
                engine.export_loop_region(format)?
            } else {
                engine.export_original_sample(format)?
            };
            fs::write(&out, &bytes)?;
            println!("Wrote {} bytes to {}.", bytes.len(), out.display());
        }
        Commands::Render {
            file,
            out,
            notes,
            hold,
            velocity,
            bpm,
            config,
        } => {
            let hold: Duration = DurationString::from_string(hold)?.into();
            let (mut engine, mut mixer) = offline_engine(&file, load_config(config.as_deref())?)?;
            engine.load(&fs::read(&file)?)?;
            if let Some(bpm) = bpm {
                engine.set_tempo(bpm);
                engine.set_tempo_sync(true);
            }

            engine.start_performance_recording();
            for note in notes.iter() {
                if engine.note_on(*note, velocity).is_none() {
                    println!("Note {} was dropped.", note);
                }
            }
            render(&mut engine, &mut mixer, hold.as_secs_f64())?;
            for note in notes.iter() {
                engine.note_off(*note);
            }
            let release = engine.config().envelope().release();
            render(&mut engine, &mut mixer, release + RENDER_TAIL)?;

            let bytes = engine.stop_performance_recording()?;
            fs::write(&out, &bytes)?;
            println!("Wrote {} bytes to {}.", bytes.len(), out.display());
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            file,
            config,
            device,
            midi,
            metronome,
            duration,
        } => {
            let duration: Option<Duration> = match duration {
                Some(duration) => Some(DurationString::from_string(duration)?.into()),
                None => None,
            };
            let device = audio::get_device(device.as_deref())?;

            let (mixer, handle) = mixer::mixer(device.sample_rate(), device.channels());
            let mut engine = Engine::new(load_config(config.as_deref())?, handle);
            engine.load_async(fs::read(&file)?).await?;

            let (sender, receiver) = crossbeam_channel::unbounded();
            let _connection = match midi {
                Some(name) => Some(midi::get(&name)?.watch(sender)?),
                None => None,
            };
            let _stream = device.start(mixer)?;
            if let Some(volume) = metronome {
                engine.start_metronome(volume);
            }

            info!(file = %file.display(), "Playing");
            let started = Instant::now();
            while duration.map_or(true, |duration| started.elapsed() < duration) {
                for event in receiver.try_iter() {
                    match event {
                        NoteEvent::On { note, velocity } => {
                            engine.note_on(note, velocity);
                        }
                        NoteEvent::Off { note } => engine.note_off(note),
                        NoteEvent::AllNotesOff => engine.panic(),
                    }
                }
                engine.update()?;
                spin_sleep::sleep(CONTROL_TICK);
            }
            engine.panic();
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

/// Creates an engine over an offline mixer running at the recording's own
/// sample rate and channel count.
fn offline_engine(
    file: &Path,
    config: EngineConfig,
) -> Result<(Engine, AudioMixer), Box<dyn Error>> {
    let sample = decode::decode(&fs::read(file)?)?;
    let (mixer, handle) = mixer::mixer(sample.sample_rate(), sample.channel_count() as u16);
    Ok((Engine::new(config, handle), mixer))
}

/// Renders `seconds` of audio a control tick at a time.
fn render(engine: &mut Engine, mixer: &mut AudioMixer, seconds: f64) -> Result<(), Box<dyn Error>> {
    let tick = CONTROL_TICK.as_secs_f64();
    let block = (tick * mixer.sample_rate() as f64).round() as usize;
    for _ in 0..(seconds / tick).ceil() as usize {
        mixer.process_frames(block);
        engine.update()?;
    }
    Ok(())
}
