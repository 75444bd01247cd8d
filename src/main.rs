//! Soundstage command line player
//!
//! Loads a catalog, activates a scene and/or plays music and effects, then
//! prints playback progress until the requested time has elapsed.

use anyhow::{Context, Result};
use clap::Parser;
use soundstage::{AudioOutput, Coordinator, HeadlessOutput, MemoryCatalog, PlaybackConfig, SceneId};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const STATUS_INTERVAL: Duration = Duration::from_millis(500);
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "soundstage")]
#[command(version, about = "Play soundboard scenes, music and effects", long_about = None)]
struct Args {
    /// Catalog document (JSON)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scene to activate
    #[arg(long)]
    scene: Option<SceneId>,

    /// Music track to loop
    #[arg(long)]
    music: Option<String>,

    /// Effect to play (repeatable)
    #[arg(long = "effect")]
    effects: Vec<String>,

    /// Randomize effect pitch
    #[arg(long)]
    random_pitch: bool,

    /// How long to keep playing, in seconds
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Run without an audio device
    #[arg(long)]
    dry_run: bool,
}

#[cfg(feature = "streaming")]
fn open_output(dry_run: bool) -> Result<Arc<dyn AudioOutput>> {
    if dry_run {
        return Ok(Arc::new(HeadlessOutput::new()));
    }
    let output = soundstage::RodioOutput::open_default().context("Failed to open audio device")?;
    Ok(Arc::new(output))
}

#[cfg(not(feature = "streaming"))]
fn open_output(dry_run: bool) -> Result<Arc<dyn AudioOutput>> {
    if !dry_run {
        log::warn!("Built without the \"streaming\" feature; no sound will be produced");
    }
    Ok(Arc::new(HeadlessOutput::new()))
}

fn status_line(stage: &Coordinator) -> String {
    let music = stage.music_progress();
    let mut line = match stage.music_key() {
        Some(key) => format!("Music {key}: {:.1}/{:.1}s", music.current, music.duration),
        None => "Music: --".to_string(),
    };

    let mut effects: Vec<(String, f32)> = stage.effect_progress().into_iter().collect();
    effects.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, fraction) in effects {
        line.push_str(&format!(" | {key} {:>3.0}%", fraction * 100.0));
    }
    line
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PlaybackConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlaybackConfig::default(),
    };
    let catalog = match &args.catalog {
        Some(path) => MemoryCatalog::load(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => MemoryCatalog::new(),
    };

    let output = open_output(args.dry_run)?;
    let stage = Coordinator::new(config, Arc::new(catalog), output)?;

    if let Some(scene) = args.scene {
        stage.activate_scene(scene);
    }
    if let Some(music) = &args.music {
        stage.play_music(music, music);
    }
    for effect in &args.effects {
        let key = stage.play_one_shot(effect, args.random_pitch);
        println!("{effect} -> {key}");
    }

    if !stage.wait_idle(LOAD_TIMEOUT) {
        log::warn!("Assets still loading after {}s", LOAD_TIMEOUT.as_secs());
    }

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        println!("{}", status_line(&stage));
        thread::sleep(STATUS_INTERVAL);
    }

    stage.stop_all();
    Ok(())
}
