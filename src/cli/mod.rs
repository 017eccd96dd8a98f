pub mod inspect;
pub mod replay;
pub mod run;

use std::{error::Error, path::PathBuf};

use clap::{Parser, Subcommand};

use crate::config::{
    layout::{KeyLayout, Keymap},
    path::{find_config_file, CONFIG_FILE, KEYMAP_FILE, LAYOUT_FILE},
    EngineConfig, LoadError,
};

use inspect::{handle_inspect, InspectArgs};
use replay::{handle_replay, ReplayArgs};
use run::{handle_run, RunArgs};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Read both trackpads and dispatch keys, clicks and gestures
    Run(RunArgs),
    /// Replay a capture through the engine and print its fingerprint
    Replay(ReplayArgs),
    /// Show the header and records of a capture
    Inspect(InspectArgs),
}

/// Locations of the configuration documents. Paths not given on the command
/// line are searched for in the config directories.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Engine configuration (YAML)
    #[arg(long, short)]
    pub config: Option<PathBuf>,
    /// Key layout (YAML)
    #[arg(long)]
    pub layout: Option<PathBuf>,
    /// Keymap (YAML)
    #[arg(long)]
    pub keymap: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the configuration, layout and keymap, falling back to the
    /// built-in defaults for documents that cannot be found
    pub fn load(&self) -> Result<(EngineConfig, KeyLayout, Keymap), LoadError> {
        let config = match find_path(&self.config, CONFIG_FILE) {
            Some(path) => {
                log::info!("Loading configuration from {path:?}");
                EngineConfig::from_yaml_file(path)?
            }
            None => EngineConfig::default(),
        };
        let layout = match find_path(&self.layout, LAYOUT_FILE) {
            Some(path) => {
                log::info!("Loading layout from {path:?}");
                KeyLayout::from_yaml_file(path)?
            }
            None => KeyLayout::split_qwerty(config.surface.width_mm, config.surface.height_mm),
        };
        let keymap = match find_path(&self.keymap, KEYMAP_FILE) {
            Some(path) => {
                log::info!("Loading keymap from {path:?}");
                Keymap::from_yaml_file(path)?
            }
            None => Keymap::default(),
        };

        Ok((config, layout, keymap))
    }
}

fn find_path(explicit: &Option<PathBuf>, name: &str) -> Option<PathBuf> {
    explicit.clone().or_else(|| find_config_file(name))
}

pub async fn main_cli(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    match args.cmd {
        Commands::Run(args) => handle_run(args).await?,
        Commands::Replay(args) => handle_replay(args)?,
        Commands::Inspect(args) => handle_inspect(args)?,
    }

    Ok(())
}
