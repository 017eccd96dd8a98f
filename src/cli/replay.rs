use std::{error::Error, path::PathBuf};

use crate::{
    capture::{
        replay::{self, ReplayFixture},
        CaptureReader,
    },
    cli::ConfigArgs,
};

#[derive(clap::Args, Debug, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Capture file to replay
    pub capture: PathBuf,
    /// Compare the result against this fixture and fail on any difference
    #[arg(long)]
    pub fixture: Option<PathBuf>,
    /// Write the result as a new fixture
    #[arg(long)]
    pub write_fixture: Option<PathBuf>,
    /// Print every transition and dispatch
    #[arg(long, short)]
    pub verbose: bool,
}

pub fn handle_replay(args: ReplayArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (config, layout, keymap) = args.config.load()?;
    let reader = CaptureReader::open(&args.capture)?;
    let outcome = replay::run(reader, config, layout, keymap)?;

    if args.verbose {
        print!(
            "{}",
            replay::canonical(&outcome.transitions, &outcome.dispatches)
        );
    }
    println!(
        "records: {}  decoded: {}  rejected: {}",
        outcome.records, outcome.decoded, outcome.rejected
    );
    println!(
        "transitions: {}  dispatches: {}",
        outcome.transitions.len(),
        outcome.dispatches.len()
    );
    for (reason, count) in outcome.drops.iter() {
        println!("dropped ({reason}): {count}");
    }
    println!("fingerprint: {}", outcome.fingerprint);

    if let Some(path) = args.write_fixture.as_ref() {
        ReplayFixture::from_outcome(&outcome).to_json_file(path)?;
        log::info!("Wrote fixture to {path:?}");
    }
    if let Some(path) = args.fixture.as_ref() {
        let fixture = ReplayFixture::from_json_file(path)?;
        fixture.verify(&outcome)?;
        println!("matches fixture {}", path.display());
    }

    Ok(())
}
