use std::{error::Error, path::PathBuf};

use tabled::settings::{Panel, Style};
use tabled::{Table, Tabled};

use crate::{
    capture::{CaptureReader, CaptureRecord},
    cli::ConfigArgs,
    drivers::trackpad::{hex_prefix, Decoder, DeviceDescriptor, ProfilePreference, RawReport},
    input::Side,
};

/// Number of payload bytes shown per record
const PREFIX_LEN: usize = 16;

#[derive(clap::Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Capture file to inspect
    pub capture: PathBuf,
    /// Only show the first N records
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
    /// Decode every record and show the resulting contacts
    #[arg(long, short)]
    pub decode: bool,
}

#[derive(Tabled)]
struct DeviceRow {
    side: String,
    vendor_id: String,
    product_id: String,
    usage_page: String,
    usage: String,
}

#[derive(Tabled)]
struct RecordRow {
    index: usize,
    timestamp_us: u64,
    delta_us: u64,
    side: String,
    profile: String,
    len: usize,
    decoded: String,
    data: String,
}

pub fn handle_inspect(args: InspectArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let reader = CaptureReader::open(&args.capture)?;
    let header = *reader.header();

    let devices: Vec<DeviceRow> = Side::ALL
        .iter()
        .map(|side| {
            let descriptor = header.descriptor(*side);
            DeviceRow {
                side: side.to_string(),
                vendor_id: format!("{:04x}", descriptor.vendor_id),
                product_id: format!("{:04x}", descriptor.product_id),
                usage_page: format!("{:04x}", descriptor.usage_page),
                usage: format!("{:04x}", descriptor.usage),
            }
        })
        .collect();
    let mut table = Table::new(devices);
    table
        .with(Style::modern_rounded())
        .with(Panel::header(format!("Capture v{}", header.version)));
    println!("{table}");

    let decoder = if args.decode {
        let (config, _, _) = args.config.load()?;
        Some(Decoder::new(config.decoder.target()))
    } else {
        None
    };

    let mut rows = Vec::new();
    let mut total = 0;
    let mut previous: Option<u64> = None;
    for record in reader {
        let record = record?;
        total += 1;
        if args.limit.is_some_and(|limit| rows.len() >= limit) {
            continue;
        }
        let decoded = match decoder.as_ref() {
            Some(decoder) => {
                let descriptor = header.descriptor(record.side.unwrap_or(Side::Left));
                describe_decode(decoder, &record, descriptor)
            }
            None => String::new(),
        };
        let delta = previous.map(|at| record.timestamp_us.saturating_sub(at)).unwrap_or(0);
        previous = Some(record.timestamp_us);

        rows.push(RecordRow {
            index: total - 1,
            timestamp_us: record.timestamp_us,
            delta_us: delta,
            side: record.side.map(|s| s.to_string()).unwrap_or("?".to_string()),
            profile: record
                .profile
                .map(|p| p.as_str().to_string())
                .unwrap_or("-".to_string()),
            len: record.payload.len(),
            decoded,
            data: hex_prefix(&record.payload, PREFIX_LEN),
        });
    }

    let shown = rows.len();
    let mut table = Table::new(rows);
    table
        .with(Style::modern_rounded())
        .with(Panel::header("Records"));
    println!("{table}");
    println!("Showing {shown} of {total} record(s)");

    Ok(())
}

/// Decode a record with automatic profile selection and summarize it
fn describe_decode(
    decoder: &Decoder,
    record: &CaptureRecord,
    descriptor: DeviceDescriptor,
) -> String {
    let report = RawReport::new(&record.payload, descriptor);
    match decoder.decode(report, record.timestamp_us, ProfilePreference::Auto) {
        Ok(decoded) => {
            let contacts: Vec<String> = decoded
                .frame
                .contacts()
                .iter()
                .map(|c| format!("#{}({},{})", c.id, c.x, c.y))
                .collect();
            format!("{}: {}", decoded.profile.as_str(), contacts.join(" "))
        }
        Err(_) => "rejected".to_string(),
    }
}
