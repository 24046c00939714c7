//! CLI for varve time-series stores.
//!
//! Thin glue over the engine: append single records to a series and list
//! records back out as JSON. Everything interesting happens in the `varve`
//! crate.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// varve — append-only mmap time-series storage CLI.
#[derive(Parser)]
#[command(name = "varve", version, about)]
struct Cli {
    /// Series to operate on: a directory followed by the series name,
    /// e.g. /var/timeseries/load-over-time.
    #[arg(long)]
    serie: PathBuf,

    /// What to do with the series.
    #[arg(long, value_enum, default_value = "add-value")]
    action: Action,

    /// Timestamp to store; required by add-value. 0 and u64::MAX are
    /// reserved.
    #[arg(long)]
    time: Option<u64>,

    /// Value to store; required by add-value.
    #[arg(long)]
    value: Option<u64>,

    /// Label to attach to the record; repeatable.
    #[arg(long)]
    label: Vec<String>,

    /// Maximum records per shard before rotating. Defaults to a week of
    /// one-second points.
    #[arg(long)]
    max_entries: Option<usize>,

    /// Label slots per record (up to 255).
    #[arg(long)]
    labels_per_entry: Option<usize>,

    /// Growth block of the label file in bytes.
    #[arg(long)]
    label_block: Option<usize>,

    /// How many records to print from the end of the series when listing.
    #[arg(long, default_value_t = 1000)]
    entries: usize,
}

/// Available actions.
#[derive(Clone, Copy, ValueEnum)]
enum Action {
    /// Append one record (use --time, --value, repeated --label).
    AddValue,
    /// Print the newest records of the series as JSON lines.
    List,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.action {
        Action::AddValue => cmd_add_value(&cli),
        Action::List => cmd_list(&cli),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `varve --action add-value`.
fn cmd_add_value(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let time = cli.time.ok_or("add-value needs --time")?;
    let value = cli.value.ok_or("add-value needs --value")?;
    if time == 0 || time == u64::MAX {
        return Err("--time 0 and --time 2^64-1 are reserved values".into());
    }

    let mut writer = varve::SerieWriter::new(&cli.serie);
    if let Some(max_entries) = cli.max_entries {
        writer.data_options.max_entries = max_entries;
    }
    if let Some(labels_per_entry) = cli.labels_per_entry {
        writer.data_options.labels_per_entry = labels_per_entry;
    }
    if let Some(block) = cli.label_block {
        writer.label_options.block = block;
    }
    if cli.label.len() > writer.data_options.labels_per_entry {
        return Err(format!(
            "{} labels given but records hold {}; raise --labels-per-entry",
            cli.label.len(),
            writer.data_options.labels_per_entry
        )
        .into());
    }

    writer.open()?;
    writer.append(time, value, &cli.label)?;
    writer.close()?;
    Ok(())
}

/// Implements `varve --action list`.
fn cmd_list(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = varve::SerieReader::new(&cli.serie);
    reader.open()?;

    let end = reader.last_location()?;
    let start = reader.minus(end, cli.entries);

    for point in reader.get_data(start, end)? {
        println!("{}", serde_json::to_string(&point)?);
    }
    Ok(())
}
