mod bfe_analysis;
mod bfe_cleaning;
mod bfe_config;
mod bfe_controllers;
mod bfe_gui;
mod bfe_models;
mod bfe_source;
mod bfe_views;

use anyhow::{bail, Context};
use bfe_config::BFEConfig;
use bfe_controllers::{Event, Session};
use bfe_models::{HourRange, MonthKey, StationTable};
use bfe_source::{BucketSource, DataSource, DirectorySource};
use bfe_views::BFEViews;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bfe", version, about = "Explore bikeshare trips by station, hour and direction")]
struct Cli {
    /// Station reference file (overrides BFE_STATIONS_FILE)
    #[arg(long, global = true)]
    stations: Option<PathBuf>,

    /// Read monthly archives from this directory instead of the bucket
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Minimum trips for a flow to be shown (overrides BFE_FLOW_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<usize>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open the interactive dashboard (default)
    Gui,
    /// List the months with trip archives
    Months,
    /// Print station totals, or the flows of one station, for a month
    Report {
        /// Month as YYYYMM
        #[arg(long)]
        month: MonthKey,
        /// Start-hour range, e.g. 7-10
        #[arg(long, default_value = "0-24")]
        hours: HourRange,
        /// Count rides at the station they end at
        #[arg(long)]
        destination: bool,
        /// Show flows from (or into) this station
        #[arg(long)]
        focus: Option<String>,
        /// Table page to print, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Also write the map as GeoJSON
        #[arg(long)]
        geojson: Option<PathBuf>,
    },
    /// Clean a raw trip export into an enriched CSV
    Clean {
        input: PathBuf,
        output: PathBuf,
    },
    /// Derive station coordinates from a trip export and reverse-geocode them
    Geolocate {
        input: PathBuf,
        output: PathBuf,
    },
}

fn main() {
    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\n{}", panic_info);
        eprintln!("\n💡 Run again with RUST_LOG=debug for details");
        eprintln!("{}", "═".repeat(70));
    }));

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        BFEViews::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = BFEConfig::from_env()?;
    if let Some(path) = cli.stations {
        config.stations_file = path;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(threshold) = cli.threshold {
        config.flow_threshold = threshold;
    }
    log::debug!("Configuration: {:?}", config);

    match cli.command.unwrap_or(Command::Gui) {
        Command::Gui => {
            let source = open_source(&config)?;
            let stations = StationTable::load(&config.stations_file)?;
            bfe_gui::run_gui(source, stations, config.flow_threshold)
                .map_err(|e| anyhow::anyhow!("Dashboard failed: {}", e))
        }
        Command::Months => {
            let source = open_source(&config)?;
            let catalogue = source.list_months()?;
            BFEViews::show_months(&catalogue);
            Ok(())
        }
        Command::Report {
            month,
            hours,
            destination,
            focus,
            page,
            geojson,
        } => {
            let source = open_source(&config)?;
            let stations = StationTable::load(&config.stations_file)?;
            let catalogue = source.list_months()?;
            let mut session = Session::new(stations, catalogue, config.flow_threshold);

            if session.archive_for(month).is_none() {
                bail!("No trip archive for {} (try `bfe months`)", month.label());
            }
            BFEViews::show_loading(&format!("Loading {}...", month.label()));
            session.run(source.as_ref(), Event::MonthChanged(month))?;
            session.dispatch(Event::DirectionToggled(destination))?;
            session.dispatch(Event::HourRangeChanged {
                lo: hours.lo(),
                hi: hours.hi(),
            })?;
            if let Some(station) = focus {
                if !session.stations().contains(&station) {
                    bail!("Unknown station '{}'", station);
                }
                session.dispatch(Event::StationClicked(station))?;
            }

            let rendered = session.render();
            BFEViews::show_rendered(&rendered, page.saturating_sub(1));

            if let Some(path) = geojson {
                let collection = BFEViews::map_geojson(&rendered.map);
                std::fs::write(&path, collection.to_string())
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("\n  ✓ Map written to {:?}", path);
            }
            Ok(())
        }
        Command::Clean { input, output } => {
            let reader = File::open(&input).with_context(|| format!("Failed to open {:?}", input))?;
            let writer = File::create(&output).with_context(|| format!("Failed to create {:?}", output))?;
            let stats = bfe_cleaning::clean_trips(reader, BufWriter::new(writer))?;
            println!(
                "✓ Wrote {} trips to {:?} ({} incomplete rows dropped)",
                stats.written, output, stats.dropped
            );
            Ok(())
        }
        Command::Geolocate { input, output } => {
            let reader = File::open(&input).with_context(|| format!("Failed to open {:?}", input))?;
            let locations = bfe_cleaning::derive_station_locations(reader)?;
            log::info!("Geocoding {} stations, about one per second", locations.len());

            let geocoder = bfe_cleaning::NominatimGeocoder::new(&config.geocoder_agent)?;
            let stations = bfe_cleaning::geolocate_stations(&locations, &geocoder);

            let writer = File::create(&output).with_context(|| format!("Failed to create {:?}", output))?;
            bfe_cleaning::write_stations(&stations, BufWriter::new(writer))?;
            println!("✓ Wrote {} stations to {:?}", stations.len(), output);
            Ok(())
        }
    }
}

fn open_source(config: &BFEConfig) -> anyhow::Result<Arc<dyn DataSource>> {
    Ok(match &config.data_dir {
        Some(dir) => {
            log::info!("Reading trip archives from {:?}", dir);
            Arc::new(DirectorySource::new(dir))
        }
        None => {
            log::info!("Reading trip archives from {}", config.bucket_url);
            Arc::new(BucketSource::new(&config.bucket_url, config.cache_dir.clone())?)
        }
    })
}
