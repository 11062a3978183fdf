use anyhow::Result;
use butterfly_io::TileConfig;
use butterfly_route::commands;
use butterfly_route::{parse_coord, parse_points, parse_vehicle};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "butterfly-route")]
#[command(about = "Shortest-path routing on OpenStreetMap data", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tiled routing graph from a PBF file
    Build {
        /// Input PBF file
        input: PathBuf,
        /// Output tiles file
        output: PathBuf,
        /// zstd-compress the tiles
        #[arg(long)]
        compress: bool,
        /// Tile zoom level
        #[arg(long, default_value_t = 13)]
        zoom: u8,
    },
    /// Find a route between two coordinates
    Route {
        /// Tiles file
        graph: PathBuf,
        /// Start coordinate (lat,lon)
        #[arg(long)]
        from: String,
        /// End coordinate (lat,lon)
        #[arg(long)]
        to: String,
        /// Vehicle whose restrictions apply (car, bicycle, ...)
        #[arg(long)]
        vehicle: Option<String>,
    },
    /// Route weights between every pair of points
    Matrix {
        /// Tiles file
        graph: PathBuf,
        /// Points as "lat,lon;lat,lon;..."
        #[arg(long)]
        points: String,
        /// Vehicle whose restrictions apply
        #[arg(long)]
        vehicle: Option<String>,
    },
    /// Build a contraction hierarchy from a tiles file
    BuildCh {
        /// Input tiles file
        input: PathBuf,
        /// Output CH flatfile
        output: PathBuf,
        /// Vehicle the hierarchy is built for
        #[arg(long)]
        vehicle: Option<String>,
    },
    /// Find a route using a contraction hierarchy
    RouteCh {
        /// CH flatfile
        graph: PathBuf,
        /// Start coordinate (lat,lon)
        #[arg(long)]
        from: String,
        /// End coordinate (lat,lon)
        #[arg(long)]
        to: String,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Commands::Build {
            input,
            output,
            compress,
            zoom,
        } => {
            commands::build(&input, &output, TileConfig { zoom, compress })?;
        }
        Commands::Route {
            graph,
            from,
            to,
            vehicle,
        } => {
            let vehicle = parse_vehicle(vehicle.as_deref())?;
            let route = commands::route(&graph, parse_coord(&from)?, parse_coord(&to)?, vehicle)?;
            print_json(&route)?;
        }
        Commands::Matrix {
            graph,
            points,
            vehicle,
        } => {
            let vehicle = parse_vehicle(vehicle.as_deref())?;
            let matrix = commands::matrix(&graph, &parse_points(&points)?, vehicle)?;
            print_json(&matrix)?;
        }
        Commands::BuildCh {
            input,
            output,
            vehicle,
        } => {
            commands::build_ch(&input, &output, parse_vehicle(vehicle.as_deref())?)?;
        }
        Commands::RouteCh { graph, from, to } => {
            let route = commands::route_ch(&graph, parse_coord(&from)?, parse_coord(&to)?)?;
            print_json(&route)?;
        }
    }

    Ok(())
}
