use anyhow::Context;
use clap::{Parser, Subcommand};
use popmap::config::AppConfig;
use popmap::{catalog, server, view};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the map and chart data over HTTP
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Load one municipality (or combined view) and report the join
    Load {
        municipality: String,
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Write the joined table as GeoJSON
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List the variables a map can show
    Variables,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            println!("Serving map data with config: {:?}", config);
            let app_config = AppConfig::load_from_file(&config)?;
            server::start_server(app_config).await?;
        }
        Commands::Load {
            municipality,
            config,
            output,
        } => {
            let app_config = AppConfig::load_from_file(&config)?;
            println!("Loading {} from {:?}", municipality, app_config.data.root);

            let table = view::load_view(&app_config, &municipality)
                .with_context(|| format!("Failed to load {}", municipality))?;
            println!(
                "{} boundaries ({} matched a town) across {:?}, {}",
                table.len(),
                table.matched(),
                table.municipalities,
                table.crs
            );
            for record in table.records.iter().filter(|r| r.stats.is_none()) {
                println!("  no population row for {:?} ({})", record.name, record.municipality);
            }

            if let Some(path) = output {
                let collection = view::to_feature_collection(&table);
                let json = serde_json::to_string(&collection)?;
                fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
                println!("Wrote {:?}", path);
            }
        }
        Commands::Variables => {
            for variable in catalog::variables() {
                println!("{}\t{}", variable.field, variable.label);
            }
        }
    }

    Ok(())
}
