use clap::{Parser, Subcommand};
use polysite::catalog::CatalogSet;
use polysite::{config, output, site};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polysite")]
#[command(about = "Multilingual static site builder")]
#[command(long_about = "\
Multilingual static site builder

Every template is rendered once per language from gettext-style catalogs,
then handed to external tools (minifiers, tidy, gzip) for post-processing.

Project layout (defaults):

  config.toml                     # Optional; see 'polysite gen-config'
  templates/
  ├── html/
  │   ├── index.html              # [% PROCESS \"inc/header.inc\" %] {{ Hello }}
  │   └── inc/header.inc          # Included fragment, not rendered on its own
  ├── js/  css/  php/  apache/
  translations/
  ├── site.pot                    # Reference catalog
  └── dl/fr_FR.po                 # One catalog per language

Output: output/index.html.en_US, output/index.html.fr_FR, ...

Set RUST_LOG=debug for per-job logging.")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render every artifact in every language
    Build,
    /// Show translation completeness per language
    Stats,
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Build => {
            let config = config::load_config(&cli.config)?;
            let root = Path::new(".");
            println!("==> Building {}", config.directories.output_dir);
            let summary = site::build_site(&config, root)?;
            output::print_build_summary(&summary);
            println!("==> Build complete: {}", config.directories.output_dir);
        }
        Command::Stats => {
            let config = config::load_config(&cli.config)?;
            let catalogs = CatalogSet::load(
                Path::new(&config.catalogs.reference_file),
                Path::new(&config.catalogs.language_dir),
                &config.catalogs.reference_locale,
            )?;
            output::print_catalog_stats(&catalogs);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
