use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use themesync::platform::OsColorSchemeQuery;
use themesync::script::render_pre_paint_script;

#[derive(Debug, Parser)]
#[command(name = "themesync", version, about = "Inspect and change the persisted theme selection")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the pre-paint <script> tag for the configured provider
    Script,
    /// Print the color scheme the OS currently prefers
    Detect,
    /// Print the persisted theme, or the default when none is stored
    Get,
    /// Persist a theme and print the resulting published state as JSON
    Set { name: String },
}

fn main() -> anyhow::Result<()> {
    themesync::logging::init();
    let cli = Cli::parse();
    let config = themesync::load_config_or_default();

    match cli.command {
        Command::Script => println!("{}", render_pre_paint_script(&config)),
        Command::Detect => println!("{}", themesync::detect_color_scheme()),
        Command::Get => {
            let area = themesync::file_storage().context("failed to open theme storage")?;
            println!("{}", themesync::persisted_theme(&config, &area));
        }
        Command::Set { name } => {
            let area = themesync::file_storage().context("failed to open theme storage")?;
            let snapshot = themesync::set_theme_in(
                config,
                &area,
                Rc::new(OsColorSchemeQuery::new()),
                &name,
            )
            .with_context(|| format!("failed to set theme {name}"))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    Ok(())
}
