use std::path::PathBuf;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
};

use herald_config::{
    HeraldConfig, Severity, default_config_template, find_config_file, load_config, validate,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check,
    /// Write a documented default config to ./herald.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config(explicit: Option<&PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check => check(explicit),
        ConfigAction::Init { force } => init(PathBuf::from("herald.toml"), force),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(explicit: Option<&PathBuf>) -> Result<()> {
    let mut config = match explicit.cloned().or_else(find_config_file) {
        Some(path) => {
            eprintln!("Checking {}\n", path.display());
            load_config(&path)?
        },
        None => {
            eprintln!("No config file found; checking defaults.\n");
            HeraldConfig::default()
        },
    };
    herald_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    let result = validate(&config);

    for d in &result.diagnostics {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        };
        eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
    }

    let errors = result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    let warnings = result.diagnostics.len() - errors;

    if result.diagnostics.is_empty() {
        eprintln!("No issues found.");
    } else {
        eprintln!("\n{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(&path, default_config_template())?;
    println!("Wrote {}", path.display());
    Ok(())
}
