use clap::{Parser, Subcommand, ValueEnum};
use macsweep::ScanMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "macsweep")]
#[command(about = "Storage scanning and reclaim planning for macOS", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Mode {
    Quick,
    Full,
}

impl From<Mode> for ScanMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Quick => ScanMode::Quick,
            Mode::Full => ScanMode::Full,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Scan a directory and report where the space went")]
    Scan {
        #[arg(default_value = "~")]
        path: String,
        #[arg(short, long, default_value = "quick")]
        mode: Mode,
        #[arg(short = 'F', long, default_value = "human")]
        format: OutputFormat,
    },
    #[command(about = "Scan and show the reclaim plan: packs and guided steps")]
    Plan {
        #[arg(default_value = "~")]
        path: String,
        #[arg(short, long, default_value = "quick")]
        mode: Mode,
        #[arg(short = 'F', long, default_value = "human")]
        format: OutputFormat,
    },
    #[command(about = "Execute the low-risk reclaim plan")]
    Apply {
        #[arg(default_value = "~")]
        path: String,
        #[arg(long, help = "Skip the confirmation prompt")]
        yes: bool,
        #[arg(long, help = "Show what would be cleaned without touching anything")]
        dry_run: bool,
        #[arg(short = 'F', long, default_value = "human")]
        format: OutputFormat,
    },
    #[command(about = "Restore a previous cleanup from its undo token")]
    Undo {
        token: String,
    },
    #[command(about = "Show past scans")]
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    #[command(about = "Project disk growth from the scan history")]
    Forecast,
    #[command(about = "Watch live disk activity until interrupted")]
    Monitor {
        #[arg(help = "Paths to watch; defaults to the busiest junk locations")]
        paths: Vec<PathBuf>,
    },
    #[command(about = "Manage the never-clean exclusion list")]
    Exclude {
        #[command(subcommand)]
        action: ExcludeActions,
    },
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
pub enum ExcludeActions {
    #[command(about = "Never clean this path")]
    Add { path: PathBuf },
    #[command(about = "Remove a path from the exclusion list")]
    Remove { path: PathBuf },
    #[command(about = "Show all excluded paths")]
    List,
}

#[derive(Subcommand)]
pub enum ConfigActions {
    #[command(about = "Show the active configuration")]
    Show,
    #[command(about = "Reset configuration to defaults")]
    Reset,
}

/// Shell-style home expansion for path arguments.
pub fn expand_path(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path("~"), home);
        assert_eq!(expand_path("~/Downloads"), home.join("Downloads"));
        assert_eq!(expand_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
