use std::path::{Path, PathBuf};

use clap::Parser;
use quarry_app_core::{import_url, StartupOptions};

/// Headless launcher for game server instances.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Launch the instance with this id
    #[arg(short, long)]
    pub launch: Option<String>,

    /// Server port to pass to the launched instance (requires --launch)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Import a pack from a local zip file or URL
    #[arg(short = 'I', long)]
    pub import: Option<String>,

    /// Data directory (defaults to the platform data directory)
    #[arg(short, long, env = "QUARRY_DIR")]
    pub dir: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// `data_dir` is the already-prepared data directory.
    pub fn startup_options(&self, data_dir: PathBuf, cwd: &Path) -> StartupOptions {
        StartupOptions {
            data_dir,
            launch: self.launch.clone(),
            server_port: self.port,
            import: self.import.as_deref().map(|arg| import_url(arg, cwd)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_and_port_map_to_startup_options() {
        let cli = Cli::try_parse_from(["quarry", "--launch", "X", "--port", "25565"]).unwrap();
        let options = cli.startup_options(PathBuf::from("/data"), Path::new("/"));
        assert_eq!(options.launch.as_deref(), Some("X"));
        assert_eq!(options.server_port, Some(25565));
        assert!(options.validate().is_ok());
        assert_eq!(options.peer_command().to_string(), "launch-with-port X 25565");
    }

    #[test]
    fn port_alone_parses_but_fails_validation() {
        let cli = Cli::try_parse_from(["quarry", "-p", "25565"]).unwrap();
        let options = cli.startup_options(PathBuf::from("/data"), Path::new("/"));
        assert!(options.validate().is_err());
    }

    #[test]
    fn out_of_range_port_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["quarry", "-l", "X", "-p", "70000"]).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn import_paths_become_urls() {
        let cli = Cli::try_parse_from(["quarry", "-I", "pack.zip"]).unwrap();
        let options = cli.startup_options(PathBuf::from("/data"), Path::new("/home/me"));
        assert_eq!(options.import.as_deref(), Some("file:///home/me/pack.zip"));
    }
}
