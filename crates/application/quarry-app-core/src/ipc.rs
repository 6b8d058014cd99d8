//! One-line text commands exchanged between a secondary process and the primary.

use std::fmt;
use std::path::Path;

use camino::Utf8PathBuf;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use quarry_core::InstanceId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Activate,
    Import(String),
    Launch(InstanceId),
    LaunchWithPort(InstanceId, u16),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerCommandError {
    #[error("unknown command: {0:?}")]
    Unknown(String),
    #[error("malformed {0} command")]
    Malformed(&'static str),
}

impl PeerCommand {
    pub fn parse(line: &str) -> Result<Self, PeerCommandError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        match verb {
            "activate" => Ok(PeerCommand::Activate),
            "import" if !rest.is_empty() => Ok(PeerCommand::Import(rest.to_string())),
            "import" => Err(PeerCommandError::Malformed("import")),
            "launch" if !rest.is_empty() => Ok(PeerCommand::Launch(rest.to_string())),
            "launch" => Err(PeerCommandError::Malformed("launch")),
            "launch-with-port" => {
                let (id, port) = rest
                    .rsplit_once(' ')
                    .ok_or(PeerCommandError::Malformed("launch-with-port"))?;
                let id = id.trim();
                let port = port
                    .parse::<u16>()
                    .map_err(|_| PeerCommandError::Malformed("launch-with-port"))?;
                if id.is_empty() {
                    return Err(PeerCommandError::Malformed("launch-with-port"));
                }
                Ok(PeerCommand::LaunchWithPort(id.to_string(), port))
            }
            _ => Err(PeerCommandError::Unknown(line.to_string())),
        }
    }
}

impl fmt::Display for PeerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerCommand::Activate => f.write_str("activate"),
            PeerCommand::Import(url) => write!(f, "import {url}"),
            PeerCommand::Launch(id) => write!(f, "launch {id}"),
            PeerCommand::LaunchWithPort(id, port) => write!(f, "launch-with-port {id} {port}"),
        }
    }
}

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Turns an `--import` argument into a URL. Anything with a scheme is kept; a local
/// path is made absolute against `cwd` and becomes a `file://` URL.
pub fn import_url(arg: &str, cwd: &Path) -> String {
    if arg.contains("://") {
        return arg.to_string();
    }
    let path = Path::new(arg);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    let text = match Utf8PathBuf::from_path_buf(absolute) {
        Ok(p) => p.into_string(),
        Err(p) => p.to_string_lossy().into_owned(),
    };
    let text = text.replace('\\', "/");
    let encoded = utf8_percent_encode(&text, PATH_SEGMENT).to_string();
    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}
