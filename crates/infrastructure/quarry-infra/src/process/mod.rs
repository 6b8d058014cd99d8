use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;

pub mod supervisor;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Launch configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command parsing error")]
    ParseError,
    #[error("Process was already started")]
    AlreadyStarted,
}

/// A fully resolved command line, ready to hand to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

#[cfg(target_os = "windows")]
fn split_command_windows(cmd: &str) -> Option<Vec<String>> {
    // POSIX shlex treats `\` as an escape, which mangles `C:\servers\alpha`. Windows
    // templates only need double-quote grouping and whitespace splitting.
    let mut parts = Vec::<String>::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in cmd.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return None;
    }

    if !current.is_empty() {
        parts.push(current);
    }

    Some(parts)
}

fn split_command(cmd: &str) -> Result<Vec<String>, ProcessError> {
    #[cfg(target_os = "windows")]
    let parts = split_command_windows(cmd).ok_or(ProcessError::ParseError)?;
    #[cfg(not(target_os = "windows"))]
    let parts = shlex::split(cmd).ok_or(ProcessError::ParseError)?;
    Ok(parts)
}

impl ProcessCommand {
    /// Splits `template` into arguments and then runs `substitute` over each one.
    ///
    /// Splitting happens before substitution so values containing whitespace (paths
    /// like `/srv/My Server`) stay a single argument even when the template doesn't
    /// quote them.
    pub fn from_template<F>(
        template: &str,
        working_dir: impl Into<PathBuf>,
        substitute: F,
    ) -> Result<Self, ProcessError>
    where
        F: Fn(&str) -> String,
    {
        let parts: Vec<String> = split_command(template)?
            .iter()
            .map(|p| substitute(p))
            .collect();

        let Some((program, args)) = parts.split_first() else {
            return Err(ProcessError::Config(
                "Launch template produced empty command".into(),
            ));
        };
        if program.is_empty() {
            return Err(ProcessError::Config(
                "Launch template resolved to an empty program".into(),
            ));
        }

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: working_dir.into(),
            env: Vec::new(),
        })
    }

    /// Runs `script` through the platform shell.
    pub fn shell(script: &str, working_dir: impl Into<PathBuf>) -> Self {
        #[cfg(target_os = "windows")]
        let (program, args) = ("cmd".to_string(), vec!["/C".to_string(), script.to_string()]);
        #[cfg(not(target_os = "windows"))]
        let (program, args) = ("sh".to_string(), vec!["-c".to_string(), script.to_string()]);

        Self {
            program,
            args,
            working_dir: working_dir.into(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub(crate) fn to_tokio(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl std::fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
