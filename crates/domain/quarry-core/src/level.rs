use serde::{Deserialize, Serialize};

/// Severity attached to every console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageLevel {
    /// Not yet classified.
    Unknown,
    /// Raw standard output of the child process.
    StdOut,
    /// Raw standard error of the child process.
    StdErr,
    /// Lines written by the launcher itself.
    Launcher,
    Debug,
    Info,
    Message,
    Warning,
    Error,
    Fatal,
}

const MARKER_OPEN: &str = "!![";
const MARKER_CLOSE: &str = "]!";

impl MessageLevel {
    pub fn from_name(name: &str) -> MessageLevel {
        match name {
            "Launcher" => MessageLevel::Launcher,
            "Debug" => MessageLevel::Debug,
            "Info" => MessageLevel::Info,
            "Message" => MessageLevel::Message,
            "Warning" => MessageLevel::Warning,
            "Error" => MessageLevel::Error,
            "Fatal" => MessageLevel::Fatal,
            _ => MessageLevel::Unknown,
        }
    }

    /// Reads an embedded `!![Level]!` prefix, stripping it from `line` when present.
    pub fn from_line(line: &mut String) -> MessageLevel {
        if !line.starts_with(MARKER_OPEN) {
            return MessageLevel::Unknown;
        }
        let Some(end) = line.find(MARKER_CLOSE) else {
            return MessageLevel::Unknown;
        };
        let level = MessageLevel::from_name(&line[MARKER_OPEN.len()..end]);
        line.drain(..end + MARKER_CLOSE.len());
        level
    }

    /// Heuristic classification of a raw game line, `fallback` when nothing matches.
    pub fn guess(line: &str, fallback: MessageLevel) -> MessageLevel {
        if line.contains("/FATAL]") || line.contains("[FATAL]") {
            return MessageLevel::Fatal;
        }
        if line.contains("/ERROR]")
            || line.contains("[ERROR]")
            || line.contains("[SEVERE]")
            || line.contains("Exception in thread")
            || line.starts_with("\tat ")
            || line.starts_with("Caused by: ")
        {
            return MessageLevel::Error;
        }
        if line.contains("/WARN]") || line.contains("[WARN]") || line.contains("[WARNING]") {
            return MessageLevel::Warning;
        }
        if line.contains("/INFO]") || line.contains("[INFO]") {
            return MessageLevel::Info;
        }
        if line.contains("/DEBUG]") || line.contains("[DEBUG]") {
            return MessageLevel::Debug;
        }
        fallback
    }

    /// Levels that still need a heuristic pass to get a real severity.
    pub fn is_generic(self) -> bool {
        matches!(
            self,
            MessageLevel::Unknown | MessageLevel::StdOut | MessageLevel::StdErr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_marker_is_stripped() {
        let mut line = "!![Warning]!disk almost full".to_string();
        assert_eq!(MessageLevel::from_line(&mut line), MessageLevel::Warning);
        assert_eq!(line, "disk almost full");
    }

    #[test]
    fn unknown_marker_name_is_still_stripped() {
        let mut line = "!![Loud]!hello".to_string();
        assert_eq!(MessageLevel::from_line(&mut line), MessageLevel::Unknown);
        assert_eq!(line, "hello");
    }

    #[test]
    fn guess_reads_bracketed_levels() {
        assert_eq!(
            MessageLevel::guess("[12:00:01] [Server thread/WARN]: slow tick", MessageLevel::StdOut),
            MessageLevel::Warning
        );
        assert_eq!(
            MessageLevel::guess("\tat net.example.Main.run(Main.java:10)", MessageLevel::StdErr),
            MessageLevel::Error
        );
        assert_eq!(
            MessageLevel::guess("plain text", MessageLevel::StdErr),
            MessageLevel::StdErr
        );
    }

    #[test]
    fn lines_without_marker_are_untouched() {
        let mut line = "[12:00:00] [Server thread/INFO]: Done".to_string();
        assert_eq!(MessageLevel::from_line(&mut line), MessageLevel::Unknown);
        assert_eq!(line, "[12:00:00] [Server thread/INFO]: Done");

        let mut half = "!![Info no close".to_string();
        assert_eq!(MessageLevel::from_line(&mut half), MessageLevel::Unknown);
        assert_eq!(half, "!![Info no close");
    }
}
