pub mod args;
pub mod console;
pub mod logging;

pub use args::Cli;
pub use console::ConsoleHost;
