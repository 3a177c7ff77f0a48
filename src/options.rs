use clap::Parser;

/// Neptun Bridge - poller and command bridge for Neptun Smart controllers
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Print the first snapshot as JSON and exit
    #[clap(long = "once")]
    pub once: bool,

    /// Print every published snapshot as a JSON line
    #[clap(long = "json")]
    pub json: bool,

    /// Send a command on startup, e.g. `zone_1=off` (repeatable)
    #[clap(long = "set", value_name = "KEY=VALUE")]
    pub commands: Vec<String>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
