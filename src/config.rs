use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::{Result, Status};

const BYTES_SIZE_FACTOR: usize = 1024;
pub const KB: usize = 1024;
pub const MB: usize = KB * BYTES_SIZE_FACTOR;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = MB;
pub const DEFAULT_MAX_SEQUENCE_ELEMENTS: usize = 16 * MB;
pub const DEFAULT_RETRY_COUNT: usize = 1;
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 100;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:10000";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Upper bound on one framed message, checked before the body is read.
    pub max_message_size: usize,
    /// Upper bound on a single decoded sequence, independent of the bytes remaining.
    pub max_sequence_elements: usize,
    /// Extra attempts for idempotent operations after a transport failure.
    pub retry_count: usize,
    /// Frame bodies at least this large are zstd-compressed. Zero disables compression.
    pub compression_threshold: usize,
    pub worker_threads: usize,
    pub bind_addr: String,
    pub log_level: String,
}

impl Options {
    pub fn with() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Options> {
        let opts: Options = match serde_yaml::from_str(yaml) {
            Ok(opts) => opts,
            Err(e) => return Err(Status::Config(e.to_string())),
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Options> {
        match fs::read_to_string(path.as_ref()) {
            Ok(yaml) => Self::from_yaml_str(&yaml),
            Err(e) => Err(Status::Config(format!("{}: {}", path.as_ref().display(), e))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_message_size < 64 {
            return Err(Status::Config(format!("max_message_size too small: {}", self.max_message_size)));
        }
        if self.max_sequence_elements == 0 {
            return Err(Status::Config("max_sequence_elements must be positive".into()));
        }
        if self.worker_threads == 0 {
            return Err(Status::Config("worker_threads must be positive".into()));
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_sequence_elements: DEFAULT_MAX_SEQUENCE_ELEMENTS,
            retry_count: DEFAULT_RETRY_COUNT,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            worker_threads: num_cpus::get(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_level: "info".to_string(),
        }
    }
}

pub struct OptionsBuilder {
    opts: Options,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self { opts: Options::default() }
    }

    pub fn max_message_size(&mut self, opt: usize) -> &mut Self {
        self.opts.max_message_size = opt;
        self
    }

    pub fn max_sequence_elements(&mut self, opt: usize) -> &mut Self {
        self.opts.max_sequence_elements = opt;
        self
    }

    pub fn retry_count(&mut self, opt: usize) -> &mut Self {
        self.opts.retry_count = opt;
        self
    }

    pub fn compression_threshold(&mut self, opt: usize) -> &mut Self {
        self.opts.compression_threshold = opt;
        self
    }

    pub fn worker_threads(&mut self, opt: usize) -> &mut Self {
        self.opts.worker_threads = opt;
        self
    }

    pub fn bind_addr(&mut self, opt: &str) -> &mut Self {
        self.opts.bind_addr = opt.to_string();
        self
    }

    pub fn log_level(&mut self, opt: &str) -> &mut Self {
        self.opts.log_level = opt.to_string();
        self
    }

    pub fn build(&self) -> Options { self.opts.clone() }
}
