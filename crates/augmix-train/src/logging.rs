//! Metric logging backends.
//!
//! These are the tracking collaborators of a training run:
//! - Console logging (stdout)
//! - Plain-text file logging
//! - CSV and JSON Lines files for later analysis
//! - [`MetricsLogger`], which fans records out to several backends

use crate::{TrainError, TrainResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Trait for logging backends.
pub trait LoggingBackend {
    /// Log a scalar metric.
    ///
    /// # Arguments
    /// * `name` - Name of the metric
    /// * `value` - Value of the metric
    /// * `step` - Training step or epoch number
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()>;

    /// Log a text message.
    fn log_text(&mut self, message: &str) -> TrainResult<()>;

    /// Flush any buffered logs.
    fn flush(&mut self) -> TrainResult<()>;
}

fn write_error(path: &Path, e: std::io::Error) -> TrainError {
    TrainError::CollaboratorError(format!("Failed to write log file {:?}: {}", path, e))
}

fn open_log(path: &Path, truncate: bool) -> TrainResult<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
        }
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options.open(path).map_err(|e| {
        TrainError::CollaboratorError(format!("Failed to open log file {:?}: {}", path, e))
    })
}

/// Console logger that outputs to stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleLogger {
    /// Whether to include timestamps.
    pub include_timestamp: bool,
}

impl ConsoleLogger {
    /// Create a new console logger.
    pub fn new() -> Self {
        Self {
            include_timestamp: true,
        }
    }

    /// Create a console logger without timestamps.
    pub fn without_timestamp() -> Self {
        Self {
            include_timestamp: false,
        }
    }

    fn format_timestamp(&self) -> String {
        if !self.include_timestamp {
            return String::new();
        }
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(duration) => format!("[{:.3}] ", duration.as_secs_f64()),
            Err(_) => String::new(),
        }
    }
}

impl LoggingBackend for ConsoleLogger {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()> {
        println!(
            "{}Step {}: {} = {:.6}",
            self.format_timestamp(),
            step,
            name,
            value
        );
        Ok(())
    }

    fn log_text(&mut self, message: &str) -> TrainResult<()> {
        println!("{}{}", self.format_timestamp(), message);
        Ok(())
    }

    fn flush(&mut self) -> TrainResult<()> {
        std::io::stdout()
            .flush()
            .map_err(|e| TrainError::CollaboratorError(format!("Failed to flush stdout: {}", e)))
    }
}

/// File logger that writes human-readable lines.
#[derive(Debug)]
pub struct FileLogger {
    file: BufWriter<File>,
    path: PathBuf,
}

impl FileLogger {
    /// Create a new file logger, appending to an existing file.
    pub fn new<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::new(open_log(&path, false)?);
        Ok(Self { file, path })
    }

    /// Create a new file logger, truncating the file if it exists.
    pub fn new_truncate<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::new(open_log(&path, true)?);
        Ok(Self { file, path })
    }

    /// Get the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LoggingBackend for FileLogger {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()> {
        writeln!(self.file, "Step {}: {} = {:.6}", step, name, value)
            .map_err(|e| write_error(&self.path, e))
    }

    fn log_text(&mut self, message: &str) -> TrainResult<()> {
        writeln!(self.file, "{}", message).map_err(|e| write_error(&self.path, e))
    }

    fn flush(&mut self) -> TrainResult<()> {
        self.file.flush().map_err(|e| write_error(&self.path, e))
    }
}

/// CSV logger with one `step,name,value` row per scalar.
///
/// Text messages are not representable in the table and are dropped.
#[derive(Debug)]
pub struct CsvLogger {
    file: BufWriter<File>,
    path: PathBuf,
}

impl CsvLogger {
    /// Create a CSV log, truncating any existing file and writing the header.
    pub fn new<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufWriter::new(open_log(&path, true)?);
        writeln!(file, "step,name,value").map_err(|e| write_error(&path, e))?;
        Ok(Self { file, path })
    }

    /// Get the path to the CSV file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LoggingBackend for CsvLogger {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()> {
        let name = if name.contains(',') || name.contains('"') {
            format!("\"{}\"", name.replace('"', "\"\""))
        } else {
            name.to_string()
        };
        writeln!(self.file, "{},{},{}", step, name, value).map_err(|e| write_error(&self.path, e))
    }

    fn log_text(&mut self, _message: &str) -> TrainResult<()> {
        Ok(())
    }

    fn flush(&mut self) -> TrainResult<()> {
        self.file.flush().map_err(|e| write_error(&self.path, e))
    }
}

/// One record of a [`JsonlLogger`] file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// A scalar metric.
    Scalar {
        /// Metric name.
        name: String,
        /// Metric value.
        value: f64,
        /// Step or epoch.
        step: usize,
    },
    /// A free-form message.
    Text {
        /// Message body.
        message: String,
    },
}

/// JSON Lines logger, one [`LogRecord`] per line.
#[derive(Debug)]
pub struct JsonlLogger {
    file: BufWriter<File>,
    path: PathBuf,
}

impl JsonlLogger {
    /// Create a JSON Lines log, appending to an existing file.
    pub fn new<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = BufWriter::new(open_log(&path, false)?);
        Ok(Self { file, path })
    }

    /// Get the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, record: &LogRecord) -> TrainResult<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| TrainError::CollaboratorError(format!("Failed to encode record: {}", e)))?;
        writeln!(self.file, "{}", line).map_err(|e| write_error(&self.path, e))
    }

    /// Read every record back from a JSON Lines file.
    pub fn read_records<P: AsRef<Path>>(path: P) -> TrainResult<Vec<LogRecord>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrainError::CollaboratorError(format!("Failed to read log file {:?}: {}", path, e))
        })?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    TrainError::CollaboratorError(format!("Malformed record in {:?}: {}", path, e))
                })
            })
            .collect()
    }
}

impl LoggingBackend for JsonlLogger {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()> {
        self.write_record(&LogRecord::Scalar {
            name: name.to_string(),
            value,
            step,
        })
    }

    fn log_text(&mut self, message: &str) -> TrainResult<()> {
        self.write_record(&LogRecord::Text {
            message: message.to_string(),
        })
    }

    fn flush(&mut self) -> TrainResult<()> {
        self.file.flush().map_err(|e| write_error(&self.path, e))
    }
}

/// Metrics logger that fans records out to every registered backend.
#[derive(Default)]
pub struct MetricsLogger {
    backends: Vec<Box<dyn LoggingBackend + Send>>,
    current_step: usize,
    accumulated_metrics: HashMap<String, Vec<f64>>,
}

impl std::fmt::Debug for MetricsLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsLogger")
            .field("backends", &self.backends.len())
            .field("current_step", &self.current_step)
            .finish()
    }
}

impl MetricsLogger {
    /// Create a new metrics logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a logging backend.
    pub fn add_backend<B: LoggingBackend + Send + 'static>(&mut self, backend: B) {
        self.backends.push(Box::new(backend));
    }

    /// Builder-style [`add_backend`](Self::add_backend).
    pub fn with_backend<B: LoggingBackend + Send + 'static>(mut self, backend: B) -> Self {
        self.add_backend(backend);
        self
    }

    /// Log a scalar metric to all backends at the current step.
    pub fn log_metric(&mut self, name: &str, value: f64) -> TrainResult<()> {
        for backend in &mut self.backends {
            backend.log_scalar(name, value, self.current_step)?;
        }
        Ok(())
    }

    /// Log several metrics at the current step, in name order.
    pub fn log_metrics(&mut self, metrics: &HashMap<String, f64>) -> TrainResult<()> {
        let ordered: BTreeMap<&String, &f64> = metrics.iter().collect();
        for (name, value) in ordered {
            self.log_metric(name, *value)?;
        }
        Ok(())
    }

    /// Accumulate a metric value for later averaging.
    pub fn accumulate_metric(&mut self, name: &str, value: f64) {
        self.accumulated_metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    /// Log accumulated metrics (average) and clear accumulation.
    pub fn log_accumulated_metrics(&mut self) -> TrainResult<()> {
        let averages: HashMap<String, f64> = self
            .accumulated_metrics
            .drain()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| {
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                (name, avg)
            })
            .collect();
        self.log_metrics(&averages)
    }

    /// Log a text message to all backends.
    pub fn log_message(&mut self, message: &str) -> TrainResult<()> {
        for backend in &mut self.backends {
            backend.log_text(message)?;
        }
        Ok(())
    }

    /// Increment the step counter.
    pub fn step(&mut self) {
        self.current_step += 1;
    }

    /// Set the current step.
    pub fn set_step(&mut self, step: usize) {
        self.current_step = step;
    }

    /// Get the current step.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Flush all backends.
    pub fn flush(&mut self) -> TrainResult<()> {
        for backend in &mut self.backends {
            backend.flush()?;
        }
        Ok(())
    }

    /// Get the number of backends.
    pub fn num_backends(&self) -> usize {
        self.backends.len()
    }
}
