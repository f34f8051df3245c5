use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Local;
use log::LevelFilter;

/// Sends every log line to the run's log file and to the console. The file
/// is written first and console errors are ignored, so a closed stdout never
/// costs a line in the file.
struct Tee<F, C> {
    file: F,
    console: C,
}

impl<F: Write, C: Write> Write for Tee<F, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        let _ = self.console.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

/// Installs the process logger, writing to stdout and
/// `<log_dir>/hsr_crawler_<timestamp>.log`. `RUST_LOG` overrides the default `info` level.
pub fn init(log_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(format!(
        "hsr_crawler_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = File::create(&path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(Tee {
            file,
            console: io::stdout(),
        })))
        .try_init()
        .context("logger was already initialised")?;
    Ok(path)
}
