use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;

use crate::timeflow::dcache::CacheEvent;
use crate::timeq::Cycle;

/// Writes every event the dcache hands to its requestor as one CSV row.
pub struct TraceSink {
    writer: BufWriter<File>,
    rows: u64,
}

impl TraceSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("cannot create trace file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "cycle,event,id,address,data")?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn record(&mut self, cycle: Cycle, event: &CacheEvent) -> anyhow::Result<()> {
        let (id, address, data) = match event {
            CacheEvent::MissAccepted { id, address, .. } => {
                (id.to_string(), format!("{address:#010x}"), String::new())
            }
            CacheEvent::HitComplete { address, data, .. } => {
                (String::new(), format!("{address:#010x}"), format!("{data:#010x}"))
            }
            CacheEvent::MissComplete { id, address, .. } => {
                (id.to_string(), format!("{address:#010x}"), String::new())
            }
            CacheEvent::HitStall | CacheEvent::FlushComplete => {
                (String::new(), String::new(), String::new())
            }
        };
        writeln!(self.writer, "{},{},{},{},{}", cycle, event.name(), id, address, data)
            .context("cannot write trace row")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Push every buffered row out to the file.
    pub fn finish(&mut self) -> anyhow::Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("cannot write trace ({} rows)", self.rows))
    }
}

impl Drop for TraceSink {
    fn drop(&mut self) {
        // errors surface through finish(); this only catches sinks dropped early
        if let Err(err) = self.writer.flush() {
            log::warn!("trace: dropped unflushed rows: {}", err);
        }
    }
}
