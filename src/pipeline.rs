/*! The `Pipeline` value: everything that used to be global mutable state in
the original (the open output file, parsed config, one-time warning
flags) now lives here, constructed once by the orchestrator and threaded
through every reassembler call.
*/
use crate::enrich::{EnrichOptions, EnrichWarnings};
use crate::error::Result;
use std::io::Write;

/// The subset of CLI/`-a` configuration a reassembler needs to see.
///
/// Not every field is meaningful to every mode; each reassembler reads
/// only the ones its `-a` vocabulary declares (see `orchestrator.rs`).
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub perfect: bool,
    pub incomplete: bool,
    pub json: bool,
    pub showerrs: bool,
    pub debug: bool,
    pub all: bool,
    pub grafana: bool,
    pub tdelta: bool,
    pub state_path: Option<String>,
    pub station: Option<String>,
    pub channelize: bool,
}

impl Options {
    pub fn enrich_options(&self) -> EnrichOptions {
        EnrichOptions {
            channelize: self.channelize,
            want_perfect: self.perfect,
        }
    }
}

/// Run-wide mutable state: the output sink, parsed options, one-time
/// warning flags, and the aggregate line/filter counters every mode's
/// `end()` reports.
pub struct Pipeline {
    pub out: Box<dyn Write>,
    pub options: Options,
    pub warnings: EnrichWarnings,
    pub stat_line: u64,
    pub stat_filter: u64,
}

impl Pipeline {
    pub fn new(out: Box<dyn Write>, options: Options) -> Self {
        Pipeline {
            out,
            options,
            warnings: EnrichWarnings::default(),
            stat_line: 0,
            stat_filter: 0,
        }
    }

    /// Write one text emission followed by a newline.
    pub fn emit_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    /// Write raw bytes verbatim (used by the `lap`/`gsmtap` PCAP stream).
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
