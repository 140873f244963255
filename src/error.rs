//! Error types for the reassembly pipeline.

/// Errors produced while parsing, enriching, or reassembling frames.
///
/// This crate largely deals in "soft" failures (a malformed line, an
/// unparseable sub-header) that the orchestrator turns into a stderr
/// diagnostic and a statistics counter rather than aborting the run. The
/// variants here are the ones that *can't* be shrugged off that way.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A raw input line didn't have the expected nine whitespace-separated
    /// fields.
    #[error("couldn't parse input line: {0}")]
    LineParse(String),

    /// A sub-protocol body (IDA, MSG, IRA, ...) didn't match its expected
    /// regex or byte layout.
    #[error("couldn't parse {proto} body: {text}")]
    SubprotocolFormat {
        /// Name of the sub-protocol whose body failed to parse.
        proto: &'static str,
        /// The offending text.
        text: String,
    },

    /// Configuration error: unknown mode, unknown `-a` option, or similar.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error reading input or writing output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error, e.g. in the `live-map` snapshot writer
    /// or the `live-stats` state file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
