/*! Input line sources: a file path, `/dev/stdin`, or a `zmq:` prefix.

The ZeroMQ transport is one of the system's explicitly out-of-scope
external collaborators (§1); `ZmqLineSource` exists only as a faithful
interface stub, not a working subscriber, the way the spec describes it
as an external collaborator to be "specified only at its interface".
*/
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};

/// Where input lines come from.
pub enum LineSource {
    File(BufReader<File>),
    Stdin(BufReader<io::Stdin>),
    /// A recognized `zmq:host:port/topic,...` target. Not implemented:
    /// the ZeroMQ transport endpoint is out of scope for this crate (see
    /// `spec.md` §1), so this variant exists to give callers a typed
    /// error rather than silently failing to open anything.
    Zmq(String),
}

impl LineSource {
    /// Open `spec` as a line source: a `zmq:` target, `/dev/stdin`, or an
    /// ordinary file path.
    pub fn open(spec: &str) -> Result<Self> {
        if let Some(target) = spec.strip_prefix("zmq:") {
            return Ok(LineSource::Zmq(target.to_string()));
        }
        if spec == "/dev/stdin" || spec == "-" {
            return Ok(LineSource::Stdin(BufReader::new(io::stdin())));
        }
        let f = File::open(spec).map_err(Error::Io)?;
        Ok(LineSource::File(BufReader::new(f)))
    }

    /// Iterate lines, surfacing the one-time `zmq:` stub error as the
    /// first (and only) item.
    pub fn lines(self) -> Box<dyn Iterator<Item = Result<String>>> {
        match self {
            LineSource::File(r) => Box::new(r.lines().map(|l| l.map_err(Error::Io))),
            LineSource::Stdin(r) => Box::new(r.lines().map(|l| l.map_err(Error::Io))),
            LineSource::Zmq(target) => Box::new(std::iter::once(Err(Error::Config(format!(
                "zmq transport not available in this build (target: {target})"
            ))))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_lines_from_a_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "one").unwrap();
        writeln!(f, "two").unwrap();
        let src = LineSource::open(f.path().to_str().unwrap()).unwrap();
        let lines: Vec<String> = src.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn zmq_prefix_is_recognized_but_stubbed() {
        let src = LineSource::open("zmq:tcp://localhost:4223/IDA").unwrap();
        let mut lines = src.lines();
        assert!(lines.next().unwrap().is_err());
    }
}
