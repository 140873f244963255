/*! Reassembles an Iridium downlink frame-descriptor stream into one of
several application-level outputs, selected by `-m`.

```no_run
$ iridium-reassemble -i capture.txt -m ida
$ iridium-reassemble -i capture.txt -m acars -a json,showerrs
$ iridium-reassemble -i capture.txt -m satmap -s active.tle
```
*/
use anyhow::{Context, Result};
use clap::Parser;
use iridium_reassembler::io::LineSource;
use iridium_reassembler::orchestrator::{build_reassembler, parse_options, Orchestrator};
use iridium_reassembler::pipeline::Pipeline;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Opt {
    #[arg(short = 'v', default_value = "0", help = "Verbosity level")]
    verbose: usize,

    #[arg(short = 'i', help = "Input: a file path, /dev/stdin, or zmq:host:port/topic")]
    input: String,

    #[arg(short = 'o', help = "Output file (default: stdout)")]
    output: Option<String>,

    #[arg(
        short = 'm',
        help = "Reassembly mode: ida, idapp, gsmtap, lap, sbd, acars, page, satmap, msg, stats-snr, live-stats, live-map, ppm, itlmap"
    )]
    mode: String,

    #[arg(short = 'a', default_value = "", help = "Comma-separated mode options, e.g. json,showerrs for acars or perfect for stats-snr")]
    options: String,

    #[arg(short = 's', help = "satmap: path to a TLE catalog; unused by other modes")]
    satellite_data: Option<String>,

    #[arg(long, help = "station id to embed in acars --json output")]
    station: Option<String>,
}

fn open_output(path: Option<&str>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(std::io::BufWriter::new(std::fs::File::create(p)?)),
        None => Box::new(std::io::BufWriter::new(std::io::stdout())),
    })
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("iridium_reassembler")
        .quiet(false)
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let mode = opt.mode.parse().with_context(|| format!("invalid -m value {:?}", opt.mode))?;
    let options = parse_options(mode, &opt.options, opt.station.clone())?;
    let reassembler = build_reassembler(mode, &options, opt.satellite_data.as_deref(), opt.output.as_deref())?;
    let out = open_output(opt.output.as_deref())?;
    let mut pipeline = Pipeline::new(out, options);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("Received Ctrl+C, flushing and exiting...");
            cancel.store(true, Ordering::Relaxed);
        })?;
    }

    let source = LineSource::open(&opt.input)?;
    let mut orchestrator = Orchestrator::new(reassembler, cancel);
    orchestrator.run(source, &mut pipeline)?;
    Ok(())
}
