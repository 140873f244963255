/*! Reassembles the raw per-frame text stream produced by an Iridium
downlink demodulator (such as `gr-iridium`) into application-level
messages: joined IDA L2 PDUs, SBD/ACARS payloads, GSM-over-Iridium
LAPDm frames, IRA position/paging broadcasts, and MSG/MS3 pages.

# Architecture overview

One line of input produces one [`frame::RawFrame`], which the
[`enrich`] module turns into an [`enrich::EnrichedFrame`] by deriving
absolute time, signal level, and frequency-channel fields. From there,
exactly one [`reassembler::Reassembler`] — selected by
[`orchestrator::Mode`] for the whole run — decides whether the frame
is relevant (`filter`), turns it into zero or more emissions
(`process`), and writes those emissions out (`consume`). At end of
input, `end` flushes any pending reassembly state and prints aggregate
statistics.

```text
  [ input line ]
        ↓
  [ frame::parse_line ]
        ↓
  [ Reassembler::filter ]
        ↓
  [ enrich::enrich ]
        ↓
  [ Reassembler::process ] → [ Reassembler::consume ] → [ Pipeline output ]
```

All run-wide mutable state (the output sink, parsed CLI options, and
one-time warning flags) lives in a single [`pipeline::Pipeline`] value
constructed once by [`orchestrator::Orchestrator`] and threaded through
every call, rather than behind statics.
*/
pub mod acars;
pub mod enrich;
pub mod error;
pub mod frame;
pub mod gsm_elements;
pub mod gsmtap;
pub mod ida;
pub mod idapp;
pub mod io;
pub mod ira;
pub mod itlmap;
pub mod msg;
pub mod orchestrator;
pub mod pipeline;
pub mod reassembler;
pub mod satmap;
pub mod sbd;
pub mod sbdhdr;
pub mod stats;
pub mod time;
