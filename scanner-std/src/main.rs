//! dectscan host scanner
//!
//! Thread-based driver around the dectscan tracker using std threads and
//! std::sync::mpsc channels. Decoded packets and controller commands are read
//! from stdin as NDJSON, part reports are written to stdout as classic
//! `scan-report:` lines (or NDJSON with `--json`), logs go to stderr.
//!
//! The hop and status threads talk to the tracker only through the static
//! control channel, which the processing loop drains before every packet.

mod logger;

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use dectscan::comm::{self, ControlChannel, InputLine, LineReader, ReportLine};
use dectscan::dect::{self, DEFAULT_DWELL_MS};
use dectscan::protocol::{HostCommand, MsgBuffer, PartIdString, MAX_MSG_LEN, VERSION};
use dectscan::{PartEvent, PartEventSink, PartInfo, PartTracker, TrackerConfig, TrackerStatus};

// ── Shared state ─────────────────────────────────────────────────────

/// Commands from the hop and status threads
static CONTROL: ControlChannel = ControlChannel::new();

/// Carrier index the receiver is tuned to
static CHANNEL: AtomicUsize = AtomicUsize::new(0);

const USAGE: &str = "usage: dectscan [-h] [--version] [-v...] [--json] [--dwell-ms <ms>] \
                     [--select <rx_id>] [--status-secs <s>] [--payload <file>]";

// ── Arguments ────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct Args {
    verbosity: u8,
    json: bool,
    /// Dwell per carrier, 0 disables hopping
    dwell_ms: u64,
    select: u32,
    /// Status request period, 0 disables
    status_secs: u64,
    /// File receiving the payload of the selected part
    payload: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbosity: 0,
            json: false,
            dwell_ms: DEFAULT_DWELL_MS,
            select: 0,
            status_secs: 30,
            payload: None,
        }
    }
}

/// What the command line asks for.
#[derive(Debug, PartialEq)]
enum Invocation {
    Run(Args),
    Help,
    Version,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Invocation> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => parsed.json = true,
            "--dwell-ms" => parsed.dwell_ms = value(&mut args, &arg)?,
            "--select" => parsed.select = value(&mut args, &arg)?,
            "--status-secs" => parsed.status_secs = value(&mut args, &arg)?,
            "--payload" => {
                let path = args.next().with_context(|| format!("{arg} needs a value"))?;
                parsed.payload = Some(PathBuf::from(path));
            }
            "-h" | "--help" | "--usage" => return Ok(Invocation::Help),
            "-V" | "--version" => return Ok(Invocation::Version),
            flag if flag.len() > 1 && flag.starts_with('-') && flag[1..].bytes().all(|b| b == b'v') => {
                parsed.verbosity = parsed.verbosity.saturating_add((flag.len() - 1) as u8);
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }
    Ok(Invocation::Run(parsed))
}

fn value<T: std::str::FromStr>(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<T> {
    let raw = args.next().with_context(|| format!("{flag} needs a value"))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid value '{raw}' for {flag}"))
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args(std::env::args().skip(1))? {
        Invocation::Run(args) => args,
        Invocation::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        Invocation::Version => {
            println!("dectscan {VERSION}");
            return Ok(());
        }
    };
    logger::init(args.verbosity)?;

    log::info!("dectscan v{} starting", VERSION);
    log::info!(
        "Band plan: {} carriers, dwell {} ms, selected rx {}",
        dect::DECT_CHANNEL_COUNT,
        args.dwell_ms,
        args.select
    );

    let mut payload_out = match args.payload {
        Some(ref path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };

    // ── Channels ─────────────────────────────────────────────────────

    let (input_tx, input_rx) = mpsc::sync_channel::<InputLine>(64);
    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(16);

    // ── Output thread ────────────────────────────────────────────────

    let output = thread::Builder::new()
        .name("output".into())
        .spawn(move || output_thread(output_rx))?;
    log::debug!("Output thread spawned");

    // ── Input thread ─────────────────────────────────────────────────

    thread::Builder::new()
        .name("input".into())
        .spawn(move || input_thread(input_tx))?;
    log::debug!("Input thread spawned");

    // ── Channel hop thread ───────────────────────────────────────────

    if args.dwell_ms > 0 {
        let dwell = Duration::from_millis(args.dwell_ms);
        thread::Builder::new()
            .name("chanhop".into())
            .spawn(move || channel_hop_thread(dwell))?;
        log::debug!("Channel hop thread spawned");
    }

    // ── Status thread ────────────────────────────────────────────────

    if args.status_secs > 0 {
        let period = Duration::from_secs(args.status_secs);
        thread::Builder::new()
            .name("status".into())
            .spawn(move || status_thread(period))?;
        log::debug!("Status thread spawned");
    }

    // ── Processing loop ──────────────────────────────────────────────

    let config = TrackerConfig {
        selected_rx_id: args.select,
        ..TrackerConfig::new()
    };
    let sink = ReportSink {
        output_tx,
        json: args.json,
    };
    let mut tracker = PartTracker::with_config(sink, config);

    loop {
        tracker.poll_control(&CONTROL);
        match input_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(InputLine::Packet(pkt)) => {
                let outcome = tracker.process(&pkt.as_packet());
                if let (Some(bytes), Some(out)) = (outcome.forwarded, payload_out.as_mut()) {
                    out.write_all(bytes).context("writing payload")?;
                }
            }
            Ok(InputLine::Command(cmd)) => tracker.apply(cmd),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("Input closed, clearing {} parts", tracker.table().active_count());
    tracker.poll_control(&CONTROL);
    tracker.clear_parts();
    if let Some(mut out) = payload_out {
        out.flush().context("flushing payload")?;
    }

    // Dropping the tracker drops the last output sender
    drop(tracker);
    if output.join().is_err() {
        bail!("output thread panicked");
    }
    Ok(())
}

// ── Report sink ──────────────────────────────────────────────────────

/// Formats tracker events and hands them to the output thread.
struct ReportSink {
    output_tx: SyncSender<MsgBuffer>,
    json: bool,
}

impl ReportSink {
    fn send_event(&self, event: PartEvent) {
        let channel = CHANNEL.load(Ordering::Relaxed);
        let mut buf = MsgBuffer::new();

        if self.json {
            let mut id = PartIdString::new();
            comm::format_part_id(&event.info().part_id, &mut id);
            let msg = comm::event_message(&event, &id, channel as u8);
            buf.resize_default(MAX_MSG_LEN).ok();
            match comm::serialize_message(&msg, &mut buf) {
                Some(len) => buf.truncate(len),
                None => return,
            }
        } else {
            let mut line = ReportLine::new();
            comm::format_scan_report(&event, channel, &mut line);
            let _ = buf.extend_from_slice(line.as_bytes());
            let _ = buf.push(b'\n');
        }

        let _ = self.output_tx.send(buf);
    }
}

impl PartEventSink for ReportSink {
    fn on_updated(&mut self, info: &PartInfo) {
        self.send_event(PartEvent::Updated(*info));
    }

    fn on_lost(&mut self, info: &PartInfo) {
        self.send_event(PartEvent::Lost(*info));
    }

    fn on_status(&mut self, status: &TrackerStatus) {
        let channel = CHANNEL.load(Ordering::Relaxed) as u8;
        if !self.json {
            log::info!(
                "status: {} active, {} identified, {} paired, rx {} selected, channel {}",
                status.active,
                status.identified,
                status.paired,
                status.selected_rx_id,
                channel
            );
            return;
        }
        let msg = comm::status_message(status, channel);
        let mut buf = MsgBuffer::new();
        buf.resize_default(MAX_MSG_LEN).ok();
        if let Some(len) = comm::serialize_message(&msg, &mut buf) {
            buf.truncate(len);
            let _ = self.output_tx.send(buf);
        }
    }
}

// ── Input thread ─────────────────────────────────────────────────────

fn input_thread(input_tx: SyncSender<InputLine>) {
    log::debug!("Input thread started");

    let mut reader = LineReader::new();
    let mut stdin = io::stdin().lock();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("stdin: {}", e);
                break;
            }
        };
        for &byte in &chunk[..n] {
            let Some(line) = reader.feed(byte) else {
                continue;
            };
            match comm::parse_line(line) {
                Some(input) => {
                    if input_tx.send(input).is_err() {
                        return;
                    }
                }
                None => log::warn!("dropping unparseable line: {}", String::from_utf8_lossy(line)),
            }
        }
    }
    log::debug!("stdin closed");
}

// ── Channel hopping ──────────────────────────────────────────────────

fn channel_hop_thread(dwell: Duration) {
    loop {
        thread::sleep(dwell);
        let next = dect::next_channel(CHANNEL.load(Ordering::Relaxed));
        CHANNEL.store(next, Ordering::Relaxed);
        log::debug!(
            "Retuned to channel {} ({} Hz)",
            next,
            dect::channel_frequency(next).unwrap_or(0)
        );
        if CONTROL.try_send(HostCommand::ClearParts).is_err() {
            log::warn!("control queue full, retune clear dropped");
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

fn status_thread(period: Duration) {
    loop {
        thread::sleep(period);
        let _ = CONTROL.try_send(HostCommand::GetStatus);
    }
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>) {
    log::debug!("Output thread started");

    let mut out = BufWriter::new(io::stdout().lock());
    while let Ok(msg) = output_rx.recv() {
        if out.write_all(&msg).and_then(|_| out.flush()).is_err() {
            log::error!("stdout closed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoke(list: &[&str]) -> anyhow::Result<Invocation> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        match invoke(list)? {
            Invocation::Run(args) => Ok(args),
            other => anyhow::bail!("expected a run, got {other:?}"),
        }
    }

    #[test]
    fn defaults_match_band_plan() {
        let parsed = args(&[]).unwrap();
        assert_eq!(parsed, Args::default());
        assert_eq!(parsed.dwell_ms, DEFAULT_DWELL_MS);
    }

    #[test]
    fn flags_are_parsed() {
        let parsed = args(&["-vv", "--json", "--dwell-ms", "0", "--select", "3", "-v"]).unwrap();
        assert_eq!(parsed.verbosity, 3);
        assert!(parsed.json);
        assert_eq!(parsed.dwell_ms, 0);
        assert_eq!(parsed.select, 3);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(args(&["--select"]).is_err());
        assert!(args(&["--select", "x"]).is_err());
        assert!(args(&["--bogus"]).is_err());
    }

    #[test]
    fn help_and_version_are_not_errors() {
        assert_eq!(invoke(&["--help"]).unwrap(), Invocation::Help);
        assert_eq!(invoke(&["-v", "-h"]).unwrap(), Invocation::Help);
        assert_eq!(invoke(&["--usage"]).unwrap(), Invocation::Help);
        assert_eq!(invoke(&["--version"]).unwrap(), Invocation::Version);
        // Help wins over a later bad argument
        assert_eq!(invoke(&["--help", "--bogus"]).unwrap(), Invocation::Help);
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(logger::level_for(0), log::LevelFilter::Warn);
        assert_eq!(logger::level_for(2), log::LevelFilter::Debug);
        assert_eq!(logger::level_for(9), log::LevelFilter::Trace);
    }

    #[test]
    fn text_sink_writes_scan_report_lines() {
        let (tx, rx) = mpsc::sync_channel(4);
        let mut sink = ReportSink {
            output_tx: tx,
            json: false,
        };
        let info = PartInfo {
            rx_id: 1,
            part_id: dectscan::PartId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE]),
            is_fixed_part: true,
            voice_present: false,
        };
        sink.on_updated(&info);
        let msg = rx.recv().unwrap();
        let line = std::str::from_utf8(&msg).unwrap();
        assert!(line.starts_with("scan-report: U "));
        assert!(line.ends_with("1 aabbccddee F -\n"));
    }
}
