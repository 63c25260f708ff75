use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use snd_core::config::{RawConfig, SounderConfig};
use snd_core::sounder::{SinkFactory, Sounder};
use snd_phy::waveform::Waveforms;
use snd_radio::sim::{SimConfig, SimRadio};
use snd_radio::RadioDriver;
use snd_trace::file::FileTraceSink;
use snd_trace::{shard_path, TraceSink};

#[derive(Parser, Debug)]
#[command(name = "sounder")]
#[command(about = "Massive-MIMO channel sounder: capture and record IQ traces")]
struct Cli {
    /// Configuration file (object-of-objects JSON, comments allowed)
    #[arg(long, default_value = "files/conf.json")]
    conf: PathBuf,

    /// Dataset store path
    #[arg(long, default_value = "logs")]
    storepath: PathBuf,

    /// Per-SDR pacing of the simulated radio, in microseconds
    #[arg(long, default_value = "1000")]
    sim_pace_us: u64,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Strip `//` and `/* */` comments so the permissive config documents the
/// rigs ship with stay loadable by a strict JSON parser.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' => match chars.peek() {
                Some('/') => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        prev = c;
                    }
                }
                _ => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.verbose {
        log::info!("sounder starting");
        log::info!("configuration: {}", cli.conf.display());
        log::info!("store path: {}", cli.storepath.display());
    }

    let text = std::fs::read_to_string(&cli.conf)
        .with_context(|| format!("failed to read {}", cli.conf.display()))?;
    let raw: RawConfig = serde_json::from_str(&strip_comments(&text))
        .with_context(|| format!("failed to parse {}", cli.conf.display()))?;

    let mut cfg = SounderConfig::from_raw(raw, &cli.storepath)?;
    // hardware backends load these into the radios' TX RAMs
    let waveforms = Waveforms::compose(&cfg.phy, &cfg.beacon_seq, &cfg.pilot_seq)?;
    log::info!(
        "composed beacon ({} samples) and pilot ({} samples)",
        waveforms.beacon_ci16.len(),
        waveforms.pilot_cf32.len()
    );
    cfg.load_ul_data(&cli.storepath)?;
    let cfg = Arc::new(cfg);

    // the external signal handler only flips the shared running flag
    let flag = cfg.running_flag();
    ctrlc::set_handler(move || {
        eprintln!("\ninterrupted, draining...");
        flag.store(false, Ordering::Release);
    })
    .context("failed to set Ctrl-C handler")?;

    let driver: Arc<dyn RadioDriver> = Arc::new(SimRadio::new(SimConfig {
        samps_per_symbol: cfg.phy.samps_per_symbol(),
        num_channels: cfg.bs_channel.num_channels(),
        recv_slots: cfg.receive_slots(),
        frame_limit: None,
        pace: Some(Duration::from_micros(cli.sim_pace_us)),
    }));

    let trace_path = cfg.trace_path.clone();
    let shards = cfg.task_thread_num;
    let factory: SinkFactory = Arc::new(move |shard| {
        let path = if shards > 1 {
            shard_path(&trace_path, shard)
        } else {
            trace_path.clone()
        };
        Ok(Box::new(FileTraceSink::create(&path)?) as Box<dyn TraceSink>)
    });

    let mut sounder = Sounder::new(cfg.clone(), driver, factory, 0)?;
    sounder.run()?;

    log::info!("recorded up to frame {}", sounder.max_frame_number());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let text = r#"{
            // line comment
            "BaseStations": { /* block
                comment */ "channel": "A//B" }
        }"#;
        let cleaned = strip_comments(text);
        assert!(!cleaned.contains("line comment"));
        assert!(!cleaned.contains("block"));
        // comment markers inside strings survive
        assert!(cleaned.contains("A//B"));
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["BaseStations"]["channel"], "A//B");
    }
}
