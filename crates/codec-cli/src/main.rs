//! `codec-cli`: drive the decode engine from the command line.
//!
//! - `probe <path>`: open a session and print the selected track as JSON.
//! - `decode <path> --out <file>`: pull decoded buffers until end of stream and
//!   write them as raw interleaved signed 16-bit little-endian PCM.

mod cli;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use audio_codec::{EngineConfig, PullOutput, SymphoniaSession};
use clap::Parser;
use symphonia::core::probe::Hint;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_codec=info,codec_cli=info")
        }))
        .init();

    let config = load_config(&args)?;

    match &args.cmd {
        cli::Command::Probe { path } => {
            let session = open_session(path, None, config)?;
            println!("{}", serde_json::to_string_pretty(session.track())?);
        }
        cli::Command::Decode {
            path,
            out,
            seek_ms,
            max_retries,
            offset,
            length,
        } => {
            let range = (*offset).zip(*length);
            let mut session = open_session(path, range, config)?;
            if let Some(ms) = seek_ms {
                let position = session
                    .seek(*ms)
                    .with_context(|| format!("seek to {ms} ms"))?;
                tracing::info!(requested_ms = ms, position_us = position.as_micros(), "seek done");
            }
            decode_to_file(&mut session, out, *max_retries)?;
            session.close();
        }
    }

    Ok(())
}

fn load_config(args: &cli::Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(us) = args.input_timeout_us {
        config.input_timeout_us = us;
    }
    if let Some(us) = args.output_timeout_us {
        config.output_timeout_us = us;
    }
    config.validate()?;
    Ok(config)
}

fn hint_for(path: &Path) -> Hint {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    hint
}

fn open_session(
    path: &Path,
    range: Option<(u64, u64)>,
    config: EngineConfig,
) -> Result<SymphoniaSession> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let hint = hint_for(path);
    let session = match range {
        Some((offset, length)) => {
            SymphoniaSession::open_byte_range(file, offset, length, hint, config)
        }
        None => SymphoniaSession::open_media_source(Box::new(file), hint, config),
    };
    session.with_context(|| format!("open decode session for {:?}", path))
}

fn decode_to_file(session: &mut SymphoniaSession, out: &Path, max_retries: u32) -> Result<()> {
    let file = File::create(out).with_context(|| format!("create {:?}", out))?;
    let mut writer = BufWriter::new(file);

    let mut bytes = 0u64;
    let mut buffers = 0u64;
    let mut retries = 0u64;
    let mut consecutive = 0u32;

    loop {
        match session.pull_output().context("pull output")? {
            PullOutput::Data(buf) => {
                consecutive = 0;
                writer.write_all(buf.bytes()).context("write pcm")?;
                bytes += buf.len() as u64;
                buffers += 1;
            }
            PullOutput::Retry => {
                retries += 1;
                consecutive += 1;
                if consecutive > max_retries {
                    bail!("decoder produced no output after {max_retries} attempts");
                }
                continue;
            }
            PullOutput::EndOfStream => break,
        }
        session.release_output().context("release output")?;
    }

    writer.flush().context("flush output")?;
    tracing::info!(bytes, buffers, retries, out = ?out, "decode complete");
    Ok(())
}
