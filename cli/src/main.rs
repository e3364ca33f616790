use clap::{Parser, ValueEnum};
use cmtdecode_core::audio::channel_zero;
use cmtdecode_core::pipeline::{decode_audio, decode_trace};
use cmtdecode_core::{
    render_payload, AudioFormat, AudioThresholds, DecodeSummary, DecoderConfig, InfoBlock,
    SampleFormat, TapeBlock, TapeError, DEFAULT_CHANNEL_CAPACITY,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader};

#[derive(Parser)]
#[command(name = "cmtdecode")]
#[command(about = "Decode cassette tape blocks from a WAV capture or an emulator trace log")]
struct Cli {
    /// WAV or trace file to decode ("-" reads a trace from stdin)
    #[arg(value_name = "INPUT", required_unless_present = "infile", conflicts_with = "infile")]
    input: Option<String>,

    /// Same as INPUT
    #[arg(long, value_name = "FILE")]
    infile: Option<String>,

    /// Input format; auto treats a .wav suffix as audio and anything else as a trace
    #[arg(short, long, value_enum, default_value_t = InputFormat::Auto)]
    format: InputFormat,

    /// Bits buffered between the demodulator and the block parser
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    capacity: usize,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InputFormat {
    Auto,
    Wav,
    Trace,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let input = cli.input.or(cli.infile).ok_or("no input file given")?;
    let config = DecoderConfig {
        channel_capacity: cli.capacity,
        ..DecoderConfig::default()
    };

    let summary = match resolve_format(cli.format, &input) {
        InputFormat::Wav => {
            if input == "-" {
                return Err("standard input can only be decoded as a trace".into());
            }
            decode_wav_command(&input, &config)?
        }
        _ => decode_trace_command(&input, &config)?,
    };

    println!("---- EOF ----");
    log::info!(
        "{} info blocks, {} data blocks, {} bits",
        summary.info_blocks,
        summary.data_blocks,
        summary.bits
    );
    Ok(())
}

fn resolve_format(format: InputFormat, input: &str) -> InputFormat {
    match format {
        InputFormat::Auto if input.to_ascii_lowercase().ends_with(".wav") => InputFormat::Wav,
        InputFormat::Auto => InputFormat::Trace,
        explicit => explicit,
    }
}

fn decode_wav_command(
    path: &str,
    config: &DecoderConfig,
) -> Result<DecodeSummary, Box<dyn std::error::Error>> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let format = AudioFormat {
        sample_format: match spec.sample_format {
            hound::SampleFormat::Int => SampleFormat::Int,
            hound::SampleFormat::Float => SampleFormat::Float,
        },
        bits_per_sample: spec.bits_per_sample,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    };

    let block_align = spec.channels as u32 * ((spec.bits_per_sample as u32 + 7) / 8);
    println!(
        "duration:    {:.3}s",
        reader.duration() as f64 / spec.sample_rate.max(1) as f64
    );
    println!("format:      {:?}", spec.sample_format);
    println!("bits/sample: {}", spec.bits_per_sample);
    println!("block align: {}", block_align);
    println!("byte rate:   {}", block_align * spec.sample_rate);
    println!("ch:          {}", spec.channels);
    println!("sample rate: {}", spec.sample_rate);

    let thresholds = AudioThresholds::new(&format, &config.audio)?;
    println!("threshold L: {}", thresholds.level_low);
    println!("threshold H: {}", thresholds.level_high);
    println!("threshold 0: {}", thresholds.count_for_zero);
    println!("threshold 1: {}", thresholds.count_for_one);

    let samples = channel_zero(reader.into_samples::<i32>(), spec.channels)
        .map(|s| s.map_err(|e| TapeError::SampleSource(e.to_string())));

    Ok(decode_audio(samples, &format, config, print_block)?)
}

fn decode_trace_command(
    input: &str,
    config: &DecoderConfig,
) -> Result<DecodeSummary, Box<dyn std::error::Error>> {
    let summary = if input == "-" {
        decode_trace(BufReader::new(io::stdin()).lines(), config, print_block)?
    } else {
        let file = File::open(input)?;
        decode_trace(BufReader::new(file).lines(), config, print_block)?
    };
    Ok(summary)
}

fn print_block(block: &TapeBlock) -> cmtdecode_core::Result<()> {
    println!("---- block start ----");
    match block {
        TapeBlock::Info(info) => {
            println!("start zeros: {}", info.leading_zeros);
            println!("info block: {} bits", InfoBlock::BODY_BITS);
            println!("attrib:   {:02x}", info.attrib);
            println!("name:     {}", info.name_lossy());
            println!("reserved: {:02x}", info.reserved);
            println!("dataLen:  {:04x}", info.data_len);
            println!("loadAddr: {:04x}", info.load_addr);
            println!("callAddr: {:04x}", info.call_addr);
            println!("checksum: {:04x}", info.checksum);
        }
        TapeBlock::Data(data) => {
            println!("start zeros: {}", data.leading_zeros);
            println!("data block: {} bits", data.body_bits());
            let payload = render_payload(data.attrib, &data.payload)?;
            print!("{}", payload);
            println!("checksum: {:04x}", data.checksum);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_format_by_suffix() {
        assert_eq!(resolve_format(InputFormat::Auto, "tape.wav"), InputFormat::Wav);
        assert_eq!(resolve_format(InputFormat::Auto, "TAPE.WAV"), InputFormat::Wav);
        assert_eq!(resolve_format(InputFormat::Auto, "trace.log"), InputFormat::Trace);
        assert_eq!(resolve_format(InputFormat::Auto, "-"), InputFormat::Trace);
        assert_eq!(resolve_format(InputFormat::Wav, "capture.raw"), InputFormat::Wav);
    }

    #[test]
    fn test_cli_accepts_positional_or_flag() {
        let cli = Cli::try_parse_from(["cmtdecode", "tape.wav"]).unwrap();
        assert_eq!(cli.input.as_deref(), Some("tape.wav"));

        let cli = Cli::try_parse_from(["cmtdecode", "--infile", "trace.log"]).unwrap();
        assert_eq!(cli.infile.as_deref(), Some("trace.log"));

        assert!(Cli::try_parse_from(["cmtdecode"]).is_err());
    }
}
