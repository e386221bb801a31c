use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tempo_coach::analysis::quantizer::Quantizer;
use tempo_coach::analysis::{OnsetDetector, TempoMonitor};
use tempo_coach::audio::clock::{ManualClock, RecordingSink};
use tempo_coach::audio::scheduler::{BeatGridSource, LookaheadScheduler};
use tempo_coach::audio::transport::{Meter, Polyrhythm, SilentBars, SubdivisionKind};
use tempo_coach::config::AppConfig;
use tempo_coach::engine::EngineHandle;
use tempo_coach::testing::{EventRecorder, FixedGrid};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tempo_cli",
    about = "Metronome scheduling dry runs, offline timing analysis and live practice"
)]
struct Cli {
    /// JSON configuration file (defaults apply when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct TransportArgs {
    #[arg(long, default_value_t = 120)]
    bpm: u32,
    /// Time signature, e.g. 4/4 or 6/8
    #[arg(long, default_value = "4/4")]
    meter: String,
    #[arg(long, value_enum, default_value_t = Subdivision::None)]
    subdivision: Subdivision,
    #[arg(long, default_value_t = 0)]
    count_in: u32,
    /// Polyrhythm ratio, e.g. 3:2
    #[arg(long)]
    poly: Option<String>,
    /// Silence every Nth bar
    #[arg(long)]
    silent_every: Option<u32>,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    latency_ms: f64,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Subdivision {
    None,
    Eighth,
    Triplet,
    Sixteenth,
    Quintuplet,
}

impl From<Subdivision> for SubdivisionKind {
    fn from(value: Subdivision) -> Self {
        match value {
            Subdivision::None => SubdivisionKind::None,
            Subdivision::Eighth => SubdivisionKind::Eighth,
            Subdivision::Triplet => SubdivisionKind::Triplet,
            Subdivision::Sixteenth => SubdivisionKind::Sixteenth,
            Subdivision::Quintuplet => SubdivisionKind::Quintuplet,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the first scheduled events for a transport as JSON lines
    Schedule {
        #[command(flatten)]
        transport: TransportArgs,
        /// Number of main beats to schedule
        #[arg(long, default_value_t = 8)]
        beats: usize,
    },
    /// Run a WAV recording through the onset detector and tempo monitor
    Analyze {
        #[arg(long)]
        wav: PathBuf,
        #[arg(long, default_value_t = 120)]
        bpm: u32,
        #[arg(long, default_value = "4/4")]
        meter: String,
        /// Time of the first beat in the recording
        #[arg(long, default_value_t = 0.0)]
        first_beat_ms: f64,
        #[arg(long, default_value_t = 0.0)]
        input_latency_ms: f64,
    },
    /// Play the metronome on the default output device
    Play {
        #[command(flatten)]
        transport: TransportArgs,
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Also listen on the default input and print timing feedback
        #[arg(long)]
        listen: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::try_load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };
    tracing::debug!(command = ?cli.command, "tempo_cli starting");

    match cli.command {
        Commands::Schedule { transport, beats } => run_schedule(config, &transport, beats),
        Commands::Analyze {
            wav,
            bpm,
            meter,
            first_beat_ms,
            input_latency_ms,
        } => run_analyze(config, &wav, bpm, &meter, first_beat_ms, input_latency_ms),
        Commands::Play {
            transport,
            seconds,
            listen,
        } => run_play(config, &transport, seconds, listen),
    }
}

fn apply_transport(scheduler: &LookaheadScheduler, args: &TransportArgs) -> Result<()> {
    scheduler.set_tempo(args.bpm);
    scheduler.set_meter(Meter::parse(&args.meter));
    scheduler.set_subdivision_kind(args.subdivision.into());
    scheduler.set_count_in(args.count_in);
    scheduler.set_latency_offset_ms(args.latency_ms);
    if let Some(every) = args.silent_every {
        scheduler.set_silent_bars(SilentBars::new(true, every));
    }
    if let Some(ratio) = &args.poly {
        let (a, b) = ratio
            .split_once(':')
            .with_context(|| format!("polyrhythm '{ratio}' is not of the form A:B"))?;
        scheduler.set_polyrhythm(Polyrhythm {
            enabled: true,
            ratio_a: a.trim().parse().context("polyrhythm layer A")?,
            ratio_b: b.trim().parse().context("polyrhythm layer B")?,
            ..Polyrhythm::default()
        });
    }
    Ok(())
}

fn run_schedule(config: AppConfig, args: &TransportArgs, beats: usize) -> Result<ExitCode> {
    let clock = Arc::new(ManualClock::new(0.0));
    let sink = Arc::new(RecordingSink::new());
    let recorder = Arc::new(EventRecorder::new());
    let step = config.scheduler.lookahead_ms.max(1) as f64 / 1000.0;
    let scheduler = LookaheadScheduler::new(config.scheduler, clock.clone(), sink.clone());
    scheduler.add_listener(recorder.clone());
    apply_transport(&scheduler, args)?;

    scheduler.start().context("starting scheduler")?;
    while recorder.ticks().len() < beats {
        clock.advance(step);
        scheduler.tick();
    }
    scheduler.stop();

    for event in recorder.scheduler_events() {
        println!("{}", json!({ "event": event }));
    }
    for sound in sink.events() {
        println!("{}", json!({ "sound": sound }));
    }
    Ok(ExitCode::from(0))
}

fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("decoding float samples")?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .context("decoding integer samples")?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn run_analyze(
    config: AppConfig,
    wav: &Path,
    bpm: u32,
    meter: &str,
    first_beat_ms: f64,
    input_latency_ms: f64,
) -> Result<ExitCode> {
    let (samples, sample_rate) = read_wav_mono(wav)?;
    if sample_rate == 0 {
        bail!("{} has a zero sample rate", wav.display());
    }

    let meter = Meter::parse(meter);
    let grid: Arc<dyn BeatGridSource> =
        Arc::new(FixedGrid::new(first_beat_ms / 1000.0, bpm, meter.beat_unit));
    let clock = Arc::new(ManualClock::new(0.0));
    let monitor = Arc::new(TempoMonitor::new(
        config.tempo_monitor.clone(),
        Arc::clone(&grid),
        clock.clone(),
    ));
    let recorder = Arc::new(EventRecorder::new());
    monitor.add_listener(recorder.clone());
    monitor.set_input_latency_ms(input_latency_ms);
    monitor.start();

    let quantizer = Quantizer::new(grid);
    let mut detector = OnsetDetector::with_config(sample_rate, config.onset_detection.clone());
    detector.add_listener(monitor.clone());

    const CHUNK: usize = 1024;
    let mut printed = 0;
    let mut onset_count = 0;
    for (index, chunk) in samples.chunks(CHUNK).enumerate() {
        let start = (index * CHUNK) as f64 / sample_rate as f64;
        clock.set(start + chunk.len() as f64 / sample_rate as f64);
        for onset in detector.process(chunk, start) {
            onset_count += 1;
            let timing = quantizer.quantize(onset.time);
            println!("{}", json!({ "onset": onset, "timing": timing }));
        }
        monitor.check_idle();

        let statuses = recorder.statuses();
        for status in statuses.iter().skip(printed) {
            println!("{}", json!({ "status": status }));
        }
        printed = statuses.len();
    }

    let summary = monitor.status();
    println!(
        "{}",
        json!({
            "summary": {
                "onsets": onset_count,
                "duration_secs": samples.len() as f64 / sample_rate as f64,
                "final_status": summary,
            }
        })
    );
    Ok(ExitCode::from(0))
}

fn run_play(config: AppConfig, args: &TransportArgs, seconds: u64, listen: bool) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let engine = EngineHandle::with_cpal(config);
    apply_transport(engine.scheduler(), args)?;
    let mut status_rx = engine.subscribe_status();
    let mut hits_rx = engine.subscribe_hits();

    engine.start_playback().context("starting playback")?;
    if listen && !engine.start_listening() {
        eprintln!("No input device available; playing without feedback");
    }

    runtime.block_on(async {
        let deadline = tokio::time::sleep(Duration::from_secs(seconds));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                Ok(status) = status_rx.recv() => {
                    println!("{}  {}", status.status_code.code(), status.status_text);
                }
                Ok(hit) = hits_rx.recv() => {
                    if let Some(timing) = hit.timing {
                        println!("  hit {:?} {:+.1} ms", timing.classification, timing.error_ms);
                    }
                }
            }
        }
    });

    engine.shutdown();
    println!("{}", serde_json::to_string_pretty(&engine.status())?);
    Ok(ExitCode::from(0))
}
