use lanesync::config;
use lanesync::core::audio::{AudioClock, SimulatedAudio};
use lanesync::game::chart::Chart;
use lanesync::game::run::{Autoplay, FrameOutcome, Run};
use lanesync::vfx::property_set::VfxLibrary;
use std::path::PathBuf;

const FRAME_SEC: f64 = 1.0 / 60.0;

const USAGE: &str = "usage: lanesync [CHART.json] [VFX.json] [--difficulty NAME] [--stall AT_SEC:DURATION_SEC]";

const DEMO_CHART: &str = r#"{
    "bpm": 128,
    "laneCount": 4,
    "notes": [
        { "timeMs": 1000, "lane": 0 },
        { "timeMs": 1469, "lane": 1 },
        { "timeMs": 1938, "lane": 2 },
        { "timeMs": 2406, "lane": 3 },
        { "timeMs": 2875, "lane": 0, "holdDurationMs": 938 },
        { "timeMs": 3344, "lane": 2 },
        { "timeMs": 3813, "lane": 3 },
        { "timeMs": 4281, "lane": 1, "holdDurationMs": 469 },
        { "timeMs": 4750, "lane": 0 },
        { "timeMs": 4750, "lane": 3 }
    ]
}"#;

const DEMO_VFX: &str = r##"{
    "difficulties": {
        "normal": {
            "defaults": { "beatFlash.enabled": true },
            "properties": {
                "background.gradient": [
                    { "timeMs": 0, "value": { "type": "linear", "angle": 180, "stops": [
                        { "position": 0, "color": "#101018" }, { "position": 1, "color": "#000000" } ] } },
                    { "timeMs": 3000, "value": { "type": "linear", "angle": 180, "stops": [
                        { "position": 0, "color": "#401040" }, { "position": 1, "color": "#100010" } ] },
                      "easing": { "curve": "sine", "style": "inOut" } }
                ],
                "camera.rotateZ": [ { "timeMs": 2875, "value": 4, "easing": { "curve": "back", "style": "out" } } ],
                "camera.shakeAmp": [ { "timeMs": 4700, "value": 0 }, { "timeMs": 4750, "value": 6 }, { "timeMs": 5000, "value": 0 } ],
                "camera.shakeFreq": [ { "timeMs": 0, "value": 12 } ],
                "notes.colors.1": [ { "timeMs": 2875, "value": "#ff66aa" } ]
            }
        }
    }
}"##;

struct Args {
    chart: Option<PathBuf>,
    vfx: Option<PathBuf>,
    difficulty: String,
    stall: Option<(f64, f64)>,
}

fn parse_stall(v: &str) -> Option<(f64, f64)> {
    let (at, dur) = v.split_once(':')?;
    let at = at.trim().parse::<f64>().ok()?;
    let dur = dur.trim().parse::<f64>().ok()?;
    (at.is_finite() && dur.is_finite() && at >= 0.0 && dur > 0.0).then_some((at, dur))
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        chart: None,
        vfx: None,
        difficulty: "normal".to_string(),
        stall: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--difficulty" => {
                args.difficulty = it.next().ok_or_else(|| USAGE.to_string())?;
            }
            "--stall" => {
                let v = it.next().ok_or_else(|| USAGE.to_string())?;
                args.stall = Some(parse_stall(&v).ok_or_else(|| format!("bad --stall '{v}'\n{USAGE}"))?);
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if args.chart.is_none() => args.chart = Some(PathBuf::from(a)),
            _ if args.vfx.is_none() => args.vfx = Some(PathBuf::from(a)),
            _ => return Err(format!("unexpected argument '{a}'\n{USAGE}")),
        }
    }
    Ok(args)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install logger immediately, then set runtime max level from config after loading it.
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    // Startup default when config is missing or malformed.
    log::set_max_level(log::LevelFilter::Warn);

    config::load();
    let cfg = config::get();
    log::set_max_level(cfg.log_level.as_level_filter());

    let args = parse_args()?;
    let chart = match &args.chart {
        Some(path) => Chart::load(path)?,
        None => Chart::from_json(DEMO_CHART)?,
    };
    let mut library = match &args.vfx {
        Some(path) => VfxLibrary::load(path, cfg.keyframe_dedup_tolerance_ms)?,
        None => VfxLibrary::from_json(DEMO_VFX)?,
    };
    if !library.select(&args.difficulty) {
        let known: Vec<&str> = library.difficulties().collect();
        log::warn!(
            "No VFX set for difficulty '{}' (have: {}); playing without effects.",
            args.difficulty,
            known.join(", ")
        );
    }

    let mut audio = SimulatedAudio::new();
    if let Some((at, duration)) = args.stall {
        audio.inject_stall(at, duration, true);
    }
    // Readiness is the only async step; the frame loop itself is synchronous.
    let rt = tokio::runtime::Builder::new_current_thread().build()?;
    rt.block_on(audio.ready())?;
    log::info!("Audio device ready.");

    let mut run = Run::start(audio, chart, library.current_set(), cfg.run_tuning(), 0.0)?;
    let mut autoplay = Autoplay::new();
    let results = loop {
        run.audio_mut().advance(FRAME_SEC);
        let now_ms = run.audio().wall_seconds() * 1000.0;
        match run.frame(now_ms) {
            FrameOutcome::Continue(_) => autoplay.drive(&mut run),
            FrameOutcome::Finished(results) => break results,
            FrameOutcome::Stopped => return Err("run stopped without results".into()),
        }
    };
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
