use spinal::observer::ControllerAdapter;
use spinal::prelude::{BatchRunner, Controller, ControllerConfig, ParamPoint, ParamSet, Simulation, Testbed};
use tracing::info;

const NEURAL_CONFIG: &str = include_str!("../configs/neural.json");
const REFLEX_CONFIG: &str = include_str!("../configs/reflex.json");

struct Options {
    config: String,
    steps: usize,
    dt: f64,
    seed: u64,
    points: usize,
    threads: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config: "neural".to_string(),
            steps: 500,
            dt: 0.005,
            seed: 1,
            points: 8,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && (args[1] == "--help" || args[1] == "-h" || args[1] == "help") {
        print_help();
        return;
    }

    // A leading config or flag implies `run`.
    let (command, rest) = match args.get(1).map(String::as_str) {
        Some(c @ ("run" | "batch" | "snapshot")) => (c, &args[2..]),
        _ => ("run", args.get(1..).unwrap_or(&[])),
    };
    let opts = match parse_options(rest) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("{msg}");
            print_help();
            std::process::exit(2);
        }
    };

    let result = match command {
        "run" => run_single(&opts),
        "batch" => run_batch(&opts),
        _ => run_snapshot(&opts),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .cloned()
                .ok_or_else(|| format!("{flag} expects a value"))
        };
        match arg.as_str() {
            "--steps" => opts.steps = parse_num(&value("--steps")?)?,
            "--dt" => opts.dt = parse_num(&value("--dt")?)?,
            "--seed" => opts.seed = parse_num(&value("--seed")?)?,
            "--points" => opts.points = parse_num(&value("--points")?)?,
            "--threads" => opts.threads = parse_num(&value("--threads")?)?,
            flag if flag.starts_with("--") => return Err(format!("Unknown option: {flag}")),
            path => opts.config = path.to_string(),
        }
    }
    Ok(opts)
}

fn parse_num<T: std::str::FromStr>(s: &str) -> Result<T, String> {
    s.parse().map_err(|_| format!("not a number: {s}"))
}

/// `neural` and `reflex` name the bundled configurations; anything else is a path.
fn load_config(name: &str) -> spinal::Result<ControllerConfig> {
    match name {
        "neural" => ControllerConfig::from_json_str(NEURAL_CONFIG),
        "reflex" => ControllerConfig::from_json_str(REFLEX_CONFIG),
        path => ControllerConfig::from_json_file(path),
    }
}

fn run_single(opts: &Options) -> spinal::Result<()> {
    let config = load_config(&opts.config)?;
    let mut body = Testbed::new();
    let mut params = ParamSet::new(opts.seed);
    let mut controller = Controller::new(&config, &body, &mut params)?;
    info!(
        "{}: {} parameters ({} free), {} delayed sensors",
        controller.signature(),
        params.len(),
        params.free_count(),
        controller.required_sensors().len()
    );

    for step in 0..opts.steps {
        let t = body.time();
        controller.update(&mut body, t);
        if step % 100 == 0 {
            let u = body.actuator_inputs();
            let peak = u.iter().copied().fold(f64::MIN, f64::max);
            let mean = u.iter().sum::<f64>() / u.len().max(1) as f64;
            println!("t={t:6.3}  mean_u={mean:+.4}  peak_u={peak:+.4}");
        }
        body.advance(opts.dt);
    }

    let report = controller.finalize();
    println!("{} steps, signature {}", report.steps, report.signature);
    Ok(())
}

fn run_batch(opts: &Options) -> spinal::Result<()> {
    let config = load_config(&opts.config)?;
    let points = vec![ParamPoint::new(); opts.points];
    let runner = BatchRunner::new().with_max_parallelism(opts.threads);
    let started = std::time::Instant::now();
    let episodes = runner.run_episodes(&config, &points, opts.seed, opts.steps, opts.dt);

    for (i, ep) in episodes.iter().enumerate() {
        match ep {
            Ok(ep) => println!(
                "point {i:3}: effort={:.5}  params={}  {}",
                ep.effort, ep.parameters, ep.signature
            ),
            Err(e) => println!("point {i:3}: failed: {e}"),
        }
    }
    println!(
        "{} episodes on {} threads in {:.2?}",
        episodes.len(),
        runner.max_parallelism(),
        started.elapsed()
    );
    Ok(())
}

fn run_snapshot(opts: &Options) -> spinal::Result<()> {
    let config = load_config(&opts.config)?;
    let mut body = Testbed::new();
    let mut params = ParamSet::new(opts.seed);
    let mut controller = Controller::new(&config, &body, &mut params)?;
    for _ in 0..opts.steps {
        let t = body.time();
        controller.update(&mut body, t);
        body.advance(opts.dt);
    }
    let report = controller.finalize();
    println!("{}", ControllerAdapter::new(&controller).to_json(&report)?);
    Ok(())
}

fn print_help() {
    println!(
        "spinal - reflex and neural controllers for musculoskeletal simulation\n\n\
         Usage:\n  \
           spinal [run] [CONFIG] [--steps N] [--dt SECONDS] [--seed N]\n  \
           spinal batch [CONFIG] [--points N] [--threads N] [--steps N]\n  \
           spinal snapshot [CONFIG] [--steps N]\n\n\
         CONFIG is `neural`, `reflex` or a path to a JSON file (default: neural).\n\
         Set RUST_LOG=debug to see construction details."
    );
}
