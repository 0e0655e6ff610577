use std::path::PathBuf;
use std::time::Duration;

use reel_feed::app::RunOptions;

const HELP: &str = "reel-feed: vertical video feed engine, headless runner.

  --version, -V        Show version and exit
  --help,    -h        Show this help message
  --config PATH        Read configuration from PATH
  --db PATH            Use the SQLite store at PATH
  --seed N             Insert N demo items before loading
  --watch SECS         Keep polling for new items for SECS seconds";

fn main() {
    let opts = match parse_args(std::env::args().skip(1)) {
        Ok(Some(opts)) => opts,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = reel_feed::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// `Ok(None)` when an informational flag was handled and nothing should run.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<RunOptions>, String> {
    let mut opts = RunOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("reel-feed {}", reel_feed::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "--config" => opts.config_file = Some(PathBuf::from(value(&arg, args.next())?)),
            "--db" => opts.database_path = Some(PathBuf::from(value(&arg, args.next())?)),
            "--seed" => {
                let raw = value(&arg, args.next())?;
                let count = raw
                    .parse::<usize>()
                    .map_err(|_| format!("--seed expects a count, got {raw:?}"))?;
                opts.seed = Some(count);
            }
            "--watch" => {
                let raw = value(&arg, args.next())?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| format!("--watch expects seconds, got {raw:?}"))?;
                opts.watch = Some(Duration::from_secs(secs));
            }
            other => return Err(format!("unknown argument {other:?}")),
        }
    }
    Ok(Some(opts))
}

fn value(flag: &str, next: Option<String>) -> Result<String, String> {
    next.ok_or_else(|| format!("{flag} needs a value"))
}
