use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use ipcounter::args::{Cli, CounterKind, DEFAULT_PRECISION};
use ipcounter::bitmap::{Bitmap, MAX_SIZE};
use ipcounter::error::Result;
use ipcounter::estimator::Estimator;
use ipcounter::exact_set::ExactSet;
use ipcounter::hyperloglog::HyperLogLog;
use ipcounter::hyperloglogplus_bitmap::HllPlusBitmap;
use ipcounter::pipeline::Pipeline;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn build_estimator(kind: CounterKind) -> Result<Box<dyn Estimator>> {
    Ok(match kind {
        CounterKind::Bitmap => Box::new(Bitmap::new(MAX_SIZE)?),
        CounterKind::Set => Box::new(ExactSet::new()),
        CounterKind::HyperLogLog => Box::new(HyperLogLog::new(DEFAULT_PRECISION)?),
        CounterKind::HyperLogLogPlus => Box::new(HllPlusBitmap::new(DEFAULT_PRECISION)?),
    })
}

fn run(cli: Cli) -> Result<()> {
    let mut estimator = build_estimator(cli.counter)?;
    let pipeline = Pipeline::new(true, cli.counter.needs_hashing());

    let start = Instant::now();
    let count = pipeline.count_file(&cli.file, estimator.as_mut())?;
    let elapsed = start.elapsed();

    println!("{} count: {}", cli.counter.label(), count);
    println!("Time elapsed: {:?}", elapsed);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap exits 0 for --help/--version and 2 for a usage
            // error; the CLI contract here only distinguishes success
            // (0) from everything else (1), so collapse clap's usage
            // code down to 1 rather than letting it leak through.
            let _ = err.print();
            return if err.exit_code() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("Application error: {err}");
            ExitCode::FAILURE
        }
    }
}
