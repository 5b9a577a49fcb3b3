use std::{ffi::c_void, path::PathBuf, ptr};

use clap::{Parser, ValueEnum};
use leakcheck::{Config, ReallocNull};

/// Run a small program against the leak detector and let it print its exit
/// report.
#[derive(Parser, Debug)]
#[command(name = "leak-demo", version)]
struct Args {
    #[arg(value_enum, default_value_t = Scenario::Basic)]
    scenario: Scenario,

    /// Also write a JSON snapshot of the registry to this file before exiting
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Two allocations, only the first one freed
    Basic,
    /// Everything allocated is freed again
    Clean,
    /// The same pointer freed twice
    DoubleFree,
    /// A pointer that never came from the allocator is freed
    InvalidFree,
    /// `free(NULL)`
    NullFree,
    /// An allocation grown with `realloc` and then leaked
    Realloc,
    /// `realloc(NULL, n)` used as `malloc(n)`
    ReallocNull,
    /// `realloc(NULL, n)` under the fatal policy
    ReallocNullLegacy,
    /// More allocations than the registry can hold
    Overflow,
    /// The basic scenario, with a JSON snapshot on stdout
    Json,
}

const OVERFLOW_CAPACITY: usize = 4;

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match args.scenario {
        Scenario::ReallocNullLegacy => Config::new().realloc_null(ReallocNull::Fatal),
        Scenario::Overflow => Config::new().capacity(OVERFLOW_CAPACITY),
        _ => Config::new(),
    };
    if let Err(e) = leakcheck::configure(config) {
        log::error!("{e}");
    }

    unsafe { run(args.scenario) };

    if args.scenario == Scenario::Json {
        match leakcheck::snapshot().to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("could not serialize snapshot: {e}"),
        }
    }
    if let Some(path) = args.json {
        if let Err(e) = leakcheck::snapshot().write_json(&path) {
            log::error!("could not write {}: {e}", path.display());
        }
    }
}

unsafe fn run(scenario: Scenario) {
    match scenario {
        Scenario::Basic | Scenario::Json => {
            let first = leakcheck::malloc(1024);
            let _second = leakcheck::malloc(2048);
            leakcheck::free(first);
        }
        Scenario::Clean => {
            let a = leakcheck::malloc(100);
            let b = leakcheck::calloc(10, 8);
            let a = leakcheck::realloc(a, 400);
            leakcheck::free(b);
            leakcheck::free(a);
        }
        Scenario::DoubleFree => {
            let p = leakcheck::malloc(64);
            leakcheck::free(p);
            leakcheck::free(p);
        }
        Scenario::InvalidFree => {
            let mut on_the_stack = 0u64;
            let _kept = leakcheck::malloc(32);
            leakcheck::free(&mut on_the_stack as *mut u64 as *mut c_void);
        }
        Scenario::NullFree => {
            leakcheck::free(ptr::null_mut());
        }
        Scenario::Realloc => {
            let p = leakcheck::malloc(16);
            let _p = leakcheck::realloc(p, 4096);
        }
        Scenario::ReallocNull | Scenario::ReallocNullLegacy => {
            let p = leakcheck::realloc(ptr::null_mut(), 128);
            leakcheck::free(p);
        }
        Scenario::Overflow => {
            for _ in 0..OVERFLOW_CAPACITY + 2 {
                leakcheck::malloc(10);
            }
        }
    }
}
