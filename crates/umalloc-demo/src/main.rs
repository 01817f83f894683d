#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

#[macro_use]
mod log;
mod report;
mod step;

use std::{fmt, process, str::FromStr};

use argh::FromArgs;
use snafu::{OptionExt as _, ResultExt as _, Whatever, whatever};
use umalloc::{Allocation, CoreSource, SliceCore, Umalloc};

use self::{log::LogLevel, report::Report, step::Step};

/// Drive the allocator through a scripted sequence of steps, printing the
/// free list after each one.
#[derive(Debug, FromArgs)]
struct Args {
    /// where the arena grows from: `buffer` or `sbrk`
    #[argh(option, default = "Default::default()")]
    source: SourceKind,
    /// size of the arena buffer in KiB when `--source buffer` is used
    #[argh(option, default = "1024")]
    buffer_kib: usize,
    /// most verbose log level printed: trace, debug, info, warn or error
    #[argh(option, default = "LogLevel::Info")]
    log_level: LogLevel,
    /// steps to run: `a<bytes>` allocates into the next slot, `f<slot>`
    /// releases a slot
    #[argh(positional)]
    steps: Vec<Step>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    #[default]
    Buffer,
    Sbrk,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buffer" => Ok(Self::Buffer),
            "sbrk" => Ok(Self::Sbrk),
            _ => Err(format!("unknown source `{s}`, expected `buffer` or `sbrk`")),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer => f.write_str("buffer"),
            Self::Sbrk => f.write_str("sbrk"),
        }
    }
}

fn main() {
    let args: Args = argh::from_env();
    log::init(args.log_level);

    if let Err(err) = run(&args) {
        error!("demo aborted");
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Whatever> {
    info!("growing the arena from {}", args.source);
    match args.source {
        SourceKind::Buffer => {
            let bytes = args
                .buffer_kib
                .checked_mul(1024)
                .with_whatever_context(|| {
                    format!("buffer size overflows, buffer_kib={}", args.buffer_kib)
                })?;
            let mut buffer = vec![0u8; bytes];
            debug!("arena buffer: {bytes} bytes at {:p}", buffer.as_ptr());
            run_steps(Umalloc::new(SliceCore::new(&mut buffer)), &args.steps)
        }
        SourceKind::Sbrk => run_sbrk(&args.steps),
    }
}

#[cfg(target_os = "linux")]
fn run_sbrk(steps: &[Step]) -> Result<(), Whatever> {
    run_steps(Umalloc::new(umalloc::Sbrk), steps)
}

#[cfg(not(target_os = "linux"))]
fn run_sbrk(_steps: &[Step]) -> Result<(), Whatever> {
    whatever!("the `sbrk` source is only available on Linux")
}

fn run_steps<S>(mut allocator: Umalloc<S>, steps: &[Step]) -> Result<(), Whatever>
where
    S: CoreSource,
{
    let mut slots: Vec<Option<Allocation>> = vec![];

    println!("{}", allocator.free_list_report());
    for (index, step) in steps.iter().enumerate() {
        info!("step {index}: {step}");
        match *step {
            Step::Allocate(nbytes) => {
                let allocation = allocator
                    .allocate(nbytes)
                    .with_whatever_context(|_| format!("step {index} failed: {step}"))?;
                let slot = slots.len();
                debug!(
                    "slot {slot}: {} bytes at {:p} ({} units)",
                    allocation.len(),
                    allocation.as_ptr(),
                    allocation.units()
                );
                fill(&allocation, slot);
                slots.push(Some(allocation));
            }
            Step::Release(slot) => {
                let allocation = slots
                    .get_mut(slot)
                    .and_then(Option::take)
                    .with_whatever_context(|| {
                        format!("step {index} failed: slot {slot} holds no allocation")
                    })?;
                trace!("releasing {:p}", allocation.as_ptr());
                unsafe {
                    allocator.release(allocation);
                }
            }
        }
        println!("{}", allocator.free_list_report());
    }

    let live = slots.iter().flatten().count();
    if live > 0 {
        warn!("{live} allocation(s) still live at exit");
    }
    Ok(())
}

/// Writes a slot-specific byte pattern over the whole payload.
fn fill(allocation: &Allocation, slot: usize) {
    #[expect(clippy::cast_possible_truncation)]
    let pattern = slot as u8;
    unsafe {
        allocation
            .as_ptr()
            .as_ptr()
            .write_bytes(pattern, allocation.len());
    }
}
