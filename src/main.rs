use std::{path::PathBuf, process::ExitCode};

use blockexec::{
    console::StdConsole, fs::store::DirStore, tracing::StderrSubscriber, Config, Loader, RunOutcome,
};
use clap::Parser;
use tracing::level_filters::LevelFilter;

/// Run a block image under the emulated syscall layer.
#[derive(Parser, Debug)]
#[command(name = "blockexec", version, about)]
struct Cli {
    /// Directory holding the image and every file the program opens.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Bytes available to brk past the end of the image.
    #[arg(long, value_parser = parse_size)]
    heap_size: Option<u64>,

    /// Size of the program's stack.
    #[arg(long, value_parser = parse_size)]
    stack_size: Option<u64>,

    /// Descriptor table size, including the three console descriptors.
    #[arg(long)]
    max_fds: Option<usize>,

    /// More logging on stderr. Repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Image path, relative to the root.
    image: String,

    /// Arguments passed to the program after its own name.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Accepts decimal or `0x`-prefixed hex.
fn parse_size(s: &str) -> Result<u64, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(heap_size) = self.heap_size {
            config.heap_size = heap_size;
        }
        if let Some(stack_size) = self.stack_size {
            config.stack_size = stack_size as usize;
        }
        if let Some(max_fds) = self.max_fds {
            config.max_fds = max_fds;
        }
        config
    }

    fn max_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = tracing::subscriber::set_global_default(StderrSubscriber::new(cli.max_level())) {
        eprintln!("blockexec: unable to install logger: {e}");
    }

    let argv: Vec<&str> = std::iter::once(cli.image.as_str())
        .chain(cli.args.iter().map(String::as_str))
        .collect();
    let mut loader = Loader::new(DirStore::new(&cli.root), StdConsole, cli.config());
    match loader.load(&cli.image, &argv) {
        Ok(outcome) => {
            if let RunOutcome::Aborted(fault) = &outcome {
                eprintln!("blockexec: {} aborted: {fault}", cli.image);
            }
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            eprintln!("blockexec: {e}");
            ExitCode::FAILURE
        }
    }
}
