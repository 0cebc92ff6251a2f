use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pupfs::PupFs;

/// Inspect PS3 firmware update containers.
#[derive(Debug, Parser)]
#[command(name = "pupfs", version)]
struct Args {
    /// Input firmware container, a local path or an http(s) URL.
    #[arg(long, value_name = "IN_PUP")]
    in_pup: Option<String>,

    /// Output firmware container.
    #[arg(long, value_name = "OUT_PUP")]
    out_pup: Option<PathBuf>,

    /// Output directory.
    #[arg(long, value_name = "OUT_DIR")]
    out_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    log::debug!("args: {args:?}");

    if args.out_pup.is_some() || args.out_dir.is_some() {
        eprintln!("error: writing containers is not supported");
        return ExitCode::FAILURE;
    }

    let Some(input) = &args.in_pup else {
        eprintln!("error: no input, pass --in-pup");
        return ExitCode::FAILURE;
    };

    let fs = if input.starts_with("http://") || input.starts_with("https://") {
        PupFs::open_url(input.clone())
    } else {
        PupFs::open_path(input)
    };
    match fs {
        Ok(fs) => {
            println!("{:?}", fs.index().header());
            print!("{}", fs.index().tree().render());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: failed to open {input}: {err}");
            ExitCode::FAILURE
        }
    }
}
