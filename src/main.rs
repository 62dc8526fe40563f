use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Error, Result};
use clap::Parser;
use log::LevelFilter;

use concise::merge_netcdf_files;

/*============================================================
=                            ARGS                            =
============================================================*/

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct ArgParser {
    /// The directory containing the granules to be merged
    data_dir: PathBuf,

    /// The output filename for the merged product
    output_path: PathBuf,

    /// Enable verbose output; useful for debugging
    #[arg(short, long)]
    verbose: bool,

    /// Override the number of cores utilized during multithreaded
    /// operations. Defaults to the host CPU count
    #[arg(short, long)]
    cores: Option<usize>,
}

/*============================================================
=                            MAIN                            =
============================================================*/

fn main() -> Result<(), Error> {
    let args = ArgParser::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    ensure!(
        args.data_dir.is_dir(),
        "data_dir {:?} is not a directory",
        args.data_dir
    );

    let mut input_files: Vec<PathBuf> = fs::read_dir(&args.data_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    input_files.sort();

    merge_netcdf_files(&input_files, &args.output_path, args.cores)?;
    Ok(())
}
