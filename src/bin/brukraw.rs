//! brukraw — Inspect and convert raw Bruker acquisition directories.

use bruker_raw::Experiment;
use brukraw_io::{write_shaped, write_shaped_lowmem, Endian, SampleArray};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "brukraw",
    version,
    about = "Inspect and convert raw Bruker acquisition data (fid/ser)"
)]
struct Cli {
    /// Experiment directory containing fid/ser and acqus files
    dir: PathBuf,

    /// Write the samples to this raw file
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Remove the digital-filter group delay before writing
    #[arg(long, default_value_t = false)]
    correct: bool,

    /// Write one trace at a time instead of buffering the whole array
    #[arg(long, default_value_t = false)]
    lowmem: bool,

    /// Byte order of the output file: little or big
    #[arg(long, default_value = "little")]
    endian: String,

    /// Overwrite an existing output file
    #[arg(short, long, default_value_t = false)]
    force: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let exp = Experiment::open(&cli.dir)?;

    println!("data file:  {}", exp.data_path.display());
    println!(
        "kind:       {}",
        if exp.is_series { "ser (series)" } else { "fid" }
    );
    println!("byte order: {:?}", exp.endian);
    println!(
        "shape:      {:?} ({}D, {})",
        exp.shape.dims,
        exp.shape.ndim(),
        if exp.shape.direct_dim_complex {
            "complex"
        } else {
            "real"
        }
    );
    if let Some(pp) = &exp.pulse_program {
        println!("pulse prog: {} loops", pp.loop_count());
    }
    match exp.group_delay() {
        Ok(d) => println!("grp delay:  {d} points"),
        Err(e) => println!("grp delay:  unknown ({e})"),
    }

    let Some(out) = cli.out else {
        return Ok(());
    };

    let data = if cli.correct {
        SampleArray::Complex(exp.read_corrected()?)
    } else {
        exp.read()?.into_array()
    };

    let endian = match cli.endian.to_lowercase().as_str() {
        "big" => Endian::Big,
        _ => Endian::Little,
    };
    if cli.lowmem {
        write_shaped_lowmem(&out, &data, endian, cli.force)?;
    } else {
        write_shaped(&out, &data, endian, cli.force)?;
    }
    println!("wrote {} ({:?} elements)", out.display(), data.shape());

    Ok(())
}
