use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use stem_splitter_server::{
    logging, probe_audio, server, Pipeline, SeparatedTracks, ServiceConfig, ValidatedRequest,
};

#[derive(Parser)]
#[command(name = "stem-splitter-server")]
#[command(about = "Audio stem separation service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        #[arg(short, long)]
        listen: Option<String>,

        #[arg(long)]
        tmp_dir: Option<PathBuf>,

        #[arg(long)]
        python: Option<String>,
    },

    /// Separate one local file into `<stem>.mp3` and `no_<stem>.mp3`
    Separate {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        #[arg(short, long, default_value = "vocals")]
        stem: String,

        #[arg(short, long, default_value = "htdemucs")]
        model: String,
    },

    /// Check that demucs can be run
    Check,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let result = ServiceConfig::from_env()
        .context("invalid configuration")
        .and_then(|cfg| match cli.command {
            Commands::Serve {
                listen,
                tmp_dir,
                python,
            } => handle_serve(cfg, listen, tmp_dir, python),
            Commands::Separate {
                input,
                output_dir,
                stem,
                model,
            } => handle_separate(cfg, &input, &output_dir, stem, model),
            Commands::Check => handle_check(cfg),
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn handle_serve(
    mut cfg: ServiceConfig,
    listen: Option<String>,
    tmp_dir: Option<PathBuf>,
    python: Option<String>,
) -> anyhow::Result<()> {
    if let Some(addr) = listen {
        cfg.listen_addr = addr;
    }
    if let Some(dir) = tmp_dir {
        cfg.tmp_dir = dir;
    }
    if let Some(py) = python {
        cfg.python = py;
    }
    cfg.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(server::serve(cfg))
}

fn handle_separate(
    cfg: ServiceConfig,
    input: &Path,
    output_dir: &Path,
    stem: String,
    model: String,
) -> anyhow::Result<()> {
    let audio = fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let probe = probe_audio(&audio)?;
    let pipeline: Pipeline = cfg.build_pipeline();

    eprintln!("Input:  {}", input.display());
    eprintln!("Stem:   {stem}");
    eprintln!("Model:  {model}");
    eprintln!("Processing... (this may take a while)");

    let request = ValidatedRequest {
        audio,
        probe,
        target_stem: stem.clone(),
        model,
    };
    let SeparatedTracks { target, background } = pipeline.separate_bytes(&request)?;

    fs::create_dir_all(output_dir)?;
    let target_path = output_dir.join(format!("{stem}.mp3"));
    let background_path = output_dir.join(format!("no_{stem}.mp3"));
    fs::write(&target_path, target)?;
    fs::write(&background_path, background)?;

    println!("{}", target_path.display());
    println!("{}", background_path.display());
    Ok(())
}

fn handle_check(cfg: ServiceConfig) -> anyhow::Result<()> {
    eprintln!("Python executable: {}", cfg.python);
    cfg.build_pipeline().check()?;
    eprintln!("demucs is accessible");
    Ok(())
}
