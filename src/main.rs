// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Kestrel - an optimizing JavaScript compiler
//!
//! This is the command-line driver. It loads configuration, compiles every
//! input file concurrently and prints the requested dumps and outputs in
//! input order.

use anyhow::{Context, Result, bail};
use clap::Parser;
use kestrel_compiler::ast::json::program_to_string_pretty;
use kestrel_compiler::{
    AsyncCompiler, COMPILER_STACK_SIZE, CompileOutput, Compiler, CompilerConfig, DumpOptions, Output, Target,
};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kestrel", version, about = "Optimizing JavaScript compiler")]
struct Cli {
    /// Source files to compile
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Optimization level: -O (default) or -O0
    #[arg(short = 'O', value_name = "LEVEL", num_args = 0..=1, default_missing_value = "1")]
    opt_level: Option<String>,

    /// Output format
    #[arg(long, value_name = "bytecode|native")]
    target: Option<String>,

    /// Parse with the typed grammar (implied by a .ts extension)
    #[arg(long)]
    typescript: bool,

    /// Print the ESTree JSON of every file
    #[arg(long)]
    dump_ast: bool,

    /// Print the IR after the optimizer
    #[arg(long)]
    dump_ir: bool,

    /// Print the IR after every pass
    #[arg(long)]
    dump_between_passes: bool,

    /// Print the register-allocated IR
    #[arg(long)]
    dump_ra: bool,

    /// Print the bytecode disassembly
    #[arg(long)]
    dump_bytecode: bool,

    /// Write the output to a file
    #[arg(short = 'o', long = "emit", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Extra configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override a configuration value
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Log pass boundaries and per-function decisions
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_stack_size(COMPILER_STACK_SIZE)
        .build();
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "kestrel=debug,kestrel_compiler=debug"
    } else {
        "kestrel=info,kestrel_compiler=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, the user config file, `--config`, `KESTREL_*`, then flags.
fn load_config(cli: &Cli) -> Result<CompilerConfig> {
    let mut config = CompilerConfig::default();
    if let Some(user) = dirs::config_dir().map(|d| d.join("kestrel").join("config.toml")) {
        if user.exists() {
            config.merge_from_file(&user)?;
            tracing::debug!(path = %user.display(), "loaded user configuration");
        }
    }
    if let Some(path) = &cli.config {
        config.merge_from_file(path)?;
    }
    config.merge_from_env()?;

    match cli.opt_level.as_deref() {
        None => {}
        Some("0") => config.optimize = false,
        Some(_) => config.optimize = true,
    }
    if let Some(target) = &cli.target {
        config.target = target.parse()?;
    }
    if cli.typescript {
        config.typescript = true;
    }
    for pair in &cli.overrides {
        config.apply_override(pair)?;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    if cli.dump_bytecode && config.target != Target::Bytecode {
        bail!("--dump-bytecode requires the bytecode target");
    }

    if cli.dump_ast {
        for path in &cli.files {
            dump_ast(&config, path).await?;
        }
    }

    let dumps = DumpOptions {
        between_passes: cli.dump_between_passes,
        ir: cli.dump_ir,
        ra: cli.dump_ra,
    };
    let compiler = AsyncCompiler::new(config).with_dumps(dumps);
    let results = compiler.compile_files(&cli.files).await;

    let mut failed = 0;
    let mut outputs = Vec::new();
    for (path, result) in cli.files.iter().zip(results) {
        match result {
            Ok(output) => {
                print!("{}", output.dump);
                outputs.push((path, output));
            }
            Err(e) => {
                eprintln!("{}: {}: {}", "Error".red().bold(), path.display(), e);
                failed += 1;
            }
        }
    }

    for (path, output) in &outputs {
        if cli.dump_bytecode {
            if let Output::Bytecode(bytecode) = &output.output {
                print!("{}", bytecode.disassemble()?);
            }
        }
        if let Some(dest) = &cli.output {
            write_output(dest, path, output, outputs.len() > 1).await?;
        } else if let Output::Native(text) = &output.output {
            print!("{}", text);
        }
    }

    if failed > 0 {
        bail!("{} of {} files failed to compile", failed, cli.files.len());
    }
    Ok(())
}

async fn dump_ast(config: &CompilerConfig, path: &Path) -> Result<()> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut config = config.clone();
    if path.extension().is_some_and(|ext| ext == "ts") {
        config.typescript = true;
    }
    let program = Compiler::new(config).parse(&source)?;
    println!("{}", program_to_string_pretty(&program));
    Ok(())
}

/// With several inputs the output path is a directory and each unit is
/// written next to its own file name.
async fn write_output(dest: &Path, source: &Path, output: &CompileOutput, many: bool) -> Result<()> {
    let extension = match output.output {
        Output::Bytecode(_) => "hbc",
        Output::Native(_) => "cpp",
    };
    let path = if many {
        tokio::fs::create_dir_all(dest).await?;
        let stem = source.file_stem().unwrap_or_default();
        dest.join(stem).with_extension(extension)
    } else {
        dest.to_path_buf()
    };
    let bytes = match &output.output {
        Output::Bytecode(bytecode) => bytecode.serialize(),
        Output::Native(text) => text.clone().into_bytes(),
    };
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote output");
    Ok(())
}
