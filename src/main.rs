//! tcc-session - CLI

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tcc_session::util::config::{load_config, load_user_config};
use tcc_session::util::logger;
use tcc_session::{run_file, OutputMode, Session, SessionConfig, NAME, VERSION};

/// Compile C in memory with libtcc and run it
#[derive(Parser, Debug)]
#[command(name = "tcc-session")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(ClapArgs, Debug)]
struct CompileArgs {
    /// C source file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Config file (defaults to the user config)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Runtime library directory
    #[arg(long, value_name = "DIR")]
    lib_path: Option<PathBuf>,

    /// Include directory
    #[arg(short = 'I', value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Library directory
    #[arg(short = 'L', value_name = "DIR")]
    library_path: Vec<PathBuf>,

    /// Library to link
    #[arg(short = 'l', value_name = "NAME")]
    library: Vec<String>,

    /// Preprocessor definition
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    define: Vec<String>,
}

impl CompileArgs {
    fn session_config(
        &self,
        mode: OutputMode,
    ) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path).with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => load_user_config().context("Failed to load user config")?,
        };
        config.mode = mode;
        if let Some(lib_path) = &self.lib_path {
            config.lib_path = Some(lib_path.clone());
        }
        config.include_paths.extend(self.include.iter().cloned());
        config.library_paths.extend(self.library_path.iter().cloned());
        config.libraries.extend(self.library.iter().cloned());
        for spec in &self.define {
            config.define(spec);
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a file and run its main; exits with main's status
    Run {
        #[command(flatten)]
        compile: CompileArgs,

        /// Compile on the session's worker pool
        #[arg(long = "async")]
        async_compile: bool,
    },

    /// Compile a file and print the addresses of symbols
    Symbols {
        #[command(flatten)]
        compile: CompileArgs,

        /// Symbol names to resolve
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_cli(args.verbose);

    match args.command {
        Commands::Run { compile, async_compile } => {
            let config = compile.session_config(OutputMode::Execute)?;
            if !async_compile {
                std::process::exit(run_file(&compile.file, &config)?);
            }

            let session = Session::tcc_with_config(&config).context("Failed to create session")?;
            let source = std::fs::read_to_string(&compile.file)
                .with_context(|| format!("Failed to read file: {}", compile.file.display()))?;

            let (tx, rx) = crossbeam::channel::bounded(1);
            session.compile_async(&source, move |outcome| {
                let _ = tx.send(outcome);
            });
            // Queued delivery needs this thread to pump; worker delivery fills rx directly.
            while rx.is_empty() {
                session.deliver_completions_timeout(Duration::from_millis(50));
            }
            let status = rx
                .recv()
                .context("Async compile was abandoned")?
                .into_status()
                .context("Async compile could not be dispatched")?;

            if status.is_err() {
                bail!(
                    "Failed to compile {}: {}",
                    compile.file.display(),
                    session.take_diagnostics().join("; ")
                );
            }
            std::process::exit(session.run(0).code());
        }
        Commands::Symbols { compile, names } => {
            let config = compile.session_config(OutputMode::Execute)?;
            let session = Session::tcc_with_config(&config).context("Failed to create session")?;
            let path = compile.file.to_string_lossy();
            if session.add_file(&path).is_err() || session.relocate().is_err() {
                bail!("Failed to build {}: {}", path, session.take_diagnostics().join("; "));
            }
            for name in &names {
                match session.get_symbol(name) {
                    Ok(handle) => println!("{:#018x} {}", handle.addr(), name),
                    Err(e) => println!("{:>18} {} ({})", "-", name, e),
                }
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
