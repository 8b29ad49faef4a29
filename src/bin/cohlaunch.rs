// CLASSIFICATION: COMMUNITY
// Filename: cohlaunch.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-14

//! Launch an ELF image on the host kernel and show what the child receives.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cohesix_launchpad::kernel::host::HostKernel;
use cohesix_launchpad::kernel::ChannelMessage;
use cohesix_launchpad::loader_svc::SharedEndpoint;
use cohesix_launchpad::procargs::ProcArgs;
use cohesix_launchpad::runtime_image::{self, StartupHandleTable, RUNTIME_IMAGE_INFO};
use cohesix_launchpad::{Kernel, LaunchConfig, LaunchEnv, Launchpad};

#[derive(Parser)]
#[command(name = "cohlaunch", about = "Load and start an ELF image on the host kernel", version = "0.1")]
struct Cli {
    /// Launch configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Initial-thread stack size in bytes
    #[arg(long)]
    stack_size: Option<usize>,
    /// Runtime image loaded next to the program
    #[arg(long)]
    runtime: Option<PathBuf>,
    /// Directory the loader service resolves interpreter names in
    #[arg(long = "ldsvc-root")]
    ldsvc_root: Option<PathBuf>,
    /// Environment entry passed to the child
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,
    elf: PathBuf,
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => LaunchConfig::load(path)?,
        None => LaunchConfig::default(),
    };
    if let Some(size) = cli.stack_size {
        config.stack_size = size;
    }
    if cli.runtime.is_some() {
        config.runtime_image = cli.runtime.clone();
    }
    if cli.ldsvc_root.is_some() {
        config.loader_service_root = cli.ldsvc_root.clone();
    }

    let host = HostKernel::shared();
    let kernel: Arc<dyn Kernel> = host.clone();
    let mut env = LaunchEnv::new(kernel).with_config(config.clone());
    if let Some(root) = config.loader_service_root.clone() {
        let endpoint = host.handle(host.spawn_loader_service(move |name| resolve(&root, name)));
        env = env.with_loader_service(SharedEndpoint::new(endpoint));
    }
    if let Some(path) = &config.runtime_image {
        let bytes = fs::read(path)
            .with_context(|| format!("reading runtime image {}", path.display()))?;
        let startup = StartupHandleTable::new();
        startup.insert(RUNTIME_IMAGE_INFO, host.handle(host.vmo_with_contents(&bytes)?));
        runtime_image::global().register_source(startup);
    }

    let bytes = fs::read(&cli.elf).with_context(|| format!("reading {}", cli.elf.display()))?;
    let image = host.handle(host.vmo_with_contents(&bytes)?);
    let name = cli
        .elf
        .file_name()
        .map_or_else(|| "child".to_owned(), |name| name.to_string_lossy().into_owned());
    let job = host.handle(host.create_job());

    let mut argv = vec![cli.elf.display().to_string()];
    argv.extend(cli.args);

    // Failures are latched by the context; go() reports the first one.
    let mut lp = Launchpad::create(env, &job, &name);
    let _ = lp.set_args(&argv);
    let _ = lp.set_environ(&cli.env);
    let _ = if config.runtime_image.is_some() {
        lp.load_from_image(image)
    } else {
        lp.elf_load(image)
    };
    let process = lp.go()?;

    let record = host
        .process_started(process.raw())
        .context("process was not started")?;
    println!(
        "started {name}: entry=0x{:x} sp=0x{:x} bootstrap={} runtime=0x{:x}",
        record.entry, record.stack, record.arg1.0, record.arg2
    );
    for (idx, message) in host.take_bootstrap(process.raw())?.iter().enumerate() {
        print_message(idx, message)?;
    }
    Ok(())
}

/// Map a requested object name to a file under `root`.
fn resolve(root: &Path, name: &str) -> Option<Vec<u8>> {
    let relative = Path::new(name.trim_start_matches('/'));
    if relative
        .components()
        .any(|part| !matches!(part, Component::Normal(_)))
    {
        return None;
    }
    fs::read(root.join(relative)).ok()
}

fn print_message(idx: usize, message: &ChannelMessage) -> anyhow::Result<()> {
    let record = ProcArgs::parse(&message.bytes)?;
    println!(
        "message {idx}: {} bytes, {} handles",
        message.bytes.len(),
        message.handles.len()
    );
    let info = record.handle_info(message.handles.len())?;
    for (raw, info) in message.handles.iter().zip(info) {
        println!("  handle {} {info:?}", raw.0);
    }
    for (i, arg) in record.args()?.iter().enumerate() {
        println!("  argv[{i}] = {}", String::from_utf8_lossy(arg));
    }
    for (i, var) in record.environ()?.iter().enumerate() {
        println!("  envp[{i}] = {}", String::from_utf8_lossy(var));
    }
    Ok(())
}
