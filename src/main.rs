//! caustk-node: command-line host for the node graph.
//!
//! - `demo`: build a rack on the in-memory engine, round-trip a machine
//!   through a scratch library and print what came back
//! - `library list`: print a library's index
//! - `project create` / `project show`: drive the project manager

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

use caustk::{
    Codec, Library, MachineNode, MachineType, Node, NodeKind, ProjectManager, RackNode,
    RackSession, RuntimeConfig, VirtualRack,
    error::ProjectError,
    project::Project,
    state::{EffectType, auto_wah},
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "caustk-node")]
#[command(about = "Drive a synthesis rack through its node graph")]
#[command(version)]
struct Cli {
    /// Application root (default: the platform data directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the machine round-trip scenario against the in-memory engine
    Demo,

    /// Inspect libraries
    Library {
        #[command(subcommand)]
        command: LibraryCommand,
    },

    /// Create or inspect projects
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
}

#[derive(Subcommand)]
enum LibraryCommand {
    /// Print every entry of a library
    List { name: String },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project directory, relative to the projects root
    Create { dir: PathBuf },

    /// Print a project's info
    Show { dir: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> caustk::Result<()> {
    match cli.command {
        Commands::Demo => demo(),
        Commands::Library {
            command: LibraryCommand::List { name },
        } => {
            let config = RuntimeConfig::load(cli.root)?;
            let library = Library::open(&config, &name, Codec::standard()?)?;
            println!("{} ({} entries)", library.directory().display(), library.len());
            for info in library.entries() {
                println!(
                    "  {:<10} {}  {}",
                    info.kind,
                    info.id,
                    info.relative_path.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Project { command } => {
            let config = RuntimeConfig::load(cli.root)?;
            config.ensure_dirs()?;
            let (tx, rx) = mpsc::channel();
            let mut manager = ProjectManager::new(config, tx);
            manager.initialize()?;
            let project = match command {
                ProjectCommand::Create { dir } => manager.create_project(dir)?,
                ProjectCommand::Show { dir } => manager.load(dir)?,
            };
            println!("{}", project_json(project)?);
            for event in rx.try_iter() {
                log::debug!("{:?}", event);
            }
            Ok(())
        }
    }
}

fn project_json(project: &Project) -> caustk::Result<String> {
    Ok(serde_json::to_string_pretty(project).map_err(ProjectError::from)?)
}

/// Build a bass machine with an auto-wah, store it in a scratch library,
/// load it back into a fresh rack and compare.
fn demo() -> caustk::Result<()> {
    let scratch = tempfile::tempdir().map_err(caustk::error::LibraryError::from)?;
    let config = RuntimeConfig::with_root(scratch.path());
    let codec = Codec::standard()?;

    let mut session = RackSession::new(Box::new(VirtualRack::new()), codec.clone());
    session.create_rack()?;
    session.with_rack(|rack, cx| {
        rack.create_machine(cx, 0, MachineType::SubSynth, "bass")?
            .effects_mut()
            .create_effect(cx, 0, EffectType::AutoWah)?
            .set(cx, auto_wah::CUTOFF, 1.5)
    })?;

    let mut library = Library::create(&config, "demo", codec)?;
    let machine = session
        .rack()
        .machine(0)
        .ok_or(caustk::error::NodeError::UnknownMachine(0))?;
    library.add(machine)?;

    let info = library
        .find_all(NodeKind::Machine)
        .into_iter()
        .next()
        .cloned()
        .ok_or_else(|| caustk::error::LibraryError::IllegalState("machine not stored".into()))?;
    let loaded: MachineNode = library.new_instance(&info)?;

    session.set_rack(RackNode::new())?;
    let cutoff = session.with_rack(|rack, cx| {
        let machine = rack.add_machine(cx, loaded)?;
        Ok::<_, caustk::error::NodeError>(
            machine
                .effects()
                .effect(0)
                .and_then(|e| e.get(auto_wah::CUTOFF)),
        )
    })?;

    println!(
        "stored {} at {}",
        info.name.as_deref().unwrap_or("?"),
        info.relative_path.as_deref().unwrap_or("?")
    );
    match session.rack().machine(0) {
        Some(machine) => println!(
            "restored machine {} ({}) at index {}, live: {}, auto-wah cutoff {:?}",
            machine.name(),
            machine.machine_type(),
            machine.index(),
            machine.base().is_live(),
            cutoff
        ),
        None => println!("no machine at index 0"),
    }
    if let Some(effect) = session.rack().machine(0).and_then(|m| m.effects().effect(0)) {
        for info in effect.params().table() {
            if let Some(value) = effect.params().get(info.id) {
                println!("    {:<12} {}", info.name, info.format(value));
            }
        }
    }
    for event in session.drain_events() {
        println!("  event: {:?}", event);
    }

    library.delete()?;
    Ok(())
}
