/// aero CLI
/// Inspects the map engine, the scope resolver, and the regexp engine
/// from the command line; also fronts the `conf` subcommands.

use aero::regex::Flags;
use aero::{MapArena, Regex};
use clap::{Parser as ClapParser, Subcommand};
use miette::{IntoDiagnostic, Result};

#[derive(ClapParser)]
#[command(
    name = "aero",
    version = "0.1.0",
    about = "Hidden-class maps, lexical scope resolution, and a backtracking/JIT regexp engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the map engine's transition DAG for a synthetic property sequence
    Map {
        /// Property names to add in order, e.g. `x y z`
        props: Vec<String>,
    },
    /// Compile a pattern and run it against a subject
    Regex {
        pattern: String,
        subject: String,
        /// Search start offset (code-unit index)
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(short = 'i', long)]
        ignore_case: bool,
        #[arg(short = 'm', long)]
        multiline: bool,
    },
    /// Manage the persisted configuration
    Conf {
        #[command(subcommand)]
        cmd: ConfCommands,
    },
}

#[derive(Subcommand)]
enum ConfCommands {
    /// aero conf set property=value
    Set { spec: String },
    /// aero conf get property
    Get { key: String },
    /// aero conf list
    List,
    /// aero conf reset
    Reset,
    /// aero conf describe property
    Describe { key: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Map { props } => {
            let mut arena = MapArena::new();
            let mut id = arena.root();
            println!("root: {} slots", arena.slot_count(id));
            for name in &props {
                let sym = aero::symbol::intern(name);
                let (next, offset) = arena.add_property(id, sym, aero::Attributes::data(true, true, true));
                println!("+ {name:<16} -> slot {offset} (unique: {})", arena.is_unique(next));
                id = next;
            }
            println!("final map has {} slots", arena.slot_count(id));
        }

        Commands::Regex { pattern, subject, start, ignore_case, multiline } => {
            let flags = Flags { ignore_case, multiline, dot_all: false };
            let re = Regex::compile(&pattern, flags)
                .map_err(|e| miette::miette!("{}", e))?;
            println!("jit: {}", re.is_jit_compiled());
            match re.exec(&subject, start) {
                Some(m) => {
                    println!("match: [{}, {})", m.start, m.end);
                    for (i, cap) in m.captures.iter().enumerate() {
                        match cap {
                            Some((s, e)) => println!("  group {}: [{s}, {e})", i + 1),
                            None => println!("  group {}: (none)", i + 1),
                        }
                    }
                }
                None => println!("no match"),
            }
        }

        Commands::Conf { cmd } => match cmd {
            ConfCommands::Set { spec } => aero::conf::cmd_conf_set(&spec).into_diagnostic()?,
            ConfCommands::Get { key } => aero::conf::cmd_conf_get(&key).into_diagnostic()?,
            ConfCommands::List => aero::conf::cmd_conf_list(),
            ConfCommands::Reset => aero::conf::cmd_conf_reset().into_diagnostic()?,
            ConfCommands::Describe { key } => aero::conf::cmd_conf_describe(&key),
        },
    }

    Ok(())
}
