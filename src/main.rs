use anyhow::{Context, Result};
use clap::Parser;
use exembellish::{
    cli::Cli, disasm, dump::DebugDump, options::AgentOptions, transformer::Embellisher,
};
use std::fs;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let options = AgentOptions::parse(args.options.as_deref());
    tracing::debug!("agent options: {}", options);

    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let mut engine = Embellisher::new(options).with_codec(args.format.codec());
    if args.wants_dump() {
        let dump = match &args.dump_dir {
            Some(dir) => DebugDump::new(dir),
            None => DebugDump::in_home().context("no home directory to dump units into")?,
        };
        engine = engine.with_dump(dump);
    }

    // Without --name the unit is loaded under its own name
    let unit_name = match &args.name {
        Some(name) => name.clone(),
        None => {
            engine
                .codec()
                .decode(&bytes)
                .with_context(|| format!("failed to decode {}", args.input.display()))?
                .name
        }
    };

    let outcome = engine
        .transform_with_report(&unit_name, &bytes)
        .with_context(|| format!("failed to instrument {}", unit_name))?;

    match &outcome.report {
        Some(report) => println!("{}: {}", unit_name, report),
        None => println!("{}: not instrumented (filtered or reserved)", unit_name),
    }

    if args.listing {
        let unit = engine
            .codec()
            .decode(&outcome.bytes)
            .context("failed to decode instrumented unit")?;
        print!("{}", disasm::disassemble(&unit));
    }

    if let Some(path) = &args.output {
        fs::write(path, &outcome.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::debug!("wrote {} bytes to {}", outcome.bytes.len(), path.display());
    }

    Ok(())
}
