use vatr_engine::{Session, StartupArgs};

const USAGE: &str = r#"vatr (vatr-engine)

USAGE:
  vatr -class <Module> <arg>... ; [options]
  vatr <metafile> [options]

OPTIONS:
  -palette <file>          Initial color palette for the current scalar variable
  -load <file>             Replay a .asciielem or .binelem file (repeatable)
  -config <file.json>      Session options
  -summary                 Print the element store as JSON after startup
  -master <addr> <slaves>  Run as cluster master, waiting for <slaves> slaves
  -slave <addr>            Run as cluster slave of the master at <addr>
  -h, --help               Show this help

Log output is controlled with RUST_LOG.
"#;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Caught exception {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        println!("{USAGE}");
        return Ok(());
    }

    let args = StartupArgs::parse(args).map_err(|err| err.to_string())?;
    let session = Session::from_args(&args).map_err(|err| err.to_string())?;
    log::info!(
        "{} ready: {} menu entries, {} elements",
        session.module().class_name(),
        session.partition().len(),
        session.elements().len()
    );

    if args.summary && session.replicator().is_master() {
        let summary = serde_json::to_string_pretty(&session.summary())
            .map_err(|err| format!("cannot encode summary: {err}"))?;
        println!("{summary}");
    }
    Ok(())
}
