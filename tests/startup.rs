use std::fs;
use std::path::PathBuf;

use vatr_engine::module::ModuleError;
use vatr_engine::{Session, StartupArgs, StartupError};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vatr-startup-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

fn start(args: &[&str]) -> Result<Session, StartupError> {
    let args = StartupArgs::parse(args.iter().map(ToString::to_string))?;
    Session::from_args(&args)
}

#[test]
fn full_startup_replays_element_files() {
    let dir = scratch_dir("full");
    let elements = dir.join("seed.asciielem");
    fs::write(
        &elements,
        "Streamline\nvectorVariable Swirl\nseedPoint 0.5 0 0\nstepSize 0.01\nmaxNumSteps 50\n\
         Volume Renderer\n",
    )
    .expect("write elements");
    let config = dir.join("options.json");
    fs::write(&config, r#"{ "cutting_plane_capacity": 2, "save_ascii": false }"#).expect("write config");

    let session = start(&[
        "-class",
        "AnalyticField",
        "8",
        ";",
        "-config",
        config.to_str().expect("utf-8"),
        "-palette",
        dir.join("missing.pal").to_str().expect("utf-8"),
        "-load",
        elements.to_str().expect("utf-8"),
        "-load",
        dir.join("missing.binelem").to_str().expect("utf-8"),
    ])
    .expect("session");

    assert_eq!(session.cutting_planes().capacity(), 2);
    assert!(!session.options().save_ascii);
    assert_eq!(session.elements().names(), ["Streamline"]);
    let summary = session.summary();
    assert_eq!(summary.count, 1);
    assert!(summary.elements[0].primitives > 0);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn meta_file_selects_the_module() {
    let dir = scratch_dir("meta");
    let meta = dir.join("field.meta");
    fs::write(&meta, "AnalyticField \"4\" 3.0\n").expect("write meta");

    let session = start(&[meta.to_str().expect("utf-8")]).expect("session");
    assert_eq!(session.module().class_name(), "AnalyticField");
    assert_eq!(session.data_set().grid().dims(), [4, 4, 4]);
    assert_eq!(session.data_set().world_bounds().max.x, 3.0);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn fatal_startup_conditions() {
    match start(&[]) {
        Err(StartupError::MissingClass) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("started without a module"),
    }
    match start(&["-class", "AnalyticField"]) {
        Err(StartupError::MissingArguments { class }) => assert_eq!(class, "AnalyticField"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("started without data set arguments"),
    }
    match start(&["-class", "AnalyticFeild", "4"]) {
        Err(StartupError::Module(ModuleError::UnknownClass { suggestion, .. })) => {
            assert_eq!(suggestion.as_deref(), Some("AnalyticField"));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("started an unknown module"),
    }
    match start(&["-class", "SimpleMCNP", "/nonexistent/tally.txt"]) {
        Err(StartupError::Module(ModuleError::Open { .. })) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("loaded a missing file"),
    }
    match start(&["-class", "AnalyticField", "4", ";", "-config", "/nonexistent/options.json"]) {
        Err(StartupError::Config(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("ignored a missing configuration"),
    }
}
