//! Command-line and meta-file parsing.
//!
//! ```text
//! vatr [-class <Module> <arg>... ;] [<metafile>] [-palette <file>]
//!      [-load <file>]... [-config <file.json>] [-summary]
//!      [-master <addr> <slaves> | -slave <addr>]
//! ```
//!
//! Flags are matched case-insensitively. A meta file holds the module class
//! followed by its load arguments, as whitespace separated or quoted tokens.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::cluster::{PipeError, ReplicationError};
use crate::codec::{CodecError, TokenReader};
use crate::config::ConfigError;
use crate::module::ModuleError;

/// Conditions that end the process.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no data module class name provided")]
    MissingClass,
    #[error("no data set arguments provided for {class}")]
    MissingArguments { class: String },
    #[error("missing value for {flag}")]
    MissingValue { flag: &'static str },
    #[error("invalid value `{value}` for {flag}")]
    InvalidValue { flag: &'static str, value: String },
    #[error("cannot open meta file {path}: {source}")]
    MetaOpen {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed meta file {path}: {source}")]
    MetaFormat { path: String, source: CodecError },
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot join the cluster: {0}")]
    Pipe(#[from] PipeError),
    #[error("cluster startup failed: {0}")]
    Replication(#[from] ReplicationError),
}

/// How this process takes part in a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEndpoint {
    /// Master: accept `slaves` connections on `addr`.
    Listen { addr: String, slaves: usize },
    /// Slave: connect to the master at `addr`.
    Connect { addr: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupArgs {
    pub class_name: Option<String>,
    pub data_set_args: Vec<String>,
    pub palette: Option<PathBuf>,
    pub load: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub summary: bool,
    pub cluster: Option<ClusterEndpoint>,
}

struct Args {
    args: Vec<String>,
    pos: usize,
}

impl Args {
    fn next(&mut self) -> Option<String> {
        let arg = self.args.get(self.pos)?.clone();
        self.pos += 1;
        Some(arg)
    }

    fn value(&mut self, flag: &'static str) -> Result<String, StartupError> {
        self.next().ok_or(StartupError::MissingValue { flag })
    }
}

impl StartupArgs {
    /// Parses arguments without the program name.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, StartupError> {
        let mut args = Args {
            args: args.into_iter().collect(),
            pos: 0,
        };
        let mut parsed = Self::default();

        while let Some(arg) = args.next() {
            if !arg.starts_with('-') {
                let (class, class_args) = read_meta_file(Path::new(&arg))?;
                parsed.set_class(class, class_args);
                continue;
            }
            match arg.to_lowercase().as_str() {
                "-class" => {
                    let class = args.value("-class")?;
                    let mut class_args = Vec::new();
                    while let Some(arg) = args.next() {
                        if arg == ";" {
                            break;
                        }
                        class_args.push(arg);
                    }
                    parsed.set_class(class, class_args);
                }
                "-palette" => parsed.palette = Some(args.value("-palette")?.into()),
                "-load" => parsed.load.push(args.value("-load")?.into()),
                "-config" => parsed.config = Some(args.value("-config")?.into()),
                "-summary" => parsed.summary = true,
                "-master" => {
                    let addr = args.value("-master")?;
                    let count = args.value("-master")?;
                    let slaves = count.parse().map_err(|_| StartupError::InvalidValue {
                        flag: "-master",
                        value: count,
                    })?;
                    parsed.cluster = Some(ClusterEndpoint::Listen { addr, slaves });
                }
                "-slave" => {
                    parsed.cluster = Some(ClusterEndpoint::Connect {
                        addr: args.value("-slave")?,
                    });
                }
                _ => log::warn!("ignoring unknown option {arg}"),
            }
        }
        Ok(parsed)
    }

    fn set_class(&mut self, class: String, args: Vec<String>) {
        if let Some(previous) = &self.class_name {
            log::warn!("data module {class} replaces {previous}");
        }
        self.class_name = Some(class);
        self.data_set_args = args;
    }

    /// Module class and its arguments, both required.
    pub fn module(&self) -> Result<(&str, &[String]), StartupError> {
        let class = self.class_name.as_deref().ok_or(StartupError::MissingClass)?;
        if self.data_set_args.is_empty() {
            return Err(StartupError::MissingArguments {
                class: class.to_string(),
            });
        }
        Ok((class, &self.data_set_args))
    }
}

/// Reads a meta file: the module class, then its load arguments.
pub fn read_meta_file(path: &Path) -> Result<(String, Vec<String>), StartupError> {
    let file = File::open(path).map_err(|source| StartupError::MetaOpen {
        path: path.display().to_string(),
        source,
    })?;
    parse_meta(BufReader::new(file)).map_err(|source| StartupError::MetaFormat {
        path: path.display().to_string(),
        source,
    })?
    .ok_or(StartupError::MissingClass)
}

fn parse_meta(input: impl BufRead) -> Result<Option<(String, Vec<String>)>, CodecError> {
    let mut reader = TokenReader::new(input);
    let Some(class) = reader.read_token()? else {
        return Ok(None);
    };
    let mut args = Vec::new();
    while let Some(token) = reader.read_token()? {
        args.push(token);
    }
    Ok(Some((class, args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<StartupArgs, StartupError> {
        StartupArgs::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn class_arguments_end_at_semicolon() {
        let args = parse(&["-CLASS", "SimpleMCNP", "a.txt", "b", ";", "-load", "x.asciielem", "-Load", "y.binelem"])
            .expect("args");
        assert_eq!(args.module().expect("module").0, "SimpleMCNP");
        assert_eq!(args.data_set_args, ["a.txt", "b"]);
        assert_eq!(args.load, [PathBuf::from("x.asciielem"), PathBuf::from("y.binelem")]);
    }

    #[test]
    fn class_arguments_run_to_the_end_without_semicolon() {
        let args = parse(&["-palette", "p.pal", "-class", "AnalyticField", "8", "-summary"]).expect("args");
        assert_eq!(args.palette, Some(PathBuf::from("p.pal")));
        assert_eq!(args.data_set_args, ["8", "-summary"]);
        assert!(!args.summary);
    }

    #[test]
    fn missing_class_and_arguments_are_fatal() {
        match parse(&["-summary"]).expect("args").module() {
            Err(StartupError::MissingClass) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        match parse(&["-class", "SimpleMCNP", ";"]).expect("args").module() {
            Err(StartupError::MissingArguments { class }) => assert_eq!(class, "SimpleMCNP"),
            other => panic!("unexpected result: {other:?}"),
        }
        match parse(&["-palette"]) {
            Err(StartupError::MissingValue { flag: "-palette" }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn cluster_flags() {
        let args = parse(&["-master", "0.0.0.0:7000", "3"]).expect("args");
        assert_eq!(
            args.cluster,
            Some(ClusterEndpoint::Listen {
                addr: "0.0.0.0:7000".to_string(),
                slaves: 3
            })
        );
        match parse(&["-master", "host:1", "many"]) {
            Err(StartupError::InvalidValue { flag: "-master", .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn meta_tokens_may_be_quoted() {
        let text = "SimpleMCNP \"run 1/tally.txt\"\n  extra\n";
        let (class, args) = parse_meta(text.as_bytes()).expect("meta").expect("class");
        assert_eq!(class, "SimpleMCNP");
        assert_eq!(args, ["run 1/tally.txt", "extra"]);
        assert!(parse_meta("".as_bytes()).expect("meta").is_none());
        assert!(matches!(
            parse_meta("X \"open".as_bytes()),
            Err(CodecError::UnterminatedQuote { .. })
        ));
    }

    #[test]
    fn bare_argument_names_a_meta_file() {
        let path = std::env::temp_dir().join(format!("vatr-meta-{}.txt", std::process::id()));
        std::fs::write(&path, "AnalyticField 4 2.5\n").expect("write");
        let args = parse(&[path.to_str().expect("utf-8 path")]).expect("args");
        std::fs::remove_file(&path).ok();
        assert_eq!(args.module().expect("module"), ("AnalyticField", &["4".to_string(), "2.5".to_string()][..]));
    }
}
