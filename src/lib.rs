#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Interaction core of a virtual-reality visualization tool for 3D
//! scientific data.
//!
//! Tracked tools become [`locator::Locator`]s through the
//! [`dispatch::ToolDispatcher`]: cutting planes, point evaluators, or
//! extractors that run an [`algorithm::Algorithm`] seeded at the tool.
//! Finished results land in an [`element::ElementStore`] that the
//! [`cluster::ClusterReplicator`] keeps identical on every process of a
//! rendering cluster. [`session::Session`] wires it all together.

pub mod algorithm;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod element;
pub mod extraction;
pub mod geom;
pub mod locator;
pub mod module;
pub mod pool;
pub mod session;
pub mod startup;

pub use session::Session;
pub use startup::{StartupArgs, StartupError};

/// Extra tracing on stdout, compiled in with the `debug_logs` feature.
#[macro_export]
macro_rules! debug_log {
    ($($t:tt)*) => {{
        #[cfg(feature = "debug_logs")]
        {
            println!("{}", format!($($t)*));
        }
    }};
}
