//! Core of the SwiftBug bug reporter: page capture, the content bridge,
//! report storage and session restoration, behind a browser-agnostic
//! [`Backend`] seam.

pub mod backend;
pub mod bridge;
pub mod channel;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod formatter;
pub mod handler;
pub mod interceptor;
pub mod restore;
pub mod script;
pub mod store;

pub use backend::Backend;
pub use bridge::{Bridge, BridgeLimits, NoiseFilter, PageContext};
pub use channel::{EventSender, page_channel};
pub use collector::DataCollector;
pub use error::CoreError;
pub use executor::CommandExecutor;
pub use fetch::{FetchError, HttpFetcher, ReportFetcher};
pub use handler::MessageHandler;
pub use restore::{RestoreOptions, RestoreReport, Restorer};
pub use script::PageScript;
pub use store::{FilePersistence, MemoryPersistence, Persistence, ReportStore, StoreError};

pub use swiftbug_common::protocol;
pub use swiftbug_common::{BackendError, Settings, SettingsPatch};
