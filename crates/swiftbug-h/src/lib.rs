//! Headless Chromium backend: the extension's privileged side, driven over
//! the DevTools protocol.

pub mod backend;
pub mod cdp;
pub mod inject;
pub mod tab;

pub use backend::HeadlessBackend;
