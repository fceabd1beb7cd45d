//! Fixed set of page-context programs the coordinator may run in a tab.
//!
//! Backends that can evaluate source (DevTools) use [`PageScript::source`];
//! backends that can only invoke pre-registered functions (an extension)
//! receive the serialized variant and dispatch on its name.

use serde::{Deserialize, Serialize};
use swiftbug_common::protocol::{ScriptWorld, StorageMap, Viewport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "script", rename_all = "camelCase")]
pub enum PageScript {
    /// `location.href`, including any fragment.
    LocationHref,
    ReadStorage,
    ReadViewport,
    ClearStorage,
    WriteStorage {
        #[serde(rename = "localStorage")]
        local: StorageMap,
        #[serde(rename = "sessionStorage")]
        session: StorageMap,
    },
}

impl PageScript {
    pub fn name(&self) -> &'static str {
        match self {
            PageScript::LocationHref => "location-href",
            PageScript::ReadStorage => "read-storage",
            PageScript::ReadViewport => "read-viewport",
            PageScript::ClearStorage => "clear-storage",
            PageScript::WriteStorage { .. } => "write-storage",
        }
    }

    /// Layout measurements need the page's own world.
    pub fn world(&self) -> ScriptWorld {
        match self {
            PageScript::ReadViewport => ScriptWorld::Main,
            _ => ScriptWorld::Isolated,
        }
    }

    /// Self-contained expression evaluating to a JSON-serializable result.
    pub fn source(&self) -> String {
        let body = match self {
            PageScript::LocationHref => "window.location.href".to_string(),
            PageScript::ReadStorage => READ_STORAGE.to_string(),
            PageScript::ReadViewport => READ_VIEWPORT.to_string(),
            PageScript::ClearStorage => CLEAR_STORAGE.to_string(),
            PageScript::WriteStorage { local, session } => format!(
                "({})({}, {})",
                WRITE_STORAGE,
                serde_json::to_string(local).unwrap_or_else(|_| "{}".to_string()),
                serde_json::to_string(session).unwrap_or_else(|_| "{}".to_string()),
            ),
        };
        format!("{}\n//# sourceURL=swiftbug-{}.js", body, self.name())
    }
}

const READ_STORAGE: &str = r#"(() => {
  const read = (area) => {
    const out = {};
    try {
      for (let i = 0; i < area.length; i++) {
        const key = area.key(i);
        out[key] = area.getItem(key);
      }
    } catch (e) {}
    return out;
  };
  return { localStorage: read(window.localStorage), sessionStorage: read(window.sessionStorage) };
})()"#;

const READ_VIEWPORT: &str = r#"(() => {
  const doc = document.documentElement || {};
  const body = document.body || {};
  return {
    width: window.innerWidth,
    height: window.innerHeight,
    scrollX: window.pageXOffset || doc.scrollLeft || body.scrollLeft || 0,
    scrollY: window.pageYOffset || doc.scrollTop || body.scrollTop || 0
  };
})()"#;

const CLEAR_STORAGE: &str = r#"(() => {
  const failed = [];
  try { window.localStorage.clear(); } catch (e) { failed.push('localStorage'); }
  try { window.sessionStorage.clear(); } catch (e) { failed.push('sessionStorage'); }
  return { failed };
})()"#;

const WRITE_STORAGE: &str = r#"(local, session) => {
  let written = 0;
  const failed = [];
  const write = (area, name, entries) => {
    for (const [key, value] of Object.entries(entries)) {
      try { area.setItem(key, value); written++; } catch (e) { failed.push(name + ':' + key); }
    }
  };
  write(window.localStorage, 'localStorage', local);
  write(window.sessionStorage, 'sessionStorage', session);
  return { written, failed };
}"#;

// ============================================================
// Results
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageContents {
    #[serde(rename = "localStorage")]
    pub local: StorageMap,
    #[serde(rename = "sessionStorage")]
    pub session: StorageMap,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClearOutcome {
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WriteOutcome {
    pub written: usize,
    pub failed: Vec<String>,
}

/// Viewport results arrive as loose numbers; widths may be fractional on
/// zoomed pages.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawViewport {
    width: f64,
    height: f64,
    scroll_x: f64,
    scroll_y: f64,
}

impl From<RawViewport> for Viewport {
    fn from(raw: RawViewport) -> Self {
        Viewport {
            width: raw.width.max(0.0).round() as u32,
            height: raw.height.max(0.0).round() as u32,
            scroll_x: raw.scroll_x,
            scroll_y: raw.scroll_y,
        }
    }
}
