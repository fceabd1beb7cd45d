use serde_json::Value;
use swiftbug_common::protocol::{LogLevel, Response, Snapshot};

/// Human-readable rendering of a successful handler response.
pub fn format_response(action: &str, resp: &Response) -> String {
    if !resp.success {
        return format!(
            "Error: {}",
            resp.error.as_deref().unwrap_or("Unknown error")
        );
    }
    let Some(data) = resp.data.as_ref() else {
        return "OK".to_string();
    };

    match action {
        "collectPageData" | "fetchBugReportFromUrl" => {
            match serde_json::from_value::<Snapshot>(data.clone()) {
                Ok(snapshot) => format_snapshot(&snapshot),
                Err(_) => pretty(data),
            }
        }
        "saveBugReport" | "saveBugSnapshot" => {
            format!("Saved report {}", str_field(data, "id"))
        }
        "getBugReports" => match serde_json::from_value::<Vec<Snapshot>>(data.clone()) {
            Ok(reports) => format_report_list(&reports),
            Err(_) => pretty(data),
        },
        "exportBugReport" => format!("Exported to {}", str_field(data, "path")),
        "exportAllBugReports" => format!(
            "Exported {} reports to {}",
            data.get("reportCount").and_then(Value::as_u64).unwrap_or(0),
            str_field(data, "path")
        ),
        "importBugReport" => format!("Imported report {}", str_field(data, "id")),
        "restoreBugData" | "restoreBugDataToLocal" => {
            let new_tab = data
                .get("openedNewTab")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            format!(
                "Restoring into tab {}{}",
                str_field(data, "tabId"),
                if new_tab { " (new tab)" } else { "" }
            )
        }
        "getSettings" | "updateSettings" => format_object(data),
        "getCacheInfo" => format_cache_info(data),
        _ => pretty(data),
    }
}

pub fn format_snapshot(s: &Snapshot) -> String {
    let mut output = format!(
        "Report {}\nTitle: {}\nURL: {}\nCaptured: {}",
        s.id,
        s.title,
        s.url,
        s.timestamp.to_rfc3339()
    );
    if !s.description.is_empty() {
        output.push_str(&format!("\nDescription: {}", s.description));
    }
    output.push_str(&format!("\nUser agent: {}", s.user_agent));
    if let Some(v) = &s.viewport {
        output.push_str(&format!(
            "\nViewport: {}x{} (scroll {}, {})",
            v.width, v.height, v.scroll_x, v.scroll_y
        ));
    }
    output.push_str(&format!(
        "\nCookies: {}\nlocalStorage: {} keys\nsessionStorage: {} keys",
        s.cookies.len(),
        s.local_storage.len(),
        s.session_storage.len()
    ));

    let counts: Vec<String> = LogLevel::ALL
        .iter()
        .map(|level| {
            let n = s.console_log.iter().filter(|e| e.level == *level).count();
            format!("{} {}", n, level.as_str())
        })
        .collect();
    output.push_str(&format!(
        "\nConsole: {} entries ({})",
        s.console_log.len(),
        counts.join(", ")
    ));

    let failed = s.network_requests.iter().filter(|r| r.is_failure()).count();
    output.push_str(&format!(
        "\nNetwork: {} requests ({} failed)",
        s.network_requests.len(),
        failed
    ));
    for r in s.network_requests.iter().filter(|r| r.is_failure()) {
        output.push_str(&format!(
            "\n- {} {} -> {} {}",
            r.method, r.url, r.status, r.status_text
        ));
    }
    output.push_str(&format!(
        "\nScreenshot: {}",
        if s.screenshot.is_some() { "yes" } else { "no" }
    ));
    output
}

pub fn format_report_list(reports: &[Snapshot]) -> String {
    if reports.is_empty() {
        return "No saved reports.".to_string();
    }
    let mut output = format!("{} reports:", reports.len());
    for r in reports {
        output.push_str(&format!(
            "\n{}  {}  {}\n    {}",
            r.id,
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.title,
            r.url
        ));
    }
    output
}

fn format_cache_info(data: &Value) -> String {
    let size = data.get("size").and_then(Value::as_u64).unwrap_or(0);
    let bytes = data.get("totalSize").and_then(Value::as_u64).unwrap_or(0);
    let mut output = format!("{} cached reports ({} bytes)", size, bytes);
    if let Some(keys) = data.get("keys").and_then(Value::as_array) {
        for key in keys.iter().filter_map(Value::as_str) {
            output.push_str(&format!("\n- {}", key));
        }
    }
    output
}

fn format_object(data: &Value) -> String {
    match data.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n"),
        None => pretty(data),
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("?")
}

fn pretty(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}
