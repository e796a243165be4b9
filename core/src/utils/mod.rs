pub mod static_catalog;

use std::path::PathBuf;

use which::which;

/// Resolves the full path to a tool binary.
/// Search order: ./tools/{name} → ./{name} → System PATH
pub fn get_binary_path(tool_name: &str) -> Option<String> {
    let binary_name = if cfg!(target_os = "windows") {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    };

    let tools_path = PathBuf::from("./tools").join(&binary_name);
    if tools_path.exists() {
        return Some(tools_path.to_string_lossy().to_string());
    }

    let local_path = PathBuf::from("./").join(&binary_name);
    if local_path.exists() {
        return Some(local_path.to_string_lossy().to_string());
    }

    which(&binary_name)
        .ok()
        .map(|path| path.to_string_lossy().to_string())
}

/// Name of the machine running the fuzzer, recorded on every finding.
pub fn runner_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Splits `Name: value; Other: value` into header pairs.
pub fn parse_custom_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|h| {
            let mut parts = h.splitn(2, ':');
            let key = parts.next()?.trim().to_string();
            let val = parts.next().unwrap_or("").trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some((key, val))
        })
        .collect()
}
