use cardflow_golden::EventDigest;
use serde::Serialize;
use serde_json::json;

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    let rendered = serde_json::to_string_pretty(&err).unwrap_or_else(|_| message.to_string());
    eprintln!("{rendered}");
    std::process::exit(1);
}

/// Pretty-print `value` to stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => exit_error(&format!("failed to render output: {e}"), None),
    }
}

/// Compact one-line-per-event rendering for `--debug` output on stderr.
pub fn print_trail(label: &str, events: &[EventDigest]) {
    eprintln!("--- last {} events of {label} ---", events.len());
    for event in events {
        let line = serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"));
        eprintln!("{line}");
    }
}
