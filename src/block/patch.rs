use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

const BEGIN_PATCH: &str = "*** Begin Patch";
const END_PATCH: &str = "*** End Patch";

/// Find a patch embedded in a function call's `command` argument.
///
/// The first match wins, in this order:
/// 1. the explicit two-element form `["apply_patch", "<patch>"]`
///    (the second element is taken verbatim);
/// 2. a `*** Begin Patch` ... `*** End Patch` envelope inside any string
///    element of the array (or inside a plain string command).
pub fn extract(command: &Value) -> Option<String> {
    match command {
        Value::Array(items) => {
            if let [Value::String(head), Value::String(body)] = items.as_slice() {
                if head == "apply_patch" {
                    return Some(body.clone());
                }
            }
            items.iter().filter_map(Value::as_str).find_map(envelope)
        }
        Value::String(s) => envelope(s),
        _ => None,
    }
}

/// The `*** Begin Patch` ... `*** End Patch` span of `text`, markers included.
fn envelope(text: &str) -> Option<String> {
    let start = text.find(BEGIN_PATCH)?;
    let end = text[start..].find(END_PATCH)? + start + END_PATCH.len();
    Some(text[start..end].to_string())
}

/// Encode patch text so it can sit inside a markup attribute.
pub fn encode(patch: &str) -> String {
    STANDARD.encode(patch.as_bytes())
}

/// Reverse of [`encode`]. `None` if the payload is not valid base64 of UTF-8.
pub fn decode(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(bytes).ok()
}
