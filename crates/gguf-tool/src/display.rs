//! Human-readable rendering of metadata values and sizes.

use gguf_format::{GGUFValueType, Value, ValueArray};

/// Key whose integer value names the dominant quantization of a model.
pub const KEY_FILE_TYPE: &str = "general.file_type";

/// Render a value for the text report.
///
/// Strings print verbatim, scalars via `Display`, arrays as `[a, b, ...]`
/// truncated after `preview` elements. A `u8` array holding printable UTF-8
/// is shown as a byte-string literal.
pub fn render_value(value: &Value, preview: usize) -> String {
    match value {
        Value::Uint8(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Uint16(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::Uint32(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Uint64(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float32(v) => v.to_string(),
        Value::Float64(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(arr) => render_array(arr, preview),
    }
}

fn render_array(arr: &ValueArray, preview: usize) -> String {
    if let Some(text) = printable_bytes(arr) {
        return format!("b{text:?}");
    }
    let mut parts: Vec<String> = arr
        .iter()
        .take(preview)
        .map(|v| match v {
            Value::String(s) => format!("{s:?}"),
            other => render_value(other, preview),
        })
        .collect();
    if arr.len() > preview {
        parts.push("...".into());
    }
    format!("[{}]", parts.join(", "))
}

fn printable_bytes(arr: &ValueArray) -> Option<String> {
    if arr.element_type() != GGUFValueType::Uint8 || arr.is_empty() {
        return None;
    }
    let bytes: Vec<u8> = arr
        .iter()
        .map(|v| match v {
            Value::Uint8(b) => Some(*b),
            _ => None,
        })
        .collect::<Option<_>>()?;
    let text = String::from_utf8(bytes).ok()?;
    text.chars()
        .all(|c| !c.is_control() || c == '\n' || c == '\t')
        .then_some(text)
}

/// Render a metadata entry, naming `general.file_type` codes.
pub fn render_entry(key: &str, value: &Value, preview: usize) -> String {
    let rendered = render_value(value, preview);
    match (key, value.as_u32()) {
        (KEY_FILE_TYPE, Some(code)) => format!("{rendered} ({})", file_type_name(code)),
        _ => rendered,
    }
}

/// Map `general.file_type` integer to a human-readable quantization name.
pub fn file_type_name(ft: u32) -> &'static str {
    match ft {
        0 => "F32",
        1 => "F16",
        2 => "Q4_0",
        3 => "Q4_1",
        7 => "Q8_0",
        8 => "Q5_0",
        9 => "Q5_1",
        10 => "Q2_K",
        11 => "Q3_K_S",
        12 => "Q3_K_M",
        13 => "Q3_K_L",
        14 => "Q4_K_S",
        15 => "Q4_K_M",
        16 => "Q5_K_S",
        17 => "Q5_K_M",
        18 => "Q6_K",
        19 => "IQ2_XXS",
        20 => "IQ2_XS",
        21 => "Q2_K_S",
        22 => "IQ3_XS",
        23 => "IQ3_XXS",
        24 => "IQ1_S",
        25 => "IQ4_NL",
        26 => "IQ3_S",
        27 => "IQ3_M",
        28 => "IQ2_S",
        29 => "IQ2_M",
        30 => "IQ4_XS",
        31 => "IQ1_M",
        32 => "BF16",
        _ => "Unknown",
    }
}

/// Shape as `AxBxC`, innermost dimension first.
pub fn shape_string(shape: &[u64]) -> String {
    shape
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("x")
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    for &unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PiB")
}
