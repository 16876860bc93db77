//! Python-style source text for constant values, shared by both backends so the
//! same constant prints the same way whichever backend decoded it.

pub(crate) fn string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub(crate) fn bytes(data: &[u8]) -> String {
    let mut out = String::from("b'");
    for &byte in data {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push('\'');
    out
}

pub(crate) fn float(value: f64) -> String {
    if value.is_nan() {
        "nan".into()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "inf" } else { "-inf" };
        text.into()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

pub(crate) fn complex(re: f64, im: f64) -> String {
    format!("({}+{}j)", float(re), float(im))
}

pub(crate) fn boolean(value: bool) -> String {
    let text = if value { "True" } else { "False" };
    text.into()
}

pub(crate) fn code(name: &str) -> String {
    format!("<code object {name}>")
}

pub(crate) fn tuple(items: impl IntoIterator<Item = String>) -> String {
    let items = items.into_iter().collect::<Vec<_>>();
    match items.as_slice() {
        [single] => format!("({single},)"),
        _ => format!("({})", items.join(", ")),
    }
}

pub(crate) fn list(items: impl IntoIterator<Item = String>) -> String {
    format!("[{}]", join(items))
}

pub(crate) fn set(items: impl IntoIterator<Item = String>) -> String {
    let items = items.into_iter().collect::<Vec<_>>();
    if items.is_empty() {
        "set()".into()
    } else {
        format!("{{{}}}", items.join(", "))
    }
}

pub(crate) fn frozenset(items: impl IntoIterator<Item = String>) -> String {
    let items = items.into_iter().collect::<Vec<_>>();
    if items.is_empty() {
        "frozenset()".into()
    } else {
        format!("frozenset({{{}}})", items.join(", "))
    }
}

pub(crate) fn dict(entries: impl IntoIterator<Item = (String, String)>) -> String {
    format!(
        "{{{}}}",
        join(entries.into_iter().map(|(key, value)| format!("{key}: {value}")))
    )
}

fn join(items: impl IntoIterator<Item = String>) -> String {
    items.into_iter().collect::<Vec<_>>().join(", ")
}
