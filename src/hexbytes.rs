use crate::error::Error;

/// Decodes replacement bytecode given as hex. ASCII whitespace between digits is
/// ignored, so `"97 00 64 00"` and `"97006400"` are the same bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, Error> {
    let digits = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();

    Ok(hex::decode(digits)?)
}
