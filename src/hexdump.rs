//! Hex dump formatting.

use std::fmt::Write;

/// Bytes shown per line.
const BYTES_PER_LINE: usize = 16;

/// Formats `data` as a classic hex dump, one line per 16 bytes.
///
/// Every line starts with the address of its first byte, counted from `base`, followed by the
/// bytes in hex and their printable ASCII rendering. Lines are separated by `\n`, with no
/// trailing newline.
pub fn hex_dump(base: u32, data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() / BYTES_PER_LINE + 1) * 78);
    for (i, line) in data.chunks(BYTES_PER_LINE).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let address = base.wrapping_add((i * BYTES_PER_LINE) as u32);
        let _ = write!(out, "{:08x}: ", address);
        for j in 0..BYTES_PER_LINE {
            match line.get(j) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        for j in 0..BYTES_PER_LINE {
            out.push(match line.get(j) {
                Some(&byte) if byte >= 0x20 && byte <= 0x7e => byte as char,
                Some(_) => '.',
                None => ' ',
            });
        }
    }
    out
}
