//! Byte dump for diagnosing corrupt script payloads.
//!
//! ```text
//! Byte Array Length: 20
//! 00000000 | 00 01 02 03  04 05 06 07  08 09 0a 0b  0c 0d 0e 0f
//! -------- | --------------------------------------------------
//! 00000000 | 1b 4c 75 61  53 00 19 93  0d 0a 1a 0a  04 08 04 08 | .LuaS...........
//! 00000010 | 78 56 00 00                                         | xV..
//! ```

/// Bytes rendered before the dump is cut short.
pub const MAX_DUMP_BYTES: usize = 0xE020;

const ROW: usize = 16;
// Hex text width of a full row: 16 * "xx " plus one gap after columns 3, 7, 11.
const HEX_WIDTH: usize = ROW * 3 + 3;

pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Byte Array Length: {}\n", bytes.len()));
    out.push_str("00000000 | 00 01 02 03  04 05 06 07  08 09 0a 0b  0c 0d 0e 0f\n");
    out.push_str("-------- | --------------------------------------------------\n");

    let shown = &bytes[..bytes.len().min(MAX_DUMP_BYTES)];
    for (row, chunk) in shown.chunks(ROW).enumerate() {
        out.push_str(&format!("{:08x} | ", row * ROW));
        out.push_str(&format!("{:<HEX_WIDTH$}| ", hex_row(chunk)));
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }

    if bytes.len() > shown.len() {
        out.push_str(&format!(
            "{:08x} bytes data left...\n",
            bytes.len() - shown.len()
        ));
    }
    out
}

fn hex_row(chunk: &[u8]) -> String {
    let encoded = hex::encode(chunk);
    let mut row = String::with_capacity(HEX_WIDTH);
    for (col, pair) in encoded.as_bytes().chunks(2).enumerate() {
        row.push(pair[0] as char);
        row.push(pair[1] as char);
        row.push(' ');
        if matches!(col, 3 | 7 | 11) {
            row.push(' ');
        }
    }
    row
}
