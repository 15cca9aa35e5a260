// Hex dump rendering for raw bytes (similar to hexdump -C)

/// Create a hex dump of bytes, 16 per line with an ASCII column
pub fn hexdump(data: &[u8]) -> String {
    let mut output = String::new();

    for (i, chunk) in data.chunks(16).enumerate() {
        output.push_str(&format!("{:08x}  ", i * 16));

        for (j, byte) in chunk.iter().enumerate() {
            if j == 8 {
                output.push(' ');
            }
            output.push_str(&format!("{:02x} ", byte));
        }

        // Padding for incomplete lines
        for j in chunk.len()..16 {
            if j == 8 {
                output.push(' ');
            }
            output.push_str("   ");
        }

        output.push_str(" |");
        for byte in chunk {
            if (0x20..=0x7e).contains(byte) {
                output.push(*byte as char);
            } else {
                output.push('.');
            }
        }
        output.push_str("|\n");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump() {
        let data: Vec<u8> = (0u8..16).chain([0x41, 0x42, 0x43]).collect();
        let dump = hexdump(&data);
        assert!(dump.contains("00 01 02 03"));
        assert!(dump.contains("41 42 43"));
        assert!(dump.contains("|ABC|"));
        assert_eq!(dump.lines().count(), 2);
    }

    #[test]
    fn test_empty() {
        assert!(hexdump(&[]).is_empty());
    }
}
