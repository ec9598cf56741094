//! Text to bytes conversion used before hashing cell code.
//!
//! Cell identities registered with the kernel were computed over a
//! UTF-8 layout that works on UTF-16 code units and only knows the
//! one, two and three byte forms. Characters outside the Basic
//! Multilingual Plane are therefore emitted as two three-byte sequences
//! (one per surrogate), the way CESU-8 does, rather than as a single
//! four-byte UTF-8 sequence. Changing this would change every identity
//! derived from such text, so it is kept as is.
//!
//! CRLF line endings are folded to LF first.

/// Encode `text` into the byte layout that identities are hashed over.
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut units = text.encode_utf16().peekable();

    while let Some(unit) = units.next() {
        // CRLF -> LF
        if unit == u16::from(b'\r') && units.peek() == Some(&u16::from(b'\n')) {
            continue;
        }
        push_unit(&mut out, unit);
    }

    out
}

fn push_unit(out: &mut Vec<u8>, unit: u16) {
    match unit {
        0x0000..=0x007F => out.push(unit as u8),
        0x0080..=0x07FF => {
            out.push(0xC0 | (unit >> 6) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
        _ => {
            out.push(0xE0 | (unit >> 12) as u8);
            out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passthrough() {
        assert_eq!(encode_text("print(1)"), b"print(1)".to_vec());
        assert!(encode_text("").is_empty());
    }

    #[test]
    fn bmp_matches_utf8() {
        for s in ["é", "ß", "€", "日本語", "añb€c"] {
            assert_eq!(encode_text(s), s.as_bytes().to_vec(), "{}", s);
        }
    }

    #[test]
    fn astral_chars_use_surrogate_triples() {
        // U+1F600 = D83D DE00
        assert_eq!(
            encode_text("😀"),
            vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]
        );
        assert_ne!(encode_text("😀"), "😀".as_bytes().to_vec());
    }

    #[test]
    fn crlf_folds_to_lf() {
        assert_eq!(encode_text("a\r\nb\r\n"), b"a\nb\n".to_vec());
    }

    #[test]
    fn lone_cr_is_kept() {
        assert_eq!(encode_text("a\rb"), b"a\rb".to_vec());
        assert_eq!(encode_text("a\r\r\nb"), b"a\r\nb".to_vec());
    }
}
