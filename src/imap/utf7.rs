//! Modified UTF-7 (RFC 3501 §5.1.3) for IMAP mailbox names: UTF-16BE inside a
//! modified Base64 alphabet (`+` escapes, `,` replaces `/`, no padding).

const BASE64_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+,";

fn base64_value(byte: u8) -> Option<u8> {
    BASE64_ALPHABET.iter().position(|&c| c == byte).map(|p| p as u8)
}

/// Encodes a UTF-8 mailbox name into modified UTF-7. Printable ASCII (0x20-0x7e
/// excluding `&`) passes through; everything else is UTF-16BE base64-escaped
/// between `&` and `-`.
pub fn encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending: Vec<u16> = Vec::new();

    let flush = |pending: &mut Vec<u16>, out: &mut String| {
        if pending.is_empty() {
            return;
        }
        out.push('&');
        let bytes: Vec<u8> = pending.iter().flat_map(|u| u.to_be_bytes()).collect();
        let mut bits = 0u32;
        let mut bit_count = 0u32;
        for byte in bytes {
            bits = (bits << 8) | byte as u32;
            bit_count += 8;
            while bit_count >= 6 {
                bit_count -= 6;
                let index = ((bits >> bit_count) & 0x3f) as usize;
                out.push(BASE64_ALPHABET[index] as char);
            }
        }
        if bit_count > 0 {
            let index = ((bits << (6 - bit_count)) & 0x3f) as usize;
            out.push(BASE64_ALPHABET[index] as char);
        }
        out.push('-');
        pending.clear();
    };

    for ch in name.chars() {
        let is_plain = matches!(ch, '\x20'..='\x7e') && ch != '&';
        if is_plain {
            flush(&mut pending, &mut out);
            out.push(ch);
        } else if ch == '&' {
            flush(&mut pending, &mut out);
            out.push_str("&-");
        } else {
            let mut buf = [0u16; 2];
            for u in ch.encode_utf16(&mut buf) {
                pending.push(*u);
            }
        }
    }
    flush(&mut pending, &mut out);
    out
}

/// Decodes a modified UTF-7 mailbox name back to UTF-8. Malformed escapes are
/// passed through verbatim rather than rejected, matching how lenient servers
/// emit folder names.
pub fn decode(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = String::with_capacity(encoded.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'&' {
            out.push(bytes[i] as char);
            i += 1;
            continue;
        }
        if i + 1 < bytes.len() && bytes[i + 1] == b'-' {
            out.push('&');
            i += 2;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end] != b'-' {
            end += 1;
        }
        let mut bits = 0u32;
        let mut bit_count = 0u32;
        let mut units: Vec<u16> = Vec::new();
        for &b in &bytes[start..end] {
            let Some(value) = base64_value(b) else {
                units.clear();
                break;
            };
            bits = (bits << 6) | value as u32;
            bit_count += 6;
            if bit_count >= 16 {
                bit_count -= 16;
                units.push(((bits >> bit_count) & 0xffff) as u16);
            }
        }
        match String::from_utf16(&units) {
            Ok(decoded) => out.push_str(&decoded),
            Err(_) => out.push_str(&encoded[i..(end + 1).min(bytes.len())]),
        }
        i = if end < bytes.len() { end + 1 } else { end };
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_ascii_names() {
        let name = "Inbox.Sent Items";
        assert_eq!(decode(&encode(name)), name);
    }

    #[test]
    fn round_trips_non_ascii_names() {
        let name = "Entwürfe";
        let encoded = encode(name);
        assert_ne!(encoded, name);
        assert_eq!(decode(&encoded), name);
    }

    #[test]
    fn ampersand_escapes_to_and_dash() {
        assert_eq!(encode("Q&A"), "Q&-A");
        assert_eq!(decode("Q&-A"), "Q&A");
    }

    #[test]
    fn decodes_known_server_example() {
        assert_eq!(decode("&Jjo-"), "\u{263a}");
    }
}
