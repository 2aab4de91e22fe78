use std::io;

pub fn parse_hex_array<const N: usize>(hex_str: &str) -> io::Result<[u8; N]> {
    let mut out = [0u8; N];
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid hex: {e}")))?;
    if bytes.len() != N {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("expected {N} bytes ({} hex chars), got {}", N * 2, bytes.len()),
        ));
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_length_only() {
        assert_eq!(parse_hex_array::<2>(" 0aff\n").unwrap(), [0x0a, 0xff]);
        assert!(parse_hex_array::<2>("0a").is_err());
        assert!(parse_hex_array::<2>("zzzz").is_err());
    }
}
