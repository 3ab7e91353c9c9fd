//! Argument parsing helpers shared by the handlers.

use bytes::Bytes;

use cinder_core::object::parse_strict_i64;

/// Decodes a SCAN cursor: base-10 ASCII `u64`, nothing else. Leading
/// whitespace, sign characters, trailing garbage, empty input, and
/// overflow are all rejected.
pub(crate) fn parse_cursor(bytes: &[u8]) -> Result<u64, ()> {
    if bytes.is_empty() {
        return Err(());
    }
    let mut cursor: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return Err(());
        }
        cursor = cursor
            .checked_mul(10)
            .and_then(|c| c.checked_add((b - b'0') as u64))
            .ok_or(())?;
    }
    Ok(cursor)
}

/// Strict integer argument: the canonical decimal rendering of an i64.
pub(crate) fn parse_int(bytes: &[u8]) -> Option<i64> {
    parse_strict_i64(bytes)
}

/// Case-insensitive match of an argument against an option token.
pub(crate) fn arg_eq(arg: &[u8], token: &str) -> bool {
    arg.eq_ignore_ascii_case(token.as_bytes())
}

/// Parsed MATCH/COUNT options of the SCAN family.
pub(crate) struct ScanOptions {
    pub count: u64,
    pub pattern: Option<Bytes>,
}

/// Parses the option tail of SCAN/SSCAN starting at `first_opt`.
pub(crate) fn parse_scan_options(
    argv: &[Bytes],
    first_opt: usize,
) -> Result<ScanOptions, &'static str> {
    let mut opts = ScanOptions {
        count: 10,
        pattern: None,
    };
    let mut i = first_opt;
    while i < argv.len() {
        let remaining = argv.len() - i;
        if arg_eq(&argv[i], "count") && remaining >= 2 {
            let count =
                parse_int(&argv[i + 1]).ok_or("ERR value is not an integer or out of range")?;
            if count < 1 {
                return Err("ERR syntax error");
            }
            opts.count = count as u64;
            i += 2;
        } else if arg_eq(&argv[i], "match") && remaining >= 2 {
            opts.pattern = Some(argv[i + 1].clone());
            i += 2;
        } else {
            return Err("ERR syntax error");
        }
    }
    Ok(opts)
}
