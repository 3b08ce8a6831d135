//! Row extract policies for line-oriented (CSV) data.
//!
//! Data is trimmed to a byte budget on whole-line boundaries. Tail extracts
//! keep the header line so the result still parses.

use tarn_core::Strategy;

/// Bytes to sample from the start of an object to recover its header line.
pub const HEADER_SAMPLE_BYTES: u64 = 8192;

/// The first line including its newline, or all of `data` when it has none.
pub fn first_line(data: &[u8]) -> &[u8] {
    match data.iter().position(|&b| b == b'\n') {
        Some(i) => &data[..=i],
        None => data,
    }
}

/// The longest prefix of `data` within `limit` bytes that ends on a line
/// boundary.
pub fn head_lines(data: &[u8], limit: u64) -> &[u8] {
    if data.len() as u64 <= limit {
        return data;
    }
    let window = &data[..limit as usize];
    match window.iter().rposition(|&b| b == b'\n') {
        Some(i) => &window[..=i],
        None => &[],
    }
}

/// `header` followed by the complete lines of `window`, which is a suffix
/// of the data that may start mid-line.
pub fn tail_lines(header: &[u8], window: &[u8]) -> Vec<u8> {
    let body = match window.iter().position(|&b| b == b'\n') {
        Some(i) => &window[i + 1..],
        None => &[],
    };
    let mut out = Vec::with_capacity(header.len() + body.len() + 1);
    out.extend_from_slice(header);
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(body);
    out
}

/// Apply a rows policy to fully loaded data.
pub fn apply_rows_policy(data: &[u8], strategy: Strategy, limit: u64) -> Vec<u8> {
    if data.len() as u64 <= limit {
        return data.to_vec();
    }
    match strategy {
        Strategy::Head => head_lines(data, limit).to_vec(),
        Strategy::Tail => {
            let start = data.len() - limit as usize;
            tail_lines(first_line(data), &data[start..])
        }
        Strategy::Unspecified => data.to_vec(),
    }
}
