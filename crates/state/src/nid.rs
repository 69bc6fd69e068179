// SPDX-License-Identifier: Apache-2.0

//! Node id naming and range-string compression.
//!
//! The site power agent addresses nodes by bare integers ("nids") in a
//! comma/dash range syntax without brackets, e.g. `2,5-9,12`. The workload
//! manager names the same nodes `nid` + zero-padded numeric, width 5.

/// Extracts the numeric nid from a node name such as `nid00012`.
///
/// Returns `None` when the name does not carry the `nid` prefix followed by
/// a decimal numeral.
pub fn nid_from_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("nid")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Leading zeros are padding, not octal.
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        return Some(0);
    }
    trimmed.parse().ok()
}

/// Formats a nid as its canonical node name (`nid` + width-5 zero pad).
pub fn name_from_nid(nid: u32) -> String {
    format!("nid{nid:05}")
}

/// Compresses a set of nids into the power agent's range syntax,
/// e.g. `[2, 3, 4, 7, 8]` becomes `"2-4,7-8"`. Input order and duplicates
/// are irrelevant; the output is sorted and bracket-free.
pub fn compress_nids(nids: &[u32]) -> String {
    let mut sorted: Vec<u32> = nids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut run: Option<(u32, u32)> = None;
    for &nid in &sorted {
        match run {
            Some((start, end)) if nid == end + 1 => run = Some((start, nid)),
            Some((start, end)) => {
                push_run(&mut out, start, end);
                run = Some((nid, nid));
            }
            None => run = Some((nid, nid)),
        }
    }
    if let Some((start, end)) = run {
        push_run(&mut out, start, end);
    }
    out
}

/// Parses the power agent's range syntax back into a sorted nid list, e.g.
/// `"2,5-9,12"`. Returns `None` on malformed input or an inverted range.
pub fn parse_nids(range: &str) -> Option<Vec<u32>> {
    let mut nids = Vec::new();
    for part in range.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.parse().ok()?;
                let end: u32 = end.parse().ok()?;
                if start > end {
                    return None;
                }
                nids.extend(start..=end);
            }
            None => nids.push(part.parse().ok()?),
        }
    }
    nids.sort_unstable();
    nids.dedup();
    Some(nids)
}

fn push_run(out: &mut String, start: u32, end: u32) {
    use std::fmt::Write;
    if !out.is_empty() {
        out.push(',');
    }
    if start == end {
        let _ = write!(out, "{start}");
    } else {
        let _ = write!(out, "{start}-{end}");
    }
}
