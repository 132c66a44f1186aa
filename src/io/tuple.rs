//! `pid*count` posting tuples inside a colon-separated index line.
//!
//! A posting line looks like `12*3:4*1:907*2`. Each PID appears at most once, order is not
//! significant, and a line never starts or ends with `:`.

use std::fmt::Display;

const TUPLE_SEPARATOR: char = ':';
const COUNT_SEPARATOR: char = '*';

/// Set the count stored for `pid` in `line`.
///
/// Any existing tuple for `pid` is removed; when `count > 0` the new tuple is prepended to the
/// remaining content. A count of zero therefore deletes the posting. Other tuples keep their
/// relative order, and a PID that is a prefix of another (`1` vs `12`) never matches it.
#[must_use]
pub fn update_tuple<P: Display + ?Sized>(line: &str, pid: &P, count: u32) -> String {
    let key = pid.to_string();
    let mut out = String::with_capacity(line.len() + key.len() + 8);
    if count > 0 {
        out.push_str(&key);
        out.push(COUNT_SEPARATOR);
        out.push_str(&count.to_string());
    }
    for tuple in line.split(TUPLE_SEPARATOR) {
        if tuple.is_empty() || tuple_key(tuple) == key {
            continue;
        }
        if !out.is_empty() {
            out.push(TUPLE_SEPARATOR);
        }
        out.push_str(tuple);
    }
    out
}

/// Decode every well-formed `pid*count` tuple of a posting line.
///
/// Malformed tuples are skipped rather than failing the whole line.
#[must_use]
pub fn parse_tuples(line: &str) -> Vec<(u64, u32)> {
    line.split(TUPLE_SEPARATOR)
        .filter(|tuple| !tuple.is_empty())
        .filter_map(|tuple| {
            let (pid, count) = tuple.split_once(COUNT_SEPARATOR)?;
            Some((pid.parse().ok()?, count.parse().ok()?))
        })
        .collect()
}

/// Count recorded for `pid`, if the line holds a tuple for it.
#[must_use]
pub fn tuple_count(line: &str, pid: u64) -> Option<u32> {
    parse_tuples(line)
        .into_iter()
        .find_map(|(candidate, count)| (candidate == pid).then_some(count))
}

/// Encode tuples into a posting line, dropping zero counts.
#[must_use]
pub fn encode_tuples<I>(tuples: I) -> String
where
    I: IntoIterator<Item = (u64, u32)>,
{
    tuples
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(pid, count)| format!("{pid}{COUNT_SEPARATOR}{count}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn tuple_key(tuple: &str) -> &str {
    tuple
        .split_once(COUNT_SEPARATOR)
        .map_or(tuple, |(key, _)| key)
}
