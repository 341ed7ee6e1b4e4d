//! Turns the engine's interleaved marker/record stream into posts tagged with
//! their site and a ranked per-site encounter table.
//!
//! Every presentation (text output, the web client) goes through
//! [`aggregate`]; nothing else groups or counts results.

use crate::model::{AggregatedResultSet, BoardRef, Media, PostRecord, SiteCount};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One entry of the engine payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEntry {
    /// Switches the current site for the records that follow.
    Marker(String),
    /// Candidate post; may turn out to be invalid and get skipped.
    Record(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultPayload {
    pub entries: Vec<RawEntry>,
}

impl RawResultPayload {
    /// Flatten a decoded JSON payload into entries, preserving emission order.
    ///
    /// Bare strings are markers. Objects with a `num` are records; a `source`
    /// string on such an object acts as a marker placed just before it.
    /// Objects without `num` are walked key by key: a `source` string is a
    /// marker, every other value is a candidate record.
    pub fn from_value(value: Value) -> Self {
        let mut entries = Vec::new();
        match value {
            Value::Array(items) => {
                for item in items {
                    push_entry(&mut entries, item);
                }
            }
            Value::Null => {}
            other => push_entry(&mut entries, other),
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<RawEntry> for RawResultPayload {
    fn from_iter<I: IntoIterator<Item = RawEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn push_entry(entries: &mut Vec<RawEntry>, item: Value) {
    match item {
        Value::String(site) => entries.push(RawEntry::Marker(site)),
        Value::Object(map) if post_num(&map).is_some() => {
            if let Some(Value::String(site)) = map.get("source") {
                entries.push(RawEntry::Marker(site.clone()));
            }
            entries.push(RawEntry::Record(Value::Object(map)));
        }
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::String(site) if key == "source" => {
                        entries.push(RawEntry::Marker(site))
                    }
                    other => entries.push(RawEntry::Record(other)),
                }
            }
        }
        other => entries.push(RawEntry::Record(other)),
    }
}

/// Positive integer, or a string holding one. Archives report `num` both ways.
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn post_num(map: &Map<String, Value>) -> Option<u64> {
    map.get("num").and_then(lenient_u64).filter(|n| *n > 0)
}

fn parse_post(value: &Value, source: &str) -> Option<PostRecord> {
    let map = value.as_object()?;
    let num = post_num(map)?;
    Some(PostRecord {
        num,
        board: map
            .get("board")
            .and_then(|b| serde_json::from_value::<BoardRef>(b.clone()).ok()),
        thread_num: map.get("thread_num").and_then(lenient_u64),
        timestamp: map.get("timestamp").and_then(|t| match t {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }),
        comment: map
            .get("comment")
            .and_then(Value::as_str)
            .map(str::to_string),
        media: map
            .get("media")
            .filter(|m| m.is_object())
            .and_then(|m| serde_json::from_value::<Media>(m.clone()).ok()),
        source: source.to_string(),
    })
}

/// Aggregate a payload. Always completes; malformed entries are dropped.
pub fn aggregate(payload: &RawResultPayload) -> AggregatedResultSet {
    let mut current = String::new();
    let mut posts = Vec::new();
    let mut counts: Vec<SiteCount> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in &payload.entries {
        match entry {
            RawEntry::Marker(site) => {
                if *site == current {
                    continue;
                }
                current.clone_from(site);
                match index.get(site) {
                    Some(&i) => counts[i].count += 1,
                    None => {
                        index.insert(site.clone(), counts.len());
                        counts.push(SiteCount {
                            site: site.clone(),
                            count: 1,
                        });
                    }
                }
            }
            RawEntry::Record(value) => {
                if let Some(post) = parse_post(value, &current) {
                    posts.push(post);
                }
            }
        }
    }

    // Stable: equal counts keep first-encounter order.
    counts.sort_by(|a, b| b.count.cmp(&a.count));

    AggregatedResultSet {
        posts,
        site_counts: counts,
    }
}
