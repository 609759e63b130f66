use std::collections::HashMap;

use super::Uid;

/// Parse a `list_uids` reply.
/// Format: one sensor per line, each containing `uid: <number>`
pub fn parse_uid_list(text: &str) -> Result<Vec<Uid>, String> {
    text.lines()
        .filter_map(|line| line.split_once("uid:").map(|(_, rest)| rest))
        .map(|rest| {
            let token = rest
                .split(|c: char| c.is_whitespace() || c == ',')
                .find(|t| !t.is_empty())
                .unwrap_or("");
            token
                .parse::<Uid>()
                .map_err(|_| format!("invalid uid '{}'", rest.trim()))
        })
        .collect()
}

/// Parse a `get_status` reply.
/// The first line is a header; every later `key: value` line becomes an entry.
pub fn parse_status(text: &str) -> HashMap<String, String> {
    let mut status = HashMap::new();
    for line in text.lines().skip(1) {
        if let Some((key, value)) = line.split_once(':') {
            status.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    status
}

/// Parse a `get_raw` reply: comma separated integers on one line.
pub fn parse_raw_samples(text: &str) -> Result<Vec<i64>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|value| {
            let value = value.trim();
            value
                .parse::<i64>()
                .map_err(|_| format!("invalid raw sample '{}'", value))
        })
        .collect()
}
