//! Relay lists for the tour.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use relaymap_autopilot::Location;
use serde::Deserialize;

/// Used when neither `--relays` nor `--relay` is given.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.snort.social",
    "wss://nostr.wine",
    "wss://relay.primal.net",
];

#[derive(Debug, Deserialize)]
struct RelayFile {
    relays: Vec<Location>,
}

/// Parse a `relays = [...]` document.
pub fn parse(text: &str) -> anyhow::Result<Vec<Location>> {
    let file: RelayFile = toml::from_str(text).context("invalid relay list")?;
    Ok(file.relays)
}

pub fn load(path: &Path) -> anyhow::Result<Vec<Location>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read relay list {}", path.display()))?;
    parse(&text).with_context(|| format!("failed to load relay list {}", path.display()))
}

/// Relays from `file` followed by `extra`, blanks and duplicates removed.
/// Without a file, falls back to [`DEFAULT_RELAYS`] when no relay is left.
pub fn collect(file: Option<&Path>, extra: &[String]) -> anyhow::Result<Vec<Location>> {
    let mut relays = match file {
        Some(path) => load(path)?,
        None => Vec::new(),
    };
    relays.extend(extra.iter().map(|relay| Location::new(relay.as_str())));

    let mut seen = HashSet::new();
    let relays: Vec<Location> = relays
        .into_iter()
        .map(|relay| Location::new(relay.as_str().trim()))
        .filter(|relay| !relay.as_str().is_empty())
        .filter(|relay| seen.insert(relay.clone()))
        .collect();

    if file.is_none() && relays.is_empty() {
        return Ok(DEFAULT_RELAYS.iter().copied().map(Location::from).collect());
    }
    Ok(relays)
}
