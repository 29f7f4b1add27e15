use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::types::{StatusRecord, StatusState};

/// Hash only outcome fields. Response times and check timestamps change on
/// every sweep but don't represent a change in service status.
#[derive(Serialize, PartialEq, Eq)]
struct HashView<'a> {
    name: &'a str,
    state: StatusState,
    resolved_address: Option<&'a str>,
    via_fallback: bool,
    intermediary: Option<&'a str>,
    error_detail: Option<&'a str>,
}

impl<'a> HashView<'a> {
    fn new(name: &'a str, record: &'a StatusRecord) -> Self {
        HashView {
            name,
            state: record.state,
            resolved_address: record.resolved_address.as_deref(),
            via_fallback: record.via_fallback,
            intermediary: record.intermediary.as_deref(),
            error_detail: record.error_detail.as_deref(),
        }
    }
}

/// Whether replacing `old` with `new` changes the hash.
pub fn outcome_changed(old: &StatusRecord, new: &StatusRecord) -> bool {
    HashView::new("", old) != HashView::new("", new)
}

/// Computes a SHA-256 hash of the status records.
/// Records are sorted by service name for deterministic output.
pub fn compute_hash<'a>(records: impl IntoIterator<Item = (&'a str, &'a StatusRecord)>) -> String {
    let mut views: Vec<HashView<'_>> = records
        .into_iter()
        .map(|(name, record)| HashView::new(name, record))
        .collect();
    views.sort_by(|a, b| a.name.cmp(b.name));

    // Serializing borrowed strings and enums into a Vec cannot fail.
    let json = serde_json::to_vec(&views).unwrap_or_default();

    let hash = Sha256::digest(&json);
    hex::encode(hash)
}
