use crate::params::ResolvedParams;

/// Whether a transition between two parameter bags needs a new fetch.
///
/// Only refetch keys count; display-only settings never invalidate.
pub fn is_stale<S: AsRef<str>>(
    prev: Option<&ResolvedParams>,
    next: &ResolvedParams,
    refetch_keys: &[S],
) -> bool {
    if !next.ready {
        return false;
    }
    match prev {
        Some(prev) if prev.ready => !changed_keys(prev, next, refetch_keys).is_empty(),
        _ => true,
    }
}

pub fn changed_keys<'a, S: AsRef<str>>(
    prev: &ResolvedParams,
    next: &ResolvedParams,
    refetch_keys: &'a [S],
) -> Vec<&'a str> {
    refetch_keys
        .iter()
        .map(|key| key.as_ref())
        .filter(|key| prev.get(key) != next.get(key))
        .collect()
}
