/// True if `names` is strictly ascending, i.e. sorted with no duplicates.
pub fn is_strictly_sorted<S: AsRef<str>>(names: &[S]) -> bool {
    names.windows(2).all(|w| w[0].as_ref() < w[1].as_ref())
}

/// First adjacent duplicate in a sorted table, if any.
pub fn find_duplicate<S: AsRef<str>>(names: &[S]) -> Option<&str> {
    names.windows(2)
        .find(|w| w[0].as_ref() == w[1].as_ref())
        .map(|w| w[0].as_ref())
}

pub fn binary_search_str<S: AsRef<str>>(names: &[S], key: &str) -> Option<usize> {
    names.binary_search_by(|probe| probe.as_ref().cmp(key)).ok()
}
