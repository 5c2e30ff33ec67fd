use rand::Rng;
use std::path::Path;

/// Length of the `0XXXXX_` collision prefix.
pub const PREFIX_LEN: usize = 7;

/// Picks a name in `dir` that does not exist yet.
///
/// Returns `name` itself when it is free. Otherwise a random `0XXXXX_` prefix
/// (five upper-case letters) is prepended until the result is free, and the
/// second value is `true`.
#[must_use]
pub fn available_name(dir: &Path, name: &str) -> (String, bool) {
    let bare = name.trim_end_matches('/');
    if !exists(&dir.join(bare)) {
        return (name.to_string(), false);
    }

    let mut rng = rand::rng();
    loop {
        let letters: String = (0..PREFIX_LEN - 2)
            .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
            .collect();
        let candidate = format!("0{letters}_{name}");
        if !exists(&dir.join(candidate.trim_end_matches('/'))) {
            return (candidate, true);
        }
    }
}

/// Whether anything (including a dangling symlink) sits at `path`.
fn exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Whether `name` carries a collision prefix.
#[must_use]
pub fn has_collision_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > PREFIX_LEN
        && bytes[0] == b'0'
        && bytes[1..PREFIX_LEN - 1].iter().all(u8::is_ascii_uppercase)
        && bytes[PREFIX_LEN - 1] == b'_'
}

/// `name` without its collision prefix.
#[must_use]
pub fn original_name(name: &str) -> &str {
    if has_collision_prefix(name) {
        &name[PREFIX_LEN..]
    } else {
        name
    }
}
