/// Pick one encouragement at random.
#[must_use]
pub fn pick_encouragement(phrases: &[String]) -> Option<&str> {
    if phrases.is_empty() {
        return None;
    }
    Some(phrases[fastrand::usize(..phrases.len())].as_str())
}
