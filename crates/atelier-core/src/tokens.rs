/// Rough model-context size of `text`: one token per four characters, rounded down.
///
/// Heuristic gate for prompt budgeting only; it never errors and `estimate("") == 0`.
pub fn estimate(text: &str) -> usize {
    text.chars().count() / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_down() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("abc"), 0);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcdefghi"), 2);
        // counts characters, not bytes
        assert_eq!(estimate("日本語です"), 1);
    }
}
