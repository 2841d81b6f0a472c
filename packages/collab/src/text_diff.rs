//! # Text Diff
//!
//! Single-splice diff between two versions of a leaf's text, biased towards
//! the caret so that ambiguous edits (typing a repeated character, deleting
//! one of a run) land where the user actually is.
//!
//! All indices are `char` indices. [`TextDiff::to_units`] converts to the
//! UTF-16 units the shared document counts in.

/// One contiguous replacement turning `a` into `b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDiff {
    pub index: usize,
    pub delete_count: usize,
    pub insert: String,
}

impl TextDiff {
    pub fn is_noop(&self) -> bool {
        self.delete_count == 0 && self.insert.is_empty()
    }

    /// Applies the diff to `a`.
    pub fn apply(&self, a: &str) -> String {
        let start = char_to_byte(a, self.index);
        let end = char_to_byte(a, self.index + self.delete_count);
        let mut out = String::with_capacity(a.len() + self.insert.len());
        out.push_str(&a[..start]);
        out.push_str(&self.insert);
        out.push_str(&a[end..]);
        out
    }

    /// (unit index, unit delete count) of this diff against `a`.
    pub fn to_units(&self, a: &str) -> (u32, u32) {
        let start = char_to_unit(a, self.index);
        let end = char_to_unit(a, self.index + self.delete_count);
        (start, end - start)
    }
}

/// Diffs `a` against `b`, preferring an edit at `cursor` when several single
/// splices would do.
pub fn diff_with_cursor(a: &str, b: &str, cursor: usize) -> TextDiff {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (a_len, b_len) = (a.len(), b.len());

    let mut left = 0;
    while left < a_len && left < b_len && left < cursor && a[left] == b[left] {
        left += 1;
    }

    let mut right = 0;
    while right + left < a_len
        && right + left < b_len
        && a[a_len - right - 1] == b[b_len - right - 1]
    {
        right += 1;
    }

    // Past the caret the left match may still grow.
    while right + left < a_len && right + left < b_len && a[left] == b[left] {
        left += 1;
    }

    TextDiff {
        index: left,
        delete_count: a_len - left - right,
        insert: b[left..b_len - right].iter().collect(),
    }
}

/// Byte offset of the `index`th char, clamped to the end of `s`.
pub(crate) fn char_to_byte(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map_or(s.len(), |(byte, _)| byte)
}

/// Length of `s` in UTF-16 units.
pub(crate) fn unit_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// UTF-16 offset of the `index`th char, clamped to the end of `s`.
pub(crate) fn char_to_unit(s: &str, index: usize) -> u32 {
    s.chars().take(index).map(|c| c.len_utf16() as u32).sum()
}

/// Number of chars that end at or before unit `offset`.
pub(crate) fn unit_to_char(s: &str, offset: u32) -> usize {
    let mut units = 0;
    s.chars()
        .take_while(|c| {
            units += c.len_utf16() as u32;
            units <= offset
        })
        .count()
}

/// Byte offset of unit `offset`, rounded down to a char boundary.
pub(crate) fn unit_to_byte(s: &str, offset: u32) -> usize {
    char_to_byte(s, unit_to_char(s, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_at_cursor() {
        let diff = diff_with_cursor("hello", "hello world", 5);
        assert_eq!(
            diff,
            TextDiff {
                index: 5,
                delete_count: 0,
                insert: " world".into()
            }
        );
    }

    #[test]
    fn test_repeated_char_lands_on_cursor() {
        // Typing "a" at position 1 of "aa" is ambiguous without a cursor.
        let diff = diff_with_cursor("aa", "aaa", 1);
        assert_eq!(diff.index, 1);
        assert_eq!(diff.insert, "a");

        let diff = diff_with_cursor("aa", "aaa", 0);
        assert_eq!(diff.index, 0);
    }

    #[test]
    fn test_replacement_in_middle() {
        let diff = diff_with_cursor("the cat sat", "the dog sat", 7);
        assert_eq!(diff.index, 4);
        assert_eq!(diff.delete_count, 3);
        assert_eq!(diff.insert, "dog");
    }

    #[test]
    fn test_applying_diff_yields_target() {
        let cases = [
            ("", "abc", 0),
            ("abc", "", 0),
            ("abcdef", "abXdef", 3),
            ("aaaa", "aa", 1),
            ("héllo wörld", "héllo, wörld!", 6),
            ("日本語", "日本の語", 2),
            ("same", "same", 2),
        ];
        for (a, b, cursor) in cases {
            let diff = diff_with_cursor(a, b, cursor);
            assert_eq!(diff.apply(a), b, "{:?} -> {:?} @ {}", a, b, cursor);
        }
    }

    #[test]
    fn test_units_are_utf16() {
        let diff = diff_with_cursor("h😀llo", "h😀llo!", 5);
        assert_eq!(diff.index, 5);
        assert_eq!(diff.to_units("h😀llo"), (6, 0));

        let diff = diff_with_cursor("a😀b", "ab", 2);
        assert_eq!(diff.to_units("a😀b"), (1, 2));
    }

    #[test]
    fn test_unit_helpers() {
        let s = "aé😀日";
        assert_eq!(unit_len(s), 5);
        assert_eq!(char_to_byte(s, 2), 3);
        assert_eq!(char_to_byte(s, 10), s.len());
        assert_eq!(char_to_unit(s, 3), 4);
        assert_eq!(unit_to_char(s, 4), 3);
        // Inside the surrogate pair rounds down.
        assert_eq!(unit_to_char(s, 3), 2);
        assert_eq!(unit_to_byte(s, 3), 3);
        assert_eq!(unit_to_byte(s, 5), s.len());
    }
}
