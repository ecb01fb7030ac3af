//! Reply delivery helpers.

/// Maximum number of characters Telegram accepts in one text message.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Split `text` into consecutive chunks of at most `limit` characters.
///
/// Characters are Unicode scalar values, so a chunk never splits one in
/// half. Empty text yields no chunks.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", TELEGRAM_MESSAGE_LIMIT), vec!["hello"]);
    }

    #[test]
    fn exact_limit_is_one_chunk() {
        let text = "a".repeat(TELEGRAM_MESSAGE_LIMIT);
        assert_eq!(split_message(&text, TELEGRAM_MESSAGE_LIMIT).len(), 1);
    }

    #[test]
    fn long_text_is_chunked_in_order() {
        let text: String = (0..9000).map(|i| if i < 4096 { 'a' } else if i < 8192 { 'b' } else { 'c' }).collect();
        let chunks = split_message(&text, TELEGRAM_MESSAGE_LIMIT);
        let lengths: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lengths, vec![4096, 4096, 808]);
        assert!(chunks[0].chars().all(|c| c == 'a'));
        assert!(chunks[1].chars().all(|c| c == 'b'));
        assert!(chunks[2].chars().all(|c| c == 'c'));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn multibyte_characters_are_not_split() {
        let text = "é".repeat(5);
        assert_eq!(split_message(&text, 2), vec!["éé", "éé", "é"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(split_message("", TELEGRAM_MESSAGE_LIMIT).is_empty());
    }
}
