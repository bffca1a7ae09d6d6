//! Incremental sentence segmentation for streamed model output.
//!
//! The synthesizer receives whole sentences, so deltas are buffered until a
//! sentence boundary shows up. Segmentation is a pure function over an
//! explicit fragment, which lets the caller drop or restart it at any time
//! (e.g. after an interruption).

/// The result of feeding one delta into the segmenter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmented {
    /// Complete sentences, in order, ready to be spoken.
    pub sentences: Vec<String>,
    /// Unterminated text to pass back in as the next `fragment`.
    pub remainder: String,
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | ',' | '?' | '!' | '。' | '，' | '？' | '！')
}

fn is_period(c: char) -> bool {
    c == '.' || c == '。'
}

/// Whether `fragment` ends in a period that a previous call held back because
/// it followed a digit at the end of its delta.
fn ends_with_held_period(fragment: &str) -> bool {
    let mut tail = fragment.chars().rev();
    let (Some(last), Some(before)) = (tail.next(), tail.next()) else {
        return false;
    };
    let inside_markup = fragment.rfind('<') > fragment.rfind('>');
    is_period(last) && before.is_ascii_digit() && !inside_markup
}

/// Moves `buffer` into `sentences` if it holds any alphanumeric character,
/// otherwise drops it.
fn emit(buffer: &mut String, sentences: &mut Vec<String>) {
    if buffer.chars().any(char::is_alphanumeric) {
        sentences.push(std::mem::take(buffer));
    } else {
        buffer.clear();
    }
}

/// Splits `fragment + new_text` into complete sentences and a remainder.
///
/// Punctuation inside `<...>` markup (e.g. SSML tags) never splits, and a
/// period between two digits is treated as a decimal point. Buffers that hold
/// no alphanumeric character are dropped rather than emitted.
pub fn feed(fragment: &str, new_text: &str) -> Segmented {
    let mut sentences = Vec::new();
    let mut buffer = String::from(fragment);
    let mut inside_markup = false;
    let mut chars = new_text.chars().peekable();

    // A held period becomes a boundary unless the new delta continues the number.
    if ends_with_held_period(fragment) && chars.peek().is_some_and(|c| !c.is_ascii_digit()) {
        emit(&mut buffer, &mut sentences);
    }

    while let Some(c) = chars.next() {
        let prev = buffer.chars().last();
        buffer.push(c);

        match c {
            '<' => inside_markup = true,
            '>' => inside_markup = false,
            _ => {}
        }
        if inside_markup || !is_sentence_end(c) {
            continue;
        }

        if is_period(c) && prev.is_some_and(|p| p.is_ascii_digit()) {
            match chars.peek() {
                Some(next) if next.is_ascii_digit() => continue,
                // The number may continue in the next delta.
                None => break,
                Some(_) => {}
            }
        }

        emit(&mut buffer, &mut sentences);
    }

    Segmented {
        sentences,
        remainder: buffer,
    }
}
