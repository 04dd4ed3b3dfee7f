const MAX_LINE_CHARS: usize = 4096;

/// Scrubs one line of remote output before it reaches the terminal.
/// Remote containers can emit ANSI escapes, carriage returns, and bidi
/// control characters that would corrupt the TUI or spoof its content,
/// so everything non-printable is dropped here.
pub fn sanitize_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut chars = input.chars().peekable();
    let mut truncated = false;

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            skip_escape(&mut chars);
            continue;
        }
        if c == '\r' || c == '\n' {
            continue;
        }
        if c == '\t' {
            out.push(' ');
        } else if c.is_control() || is_bidi_control(c) {
            continue;
        } else {
            out.push(c);
        }
        if out.chars().count() >= MAX_LINE_CHARS {
            truncated = true;
            break;
        }
    }

    if truncated {
        out.push_str(" ...[truncated]");
    }
    out
}

/// Consumes the body of an escape sequence whose introducer has already
/// been read. CSI runs to its final byte (0x40..=0x7e), OSC and the other
/// string sequences run to BEL or ESC-backslash, anything else is a single
/// follow-up character.
fn skip_escape(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    match chars.next() {
        Some('[') => {
            for c in chars.by_ref() {
                if ('\u{40}'..='\u{7e}').contains(&c) {
                    break;
                }
            }
        }
        Some(']') | Some('P') | Some('X') | Some('^') | Some('_') => {
            let mut prev_esc = false;
            for c in chars.by_ref() {
                if c == '\x07' {
                    break;
                }
                if prev_esc && c == '\\' {
                    break;
                }
                prev_esc = c == '\x1b';
            }
        }
        _ => {}
    }
}

fn is_bidi_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::sanitize_line;

    #[test]
    fn strips_color_and_title_sequences() {
        let input = "up \u{1b}[32mgreen\u{1b}[0m \u{1b}]0;title\u{7} 2 hours";
        assert_eq!(sanitize_line(input), "up green  2 hours");
    }

    #[test]
    fn strips_string_sequences_with_st_terminator() {
        let input = "a\u{1b}Phidden\u{1b}\\b";
        assert_eq!(sanitize_line(input), "ab");
    }

    #[test]
    fn strips_line_breaks_tabs_and_bidi() {
        let input = "a\tb\r\nc\u{202e}d";
        assert_eq!(sanitize_line(input), "a bcd");
    }

    #[test]
    fn truncates_very_long_lines() {
        let input = "x".repeat(10_000);
        let got = sanitize_line(&input);
        assert!(got.ends_with("...[truncated]"));
        assert!(got.len() < input.len());
    }
}
