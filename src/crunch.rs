// This is where the dirty grunt work of turning typed source into the token
// stream happens, and back again for LIST. Quoted text always wins, DATA
// runs verbatim to the next colon, REM swallows the rest of the line, and
// everything else is a longest-prefix scan of the reserved-word table.

use crate::errors::{Error, Result};
use crate::tokens::{Token, KEYWORDS};
use std::convert::TryFrom;

// A tokenized line must still fit the input buffer.
const MAX_CRUNCHED: usize = 255;

fn match_keyword(rest: &[u8]) -> Option<(Token, usize)> {
    let mut best: Option<(Token, usize)> = None;
    for &(word, token) in KEYWORDS {
        let w = word.as_bytes();
        if w.len() <= rest.len()
            && rest[..w.len()].eq_ignore_ascii_case(w)
            && best.map_or(true, |(_, len)| w.len() > len)
        {
            best = Some((token, w.len()));
        }
    }
    best
}

// Crunch one line body (without its line number) into tokens. No terminator
// is appended; the program store owns line framing.
pub fn crunch(line: &str) -> Result<Vec<u8>> {
    let src = line.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    let mut data_mode = false;
    while i < src.len() {
        let c = src[i];
        if c == b'"' {
            out.push(c);
            i += 1;
            while i < src.len() {
                let b = src[i];
                out.push(b);
                i += 1;
                if b == b'"' {
                    break;
                }
            }
            continue;
        }
        if data_mode {
            if c == b':' {
                data_mode = false;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if c == b' ' {
            out.push(c);
            i += 1;
            continue;
        }
        if c == b'?' {
            out.push(Token::Print.into());
            i += 1;
            continue;
        }
        if let Some((token, len)) = match_keyword(&src[i..]) {
            out.push(token.into());
            i += len;
            match token {
                Token::Rem => {
                    out.extend_from_slice(&src[i..]);
                    i = src.len();
                }
                Token::Data => data_mode = true,
                _ => {}
            }
            continue;
        }
        // GO with optional blanks before TO crunches as GOTO; any other GO
        // stays literal.
        if c.eq_ignore_ascii_case(&b'G')
            && i + 1 < src.len()
            && src[i + 1].eq_ignore_ascii_case(&b'O')
        {
            let mut j = i + 2;
            while j < src.len() && src[j] == b' ' {
                j += 1;
            }
            if j + 1 < src.len()
                && src[j].eq_ignore_ascii_case(&b'T')
                && src[j + 1].eq_ignore_ascii_case(&b'O')
            {
                out.push(Token::Goto.into());
                i = j + 2;
                continue;
            }
            out.push(b'G');
            out.push(b'O');
            i += 2;
            continue;
        }
        out.push(c.to_ascii_uppercase());
        i += 1;
    }
    if out.len() > MAX_CRUNCHED {
        return Err(Error::StringTooLong);
    }
    Ok(out)
}

// Expand a token stream back to text. Literal bytes pass through; reserved
// words print their canonical spelling with no added whitespace.
pub fn detokenize(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        if b == 0 {
            break;
        }
        if b >= 0x80 {
            match Token::try_from(b) {
                Ok(token) => out.push_str(token.spelling()),
                Err(_) => out.push('?'),
            }
        } else {
            out.push(b as char);
        }
    }
    out
}

// Split a leading line number off an edit-mode line. Returns the number and
// the body, with a single separating blank consumed.
pub fn split_line_number(line: &str) -> Option<(u32, &str)> {
    let trimmed = line.trim_start();
    let digits = trimmed.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let number: u32 = trimmed[..digits].parse().ok()?;
    let mut body = &trimmed[digits..];
    if body.starts_with(' ') {
        body = &body[1..];
    }
    Some((number, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_crunch_without_word_boundaries() {
        let tokens = crunch("fori=1to10").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::For.into(),
                b'I',
                Token::Equal.into(),
                b'1',
                Token::To.into(),
                b'1',
                b'0'
            ]
        );
    }

    #[test]
    fn question_mark_is_print() {
        assert_eq!(crunch("?A").unwrap(), vec![Token::Print.into(), b'A']);
    }

    #[test]
    fn go_space_to_is_goto() {
        assert_eq!(
            crunch("GO  TO 50").unwrap(),
            vec![Token::Goto.into(), b' ', b'5', b'0']
        );
        // GO followed by anything else stays literal.
        assert_eq!(crunch("GOX").unwrap(), vec![b'G', b'O', b'X']);
    }

    #[test]
    fn quotes_preserve_case_and_keywords() {
        let tokens = crunch("PRINT \"for you\"").unwrap();
        let mut expected = vec![Token::Print.into(), b' '];
        expected.extend_from_slice(b"\"for you\"");
        assert_eq!(tokens, expected);
    }

    #[test]
    fn rem_swallows_the_rest() {
        let tokens = crunch("REM print this").unwrap();
        let mut expected: Vec<u8> = vec![Token::Rem.into()];
        expected.extend_from_slice(b" print this");
        assert_eq!(tokens, expected);
    }

    #[test]
    fn data_is_verbatim_until_colon() {
        let tokens = crunch("DATA one,Two:PRINT").unwrap();
        let mut expected: Vec<u8> = vec![Token::Data.into()];
        expected.extend_from_slice(b" one,Two:");
        expected.push(Token::Print.into());
        assert_eq!(tokens, expected);
    }

    #[test]
    fn detokenize_round_trips() {
        for line in &["FOR I=1 TO 3:PRINT I;:NEXT", "IF A<>2 THEN 100", "A$=LEFT$(B$,2)"] {
            let tokens = crunch(line).unwrap();
            let listed = detokenize(&tokens);
            assert_eq!(crunch(&listed).unwrap(), tokens);
        }
    }

    #[test]
    fn line_numbers_split() {
        assert_eq!(split_line_number("10 PRINT"), Some((10, "PRINT")));
        assert_eq!(split_line_number("10"), Some((10, "")));
        assert_eq!(split_line_number("PRINT"), None);
    }

    #[test]
    fn oversized_lines_fail() {
        let long = "A".repeat(300);
        assert!(matches!(crunch(&long), Err(Error::StringTooLong)));
    }
}
