// Template Module
// Ordinal placeholder substitution used to build every modem command and request body

use thiserror::Error;

/// Reasons a template cannot be filled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unbalanced placeholder delimiter at byte {0}")]
    Unbalanced(usize),
    #[error("malformed placeholder at byte {0}")]
    Malformed(usize),
    #[error("placeholder <{index}> has no argument ({available} supplied)")]
    IndexOutOfRange { index: usize, available: usize },
}

// One parsed piece of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Argument(usize), // zero-based
}

/// Replace `<1>`..`<99>` in `template` with the matching entry of `args`.
///
/// The output length is computed before anything is written, so the result
/// is allocated exactly once. Unbalanced `<`/`>`, a non-numeric placeholder
/// or an index with no argument fails the whole fill; nothing is truncated.
pub fn fill(template: &str, args: &[&str]) -> Result<String, TemplateError> {
    let segments = parse(template, args.len())?;

    let length: usize = segments
        .iter()
        .map(|segment| match segment {
            Segment::Literal(text) => text.len(),
            Segment::Argument(index) => args[*index].len(),
        })
        .sum();

    let mut output = String::with_capacity(length);
    for segment in &segments {
        match segment {
            Segment::Literal(text) => output.push_str(text),
            Segment::Argument(index) => output.push_str(args[*index]),
        }
    }

    debug_assert_eq!(output.len(), length);
    Ok(output)
}

/// Canonical decimal digits of `value`, "0" for zero
pub fn format_decimal(value: u32) -> String {
    value.to_string()
}

fn parse(template: &str, available: usize) -> Result<Vec<Segment<'_>>, TemplateError> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut position = 0;

    while position < bytes.len() {
        match bytes[position] {
            b'<' => {
                if literal_start < position {
                    segments.push(Segment::Literal(&template[literal_start..position]));
                }

                let close = find_close(bytes, position)?;
                let index = parse_index(&bytes[position + 1..close], position)?;
                if index == 0 || index > available {
                    return Err(TemplateError::IndexOutOfRange { index, available });
                }

                segments.push(Segment::Argument(index - 1));
                position = close + 1;
                literal_start = position;
            }
            b'>' => return Err(TemplateError::Unbalanced(position)),
            _ => position += 1,
        }
    }

    if literal_start < bytes.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }

    Ok(segments)
}

// Position of the '>' closing the placeholder opened at `open`
fn find_close(bytes: &[u8], open: usize) -> Result<usize, TemplateError> {
    for (offset, byte) in bytes[open + 1..].iter().enumerate() {
        match byte {
            b'>' => return Ok(open + 1 + offset),
            b'<' => return Err(TemplateError::Unbalanced(open + 1 + offset)),
            _ => {}
        }
    }
    Err(TemplateError::Unbalanced(open))
}

fn parse_index(digits: &[u8], open: usize) -> Result<usize, TemplateError> {
    if digits.is_empty() || digits.len() > 2 || !digits.iter().all(u8::is_ascii_digit) {
        return Err(TemplateError::Malformed(open));
    }
    Ok(digits
        .iter()
        .fold(0usize, |acc, digit| acc * 10 + usize::from(digit - b'0')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_placeholders_in_order() {
        let command = fill("AT+CIPSTART=\"TCP\",\"<1>\",<2>\r\n", &["10.0.0.5", "8080"]).unwrap();
        assert_eq!(command, "AT+CIPSTART=\"TCP\",\"10.0.0.5\",8080\r\n");
    }

    #[test]
    fn test_fill_length_is_literals_plus_arguments() {
        let template = "{\"gain\":\"<1>\",\"debugInfoIncluded\":<2>,\"timeStamp\":\"<3>\"}";
        let args = [" -63", "false", "-1"];
        let literal_len = template.len() - 3 * "<n>".len();

        let output = fill(template, &args).unwrap();
        let expected = literal_len + args.iter().map(|a| a.len()).sum::<usize>();
        assert_eq!(output.len(), expected);
    }

    #[test]
    fn test_fill_supports_repeated_and_reordered_placeholders() {
        assert_eq!(fill("<2>-<1>-<2>", &["a", "bc"]).unwrap(), "bc-a-bc");
    }

    #[test]
    fn test_fill_two_digit_index() {
        let args = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "ten"];
        assert_eq!(fill("<10>|<1>", &args).unwrap(), "ten|1");
    }

    #[test]
    fn test_fill_without_placeholders_copies_template() {
        assert_eq!(fill("ATE0\r\n", &[]).unwrap(), "ATE0\r\n");
        assert_eq!(fill("", &[]).unwrap(), "");
    }

    #[test]
    fn test_fill_rejects_unbalanced_delimiters() {
        assert_eq!(fill("AT<1", &["x"]), Err(TemplateError::Unbalanced(2)));
        assert_eq!(fill("AT1>", &["x"]), Err(TemplateError::Unbalanced(3)));
        assert_eq!(fill("<<1>>", &["x"]), Err(TemplateError::Unbalanced(1)));
    }

    #[test]
    fn test_fill_rejects_out_of_range_index() {
        assert_eq!(
            fill("<3>", &["a", "b"]),
            Err(TemplateError::IndexOutOfRange { index: 3, available: 2 })
        );
        assert_eq!(
            fill("<0>", &["a"]),
            Err(TemplateError::IndexOutOfRange { index: 0, available: 1 })
        );
    }

    #[test]
    fn test_fill_rejects_malformed_placeholder() {
        assert_eq!(fill("<x>", &["a"]), Err(TemplateError::Malformed(0)));
        assert_eq!(fill("ab<>", &["a"]), Err(TemplateError::Malformed(2)));
        assert_eq!(fill("<123>", &["a"]), Err(TemplateError::Malformed(0)));
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(0), "0");
        assert_eq!(format_decimal(7), "7");
        assert_eq!(format_decimal(10), "10");
        assert_eq!(format_decimal(305), "305");
        assert_eq!(format_decimal(u32::MAX), "4294967295");
    }
}
