//! HTML escaping for the two places user data can land: element content and
//! double-quoted attribute values.

use std::borrow::Cow;

fn replace_each<'a>(value: &'a str, special: impl Fn(char) -> Option<&'static str>) -> Cow<'a, str> {
    let Some(first) = value.find(|c| special(c).is_some()) else {
        return Cow::Borrowed(value);
    };

    let mut escaped = String::with_capacity(value.len() + 8);
    escaped.push_str(&value[..first]);
    for c in value[first..].chars() {
        match special(c) {
            Some(replacement) => escaped.push_str(replacement),
            None => escaped.push(c),
        }
    }

    Cow::Owned(escaped)
}

/// Escapes text for use as element content. Only `&` and `<` can change the
/// meaning of content, so only those are replaced.
pub fn escape_content(value: &str) -> Cow<'_, str> {
    replace_each(value, |c| match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        _ => None,
    })
}

/// Escapes text for use inside a double-quoted attribute value.
pub fn escape_attribute_value(value: &str) -> Cow<'_, str> {
    replace_each(value, |c| match c {
        '&' => Some("&amp;"),
        '"' => Some("&#34;"),
        _ => None,
    })
}

/// Whether the `&` at the start of `rest` could be read as a character
/// reference by an HTML parser.
fn is_ambiguous_ampersand(rest: &str) -> bool {
    let after = &rest[1..];
    let name_len = after
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '#')
        .unwrap_or(after.len());

    name_len > 0
}

/// The shortest `=value` suffix representing `value` as an attribute value,
/// including the `=`. An empty value needs no suffix at all.
pub(crate) fn shortest_attribute_representation(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let needs_quotes = value
        .chars()
        .any(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0C' | '"' | '\'' | '=' | '<' | '>' | '`'));

    let escape_ampersands = |quote: Option<char>| {
        let mut out = String::with_capacity(value.len());
        for (i, c) in value.char_indices() {
            match c {
                '&' if is_ambiguous_ampersand(&value[i..]) => out.push_str("&amp;"),
                c if Some(c) == quote => out.push_str(if c == '"' { "&#34;" } else { "&#39;" }),
                c => out.push(c),
            }
        }
        out
    };

    if !needs_quotes {
        return format!("={}", escape_ampersands(None));
    }

    let doubles = value.matches('"').count();
    let singles = value.matches('\'').count();
    let quote = if singles < doubles { '\'' } else { '"' };

    format!("={quote}{}{quote}", escape_ampersands(Some(quote)))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn content_escapes_only_ampersand_and_less_than() {
        assert_eq!(escape_content("a < b & \"c\" > 'd'"), "a &lt; b &amp; \"c\" > 'd'");
    }

    #[test]
    #[ntest::timeout(100)]
    fn attribute_escapes_only_ampersand_and_double_quote() {
        assert_eq!(
            escape_attribute_value("a < b & \"c\" > 'd'"),
            "a < b &amp; &#34;c&#34; > 'd'"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn unchanged_text_is_borrowed() {
        assert!(matches!(escape_content("plain"), Cow::Borrowed("plain")));
        assert!(matches!(escape_attribute_value("plain"), Cow::Borrowed("plain")));
    }

    #[rstest]
    #[case("", "")]
    #[case("text", "=text")]
    #[case("a b", "=\"a b\"")]
    #[case("say \"hi\"", "='say \"hi\"'")]
    #[case("it's", "=\"it's\"")]
    #[case("a&b", "=a&amp;b")]
    #[case("a & b", "=\"a & b\"")]
    #[case("x=1", "=\"x=1\"")]
    fn shortest_representation(#[case] value: &str, #[case] expected: &str) {
        assert_eq!(shortest_attribute_representation(value), expected);
    }

    #[test]
    #[ntest::timeout(100)]
    fn quotes_escape_the_chosen_quote_character() {
        assert_eq!(
            shortest_attribute_representation("\"a\" 'b'"),
            "=\"&#34;a&#34; 'b'\""
        );
    }

    proptest::proptest! {
        #[test]
        fn escaped_content_unescapes_to_the_input(value in "\\PC*") {
            let escaped = escape_content(&value);
            proptest::prop_assert!(!escaped.contains('<'));
            proptest::prop_assert_eq!(escaped.replace("&lt;", "<").replace("&amp;", "&"), value);
        }

        #[test]
        fn escaped_attributes_never_close_their_quotes(value in "\\PC*") {
            let escaped = escape_attribute_value(&value);
            proptest::prop_assert!(!escaped.contains('"'));
            proptest::prop_assert_eq!(escaped.replace("&#34;", "\"").replace("&amp;", "&"), value);
        }
    }
}
