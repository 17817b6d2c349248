use std::fmt;

use crate::error::RenderError;
use crate::value::Value;

/// Trusted HTML. Values wrapped as markup are inserted by raw (`!"…"`)
/// interpolations without escaping; anything else is rejected there.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Markup(String);

impl Markup {
    /// Marks `html` as trusted.
    pub fn new(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts the HTML of a markup value, failing for any other value.
pub(crate) fn unwrap(value: &Value) -> Result<&str, RenderError> {
    match value {
        Value::Markup(markup) => Ok(markup.as_str()),
        other => Err(RenderError::NotMarkup(other.type_name().to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn unwrap_accepts_markup_only() {
        let markup = Value::Markup(Markup::new("<b>x</b>"));
        assert_eq!(unwrap(&markup), Ok("<b>x</b>"));

        assert_eq!(
            unwrap(&Value::from("<b>x</b>")),
            Err(RenderError::NotMarkup("string".to_owned()))
        );
    }
}
