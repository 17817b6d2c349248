#[cfg(feature = "serde")]
mod serde_tests {
    use razorleaf::{Markup, Options, RazorleafError, Value, compile};
    use serde_json::json;

    #[test]
    fn test_value_serialization() {
        let value = Value::Object(
            [
                ("name".to_owned(), Value::from("Ann")),
                ("bio".to_owned(), Value::Markup(Markup::new("<b>hi</b>"))),
                ("missing".to_owned(), Value::Undefined),
                ("tags".to_owned(), Value::from(vec!["a", "b"])),
            ]
            .into_iter()
            .collect(),
        );

        let serialized = serde_json::to_string(&value).unwrap();
        assert_eq!(
            serialized,
            r#"{"name":"Ann","bio":"<b>hi</b>","missing":null,"tags":["a","b"]}"#
        );
    }

    #[test]
    fn test_value_deserialization() {
        let value: Value = serde_json::from_str(r#"{"n": 2, "list": [true, null]}"#).unwrap();
        assert_eq!(value, Value::from(json!({"n": 2, "list": [true, null]})));
    }

    #[test]
    fn test_error_serialization() {
        let error = compile("block a\nblock a\n", &Options::default()).unwrap_err();

        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: RazorleafError = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, error);
        assert_eq!(deserialized.to_string(), error.to_string());
    }

    #[test]
    fn test_deserialized_data_renders() {
        let template = compile("p \"#{data.greeting}\"\n", &Options::default()).unwrap();
        let data: Value = serde_json::from_str(r#"{"greeting": "hello"}"#).unwrap();

        assert_eq!(template.render_value(data).unwrap(), "<p>hello</p>");
    }
}
