mod fixtures;

use fixtures::{compile_error_with, get_engine, loader};
use razorleaf::{FnLoader, Options, RazorleafError, SemanticErrorKind, compile};
use serde_json::json;

const LAYOUT: &str = "\
doctype
html
\thead
\t\tblock head
\t\t\ttitle \"Site\"
\tbody
\t\tblock content
\t\t\tp \"Nothing here\"
\t\tblock footer
";

#[test]
#[ntest::timeout(100)]
fn test_extends_replaces_and_appends_blocks() {
    let options = Options::new().loader(loader(&[("layout", LAYOUT)]));
    let source = "\
extends layout
append head
\tmeta charset: \"utf-8\"
replace content
\th1 \"#{data.heading}\"
";

    let template = compile(source, &options).unwrap();
    assert_eq!(
        template.render(&json!({"heading": "Hello"})).unwrap(),
        "<!DOCTYPE html><html><head><title>Site</title><meta charset=utf-8></head>\
         <body><h1>Hello</h1></body></html>"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_top_level_blocks_in_extending_templates_replace() {
    let options = Options::new().loader(loader(&[("layout", LAYOUT)]));
    let template = compile("extends layout\nblock footer\n\tfooter \"(c)\"\n", &options).unwrap();

    assert_eq!(
        template.render(&json!(null)).unwrap(),
        "<!DOCTYPE html><html><head><title>Site</title></head>\
         <body><p>Nothing here</p><footer>(c)</footer></body></html>"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_extension_chains() {
    let engine = get_engine(&[
        ("base", "main\n\tblock body\n"),
        ("article", "extends base\nreplace body\n\tarticle\n\t\tblock text\n"),
        ("post", "extends article\nreplace text\n\tp \"post\"\n"),
    ]);

    let template = engine.compile("post").unwrap();
    assert_eq!(
        template.render(&json!(null)).unwrap(),
        "<main><article><p>post</p></article></main>"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_includes_share_macros() {
    let engine = get_engine(&[
        ("helpers", "macro badge(text)\n\tspan.badge \"#{text}\"\n"),
        ("page", "include helpers\np\n\tbadge(\"new\")\n"),
    ]);

    let template = engine.compile("page").unwrap();
    assert_eq!(
        template.render(&json!(null)).unwrap(),
        "<p><span class=badge>new</span></p>"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_included_templates_see_the_same_data() {
    let options = Options::new().loader(FnLoader(|name: &str| {
        (name == "greeting").then(|| "p \"Hi #{data.name}\"\n".to_owned())
    }));
    let template = compile("div\n\tinclude greeting\n", &options).unwrap();

    assert_eq!(
        template.render(&json!({"name": "Ann"})).unwrap(),
        "<div><p>Hi Ann</p></div>"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_missing_block_is_a_semantic_error() {
    let options = Options::new().loader(loader(&[("layout", LAYOUT)]));

    match compile_error_with("extends layout\nreplace sidebar\n", &options) {
        RazorleafError::Semantic(error) => {
            assert_eq!(error.kind, SemanticErrorKind::MissingBlock("sidebar".to_owned()));
            let location = error.location.expect("error has a location");
            assert_eq!(location.template, razorleaf::DEFAULT_TEMPLATE_NAME);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
#[ntest::timeout(100)]
fn test_unknown_templates_fail_to_load() {
    let options = Options::new().loader(loader(&[]));

    assert_eq!(
        compile_error_with("include nowhere\n", &options),
        RazorleafError::Load {
            template_name: "nowhere".to_owned(),
            reason: "no template with this name exists".to_owned(),
        }
    );
}

#[test]
#[ntest::timeout(100)]
fn test_loading_requires_a_loader() {
    assert_eq!(
        compile_error_with("extends layout\n", &Options::default()),
        RazorleafError::MissingLoader {
            template_name: "layout".to_owned(),
        }
    );
}

#[test]
#[ntest::timeout(100)]
fn test_templates_including_themselves() {
    let engine = get_engine(&[("self", "p\ninclude self\n")]);

    match engine.compile("self") {
        Err(RazorleafError::Semantic(error)) => {
            assert_eq!(
                error.kind,
                SemanticErrorKind::CircularInclusion(vec!["self".to_owned()])
            );
        }
        other => panic!("unexpected result {other:?}"),
    }
}
