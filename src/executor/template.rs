//! Campaign body rendering against the triggering post.
//!
//! Templates see a single `Post` object (`{{Post.Title}}`, `{{Post.Slug}}`,
//! ...). Field values are HTML-escaped except `Post.Html`, which is the
//! post's rendered HTML and is inserted as-is. Legacy references written
//! as `{{.Post.Title}}` are accepted.

use std::sync::LazyLock;

use handlebars::Handlebars;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::error::ActionError;
use crate::pipeline::types::EventPayload;

static LEGACY_DOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\{?)\s*\.([A-Za-z])").unwrap());

/// Ghost post field → template field.
const POST_FIELDS: &[(&str, &str)] = &[
    ("title", "Title"),
    ("feature_image", "FeatureImage"),
    ("slug", "Slug"),
    ("custom_excerpt", "CustomExcerpt"),
    ("html", "Html"),
    ("plaintext", "PlainText"),
    ("published_at", "PublishedAt"),
];

/// Build the `Post` object from `payload.post.current`. Missing fields are null.
pub fn post_context(payload: &EventPayload) -> Map<String, Value> {
    let current = payload.current("post");
    POST_FIELDS
        .iter()
        .map(|(src, dst)| {
            let raw = current.and_then(|c| c.get(*src)).cloned().unwrap_or(Value::Null);
            let value = match raw {
                Value::String(s) if *dst != "Html" => Value::String(handlebars::html_escape(&s)),
                other => other,
            };
            (dst.to_string(), value)
        })
        .collect()
}

/// Render a campaign body template for the given event.
pub fn render_campaign_body(template: &str, payload: &EventPayload) -> Result<String, ActionError> {
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);

    let source = LEGACY_DOT.replace_all(template, "{{${1}${2}");
    let data = json!({ "Post": post_context(payload) });

    hb.render_template(&source, &data)
        .map_err(|e| ActionError::Template(e.to_string()))
}
