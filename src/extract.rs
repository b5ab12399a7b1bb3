use std::sync::OnceLock;

use scraper::{Html, Selector};
use url::Url;

use crate::util::strip_fragment;

/// The fixed set of (attribute, tags) pairs that can reference a URL.
const LINK_ATTRS: &[(&str, &[&str])] = &[
    ("background", &["body"]),
    ("cite", &["blockquote", "del", "ins", "q"]),
    ("data", &["object"]),
    ("href", &["a", "area", "embed", "link"]),
    ("icon", &["command"]),
    ("longdesc", &["frame", "iframe"]),
    ("manifest", &["html"]),
    ("poster", &["video"]),
    ("pluginspage", &["embed"]),
    ("pluginurl", &["embed"]),
    (
        "src",
        &[
            "audio", "embed", "frame", "iframe", "img", "input", "script", "source", "track",
            "video",
        ],
    ),
];

#[derive(Debug, Clone)]
pub struct ExtractedLink {
    /// The attribute value as written in the document.
    pub href: String,
    /// Resolved against the base URL with the fragment cleared; `None` when
    /// the value does not resolve into a URL.
    pub url: Option<Url>,
}

fn selectors() -> &'static [(&'static str, Selector)] {
    static SELECTORS: OnceLock<Vec<(&'static str, Selector)>> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        LINK_ATTRS
            .iter()
            .map(|(attr, tags)| {
                let css = tags
                    .iter()
                    .map(|tag| format!("{tag}[{attr}]"))
                    .collect::<Vec<_>>()
                    .join(", ");
                (*attr, Selector::parse(&css).expect("static selector"))
            })
            .collect()
    })
}

/// Pull every candidate link out of an HTML document. Duplicates are kept;
/// deduplication is the visit cache's job.
pub fn extract_links(html: &str, base: &Url) -> Vec<ExtractedLink> {
    let document = Html::parse_document(html);
    let mut out = Vec::new();

    for (attr, selector) in selectors() {
        for element in document.select(selector) {
            let Some(value) = element.value().attr(attr) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let url = base.join(value).ok().map(strip_fragment);
            out.push(ExtractedLink {
                href: value.to_string(),
                url,
            });
        }
    }

    out
}
