use scraper::{Html, Selector};

/// Page metadata assembled from the fallback chain of sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    /// Content language as declared by `<html lang>`; empty declaration or
    /// missing attribute yields `None`.
    pub lang: Option<String>,
}

fn meta_attr(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn title_tag(document: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn html_lang(document: &Html) -> Option<String> {
    let sel = Selector::parse("html").ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Combine metadata sources in priority order:
/// OpenGraph → Twitter Card → schema.org itemprop → standard HTML.
pub fn combine(html: &str) -> PageMeta {
    let document = Html::parse_document(html);

    let title = meta_attr(&document, "meta[property=\"og:title\"]")
        .or_else(|| meta_attr(&document, "meta[name=\"twitter:title\"]"))
        .or_else(|| meta_attr(&document, "meta[itemprop=\"title\"]"))
        .or_else(|| title_tag(&document));

    let description = meta_attr(&document, "meta[property=\"og:description\"]")
        .or_else(|| meta_attr(&document, "meta[name=\"twitter:description\"]"))
        .or_else(|| meta_attr(&document, "meta[itemprop=\"description\"]"))
        .or_else(|| meta_attr(&document, "meta[name=\"description\"]"));

    // og:keywords and twitter:keywords are rare but checked for completeness.
    let keywords = meta_attr(&document, "meta[property=\"og:keywords\"]")
        .or_else(|| meta_attr(&document, "meta[name=\"twitter:keywords\"]"))
        .or_else(|| meta_attr(&document, "meta[itemprop=\"keywords\"]"))
        .or_else(|| meta_attr(&document, "meta[name=\"keywords\"]"));

    let lang = html_lang(&document);

    PageMeta {
        title,
        description,
        keywords,
        lang,
    }
}
