#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use landgraph::core::types::GateVerdict;
use landgraph::core::{Config, Context};
use landgraph::db;
use landgraph::db::models::Land;
use landgraph::fetch::{FetchError, FetchedPage, Fetcher};
use landgraph::gate::RelevanceGate;
use landgraph::readable::{CleanDoc, CleanExtractor};

/// Build a context over a fresh on-disk database in a temp directory.
/// The temp dir guard must outlive the context.
pub async fn test_context() -> (tempfile::TempDir, Context) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.data_location = dir.path().to_string_lossy().to_string();
    config.parallel_connections = 4;
    let pool = db::open_pool(&config.data_location, 4).await.expect("pool");
    db::setup(&pool).await.expect("schema");
    (dir, Context::new(config, pool))
}

pub async fn make_land(ctx: &Context, name: &str, lang: &str) -> Land {
    db::create_land(&ctx.db, name, &format!("{} research", name), lang)
        .await
        .expect("land")
}

/// Canned response table. Routes match exactly first, then by substring, so
/// CDX lookups can be stubbed with a single `cdx/search/cdx` route.
#[derive(Default)]
pub struct MockFetcher {
    routes: Vec<(String, CannedResponse)>,
    pub requests: Mutex<Vec<String>>,
}

pub enum CannedResponse {
    Page { status: u16, content_type: String, body: String },
    NetworkError,
    OtherError,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn html(mut self, url: &str, status: u16, body: &str) -> Self {
        self.routes.push((
            url.to_string(),
            CannedResponse::Page {
                status,
                content_type: "text/html; charset=utf-8".into(),
                body: body.to_string(),
            },
        ));
        self
    }

    pub fn json(mut self, url: &str, body: &str) -> Self {
        self.routes.push((
            url.to_string(),
            CannedResponse::Page {
                status: 200,
                content_type: "application/json".into(),
                body: body.to_string(),
            },
        ));
        self
    }

    pub fn network_error(mut self, url: &str) -> Self {
        self.routes.push((url.to_string(), CannedResponse::NetworkError));
        self
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        let route = self
            .routes
            .iter()
            .find(|(key, _)| key == url)
            .or_else(|| self.routes.iter().find(|(key, _)| url.contains(key.as_str())));
        match route {
            Some((_, CannedResponse::Page { status, content_type, body })) => Ok(FetchedPage {
                status: *status,
                content_type: content_type.clone(),
                body: body.clone(),
            }),
            Some((_, CannedResponse::NetworkError)) => {
                Err(FetchError::Request("connection refused".into()))
            }
            Some((_, CannedResponse::OtherError)) => Err(FetchError::Other("body read".into())),
            None => Err(FetchError::Request("no route".into())),
        }
    }
}

/// Clean extractor stub keyed by URL; unrouted URLs fail.
#[derive(Default)]
pub struct MockCleanExtractor {
    pub docs: HashMap<String, CleanDoc>,
}

impl MockCleanExtractor {
    pub fn with_doc(mut self, url: &str, doc: CleanDoc) -> Self {
        self.docs.insert(url.to_string(), doc);
        self
    }
}

#[async_trait]
impl CleanExtractor for MockCleanExtractor {
    async fn extract(&self, url: &str) -> Result<CleanDoc, String> {
        self.docs
            .get(url)
            .cloned()
            .ok_or_else(|| "extractor exited 1".to_string())
    }
}

/// Gate stub with a fixed verdict.
pub struct MockGate {
    pub verdict: GateVerdict,
    pub model: String,
}

#[async_trait]
impl RelevanceGate for MockGate {
    async fn verdict(&self, _land: &Land, _title: &str, _readable: &str) -> GateVerdict {
        self.verdict
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Gate that is switched off, for lexicon-only runs.
pub struct OffGate;

#[async_trait]
impl RelevanceGate for OffGate {
    async fn verdict(&self, _land: &Land, _title: &str, _readable: &str) -> GateVerdict {
        GateVerdict::Unknown
    }

    fn model_name(&self) -> &str {
        ""
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// A long article page: three substantial paragraphs mentioning the topic
/// word, one outbound link, one image.
pub fn article_html(title: &str, topic: &str, link: &str) -> String {
    let para = format!(
        "The {topic} has become a central object of study, with researchers cataloguing \
         its evolution, its communities, and the many ways information circulates through \
         it every single day of the year.",
        topic = topic
    );
    format!(
        r#"<html lang="fr"><head>
            <title>{title}</title>
            <meta name="description" content="A study of the {topic}">
            <meta name="keywords" content="{topic},research">
        </head><body><article>
            <p>{para}</p>
            <p>{para} Read more at <a href="{link}">the continuation of this study</a>, which
            expands on the same themes, with additional material, interviews, and data.
            <img src="https://a.example/figure.png" alt="figure"></p>
            <p>{para}</p>
        </article></body></html>"#,
        title = title,
        topic = topic,
        para = para,
        link = link
    )
}
