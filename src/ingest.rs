//! HTML snapshot ingestion: embedded images become content-addressed blobs,
//! the markup becomes markdown.
//!
//! Image fetches run concurrently but capped by
//! `ingest.max_concurrent_fetches`; a single broken image never aborts the
//! batch. Blob uploads are confirmed with the bounded availability poll, so
//! a stuck blob store surfaces as `PeerError::BlobTimeout` instead of
//! hanging forever.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{stream, StreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::peer::{PeerClient, PeerError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to parse HTML: {0}")]
    Html(String),
    #[error("failed to build fetch client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Peer(#[from] PeerError),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub title: String,
    pub url: String,
    /// Blank the `src` of unreachable images instead of leaving it as-is.
    pub ignore_broken_img_links: bool,
    /// Store the resulting markdown as one more blob and return its ref
    /// instead of the markdown itself.
    pub as_blob: bool,
}

const IMG_SRC_PATTERN: &str = r#"(?i)(<img\b[^>]*?\bsrc\s*=\s*["'])([^"']*)(["'])"#;

/// Convert an HTML snapshot into markdown, replicating embedded images as
/// content-addressed blobs along the way.
pub async fn ingest(
    client: &PeerClient,
    config: &Config,
    html: &str,
    opts: &IngestOptions,
) -> Result<String, IngestError> {
    let srcs = collect_img_srcs(html);
    debug!(images = srcs.len(), "ingesting HTML snapshot");

    let fetcher = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.ingest.fetch_timeout_secs))
        .build()?;

    // Fetch + upload + confirm, per image, with a bounded fan-out.
    let results: Vec<Result<(String, Option<String>), IngestError>> = stream::iter(srcs)
        .map(|src| {
            let fetcher = fetcher.clone();
            async move {
                match fetch_image(&fetcher, &src).await {
                    Some(bytes) => {
                        let blob_ref = client.blob_add(bytes).await?;
                        client.wait_for_blob(&blob_ref).await?;
                        Ok((src, Some(blob_ref)))
                    }
                    None => Ok((src, None)),
                }
            }
        })
        .buffer_unordered(config.ingest.max_concurrent_fetches)
        .collect()
        .await;

    let mut blob_map: HashMap<String, Option<String>> = HashMap::new();
    for result in results {
        let (src, blob_ref) = result?;
        blob_map.insert(src, blob_ref);
    }

    let rewritten = rewrite_img_srcs(html, &blob_map, opts.ignore_broken_img_links);
    let body = html_to_markdown(&rewritten)?;
    let md = frame_markdown(&body, &opts.title, &opts.url);

    if opts.as_blob {
        let blob_ref = client.blob_add(md.into_bytes()).await?;
        client.wait_for_blob(&blob_ref).await?;
        Ok(blob_ref)
    } else {
        Ok(md)
    }
}

async fn fetch_image(fetcher: &reqwest::Client, src: &str) -> Option<Vec<u8>> {
    match fetcher.get(src).send().await {
        Ok(resp) if resp.status().is_success() => match resp.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                warn!(%src, error = %e, "failed reading image body");
                None
            }
        },
        Ok(resp) => {
            warn!(%src, status = resp.status().as_u16(), "image fetch rejected");
            None
        }
        Err(e) => {
            warn!(%src, error = %e, "image fetch failed");
            None
        }
    }
}

/// Distinct `<img src>` values in document order.
fn collect_img_srcs(html: &str) -> Vec<String> {
    let re = Regex::new(IMG_SRC_PATTERN).expect("static img pattern compiles");
    let mut seen = Vec::new();
    for caps in re.captures_iter(html) {
        let src = caps[2].to_string();
        if !src.is_empty() && !seen.contains(&src) {
            seen.push(src);
        }
    }
    seen
}

/// Rewrite `src` attributes: fetched images point at their blob ref, broken
/// ones are blanked when `ignore_broken` (otherwise left untouched and the
/// batch continues).
fn rewrite_img_srcs(
    html: &str,
    blob_map: &HashMap<String, Option<String>>,
    ignore_broken: bool,
) -> String {
    let re = Regex::new(IMG_SRC_PATTERN).expect("static img pattern compiles");
    re.replace_all(html, |caps: &regex::Captures<'_>| {
        let src = &caps[2];
        let replacement = match blob_map.get(src) {
            Some(Some(blob_ref)) => blob_ref.as_str(),
            Some(None) if ignore_broken => "",
            _ => src,
        };
        format!("{}{}{}", &caps[1], replacement, &caps[3])
    })
    .into_owned()
}

/// Strip tags and render a small markdown subset: headings, paragraphs,
/// breaks, links, images, emphasis, list items, code. Everything else loses
/// its markup but keeps its text.
fn html_to_markdown(html: &str) -> Result<String, IngestError> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;
    reader.config_mut().trim_text(false);

    let mut out = String::new();
    let mut link_href: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"h1" => out.push_str("\n\n# "),
                    b"h2" => out.push_str("\n\n## "),
                    b"h3" => out.push_str("\n\n### "),
                    b"h4" => out.push_str("\n\n#### "),
                    b"h5" => out.push_str("\n\n##### "),
                    b"h6" => out.push_str("\n\n###### "),
                    b"p" | b"div" | b"section" | b"article" | b"blockquote" => {
                        out.push_str("\n\n")
                    }
                    b"br" => out.push('\n'),
                    b"li" => out.push_str("\n- "),
                    b"strong" | b"b" => out.push_str("**"),
                    b"em" | b"i" => out.push('*'),
                    b"code" | b"pre" => out.push('`'),
                    b"a" => {
                        link_href = attr_value(&e, b"href");
                        out.push('[');
                    }
                    b"img" => {
                        let alt = attr_value(&e, b"alt").unwrap_or_default();
                        let src = attr_value(&e, b"src").unwrap_or_default();
                        out.push_str(&format!("![{}]({})", alt, src));
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" | b"p" | b"div" | b"section"
                | b"article" | b"blockquote" | b"li" => out.push('\n'),
                b"strong" | b"b" => out.push_str("**"),
                b"em" | b"i" => out.push('*'),
                b"code" | b"pre" => out.push('`'),
                b"a" => {
                    let href = link_href.take().unwrap_or_default();
                    out.push_str(&format!("]({})", href));
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(IngestError::Html(e.to_string())),
        }
    }

    Ok(out.trim().to_string())
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes().with_checks(false).flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// BOM + title heading, body, `[source](url)` trailer, consecutive blank
/// lines collapsed to one.
fn frame_markdown(body: &str, title: &str, url: &str) -> String {
    let md = format!("\u{feff}# {}\n\n{}\n\n[source]({})\n", title, body, url);
    let re = Regex::new(r"\n\s*\n").expect("static blank-line pattern compiles");
    re.replace_all(&md, "\n\n").into_owned()
}
