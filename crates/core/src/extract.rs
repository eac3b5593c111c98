use crate::error::IngestError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Extracts plain text from one family of file formats.
///
/// Extractors are consulted in registration order; the first whose `matches`
/// predicate accepts the extension/content-type pair handles the file. An
/// extractor error aborts the task; an empty result means "nothing to index".
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    fn matches(&self, extension: &str, content_type: &str) -> bool;

    async fn extract(&self, path: &Path, original_name: &str) -> Result<String, IngestError>;
}

pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn ContentExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// The full format table: OCR-backed images first (when an engine is
    /// available), then PDF, Word, and plain text. New formats are additive
    /// registrations.
    pub fn standard(ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        let mut registry = Self::new();
        if let Some(engine) = ocr {
            registry.register(ImageExtractor::new(engine));
        }
        registry.register(PdfExtractor);
        registry.register(WordExtractor);
        registry.register(PlainTextExtractor);
        registry
    }

    pub fn register<E: ContentExtractor + 'static>(&mut self, extractor: E) {
        self.extractors.push(Arc::new(extractor));
    }

    /// Routes to the first matching extractor. An unmatched format yields an
    /// empty string, the explicit "unsupported" signal, never an error.
    pub async fn extract(
        &self,
        path: &Path,
        original_name: &str,
        content_type: &str,
    ) -> Result<String, IngestError> {
        let extension = file_extension(original_name);
        let content_type = content_type.to_ascii_lowercase();

        for extractor in &self.extractors {
            if extractor.matches(&extension, &content_type) {
                return extractor.extract(path, original_name).await;
            }
        }

        tracing::warn!(
            file = original_name,
            content_type = %content_type,
            "unsupported file type, nothing to extract"
        );
        Ok(String::new())
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::standard(None)
    }
}

fn file_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase())
        .unwrap_or_default()
}

pub struct PdfExtractor;

#[async_trait]
impl ContentExtractor for PdfExtractor {
    fn matches(&self, extension: &str, content_type: &str) -> bool {
        extension == "pdf" || content_type == "application/pdf"
    }

    async fn extract(&self, path: &Path, _original_name: &str) -> Result<String, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            if !text.trim().is_empty() {
                pages.push(text.trim().to_string());
            }
        }

        Ok(pages.join("\n"))
    }
}

pub struct WordExtractor;

#[async_trait]
impl ContentExtractor for WordExtractor {
    fn matches(&self, extension: &str, content_type: &str) -> bool {
        extension == "docx" || extension == "doc" || content_type.contains("word")
    }

    async fn extract(&self, path: &Path, _original_name: &str) -> Result<String, IngestError> {
        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|error| IngestError::WordParse(error.to_string()))?;

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|error| IngestError::WordParse(error.to_string()))?
            .read_to_string(&mut xml)?;

        paragraphs_from_document_xml(&xml)
    }
}

/// Pulls paragraph text out of a WordprocessingML body: the contents of every
/// `w:t` run, one line per `w:p` paragraph.
fn paragraphs_from_document_xml(xml: &str) -> Result<String, IngestError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(content)) if in_text_run => {
                let run = content
                    .unescape()
                    .map_err(|error| IngestError::WordParse(error.to_string()))?;
                text.push_str(&run);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => return Err(IngestError::WordParse(error.to_string())),
        }
    }

    Ok(text.trim().to_string())
}

pub struct PlainTextExtractor;

const TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "csv"];

#[async_trait]
impl ContentExtractor for PlainTextExtractor {
    fn matches(&self, extension: &str, content_type: &str) -> bool {
        TEXT_EXTENSIONS.contains(&extension)
            || content_type.starts_with("text/")
            || content_type.contains("plain")
    }

    async fn extract(&self, path: &Path, _original_name: &str) -> Result<String, IngestError> {
        let bytes = std::fs::read(path)?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            // Latin-1 maps every byte to the code point of the same value, so
            // the fallback cannot fail.
            Err(error) => Ok(error
                .into_bytes()
                .iter()
                .map(|&byte| byte as char)
                .collect()),
        }
    }
}

/// Turns image bytes into recognized text. Collaborator-backed; failures
/// abort the task and rely on queue redelivery.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8], original_name: &str) -> Result<String, IngestError>;
}

pub struct HttpOcrEngine {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpOcrEngine {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            client: Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    image_base64: String,
    source_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: Option<String>,
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize(&self, image: &[u8], original_name: &str) -> Result<String, IngestError> {
        let payload = OcrRequest {
            image_base64: STANDARD.encode(image),
            source_name: original_name,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "ocr endpoint {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let parsed: OcrResponse = response.json().await?;
        Ok(parsed.text.unwrap_or_default())
    }
}

pub struct ImageExtractor {
    engine: Arc<dyn OcrEngine>,
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "tiff"];

impl ImageExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ContentExtractor for ImageExtractor {
    fn matches(&self, extension: &str, content_type: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&extension) || content_type.starts_with("image/")
    }

    async fn extract(&self, path: &Path, original_name: &str) -> Result<String, IngestError> {
        let bytes = std::fs::read(path)?;
        self.engine.recognize(&bytes, original_name).await
    }
}
