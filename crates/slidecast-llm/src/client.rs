//! Text generation client: provider adapters, middleware and model catalog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use slidecast_types::SlidecastError;

use crate::{Request, Response};

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// A backend that can answer text requests.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Response, SlidecastError>;

    /// Provider name the model catalog refers to.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _request: &mut Request) {}
    fn after(&self, _request: &Request, _response: &mut Response) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, request: &mut Request) {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            format = ?request.response_format,
            "LLM request"
        );
    }

    fn after(&self, _request: &Request, response: &mut Response) {
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish = ?response.finish_reason,
            "LLM response"
        );
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: UsageTrackingMiddleware
// ---------------------------------------------------------------------------

/// Accumulates token usage across every request that passes through it.
/// Clones share the same counters.
#[derive(Clone)]
pub struct UsageTrackingMiddleware {
    total_input: Arc<AtomicU64>,
    total_output: Arc<AtomicU64>,
    requests: Arc<AtomicU64>,
}

impl UsageTrackingMiddleware {
    pub fn new() -> Self {
        Self {
            total_input: Arc::new(AtomicU64::new(0)),
            total_output: Arc::new(AtomicU64::new(0)),
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input.load(Ordering::Relaxed)
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output.load(Ordering::Relaxed)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for UsageTrackingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for UsageTrackingMiddleware {
    fn after(&self, _request: &Request, response: &mut Response) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_input
            .fetch_add(response.usage.input_tokens, Ordering::Relaxed);
        self.total_output
            .fetch_add(response.usage.output_tokens, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// ModelInfo / ModelCatalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCapability {
    Text,
    Image,
    Video,
    Speech,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub capability: ModelCapability,
}

pub struct ModelCatalog {
    models: HashMap<String, ModelInfo>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        let mut models = HashMap::new();

        for (id, capability) in [
            ("gemini-2.5-pro", ModelCapability::Text),
            ("gemini-2.5-flash", ModelCapability::Text),
            ("gemini-2.0-flash", ModelCapability::Text),
            ("gemini-2.5-flash-image", ModelCapability::Image),
            ("veo-3.1-generate-preview", ModelCapability::Video),
            ("gemini-2.5-flash-preview-tts", ModelCapability::Speech),
        ] {
            models.insert(
                id.to_string(),
                ModelInfo {
                    id: id.to_string(),
                    provider: "google".to_string(),
                    capability,
                },
            );
        }

        Self { models }
    }

    pub fn lookup(&self, model: &str) -> Option<&ModelInfo> {
        self.models.get(model)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

pub struct LlmClient {
    providers: HashMap<String, Box<dyn ProviderAdapter>>,
    model_catalog: ModelCatalog,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            model_catalog: ModelCatalog::new(),
            middleware: Vec::new(),
        }
    }

    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let name = provider.name().to_string();
        self.providers.insert(name, Box::new(provider));
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn model_catalog(&self) -> &ModelCatalog {
        &self.model_catalog
    }

    pub async fn complete(&self, request: &Request) -> Result<Response, SlidecastError> {
        let provider = self.resolve_provider(request)?;
        let mut req = request.clone();

        for m in &self.middleware {
            m.before(&mut req);
        }

        let mut resp = provider.complete(&req).await?;

        for m in &self.middleware {
            m.after(&req, &mut resp);
        }

        Ok(resp)
    }

    /// Pick the provider for a request: the one named on the request, else
    /// the catalog's provider for the model. Media models are refused here;
    /// they have their own endpoints.
    fn resolve_provider(&self, request: &Request) -> Result<&dyn ProviderAdapter, SlidecastError> {
        let info = self.model_catalog.lookup(&request.model);
        if let Some(info) = info.filter(|i| i.capability != ModelCapability::Text) {
            return Err(SlidecastError::Other(format!(
                "model '{}' is a {:?} model and cannot generate text",
                info.id, info.capability
            )));
        }

        let name = request
            .provider
            .as_deref()
            .or(info.map(|i| i.provider.as_str()));
        let provider = match name {
            Some(name) => self.providers.get(name),
            // Unknown model: only unambiguous when a single provider is registered.
            None if self.providers.len() == 1 => self.providers.values().next(),
            None => None,
        };
        provider.map(|p| p.as_ref()).ok_or_else(|| {
            SlidecastError::Other(format!(
                "No provider registered for model '{}'",
                request.model
            ))
        })
    }

    /// Create a client backed by Gemini, reading the key from the environment.
    pub fn from_env() -> Result<Self, SlidecastError> {
        let adapter = crate::GeminiAdapter::from_env().map_err(|_| {
            SlidecastError::Other(
                "No Gemini API key found in environment (set GOOGLE_API_KEY or GEMINI_API_KEY)"
                    .to_string(),
            )
        })?;
        let mut client = Self::new().with_middleware(LoggingMiddleware);
        client.register_provider(adapter);
        Ok(client)
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FinishReason, Usage};
    use std::sync::atomic::AtomicUsize;

    struct MockProvider {
        name: &'static str,
        call_count: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                call_count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(&self, request: &Request) -> Result<Response, SlidecastError> {
            self.call_count.fetch_add(1, Ordering::Relaxed);
            Ok(Response {
                id: format!("{}-resp", self.name),
                text: "Hello from mock".into(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 20,
                    total_tokens: 30,
                },
                model: request.model.clone(),
                finish_reason: FinishReason::EndTurn,
            })
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn make_request(model: &str, provider: Option<&str>) -> Request {
        let mut req = Request::new(model).user("hello");
        req.provider = provider.map(String::from);
        req
    }

    // Test 1: register_provider and resolve
    #[tokio::test]
    async fn register_provider_and_complete() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::new("mock"));

        let resp = client
            .complete(&make_request("mock-model", Some("mock")))
            .await
            .unwrap();
        assert_eq!(resp.id, "mock-resp");
        assert_eq!(resp.text, "Hello from mock");
    }

    // Test 2: model catalog lookup
    #[test]
    fn model_catalog_lookup() {
        let catalog = ModelCatalog::new();

        let info = catalog.lookup("gemini-2.5-flash-preview-tts").unwrap();
        assert_eq!(info.provider, "google");
        assert_eq!(info.capability, ModelCapability::Speech);

        let info = catalog.lookup("veo-3.1-generate-preview").unwrap();
        assert_eq!(info.capability, ModelCapability::Video);

        assert!(catalog.lookup("nonexistent-model").is_none());
        assert_eq!(catalog.lookup("gemini-2.5-pro").unwrap().provider, "google");
    }

    // Test 3: provider resolution by model name (via catalog)
    #[tokio::test]
    async fn resolve_provider_by_model_name() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::new("other"));
        client.register_provider(MockProvider::new("google"));

        let resp = client
            .complete(&make_request("gemini-2.5-flash", None))
            .await
            .unwrap();
        assert_eq!(resp.id, "google-resp");
    }

    // Test 4: middleware before/after called
    #[tokio::test]
    async fn middleware_before_after_called() {
        struct CountingMiddleware {
            before_count: Arc<AtomicUsize>,
            after_count: Arc<AtomicUsize>,
        }

        impl Middleware for CountingMiddleware {
            fn before(&self, _request: &mut Request) {
                self.before_count.fetch_add(1, Ordering::Relaxed);
            }
            fn after(&self, _request: &Request, _response: &mut Response) {
                self.after_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        let before_count = Arc::new(AtomicUsize::new(0));
        let after_count = Arc::new(AtomicUsize::new(0));
        let mut client = LlmClient::new().with_middleware(CountingMiddleware {
            before_count: before_count.clone(),
            after_count: after_count.clone(),
        });
        client.register_provider(MockProvider::new("mock"));

        client
            .complete(&make_request("mock-model", Some("mock")))
            .await
            .unwrap();

        assert_eq!(before_count.load(Ordering::Relaxed), 1);
        assert_eq!(after_count.load(Ordering::Relaxed), 1);
    }

    // Test 5: unknown explicit provider is an error
    #[test]
    fn resolve_provider_unknown_returns_error() {
        let client = LlmClient::new();
        let result = client.resolve_provider(&make_request("some-model", Some("nonexistent")));
        assert!(result.is_err());
    }

    // Test 6: no providers registered
    #[test]
    fn no_providers_returns_error() {
        let client = LlmClient::new();
        let result = client.resolve_provider(&make_request("some-model", None));
        assert!(result.err().unwrap().to_string().contains("No provider registered"));
    }

    // Test 6b: media models are refused for text requests
    #[test]
    fn media_model_is_refused() {
        let mut client = LlmClient::new();
        client.register_provider(MockProvider::new("google"));
        let result = client.resolve_provider(&make_request("gemini-2.5-flash-preview-tts", None));
        assert!(result.err().unwrap().to_string().contains("cannot generate text"));
    }

    // Test 7: usage tracking accumulates across calls
    #[tokio::test]
    async fn usage_tracking_middleware() {
        let usage = UsageTrackingMiddleware::new();
        let mut client = LlmClient::new().with_middleware(usage.clone());
        client.register_provider(MockProvider::new("mock"));

        let req = make_request("mock-model", Some("mock"));
        client.complete(&req).await.unwrap();
        client.complete(&req).await.unwrap();

        assert_eq!(usage.request_count(), 2);
        assert_eq!(usage.total_input_tokens(), 20);
        assert_eq!(usage.total_output_tokens(), 40);
    }
}
