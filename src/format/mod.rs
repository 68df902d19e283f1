//! Output-format negotiation.
//!
//! A [`FormatProbe`] reports what a client can decode. Results are memoized
//! per context key so each distinct client class is probed once.

use crate::config::{FormatConfig, ProbeKind};
use crate::error::ResolveError;
use crate::transform::{ImageFormat, TransformParams};
use dashmap::DashMap;
use http::HeaderMap;
use http::header::ACCEPT;
use tracing::{debug, warn};

/// Request facts a probe may look at.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub accept: Option<String>,
}

impl ClientContext {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ResolveError> {
        let accept = match headers.get(ACCEPT) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|e| ResolveError::FormatProbeFailure(e.to_string()))?
                    .to_string(),
            ),
            None => None,
        };
        Ok(Self { accept })
    }

    pub fn with_accept(accept: impl Into<String>) -> Self {
        Self {
            accept: Some(accept.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub avif: bool,
    pub webp: bool,
}

impl Capabilities {
    /// AVIF, then WebP; `None` keeps the source encoding.
    pub fn best(&self) -> Option<ImageFormat> {
        if self.avif {
            Some(ImageFormat::Avif)
        } else if self.webp {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }
}

pub trait FormatProbe: Send + Sync {
    /// Clients with the same key are assumed to share capabilities.
    fn context_key(&self, client: &ClientContext) -> String;

    fn probe(&self, client: &ClientContext) -> Result<Capabilities, ResolveError>;
}

/// Fixed capabilities from configuration.
pub struct StaticProbe {
    capabilities: Capabilities,
}

impl StaticProbe {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

impl FormatProbe for StaticProbe {
    fn context_key(&self, _client: &ClientContext) -> String {
        "static".to_string()
    }

    fn probe(&self, _client: &ClientContext) -> Result<Capabilities, ResolveError> {
        Ok(self.capabilities)
    }
}

/// Reads the `Accept` header the way browsers advertise image support.
pub struct AcceptHeaderProbe;

impl AcceptHeaderProbe {
    fn capabilities(accept: &str) -> Result<Capabilities, ResolveError> {
        let mut capabilities = Capabilities::default();
        for item in accept.split(',') {
            let mut parts = item.split(';');
            let media = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
            if media.is_empty() {
                continue;
            }
            if !media.contains('/') {
                return Err(ResolveError::FormatProbeFailure(format!(
                    "malformed media range `{media}`"
                )));
            }
            let refused = parts.any(|p| {
                let p = p.trim();
                p.strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            if refused {
                continue;
            }
            match media.as_str() {
                "image/avif" => capabilities.avif = true,
                "image/webp" => capabilities.webp = true,
                _ => {}
            }
        }
        Ok(capabilities)
    }
}

impl FormatProbe for AcceptHeaderProbe {
    /// Keyed by the decoded capabilities, so the set of keys stays small no
    /// matter how many distinct headers clients send.
    fn context_key(&self, client: &ClientContext) -> String {
        match client.accept.as_deref() {
            Some(accept) => match Self::capabilities(accept) {
                Ok(c) => format!("accept:avif={},webp={}", c.avif, c.webp),
                Err(_) => "accept:invalid".to_string(),
            },
            None => "accept:none".to_string(),
        }
    }

    fn probe(&self, client: &ClientContext) -> Result<Capabilities, ResolveError> {
        match client.accept.as_deref() {
            Some(accept) => Self::capabilities(accept),
            None => Ok(Capabilities::default()),
        }
    }
}

/// Upper bound on memoized contexts. Past it, results are still computed but
/// no longer remembered.
const MAX_KNOWN_CONTEXTS: usize = 256;

pub struct FormatNegotiator {
    probe: Box<dyn FormatProbe>,
    known: DashMap<String, Option<ImageFormat>>,
}

impl FormatNegotiator {
    pub fn new(probe: Box<dyn FormatProbe>) -> Self {
        Self {
            probe,
            known: DashMap::new(),
        }
    }

    pub fn from_config(config: &FormatConfig) -> Self {
        let probe: Box<dyn FormatProbe> = match config.probe {
            ProbeKind::Static => Box::new(StaticProbe::new(Capabilities {
                avif: config.avif,
                webp: config.webp,
            })),
            ProbeKind::Accept => Box::new(AcceptHeaderProbe),
        };
        Self::new(probe)
    }

    pub fn best_format(&self, client: &ClientContext) -> Option<ImageFormat> {
        let key = self.probe.context_key(client);
        if let Some(known) = self.known.get(&key) {
            return *known;
        }

        let best = match self.probe.probe(client) {
            Ok(capabilities) => capabilities.best(),
            Err(e) => {
                warn!("{}, using baseline format", e);
                None
            }
        };
        debug!("Client context {} negotiated {:?}", key, best);
        if self.known.len() < MAX_KNOWN_CONTEXTS {
            self.known.insert(key, best);
        }
        best
    }

    /// Params with the negotiated format filled in when the caller left it
    /// open.
    pub fn effective_params(
        &self,
        params: &TransformParams,
        client: &ClientContext,
    ) -> TransformParams {
        if !params.wants_negotiated_format() {
            return params.clone();
        }
        TransformParams {
            format: self.best_format(client),
            ..params.clone()
        }
    }

    pub fn known_contexts(&self) -> usize {
        self.known.len()
    }
}
