//! URL construction for the primary CDN.
//!
//! The CDN follows the image-resizing path convention
//! `{base}/cdn-cgi/image/{options}/{source}`, where `options` is a
//! comma-separated `name=value` list.

use crate::error::ResolveError;
use crate::transform::{FocusPoint, TransformParams};
use http::Uri;

pub const TRANSFORM_SEGMENT: &str = "/cdn-cgi/image/";

#[derive(Debug, Clone)]
pub struct PrimaryCdn {
    base_url: String,
}

impl PrimaryCdn {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(
        &self,
        reference: &str,
        params: &TransformParams,
    ) -> Result<String, ResolveError> {
        let source = self.source_path(reference)?;
        let options = encode_options(params)?;
        let url = format!("{}{}{}/{}", self.base_url, TRANSFORM_SEGMENT, options, source);

        url.parse::<Uri>()
            .map_err(|e| malformed(reference, &format!("built url does not parse: {e}")))?;
        Ok(url)
    }

    /// What the CDN should fetch: a path on our own origin, or the full
    /// URL when the reference points elsewhere.
    fn source_path(&self, reference: &str) -> Result<String, ResolveError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(malformed(reference, "empty reference"));
        }
        if reference
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(malformed(reference, "contains whitespace or control characters"));
        }

        if let Some(rest) = reference
            .strip_prefix(&self.base_url)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        {
            let source = strip_transform_segment(rest).trim_start_matches('/');
            if source.is_empty() {
                return Err(malformed(reference, "no source path after the CDN host"));
            }
            return Ok(source.to_string());
        }

        if let Some((scheme, _)) = reference.split_once("://") {
            return match scheme {
                "http" | "https" => Ok(reference.to_string()),
                other => Err(malformed(reference, &format!("unsupported scheme `{other}`"))),
            };
        }
        if reference.contains(':') && !reference.starts_with('/') {
            return Err(malformed(reference, "unsupported reference form"));
        }

        Ok(reference.trim_start_matches('/').to_string())
    }
}

/// Drops a leading `/cdn-cgi/image/{options}` segment, if any.
pub fn strip_transform_segment(path: &str) -> &str {
    match path.strip_prefix(TRANSFORM_SEGMENT) {
        Some(rest) => match rest.split_once('/') {
            Some((_, source)) => source,
            None => "",
        },
        None => path,
    }
}

fn encode_options(params: &TransformParams) -> Result<String, ResolveError> {
    let mut options = Vec::new();

    if let Some(width) = params.width {
        if width == 0 {
            return Err(malformed("width", "must be positive"));
        }
        options.push(format!("width={width}"));
    }
    if let Some(height) = params.height {
        if height == 0 {
            return Err(malformed("height", "must be positive"));
        }
        options.push(format!("height={height}"));
    }
    if let Some(quality) = params.quality {
        if quality > 100 {
            return Err(malformed("quality", "must be within 0..=100"));
        }
        options.push(format!("quality={quality}"));
    }
    if let Some(format) = params.format {
        options.push(format!("format={}", format.as_str()));
    }
    if let Some(crop) = params.crop {
        options.push(format!("fit={}", crop.as_str()));
    }
    if let Some(focus) = params.focus {
        if let FocusPoint::At { x, y } = focus {
            if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
                return Err(malformed("focus", "coordinates must be within 0..=1"));
            }
        }
        options.push(format!("gravity={focus}"));
    }

    if options.is_empty() {
        options.push("format=auto".to_string());
    }
    Ok(options.join(","))
}

fn malformed(what: &str, reason: &str) -> ResolveError {
    ResolveError::PrimaryUnavailable(format!("cannot build url for `{what}`: {reason}"))
}
