//! Transformation parameters and the cache key derived from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Auto,
    Webp,
    Avif,
    Jpg,
    Png,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Auto => "auto",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
            ImageFormat::Jpg => "jpeg",
            ImageFormat::Png => "png",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ImageFormat::Auto),
            "webp" => Ok(ImageFormat::Webp),
            "avif" => Ok(ImageFormat::Avif),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpg),
            "png" => Ok(ImageFormat::Png),
            other => Err(format!("unknown format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CropMode {
    ScaleDown,
    Contain,
    Cover,
    Crop,
    Pad,
}

impl CropMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CropMode::ScaleDown => "scale-down",
            CropMode::Contain => "contain",
            CropMode::Cover => "cover",
            CropMode::Crop => "crop",
            CropMode::Pad => "pad",
        }
    }
}

impl FromStr for CropMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scale-down" => Ok(CropMode::ScaleDown),
            "contain" => Ok(CropMode::Contain),
            "cover" => Ok(CropMode::Cover),
            "crop" => Ok(CropMode::Crop),
            "pad" => Ok(CropMode::Pad),
            other => Err(format!("unknown crop mode `{other}`")),
        }
    }
}

/// Where the CDN keeps the subject when cropping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FocusPoint {
    Auto,
    Center,
    Top,
    Bottom,
    Left,
    Right,
    /// Relative coordinates, both in `0.0..=1.0`.
    At { x: f32, y: f32 },
}

impl fmt::Display for FocusPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FocusPoint::Auto => f.write_str("auto"),
            FocusPoint::Center => f.write_str("center"),
            FocusPoint::Top => f.write_str("top"),
            FocusPoint::Bottom => f.write_str("bottom"),
            FocusPoint::Left => f.write_str("left"),
            FocusPoint::Right => f.write_str("right"),
            FocusPoint::At { x, y } => write!(f, "{x}x{y}"),
        }
    }
}

impl FromStr for FocusPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(FocusPoint::Auto),
            "center" | "centre" => Ok(FocusPoint::Center),
            "top" => Ok(FocusPoint::Top),
            "bottom" => Ok(FocusPoint::Bottom),
            "left" => Ok(FocusPoint::Left),
            "right" => Ok(FocusPoint::Right),
            other => {
                let (x, y) = other
                    .split_once('x')
                    .ok_or_else(|| format!("unknown focus `{other}`"))?;
                let x = x.parse().map_err(|_| format!("bad focus x `{x}`"))?;
                let y = y.parse().map_err(|_| format!("bad focus y `{y}`"))?;
                Ok(FocusPoint::At { x, y })
            }
        }
    }
}

/// Optional transformation hints. Absent fields keep the source's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
    pub format: Option<ImageFormat>,
    pub crop: Option<CropMode>,
    pub focus: Option<FocusPoint>,
}

impl TransformParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn crop(mut self, crop: CropMode) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn focus(mut self, focus: FocusPoint) -> Self {
        self.focus = Some(focus);
        self
    }

    /// Tiny low-quality variant used for blur-up placeholders.
    pub fn placeholder() -> Self {
        Self::new().width(32).quality(30)
    }

    /// Builds params from loosely ordered option pairs, as templates pass
    /// them. Short aliases (`w`, `h`, `q`, `f`, `fit`, `gravity`) are accepted.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::default();
        for (name, value) in pairs {
            let value = value.trim();
            match name.trim() {
                "width" | "w" => {
                    params.width = Some(value.parse().map_err(|_| format!("bad width `{value}`"))?)
                }
                "height" | "h" => {
                    params.height =
                        Some(value.parse().map_err(|_| format!("bad height `{value}`"))?)
                }
                "quality" | "q" => {
                    params.quality =
                        Some(value.parse().map_err(|_| format!("bad quality `{value}`"))?)
                }
                "format" | "f" => params.format = Some(value.parse()?),
                "crop" | "fit" => params.crop = Some(value.parse()?),
                "focus" | "gravity" => params.focus = Some(value.parse()?),
                other => return Err(format!("unknown option `{other}`")),
            }
        }
        Ok(params)
    }

    /// True when the caller left the output format for negotiation.
    pub fn wants_negotiated_format(&self) -> bool {
        matches!(self.format, None | Some(ImageFormat::Auto))
    }

    /// Present options as sorted `name -> value` pairs.
    pub fn normalized(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        if let Some(w) = self.width {
            map.insert("width", w.to_string());
        }
        if let Some(h) = self.height {
            map.insert("height", h.to_string());
        }
        if let Some(q) = self.quality {
            map.insert("quality", q.to_string());
        }
        if let Some(f) = self.format {
            map.insert("format", f.as_str().to_string());
        }
        if let Some(c) = self.crop {
            map.insert("crop", c.as_str().to_string());
        }
        if let Some(focus) = self.focus {
            map.insert("focus", focus.to_string());
        }
        map
    }
}

/// Stable identity of one `(reference, params)` resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(reference: &str, params: &TransformParams) -> Self {
        let options = params
            .normalized()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        Self(format!("{reference}?{options}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_option_order() {
        let a = TransformParams::from_pairs([("w", "300"), ("q", "80"), ("fit", "cover")]).unwrap();
        let b = TransformParams::from_pairs([("fit", "cover"), ("quality", "80"), ("width", "300")])
            .unwrap();
        assert_eq!(CacheKey::new("/img/a.jpg", &a), CacheKey::new("/img/a.jpg", &b));
        assert_eq!(
            CacheKey::new("/img/a.jpg", &a).as_str(),
            "/img/a.jpg?crop=cover&quality=80&width=300"
        );
    }

    #[test]
    fn key_distinguishes_references_and_params() {
        let p = TransformParams::new().width(300);
        assert_ne!(CacheKey::new("/a.jpg", &p), CacheKey::new("/b.jpg", &p));
        assert_ne!(
            CacheKey::new("/a.jpg", &p),
            CacheKey::new("/a.jpg", &p.clone().height(10))
        );
    }

    #[test]
    fn parses_focus_coordinates() {
        assert_eq!(
            "0.5x0.25".parse::<FocusPoint>().unwrap(),
            FocusPoint::At { x: 0.5, y: 0.25 }
        );
        assert_eq!("top".parse::<FocusPoint>().unwrap(), FocusPoint::Top);
        assert!("middle".parse::<FocusPoint>().is_err());
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(TransformParams::from_pairs([("blur", "10")]).is_err());
        assert!(TransformParams::from_pairs([("width", "wide")]).is_err());
        assert!(TransformParams::from_pairs([("format", "gif")]).is_err());
    }

    #[test]
    fn auto_and_unset_formats_are_negotiated() {
        assert!(TransformParams::new().wants_negotiated_format());
        assert!(TransformParams::new().format(ImageFormat::Auto).wants_negotiated_format());
        assert!(!TransformParams::new().format(ImageFormat::Png).wants_negotiated_format());
    }
}
