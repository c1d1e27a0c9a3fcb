//! Placement descriptor codec.
//!
//! # Design
//! - A component renders as `stripe_count=..,stripe_size=..,pattern=..[,pool_name=..][,extent_start=..,extent_end=..]`.
//! - Plain descriptors are stored under the `layout` attribute; composite ones under
//!   `layout_comp0..N` with no gaps. Decoding tries `layout` first.
//! - Unknown keys are skipped on decode; a bad value for a known key rejects the component.
//! - Encoding rejects anything decoding would refuse or read back differently.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use nix::errno::Errno;
use thiserror::Error;

use crate::model::AttributeMap;

/// Extent end meaning "to the end of the file".
pub const LAYOUT_EOF: u64 = u64::MAX;

/// Longest pool name the filesystem accepts.
pub const MAX_POOL_NAME_LEN: usize = 15;

const PLAIN_KEY: &str = "layout";
const COMPONENT_PREFIX: &str = "layout_comp";

/// Errors raised by the layout codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// A component string contained a segment without `=`.
    #[error("layout component pair is malformed")]
    MalformedPair {
        /// Offending segment.
        segment: String,
    },
    /// A recognised key carried a value that could not be decoded.
    #[error("layout component value is invalid")]
    InvalidValue {
        /// Key whose value was rejected.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// The attribute map carries no layout attribute.
    #[error("no layout stored with the object")]
    NotFound,
    /// A descriptor's component count does not fit its shape.
    #[error("layout component count is invalid")]
    ComponentCount {
        /// Whether the descriptor is composite.
        composite: bool,
        /// Components carried.
        count: usize,
    },
}

impl LayoutError {
    /// POSIX code reported for this failure.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::NotFound => Errno::ENODATA,
            Self::MalformedPair { .. }
            | Self::InvalidValue { .. }
            | Self::ComponentCount { .. } => Errno::EINVAL,
        }
    }
}

/// Striping pattern of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StripePattern {
    /// Data striped across object targets.
    #[default]
    Raid0,
    /// Data kept on the metadata target.
    Mdt,
    /// Any pattern the codec has no name for.
    Unknown,
}

impl StripePattern {
    /// Name used in the encoded form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raid0 => "raid0",
            Self::Mdt => "mdt",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for StripePattern {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for StripePattern {
    type Err = LayoutError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "raid0" => Ok(Self::Raid0),
            "mdt" => Ok(Self::Mdt),
            "unknown" => Ok(Self::Unknown),
            other => Err(LayoutError::InvalidValue {
                field: "pattern",
                value: other.to_string(),
            }),
        }
    }
}

/// Byte range covered by one component of a composite layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutExtent {
    /// First byte covered.
    pub start: u64,
    /// End of the range, [`LAYOUT_EOF`] for "to end of file".
    pub end: u64,
}

/// One component of a placement descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutComponent {
    /// Stripe count; `None` lets the filesystem spread over every target.
    pub stripe_count: Option<u64>,
    /// Stripe size in bytes.
    pub stripe_size: u64,
    /// Striping pattern.
    pub pattern: StripePattern,
    /// Pool name, empty when unset.
    pub pool_name: String,
    /// Covered range, only meaningful inside a composite descriptor.
    pub extent: Option<LayoutExtent>,
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, LayoutError> {
    value.parse().map_err(|_| LayoutError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

fn check_pool_name(value: &str) -> Result<(), LayoutError> {
    if value.len() > MAX_POOL_NAME_LEN || value.contains([',', '=']) {
        return Err(LayoutError::InvalidValue {
            field: "pool_name",
            value: value.to_string(),
        });
    }
    Ok(())
}

impl LayoutComponent {
    /// Render the component; extent keys are written only for composite descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidValue`] when the pool name cannot be read
    /// back, or when the extent is missing from a composite component or
    /// present on a plain one.
    pub fn encode(&self, composite: bool) -> Result<String, LayoutError> {
        check_pool_name(&self.pool_name)?;
        if composite == self.extent.is_none() {
            return Err(LayoutError::InvalidValue {
                field: "extent",
                value: format!("{:?}", self.extent),
            });
        }
        let stripe_count = self
            .stripe_count
            .map_or_else(|| "-1".to_string(), |count| count.to_string());
        let mut out = format!(
            "stripe_count={stripe_count},stripe_size={},pattern={}",
            self.stripe_size, self.pattern
        );
        if !self.pool_name.is_empty() {
            out.push_str(",pool_name=");
            out.push_str(&self.pool_name);
        }
        if let Some(extent) = self.extent {
            out.push_str(&format!(",extent_start={}", extent.start));
            if extent.end == LAYOUT_EOF {
                out.push_str(",extent_end=EOF");
            } else {
                out.push_str(&format!(",extent_end={}", extent.end));
            }
        }
        Ok(out)
    }

    /// Decode a component string produced by [`LayoutComponent::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError`] when a segment has no `=` or a known key has an invalid value.
    pub fn decode(text: &str) -> Result<Self, LayoutError> {
        let mut component = Self::default();
        let mut start = None;
        let mut end = None;
        for segment in text.split(',').filter(|segment| !segment.is_empty()) {
            let Some((key, value)) = segment.split_once('=') else {
                return Err(LayoutError::MalformedPair {
                    segment: segment.to_string(),
                });
            };
            match key {
                "stripe_count" => {
                    component.stripe_count = if value == "-1" {
                        None
                    } else {
                        Some(parse_u64("stripe_count", value)?)
                    };
                }
                "stripe_size" => component.stripe_size = parse_u64("stripe_size", value)?,
                "pattern" => component.pattern = value.parse()?,
                "pool_name" => {
                    check_pool_name(value)?;
                    component.pool_name = value.to_string();
                }
                "extent_start" => start = Some(parse_u64("extent_start", value)?),
                "extent_end" => {
                    end = Some(if value == "EOF" {
                        LAYOUT_EOF
                    } else {
                        parse_u64("extent_end", value)?
                    });
                }
                _ => {}
            }
        }
        if let (Some(start), Some(end)) = (start, end) {
            component.extent = Some(LayoutExtent { start, end });
        }
        Ok(component)
    }
}

/// Ordered components describing how a file's data is placed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutDescriptor {
    /// Whether the descriptor is composite (per-extent components).
    pub composite: bool,
    /// Components in ascending extent order.
    pub components: Vec<LayoutComponent>,
}

impl LayoutDescriptor {
    /// Single-component, non-composite descriptor.
    #[must_use]
    pub fn plain(mut component: LayoutComponent) -> Self {
        component.extent = None;
        Self {
            composite: false,
            components: vec![component],
        }
    }

    /// Composite descriptor; every component should carry its extent.
    #[must_use]
    pub const fn composite(components: Vec<LayoutComponent>) -> Self {
        Self {
            composite: true,
            components,
        }
    }

    /// Attribute name used for the component at `index`.
    #[must_use]
    pub fn component_key(index: usize) -> String {
        format!("{COMPONENT_PREFIX}{index}")
    }

    /// Record the descriptor into an attribute map.
    ///
    /// Nothing is written unless every component encodes.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ComponentCount`] for an empty descriptor or a
    /// plain one with several components, and the encoding error of the first
    /// invalid component.
    pub fn write_attributes(&self, attrs: &mut AttributeMap) -> Result<(), LayoutError> {
        let count = self.components.len();
        if count == 0 || (!self.composite && count > 1) {
            return Err(LayoutError::ComponentCount {
                composite: self.composite,
                count,
            });
        }
        let encoded = self
            .components
            .iter()
            .map(|component| component.encode(self.composite))
            .collect::<Result<Vec<_>, _>>()?;
        if self.composite {
            for (index, value) in encoded.into_iter().enumerate() {
                attrs.set(Self::component_key(index), value);
            }
        } else if let Some(value) = encoded.into_iter().next() {
            attrs.set(PLAIN_KEY, value);
        }
        Ok(())
    }

    /// Recover a descriptor from an attribute map.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NotFound`] when no layout attribute is present, or the
    /// decoding error of the first invalid component.
    pub fn from_attributes(attrs: &AttributeMap) -> Result<Self, LayoutError> {
        if attrs.is_empty() {
            return Err(LayoutError::NotFound);
        }
        if let Some(value) = attrs.get(PLAIN_KEY) {
            return Ok(Self {
                composite: false,
                components: vec![LayoutComponent::decode(value)?],
            });
        }
        let mut components = Vec::new();
        while let Some(value) = attrs.get(&Self::component_key(components.len())) {
            components.push(LayoutComponent::decode(value)?);
        }
        if components.is_empty() {
            return Err(LayoutError::NotFound);
        }
        Ok(Self::composite(components))
    }
}
