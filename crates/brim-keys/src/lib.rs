//! Key transformation pipeline.
//!
//! Remote object keys are opaque strings; before they can be used as
//! relative paths under the mirror root they pass through an ordered
//! sequence of pure transforms bound once from configuration:
//!
//! 1. [`KeyTransform::StripRootPrefix`] — remove leading separators and
//!    Windows drive prefixes so keys cannot escape the mirror root.
//! 2. [`KeyTransform::NormalizeSeparators`] — rewrite `/` and `\` to the
//!    host platform's separator so directory boundaries in keys match the
//!    file system's notion of a directory.
//! 3. [`KeyTransform::UnicodeNormalize`] — apply one of the four Unicode
//!    normalization forms. The same pipeline runs over local entry names
//!    before sorting, so both streams compare under the same form.
//!
//! Every transform is idempotent; applying the pipeline twice yields the
//! same result as applying it once. Keys that reduce to the empty string
//! or to a bare separator are dropped by [`KeyPipeline::apply`].

use std::fmt;
use std::str::FromStr;

use unicode_normalization::UnicodeNormalization;

/// Which separator convention the host file system uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    /// Forward-slash separators.
    Posix,
    /// Backslash separators.
    Windows,
}

/// Platform facts computed once at start-up and passed to transformers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformProfile {
    /// Separator convention.
    pub kind: PlatformKind,
}

impl PlatformProfile {
    /// Profile of the compiling host.
    pub fn host() -> Self {
        #[cfg(windows)]
        let kind = PlatformKind::Windows;
        #[cfg(not(windows))]
        let kind = PlatformKind::Posix;
        Self { kind }
    }

    /// A fixed POSIX profile (used by tests for deterministic behavior).
    pub fn posix() -> Self {
        Self {
            kind: PlatformKind::Posix,
        }
    }

    /// A fixed Windows profile.
    pub fn windows() -> Self {
        Self {
            kind: PlatformKind::Windows,
        }
    }

    /// The directory separator for this profile.
    pub fn separator(&self) -> char {
        match self.kind {
            PlatformKind::Posix => '/',
            PlatformKind::Windows => '\\',
        }
    }
}

/// Unicode normalization form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationForm {
    /// Canonical composition.
    Nfc,
    /// Canonical decomposition.
    Nfd,
    /// Compatibility composition.
    Nfkc,
    /// Compatibility decomposition.
    Nfkd,
}

impl NormalizationForm {
    fn apply(self, s: &str) -> String {
        match self {
            Self::Nfc => s.nfc().collect(),
            Self::Nfd => s.nfd().collect(),
            Self::Nfkc => s.nfkc().collect(),
            Self::Nfkd => s.nfkd().collect(),
        }
    }
}

impl FromStr for NormalizationForm {
    type Err = UnknownForm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NFC" => Ok(Self::Nfc),
            "NFD" => Ok(Self::Nfd),
            "NFKC" => Ok(Self::Nfkc),
            "NFKD" => Ok(Self::Nfkd),
            _ => Err(UnknownForm(s.to_owned())),
        }
    }
}

impl fmt::Display for NormalizationForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nfc => "NFC",
            Self::Nfd => "NFD",
            Self::Nfkc => "NFKC",
            Self::Nfkd => "NFKD",
        };
        f.write_str(name)
    }
}

/// Error for an unrecognized normalization form name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownForm(pub String);

impl fmt::Display for UnknownForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown normalization form: {:?} (expected NFC, NFD, NFKC or NFKD)", self.0)
    }
}

impl std::error::Error for UnknownForm {}

/// One step of the key transformation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransform {
    /// Repeatedly strip a leading `/` or `\`, or a Windows drive prefix
    /// matching `[A-Za-z]:[/\]`, until no such prefix remains.
    StripRootPrefix,
    /// Rewrite separators to the profile's convention: `\` becomes `/` on
    /// POSIX hosts, `/` becomes `\` on Windows hosts.
    NormalizeSeparators(PlatformProfile),
    /// Apply a Unicode normalization form.
    UnicodeNormalize(NormalizationForm),
}

impl KeyTransform {
    /// Apply this transform to a key.
    pub fn apply(&self, key: &str) -> String {
        match self {
            Self::StripRootPrefix => strip_root_prefix(key).to_owned(),
            Self::NormalizeSeparators(profile) => match profile.kind {
                PlatformKind::Posix => key.replace('\\', "/"),
                PlatformKind::Windows => key.replace('/', "\\"),
            },
            Self::UnicodeNormalize(form) => form.apply(key),
        }
    }
}

/// Strip leading separators and drive prefixes. Returns a suffix of the
/// input, so this is allocation-free.
fn strip_root_prefix(mut key: &str) -> &str {
    loop {
        if let Some(rest) = key.strip_prefix('/').or_else(|| key.strip_prefix('\\')) {
            key = rest;
            continue;
        }
        let bytes = key.as_bytes();
        if bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'/' || bytes[2] == b'\\')
        {
            key = &key[3..];
            continue;
        }
        return key;
    }
}

/// A configuration-bound ordered sequence of transforms.
#[derive(Debug, Clone, Default)]
pub struct KeyPipeline {
    transforms: Vec<KeyTransform>,
}

impl KeyPipeline {
    /// Build a pipeline from an explicit transform list.
    pub fn new(transforms: Vec<KeyTransform>) -> Self {
        Self { transforms }
    }

    /// Build the standard pipeline from mirror options.
    ///
    /// `strip_root` and `normalize_separators` default to on; the
    /// normalization form is optional.
    pub fn from_options(
        profile: PlatformProfile,
        strip_root: bool,
        normalize_separators: bool,
        form: Option<NormalizationForm>,
    ) -> Self {
        let mut transforms = Vec::new();
        if strip_root {
            transforms.push(KeyTransform::StripRootPrefix);
        }
        if normalize_separators {
            transforms.push(KeyTransform::NormalizeSeparators(profile));
        }
        if let Some(form) = form {
            transforms.push(KeyTransform::UnicodeNormalize(form));
        }
        Self { transforms }
    }

    /// Apply all transforms left-to-right.
    ///
    /// Returns `None` when the key reduces to the empty string or to a
    /// bare separator; such keys have no sensible place in the mirror
    /// tree and are dropped (logged by the caller that owns the key).
    pub fn apply(&self, key: &str) -> Option<String> {
        let mut out = key.to_owned();
        for transform in &self.transforms {
            out = transform.apply(&out);
        }
        if out.is_empty() || out == "/" || out == "\\" {
            return None;
        }
        Some(out)
    }

    /// Whether the pipeline contains no transforms.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}
