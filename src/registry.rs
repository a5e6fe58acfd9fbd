//! Format descriptors and candidate resolution.
//!
//! The registry never runs decoders itself. Given a [`Probe`] (file name,
//! 4-byte signature, size, and the enclosing archive's contained-formats
//! hint) it produces an ordered list of descriptors worth trying, and
//! [`ArchiveHandle::open`](crate::ArchiveHandle::open) walks that list.
//!
//! ## Candidate ordering
//!
//! Candidates come from the signature index. Within one pass they are
//! sorted, stably, by these keys (all descending):
//!
//! | Key | Applied when |
//! |-----|--------------|
//! | declared priority | always |
//! | extension matches the probe name | more than one candidate |
//! | tag is in the contained-formats hint | a hint is present |
//! | category rank (archive 4, audio 3, video 2, other 1, image 0) | size above the archive-preference threshold |
//!
//! When the signature pass is exhausted and the signature was not 0, a
//! second pass runs with signature 0: extension matches plus headerless
//! descriptors, minus everything already yielded.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::archive::ArchiveDecoder;
use crate::options::ARCHIVE_PREFERENCE_THRESHOLD;
use crate::vfs::path;

/// Little-endian signature of a 4-byte ASCII magic.
pub const fn signature(magic: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*magic)
}

/// Little-endian signature of the first four bytes of `magic`, zero padded.
pub fn signature_of(magic: &str) -> u32 {
    let mut bytes = [0u8; 4];
    for (dst, src) in bytes.iter_mut().zip(magic.bytes()) {
        *dst = src;
    }
    u32::from_le_bytes(bytes)
}

/// Category of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResourceKind {
    Archive,
    Image,
    Audio,
    Video,
    Script,
    Other,
}

impl ResourceKind {
    /// Rank used to prefer containers over images for large files.
    pub fn rank(self) -> u8 {
        match self {
            ResourceKind::Archive => 4,
            ResourceKind::Audio => 3,
            ResourceKind::Video => 2,
            ResourceKind::Image => 0,
            ResourceKind::Script | ResourceKind::Other => 1,
        }
    }

    /// Entry type tag for files of this kind.
    pub fn type_tag(self) -> &'static str {
        match self {
            ResourceKind::Archive => "archive",
            ResourceKind::Image => "image",
            ResourceKind::Audio => "audio",
            ResourceKind::Video => "video",
            ResourceKind::Script => "script",
            ResourceKind::Other => "",
        }
    }

    /// Parse a type tag, accepting the usual synonyms.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        match tag {
            "archive" | "data" => Some(ResourceKind::Archive),
            "image" => Some(ResourceKind::Image),
            "audio" => Some(ResourceKind::Audio),
            "video" => Some(ResourceKind::Video),
            "script" | "text" | "config" => Some(ResourceKind::Script),
            _ => None,
        }
    }
}

/// Capability flags of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatFlags {
    /// Entry names carry directory structure.
    pub hierarchic: bool,
    /// The format can be written by some external tool chain.
    pub can_write: bool,
}

/// Description of one format: how to recognize it and, for archives, how to
/// open it.
pub struct FormatDescriptor {
    tag: String,
    description: String,
    kind: ResourceKind,
    signatures: Vec<u32>,
    extensions: Vec<String>,
    priority: i32,
    flags: FormatFlags,
    contained_formats: Vec<String>,
    decoder: Option<Arc<dyn ArchiveDecoder>>,
}

impl FormatDescriptor {
    pub fn new(tag: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            tag: tag.into(),
            description: String::new(),
            kind,
            signatures: Vec::new(),
            extensions: Vec::new(),
            priority: 0,
            flags: FormatFlags::default(),
            contained_formats: Vec::new(),
            decoder: None,
        }
    }

    /// Shorthand for an archive format backed by `decoder`.
    pub fn archive(tag: impl Into<String>, decoder: impl ArchiveDecoder + 'static) -> Self {
        Self::new(tag, ResourceKind::Archive).with_decoder(decoder)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_signature(mut self, signature: u32) -> Self {
        self.signatures.push(signature);
        self
    }

    pub fn with_signatures(mut self, signatures: impl IntoIterator<Item = u32>) -> Self {
        self.signatures.extend(signatures);
        self
    }

    /// Add a file extension (without the dot, case-insensitive).
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extensions.push(extension.trim_start_matches('.').to_ascii_lowercase());
        self
    }

    pub fn with_extensions<'a>(self, extensions: impl IntoIterator<Item = &'a str>) -> Self {
        extensions.into_iter().fold(self, |d, ext| d.with_extension(ext))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn hierarchic(mut self, hierarchic: bool) -> Self {
        self.flags.hierarchic = hierarchic;
        self
    }

    pub fn can_write(mut self, can_write: bool) -> Self {
        self.flags.can_write = can_write;
        self
    }

    /// Tags of formats typically found inside archives of this format.
    pub fn with_contained<'a>(mut self, tags: impl IntoIterator<Item = &'a str>) -> Self {
        self.contained_formats.extend(tags.into_iter().map(str::to_owned));
        self
    }

    pub fn with_decoder(mut self, decoder: impl ArchiveDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Entry type tag of files in this format.
    pub fn type_tag(&self) -> &'static str {
        self.kind.type_tag()
    }

    /// Declared signatures; empty means extension-only.
    pub fn signatures(&self) -> &[u32] {
        &self.signatures
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn flags(&self) -> FormatFlags {
        self.flags
    }

    pub fn is_hierarchic(&self) -> bool {
        self.flags.hierarchic
    }

    pub fn contained_formats(&self) -> &[String] {
        &self.contained_formats
    }

    pub fn decoder(&self) -> Option<&Arc<dyn ArchiveDecoder>> {
        self.decoder.as_ref()
    }

    /// Whether `extension` (lowercase, without dot) is one of ours.
    pub fn matches_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }
}

impl fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("signatures", &self.signatures)
            .field("extensions", &self.extensions)
            .field("priority", &self.priority)
            .field("decoder", &self.decoder.is_some())
            .finish()
    }
}

/// Input of [`FormatRegistry::find_formats`].
#[derive(Debug, Clone, Copy)]
pub struct Probe<'a> {
    pub name: &'a str,
    pub signature: u32,
    pub size: u64,
    /// Contained-formats hint of the enclosing archive.
    pub contained: &'a [String],
}

impl<'a> Probe<'a> {
    pub fn new(name: &'a str, signature: u32, size: u64) -> Self {
        Self {
            name,
            signature,
            size,
            contained: &[],
        }
    }

    pub fn with_hint(mut self, contained: &'a [String]) -> Self {
        self.contained = contained;
        self
    }

    fn extension(&self) -> String {
        path::extension(self.name)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }
}

/// Magics recognized before consulting the table: `(mask, value, tag)`.
const COMMON_MAGICS: &[(u32, u32, &str)] = &[
    (0xFFFF_FFFF, 0x5367_674F, "OGG"),
    (0xFFFF_FFFF, 0x4646_4952, "WAV"),
    (0x0000_FFFF, 0x0000_4D42, "BMP"),
    (0xFFFF_FFFF, 0x474E_5089, "PNG"),
    (0xFFFF_FFFF, 0xE0FF_D8FF, "JPEG"),
    (0xFFFF_FFFF, 0xE1FF_D8FF, "JPEG"),
    (0xFFFF_FFFF, 0x3846_4947, "GIF"),
    (0xFFFF_FFFF, 0x3946_4947, "GIF"),
    (0xFFFF_FFFF, 0x002A_4949, "TIFF"),
    (0xFFFF_FFFF, 0x2A00_4D4D, "TIFF"),
    (0xFFFF_FFFF, 0x2053_4444, "DDS"),
    (0xFFFF_FFFF, 0x0333_4449, "MP3"),
    (0x0000_FFE0, 0x0000_FFE0, "MP3"),
    (0xFFFF_FFFF, 0x4361_4C66, "FLAC"),
    (0xFFFF_FFFF, 0x0403_4B50, "ZIP"),
    (0xFFFF_FFFF, 0x0605_4B50, "ZIP"),
    (0xFFFF_FFFF, 0x2172_6152, "7Z/OTHERS"),
    (0xFFFF_FFFF, 0xAFBC_7A37, "7Z/OTHERS"),
    (0x00FF_FFFF, 0x0068_5A42, "7Z/OTHERS"),
    (0x0000_FFFF, 0x0000_8B1F, "7Z/OTHERS"),
];

/// Type tags for extensions no registered format claims.
fn builtin_type(extension: &str) -> Option<&'static str> {
    let tag = match extension.to_ascii_lowercase().as_str() {
        "ini" | "cfg" | "conf" | "lua" | "rb" | "py" | "js" | "tjs" | "vbs" => "script",
        "txt" | "html" | "xml" | "json" | "csv" | "log" | "md" => "script",
        "png" | "jpg" | "jpeg" | "bmp" | "tga" | "gif" | "dds" | "psd" | "tif" | "tiff"
        | "webp" => "image",
        "wmv" | "mp4" | "avi" | "mov" | "mkv" | "webm" | "flv" => "video",
        "mp3" | "wav" | "ogg" | "flac" | "m4a" | "wma" | "aac" => "audio",
        "fbx" | "obj" | "dae" | "3ds" | "blend" => "",
        "dll" | "exe" | "so" | "dylib" => "archive",
        _ => return None,
    };
    Some(tag)
}

/// Table of registered formats indexed by signature and extension.
pub struct FormatRegistry {
    formats: Vec<Arc<FormatDescriptor>>,
    by_signature: HashMap<u32, Vec<usize>>,
    by_extension: HashMap<String, Vec<usize>>,
    archive_preference_threshold: u64,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::with_threshold(ARCHIVE_PREFERENCE_THRESHOLD)
    }

    /// Registry whose category preference kicks in above `threshold` bytes.
    pub fn with_threshold(threshold: u64) -> Self {
        Self {
            formats: Vec::new(),
            by_signature: HashMap::new(),
            by_extension: HashMap::new(),
            archive_preference_threshold: threshold,
        }
    }

    /// Add a format. Descriptors without signatures are indexed under 0.
    pub fn register(&mut self, descriptor: FormatDescriptor) -> Arc<FormatDescriptor> {
        let index = self.formats.len();
        let descriptor = Arc::new(descriptor);
        if descriptor.signatures.is_empty() {
            self.by_signature.entry(0).or_default().push(index);
        }
        for &sig in &descriptor.signatures {
            let bucket = self.by_signature.entry(sig).or_default();
            if !bucket.contains(&index) {
                bucket.push(index);
            }
        }
        for ext in &descriptor.extensions {
            self.by_extension.entry(ext.clone()).or_default().push(index);
        }
        self.formats.push(Arc::clone(&descriptor));
        descriptor
    }

    /// Map an extra `extension` to the registered format `target_tag`.
    ///
    /// `kind` restricts the target to one category. Returns whether a target
    /// was found.
    pub fn alias(&mut self, extension: &str, kind: Option<ResourceKind>, target_tag: &str) -> bool {
        let target = self.formats.iter().position(|f| {
            f.tag == target_tag && kind.is_none_or(|k| f.kind == k)
        });
        let Some(index) = target else {
            tracing::debug!(extension, target_tag, "alias target not registered");
            return false;
        };
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        let bucket = self.by_extension.entry(ext).or_default();
        if !bucket.contains(&index) {
            bucket.push(index);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// All formats in registration order.
    pub fn formats(&self) -> impl Iterator<Item = &Arc<FormatDescriptor>> {
        self.formats.iter()
    }

    /// Format with the given tag (case-insensitive).
    pub fn by_tag(&self, tag: &str) -> Option<&Arc<FormatDescriptor>> {
        self.formats.iter().find(|f| f.tag.eq_ignore_ascii_case(tag))
    }

    /// Archive format with the given tag.
    pub fn archive_by_tag(&self, tag: &str) -> Option<&Arc<FormatDescriptor>> {
        self.formats
            .iter()
            .find(|f| f.decoder.is_some() && f.tag.eq_ignore_ascii_case(tag))
    }

    pub fn has_format(&self, tag: &str) -> bool {
        self.by_tag(tag).is_some()
    }

    pub fn lookup_signature(&self, signature: u32) -> impl Iterator<Item = &Arc<FormatDescriptor>> {
        self.indexed(self.by_signature.get(&signature))
    }

    pub fn lookup_extension(&self, extension: &str) -> impl Iterator<Item = &Arc<FormatDescriptor>> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.indexed(self.by_extension.get(&ext))
    }

    /// Formats claiming the extension of `filename`.
    pub fn lookup_file_name(&self, filename: &str) -> impl Iterator<Item = &Arc<FormatDescriptor>> {
        let bucket = path::extension(filename)
            .filter(|ext| !ext.is_empty())
            .and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()));
        self.indexed(bucket)
    }

    fn indexed<'s>(&'s self, bucket: Option<&'s Vec<usize>>) -> impl Iterator<Item = &'s Arc<FormatDescriptor>> {
        bucket
            .into_iter()
            .flatten()
            .map(move |&i| &self.formats[i])
    }

    /// Ordered candidates of every kind for `probe`.
    pub fn find_formats<'s>(&'s self, probe: Probe<'s>) -> FindFormats<'s> {
        FindFormats::new(self, probe, |_| true)
    }

    /// Ordered candidates that can be opened as archives.
    pub fn find_archive_formats<'s>(&'s self, probe: Probe<'s>) -> FindFormats<'s> {
        FindFormats::new(self, probe, |f| f.decoder.is_some())
    }

    /// Sort one pass of candidates.
    fn order(&self, mut candidates: Vec<usize>, probe: &Probe<'_>, extension: &str) -> Vec<usize> {
        let multiple = candidates.len() > 1;
        let large = probe.size > self.archive_preference_threshold;
        let key = |&i: &usize| {
            let f = &self.formats[i];
            let ext_match = multiple && !extension.is_empty() && f.matches_extension(extension);
            let hinted = probe.contained.iter().any(|t| *t == f.tag);
            let rank = if large { f.kind.rank() } else { 0 };
            (f.priority, ext_match, hinted, rank)
        };
        candidates.sort_by(|a, b| key(b).cmp(&key(a)));
        candidates
    }

    /// Guess the format of a raw signature without a file name.
    ///
    /// A handful of very common magics are checked first; otherwise the
    /// signature index must name exactly one format, and an ambiguous match
    /// yields `None`.
    pub fn detect_file_type(&self, signature: u32) -> Option<&Arc<FormatDescriptor>> {
        if signature == 0 {
            return None;
        }
        for &(mask, value, tag) in COMMON_MAGICS {
            if signature & mask == value {
                if let Some(format) = self.by_tag(tag) {
                    return Some(format);
                }
                break;
            }
        }
        let mut matches = self.lookup_signature(signature);
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Entry type tag for `filename`.
    ///
    /// Registered formats claiming the extension win, preferring tags in
    /// `preferred` and, above the archive-preference threshold, containers
    /// over images. Extensions nobody claims fall back to a built-in table.
    pub fn type_from_name(&self, filename: &str, preferred: &[String], file_size: u64) -> String {
        let mut formats: Vec<&Arc<FormatDescriptor>> = self.lookup_file_name(filename).collect();
        if !formats.is_empty() {
            if file_size > self.archive_preference_threshold {
                formats.sort_by_key(|f| std::cmp::Reverse(f.kind.rank()));
            }
            if !preferred.is_empty() {
                formats.sort_by_key(|f| std::cmp::Reverse(preferred.contains(&f.tag)));
            }
            let tag = formats[0].type_tag();
            if !tag.is_empty() {
                return tag.to_owned();
            }
        }
        path::extension(filename)
            .and_then(builtin_type)
            .unwrap_or("")
            .to_owned()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.formats.len())
            .field("archive_preference_threshold", &self.archive_preference_threshold)
            .finish()
    }
}

/// Iterator returned by [`FormatRegistry::find_formats`].
///
/// The signature pass is ordered when iteration starts; the signature-0
/// pass is only computed if the first one is exhausted.
pub struct FindFormats<'s> {
    registry: &'s FormatRegistry,
    probe: Probe<'s>,
    extension: String,
    filter: fn(&FormatDescriptor) -> bool,
    pass: Vec<usize>,
    cursor: usize,
    tried: HashSet<usize>,
    fallback_done: bool,
}

impl<'s> FindFormats<'s> {
    fn new(registry: &'s FormatRegistry, probe: Probe<'s>, filter: fn(&FormatDescriptor) -> bool) -> Self {
        let extension = probe.extension();
        let fallback_done = probe.signature == 0;
        let candidates = if fallback_done {
            // No header: extension matches join the headerless formats
            // right away.
            Self::headerless(registry, &extension, filter, &HashSet::new())
        } else {
            registry
                .by_signature
                .get(&probe.signature)
                .into_iter()
                .flatten()
                .copied()
                .filter(|&i| filter(&registry.formats[i]))
                .collect()
        };
        let candidates = registry.order(candidates, &probe, &extension);
        Self {
            registry,
            probe,
            extension,
            filter,
            pass: candidates,
            cursor: 0,
            tried: HashSet::new(),
            fallback_done,
        }
    }

    /// Extension matches plus signature-0 formats, in registration order.
    fn headerless(
        registry: &FormatRegistry,
        extension: &str,
        filter: fn(&FormatDescriptor) -> bool,
        tried: &HashSet<usize>,
    ) -> Vec<usize> {
        let mut set: Vec<usize> = registry
            .by_signature
            .get(&0)
            .into_iter()
            .flatten()
            .chain(registry.by_extension.get(extension).into_iter().flatten())
            .copied()
            .filter(|i| !tried.contains(i) && filter(&registry.formats[*i]))
            .collect();
        set.sort_unstable();
        set.dedup();
        set
    }
}

impl<'s> Iterator for FindFormats<'s> {
    type Item = &'s Arc<FormatDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(&index) = self.pass.get(self.cursor) {
                self.cursor += 1;
                self.tried.insert(index);
                return Some(&self.registry.formats[index]);
            }
            if self.fallback_done {
                return None;
            }
            self.fallback_done = true;
            let candidates = Self::headerless(self.registry, &self.extension, self.filter, &self.tried);
            self.pass = self.registry.order(candidates, &self.probe, &self.extension);
            self.cursor = 0;
        }
    }
}
