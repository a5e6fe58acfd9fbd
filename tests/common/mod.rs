//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arcnav::formats::zip::ZipDecoder;
use arcnav::registry::signature;
use arcnav::{
    ArchiveDecoder, ArchiveHandle, ArchiveIndex, Entry, EntryStream, FormatDescriptor, FormatRegistry, MappedView,
    ProbeContext, Result,
};

/// ZIP image with every file stored uncompressed.
pub fn zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data) in files {
        let local = out.len() as u32;
        let size = (data.len() as u32).to_le_bytes();
        let name_len = (name.len() as u16).to_le_bytes();

        out.extend_from_slice(b"PK\x03\x04\x14\x00\x00\x08\x00\x00");
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&size);
        out.extend_from_slice(&size);
        out.extend_from_slice(&name_len);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);

        central.extend_from_slice(b"PK\x01\x02\x14\x00\x14\x00\x00\x08\x00\x00");
        central.extend_from_slice(&[0; 8]);
        central.extend_from_slice(&size);
        central.extend_from_slice(&size);
        central.extend_from_slice(&name_len);
        central.extend_from_slice(&[0; 12]);
        central.extend_from_slice(&local.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }
    let directory = out.len() as u32;
    let count = (files.len() as u16).to_le_bytes();
    out.extend_from_slice(&central);
    out.extend_from_slice(b"PK\x05\x06\x00\x00\x00\x00");
    out.extend_from_slice(&count);
    out.extend_from_slice(&count);
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&directory.to_le_bytes());
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, data).unwrap();
    path
}

/// ZIP decoder that counts successful parses.
pub struct CountingZip {
    pub opened: Arc<AtomicUsize>,
}

impl ArchiveDecoder for CountingZip {
    fn try_open(&self, view: &MappedView, cx: &ProbeContext<'_>) -> Result<Option<ArchiveIndex>> {
        let index = ZipDecoder.try_open(view, cx)?;
        if index.is_some() {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }
        Ok(index)
    }

    fn open_entry(&self, arc: &ArchiveHandle, entry: &Entry) -> Result<EntryStream> {
        ZipDecoder.open_entry(arc, entry)
    }
}

/// Registry holding only [`CountingZip`], plus the counter it bumps.
pub fn counting_registry() -> (FormatRegistry, Arc<AtomicUsize>) {
    let opened = Arc::new(AtomicUsize::new(0));
    let mut registry = FormatRegistry::new();
    registry.register(
        FormatDescriptor::archive(
            "ZIP",
            CountingZip {
                opened: Arc::clone(&opened),
            },
        )
        .with_signatures([signature(b"PK\x03\x04"), signature(b"PK\x05\x06")])
        .with_extension("zip")
        .hierarchic(true),
    );
    (registry, opened)
}

/// "TINY" format: magic, then a single `(u32 offset, u32 size)` entry.
pub struct TinyDecoder;

impl ArchiveDecoder for TinyDecoder {
    fn try_open(&self, view: &MappedView, cx: &ProbeContext<'_>) -> Result<Option<ArchiveIndex>> {
        let mut frame = view.frame();
        if !frame.ascii_equal(0, "TINY")? {
            return Ok(None);
        }
        let offset = frame.read_u32(4)? as u64;
        let size = frame.read_u32(8)? as u64;
        Ok(Some(ArchiveIndex::new(vec![cx.create_entry("only.bin").at(offset, size)])))
    }
}

pub fn tiny_registry() -> FormatRegistry {
    let mut registry = FormatRegistry::new();
    registry.register(
        FormatDescriptor::archive("TINY", TinyDecoder)
            .with_signature(signature(b"TINY"))
            .with_extension("tiny"),
    );
    registry
}

/// Install a test subscriber once; `RUST_LOG` controls the output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
