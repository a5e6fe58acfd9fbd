mod common;

use std::collections::HashSet;
use std::io::{self, Cursor, Read};
use std::sync::Arc;

use arcnav::vfs::read_from_any_stream;
use arcnav::{BinaryReader, EntryStream, Error, FormatDescriptor, FormatRegistry, MappedView, Options, ResourceKind};
use common::write;
use tempfile::tempdir;

/// `Read` without `Seek`.
struct Pipe<R>(R);

impl<R: Read> Read for Pipe<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn short_pipe_reads_then_ends() {
    let mut reader = BinaryReader::pipe(Pipe(Cursor::new(vec![1u8, 2, 3])), "pipe").unwrap();
    assert!(!reader.is_seekable());
    assert_eq!(reader.signature().unwrap(), 0);
    assert_eq!(reader.position(), 0);
    assert_eq!(reader.read_u16().unwrap(), 0x0201);
    assert!(matches!(reader.read_u16(), Err(Error::EndOfStream)));
    assert!(matches!(reader.len(), Err(Error::Unsupported(_))));

    let mut reader = BinaryReader::pipe(Pipe(Cursor::new(vec![1u8, 2, 3])), "pipe").unwrap();
    assert!(matches!(reader.read_u32(), Err(Error::EndOfStream)));
    assert_eq!(reader.read_bytes(4).unwrap(), [1, 2, 3]);
}

#[test]
fn frames_read_disjoint_ranges_concurrently() {
    let dir = tempdir().unwrap();
    let data = pattern(64 * 1024);
    let path = write(dir.path(), "blob.bin", &data);
    let view = MappedView::open(&path).unwrap();

    std::thread::scope(|s| {
        let low = s.spawn(|| {
            let mut frame = view.frame();
            (0..32 * 1024u64).step_by(4096).map(|at| frame.read_bytes(at, 4096).unwrap()).collect::<Vec<_>>()
        });
        let high = s.spawn(|| {
            let mut frame = view.frame();
            (32 * 1024..64 * 1024u64).step_by(4096).map(|at| frame.read_bytes(at, 4096).unwrap()).collect::<Vec<_>>()
        });
        assert_eq!(low.join().unwrap().concat(), &data[..32 * 1024]);
        assert_eq!(high.join().unwrap().concat(), &data[32 * 1024..]);
    });
}

#[test]
fn frames_agree_on_every_offset() {
    let data = pattern(10_000);
    let view = MappedView::from_bytes(data.clone(), "mem");
    view.set_frame_size(4096);
    let (mut a, mut b) = (view.frame(), view.frame());
    for at in (0..10_000u64).rev().step_by(997) {
        let x = a.read_bytes(at, 300).unwrap();
        let y = b.read_bytes(at, 300).unwrap();
        assert_eq!(x, y);
        assert_eq!(x, &data[at as usize..(at as usize + 300).min(data.len())]);
    }
}

#[test]
fn scalar_reads_past_the_end_fail() {
    let view = MappedView::from_bytes(vec![0xAAu8; 10], "ten");
    let mut frame = view.frame();
    assert_eq!(frame.read_u64(2).unwrap(), 0xAAAA_AAAA_AAAA_AAAA);
    for at in 3..=10 {
        assert!(matches!(frame.read_u64(at), Err(Error::Bounds)), "offset {at}");
    }
    assert!(matches!(frame.read_u8(11), Err(Error::Bounds)));
    // bulk reads clip instead
    assert_eq!(frame.read_bytes(8, 100).unwrap().len(), 2);
    assert!(frame.read_bytes(10, 4).unwrap().is_empty());
}

#[test]
fn dispose_is_idempotent() {
    let view = MappedView::from_bytes(vec![1u8; 16], "once");
    let slice = view.slice(4, 4).unwrap();
    let mut frame = view.frame();
    assert!(view.dispose());
    assert!(!view.dispose());
    assert!(view.is_disposed());
    assert!(matches!(frame.read_u8(0), Err(Error::Disposed)));
    // sub-views keep their own lifetime
    assert_eq!(slice.to_vec().unwrap(), [1; 4]);
}

#[test]
fn candidates_match_signature_or_extension() {
    let mut registry = FormatRegistry::new();
    let magics = [0x1111u32, 0x2222, 0x3333];
    for (i, ext) in ["aaa", "bbb", "ccc", "ddd"].into_iter().enumerate() {
        let mut format = FormatDescriptor::new(format!("F{i}"), ResourceKind::Archive).with_extension(ext);
        if let Some(&sig) = magics.get(i) {
            format = format.with_signature(sig);
        }
        registry.register(format);
    }

    for &sig in &[0u32, 0x1111, 0x2222, 0x9999] {
        for name in ["x.aaa", "x.bbb", "x.ddd", "x.zzz"] {
            let probe = arcnav::Probe::new(name, sig, 100);
            let ext = name.rsplit('.').next().unwrap_or_default();
            let mut seen = HashSet::new();
            for format in registry.find_formats(probe) {
                assert!(seen.insert(format.tag().to_owned()), "{} yielded twice", format.tag());
                let by_signature = sig != 0 && format.signatures().contains(&sig);
                let headerless = format.signatures().is_empty();
                assert!(
                    by_signature || headerless || format.matches_extension(ext),
                    "{} offered for {name} / {sig:#x}",
                    format.tag()
                );
            }
        }
    }
}

#[test]
fn any_stream_reads_ranges() {
    let data = pattern(1000);
    let options = Options::default();

    let seekable = EntryStream::from(data.clone());
    assert_eq!(read_from_any_stream(seekable, 100, 50, &options).unwrap(), &data[100..150]);

    let sequential = EntryStream::Sequential(Box::new(Pipe(Cursor::new(data.clone()))));
    assert_eq!(read_from_any_stream(sequential, 990, 50, &options).unwrap(), &data[990..]);

    let sequential = EntryStream::Sequential(Box::new(Pipe(Cursor::new(data.clone()))));
    assert!(read_from_any_stream(sequential, 2000, 10, &options).unwrap().is_empty());

    // spilled to a temp file past the threshold
    let small = Options {
        materialize_threshold: 64,
        ..Options::default()
    };
    let sequential = EntryStream::Sequential(Box::new(Pipe(Cursor::new(data.clone()))));
    assert_eq!(read_from_any_stream(sequential, 500, 20, &small).unwrap(), &data[500..520]);
}

#[test]
fn nested_view_shares_the_parent_backing() {
    let inner = common::zip(&[("a.txt", b"alpha")]);
    let outer = common::zip(&[("inner.zip", &inner)]);
    let mut registry = FormatRegistry::new();
    arcnav::formats::register_builtin(&mut registry);
    let options = Options::default();

    let parent = Arc::new(arcnav::ArchiveHandle::open(MappedView::from_bytes(outer, "outer.zip"), &registry, &options).unwrap());
    let entry = parent.entries()[0].clone();
    let view = parent.open_view(&entry).unwrap();
    assert_eq!(view.len(), inner.len() as u64);
    assert_eq!(view.name(), "inner.zip");

    let mut child = arcnav::ArchiveHandle::open(view, &registry, &options).unwrap();
    child.set_parent(&parent, entry, None).unwrap();
    assert!(child.dispose());

    // re-extracted from the still-living parent
    let mut out = String::new();
    child.open_entry(&child.entries()[0]).unwrap().read_to_string(&mut out).unwrap();
    assert_eq!(out, "alpha");
}
