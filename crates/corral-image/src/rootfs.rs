//! Root filesystem provisioning.
//!
//! A container's rootfs is one flattened archive unpacked into a
//! per-container directory. Entries are streamed one by one so a conflicting
//! symlink does not abort the rest of the tree. Nothing is written through a
//! path that resolves outside the rootfs.

use std::io::Read;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use corral_common::context::OpContext;
use corral_common::error::{CorralError, Result};
use tar::EntryType;

/// Counts of what an extraction produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Directories created.
    pub directories: usize,
    /// Regular files written.
    pub files: usize,
    /// Symlinks created.
    pub symlinks: usize,
    /// Entries skipped: unsupported types and failed symlinks.
    pub skipped: usize,
}

/// Unpacks `archive` into `target`.
///
/// Supports both plain `.tar` and gzip-compressed `.tar.gz` / `.tgz`
/// archives. Directories are created recursively, regular files keep their
/// recorded mode, and symlinks point at their recorded target. A symlink
/// that cannot be created is logged and skipped, as is any entry whose parent
/// resolves outside `target` through a symlink. A regular file replaces a
/// symlink already at its path instead of writing through it. Devices, fifos,
/// and hard links are ignored. A failure mid-stream leaves a partial tree
/// behind.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or read, if a directory
/// or file cannot be created, or `CorralError::Cancelled` if `ctx` is done
/// between two entries.
pub fn extract(ctx: &OpContext, archive: &Path, target: &Path) -> Result<ExtractSummary> {
    tracing::info!(
        archive = %archive.display(),
        target = %target.display(),
        "extracting rootfs"
    );

    create_dir_tree(target)?;
    let root = target
        .canonicalize()
        .map_err(|e| CorralError::io(target, e))?;
    let file = std::fs::File::open(archive).map_err(|e| CorralError::io(archive, e))?;
    let summary = if is_gzip_archive(archive) {
        unpack(ctx, tar::Archive::new(flate2::read::GzDecoder::new(file)), archive, &root)?
    } else {
        unpack(ctx, tar::Archive::new(file), archive, &root)?
    };

    tracing::info!(
        files = summary.files,
        directories = summary.directories,
        symlinks = summary.symlinks,
        skipped = summary.skipped,
        "rootfs extracted"
    );
    Ok(summary)
}

fn unpack<R: Read>(
    ctx: &OpContext,
    mut archive: tar::Archive<R>,
    archive_path: &Path,
    target: &Path,
) -> Result<ExtractSummary> {
    let mut summary = ExtractSummary::default();
    let entries = archive
        .entries()
        .map_err(|e| CorralError::io(archive_path, e))?;

    for entry in entries {
        ctx.check("extract rootfs")?;
        let mut entry = entry.map_err(|e| CorralError::io(archive_path, e))?;
        let rel = entry
            .path()
            .map_err(|e| CorralError::io(archive_path, e))?
            .into_owned();
        let Some(dest) = safe_join(target, &rel) else {
            tracing::warn!(entry = %rel.display(), "entry escapes rootfs, skipped");
            summary.skipped += 1;
            continue;
        };
        let kind = entry.header().entry_type();
        let anchor = if kind == EntryType::Directory {
            dest.as_path()
        } else {
            dest.parent().unwrap_or(target)
        };
        if !resolves_within(target, anchor) {
            tracing::warn!(entry = %rel.display(), "entry resolves outside rootfs, skipped");
            summary.skipped += 1;
            continue;
        }

        match kind {
            EntryType::Directory => {
                create_dir_tree(&dest)?;
                summary.directories += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                create_dir_tree(anchor)?;
                let mode = entry
                    .header()
                    .mode()
                    .map_err(|e| CorralError::io(archive_path, e))?;
                write_file(&mut entry, &dest, mode)?;
                summary.files += 1;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(|e| CorralError::io(archive_path, e))?;
                let created = link.map_or_else(
                    || Err(std::io::Error::other("symlink without target")),
                    |link| std::os::unix::fs::symlink(&link, &dest),
                );
                match created {
                    Ok(()) => summary.symlinks += 1,
                    Err(e) => {
                        tracing::warn!(path = %dest.display(), error = %e, "symlink skipped");
                        summary.skipped += 1;
                    }
                }
            }
            _ => summary.skipped += 1,
        }
    }
    Ok(summary)
}

fn write_file<R: Read>(entry: &mut R, dest: &Path, mode: u32) -> Result<()> {
    // A symlink left by an earlier entry is replaced, not followed.
    if std::fs::symlink_metadata(dest).is_ok_and(|meta| meta.file_type().is_symlink()) {
        std::fs::remove_file(dest).map_err(|e| CorralError::io(dest, e))?;
    }
    let mut out = std::fs::File::create(dest).map_err(|e| CorralError::io(dest, e))?;
    let _ = std::io::copy(entry, &mut out).map_err(|e| CorralError::io(dest, e))?;
    // The umask applied at creation must not narrow the recorded mode.
    out.set_permissions(std::fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| CorralError::io(dest, e))
}

fn create_dir_tree(path: &Path) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|e| CorralError::io(path, e))
}

/// Joins an archive path below `root`, refusing absolute components and `..`.
fn safe_join(root: &Path, rel: &Path) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Whether the deepest existing ancestor of `path` resolves below `root`.
///
/// `root` must already be canonical. A dangling symlink counts as outside.
fn resolves_within(root: &Path, path: &Path) -> bool {
    let mut existing = path;
    while std::fs::symlink_metadata(existing).is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return false,
        }
    }
    existing
        .canonicalize()
        .is_ok_and(|real| real.starts_with(root))
}

/// Determines whether the archive is gzip-compressed based on extension.
fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_file<W: std::io::Write>(
        builder: &mut tar::Builder<W>,
        path: &str,
        data: &[u8],
        mode: u32,
    ) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, data)
            .expect("append file");
    }

    fn append_dir<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, path, std::io::empty())
            .expect("append dir");
    }

    fn append_symlink<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, target: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, path, target)
            .expect("append symlink");
    }

    /// Archive with a symlink whose path is already taken by a regular file.
    fn conflicting_archive(dir: &Path) -> PathBuf {
        let path = dir.join("rootfs.tar");
        let file = std::fs::File::create(&path).expect("create tar");
        let mut builder = tar::Builder::new(file);
        append_dir(&mut builder, "bin/");
        append_file(&mut builder, "bin/busybox", b"#!/bin/true\n", 0o755);
        append_file(&mut builder, "bin/sh", b"not a link", 0o700);
        append_symlink(&mut builder, "bin/sh", "busybox");
        append_symlink(&mut builder, "bin/ls", "busybox");
        append_file(&mut builder, "etc/hostname", b"corral\n", 0o644);
        builder.finish().expect("finish tar");
        path
    }

    #[test]
    fn conflicting_symlink_does_not_abort_extraction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = conflicting_archive(dir.path());
        let target = dir.path().join("rootfs");

        let summary = extract(&OpContext::background(), &archive, &target).expect("extract");
        assert_eq!(summary.symlinks, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.files, 3);

        let mode = |p: &str| {
            std::fs::metadata(target.join(p))
                .expect("metadata")
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode("bin/busybox"), 0o755);
        assert_eq!(mode("bin/sh"), 0o700);
        assert_eq!(mode("etc/hostname"), 0o644);
        assert_eq!(
            std::fs::read_to_string(target.join("bin/sh")).expect("read"),
            "not a link"
        );
        assert_eq!(
            std::fs::read_link(target.join("bin/ls")).expect("link"),
            PathBuf::from("busybox")
        );
        assert_eq!(
            std::fs::read_to_string(target.join("etc/hostname")).expect("read"),
            "corral\n"
        );
    }

    #[test]
    fn gzip_archives_are_detected_and_unpacked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rootfs.tar.gz");
        let file = std::fs::File::create(&path).expect("create");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_file(&mut builder, "hello.txt", b"hello from gzipped rootfs", 0o600);
        let encoder = builder.into_inner().expect("finish tar");
        let _ = encoder.finish().expect("finish gzip");

        let target = dir.path().join("out");
        let summary = extract(&OpContext::background(), &path, &target).expect("extract");
        assert_eq!(summary.files, 1);
        let content = std::fs::read_to_string(target.join("hello.txt")).expect("read");
        assert_eq!(content, "hello from gzipped rootfs");
    }

    #[test]
    fn unsupported_entries_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fifo.tar");
        let file = std::fs::File::create(&path).expect("create");
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Fifo);
        header.set_size(0);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "run/pipe", std::io::empty())
            .expect("append fifo");
        append_file(&mut builder, "ok", b"ok", 0o644);
        builder.finish().expect("finish");

        let target = dir.path().join("out");
        let summary = extract(&OpContext::background(), &path, &target).expect("extract");
        assert_eq!(summary.skipped, 1);
        assert!(!target.join("run/pipe").exists());
        assert!(target.join("ok").exists());
    }

    #[test]
    fn missing_archive_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = extract(
            &OpContext::background(),
            &dir.path().join("missing.tar"),
            &dir.path().join("out"),
        );
        assert!(matches!(result, Err(CorralError::Io { .. })));
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn file_below_escaping_symlink_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = dir.path().join("host");
        std::fs::create_dir(&host).expect("host dir");
        let path = dir.path().join("escape.tar");
        let file = std::fs::File::create(&path).expect("create");
        let mut builder = tar::Builder::new(file);
        append_symlink(&mut builder, "etc", host.to_str().expect("utf8"));
        append_file(&mut builder, "etc/passwd", b"root::0:0::/:/bin/sh\n", 0o644);
        append_dir(&mut builder, "etc/ssh/");
        builder.finish().expect("finish");

        let target = dir.path().join("rootfs");
        let summary = extract(&OpContext::background(), &path, &target).expect("extract");
        assert_eq!(summary.symlinks, 1);
        assert_eq!(summary.files, 0);
        assert_eq!(summary.skipped, 2);
        assert!(!host.join("passwd").exists());
        assert!(!host.join("ssh").exists());
    }

    #[test]
    fn file_after_symlink_replaces_the_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("replace.tar");
        let file = std::fs::File::create(&path).expect("create");
        let mut builder = tar::Builder::new(file);
        append_file(&mut builder, "bin/busybox", b"BB", 0o755);
        append_symlink(&mut builder, "bin/sh", "busybox");
        append_file(&mut builder, "bin/sh", b"SH", 0o755);
        builder.finish().expect("finish");

        let target = dir.path().join("rootfs");
        let summary = extract(&OpContext::background(), &path, &target).expect("extract");
        assert_eq!(summary.files, 2);
        assert_eq!(std::fs::read_to_string(target.join("bin/busybox")).expect("read"), "BB");
        let sh = target.join("bin/sh");
        assert!(!std::fs::symlink_metadata(&sh).expect("meta").file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&sh).expect("read"), "SH");
    }

    #[test]
    fn in_rootfs_symlinked_directories_are_followed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("usrmerge.tar");
        let file = std::fs::File::create(&path).expect("create");
        let mut builder = tar::Builder::new(file);
        append_dir(&mut builder, "usr/lib/");
        append_symlink(&mut builder, "lib", "usr/lib");
        append_file(&mut builder, "lib/libc.so", b"elf", 0o755);
        builder.finish().expect("finish");

        let target = dir.path().join("rootfs");
        let summary = extract(&OpContext::background(), &path, &target).expect("extract");
        assert_eq!(summary.files, 1);
        assert!(target.join("usr/lib/libc.so").exists());
    }

    #[test]
    fn cancelled_context_stops_extraction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = conflicting_archive(dir.path());
        let ctx = OpContext::background();
        ctx.cancel();

        let result = extract(&ctx, &archive, &dir.path().join("rootfs"));
        assert!(matches!(result, Err(CorralError::Cancelled { .. })));
        assert!(!dir.path().join("rootfs/bin").exists());
    }

    #[test]
    fn traversal_paths_are_refused() {
        assert_eq!(safe_join(Path::new("/r"), Path::new("../etc")), None);
        assert_eq!(
            safe_join(Path::new("/r"), Path::new("./bin/sh")),
            Some(PathBuf::from("/r/bin/sh"))
        );
    }

    #[test]
    fn is_gzip_archive_detects_extensions() {
        assert!(is_gzip_archive(Path::new("layer.tar.gz")));
        assert!(is_gzip_archive(Path::new("layer.tgz")));
        assert!(!is_gzip_archive(Path::new("layer.tar")));
    }
}
