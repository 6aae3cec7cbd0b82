//! Deterministic `tar.zst` reading and writing.
//!
//! Headers carry zeroed mtimes and numeric root ownership unless the caller
//! overrides them, so identical inputs produce identical member lists.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::Path;

use tar::{Archive, Builder, EntryType, Header};

const ZSTD_LEVEL: i32 = 3;

/// Ownership and permission overrides for one member.
#[derive(Debug, Clone, Default)]
pub struct MemberAttrs {
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mtime: u64,
}

/// Streaming writer for a zstd-compressed tar archive.
pub struct TarZstWriter {
    builder: Builder<zstd::stream::Encoder<'static, File>>,
}

impl TarZstWriter {
    pub fn create(out_path: &Path) -> io::Result<Self> {
        let out = File::create(out_path)?;
        let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?;
        let mut builder = Builder::new(encoder);
        builder.follow_symlinks(false);
        Ok(Self { builder })
    }

    /// Append a filesystem entry (directory, symlink or regular file) as `name`.
    ///
    /// Directories are appended as empty entries; their contents are not
    /// recursed into.
    pub fn append_path(&mut self, name: &str, path: &Path, attrs: &MemberAttrs) -> io::Result<()> {
        let md = fs::symlink_metadata(path)?;
        let mut header = new_header(attrs, disk_mode(&md))?;

        if md.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            return self.builder.append_data(&mut header, name, io::empty());
        }

        if md.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(&target)?;
            header.set_cksum();
            return self.builder.append_data(&mut header, name, io::empty());
        }

        if md.is_file() {
            let mut f = File::open(path)?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            return self.builder.append_data(&mut header, name, &mut f);
        }

        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported file type for archive member '{name}'"),
        ))
    }

    /// Append an in-memory regular file.
    pub fn append_bytes(
        &mut self,
        name: &str,
        bytes: &[u8],
        attrs: &MemberAttrs,
    ) -> io::Result<()> {
        let mut header = new_header(attrs, 0o644)?;
        header.set_entry_type(EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_cksum();
        self.builder.append_data(&mut header, name, bytes)
    }

    /// Write the tar trailer and finish the zstd frame.
    pub fn finish(self) -> io::Result<()> {
        let encoder = self.builder.into_inner()?;
        let mut file = encoder.finish()?;
        file.flush()?;
        file.sync_all()
    }
}

fn new_header(attrs: &MemberAttrs, fallback_mode: u32) -> io::Result<Header> {
    let mut header = Header::new_gnu();
    header.set_mtime(attrs.mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(attrs.mode.unwrap_or(fallback_mode) & 0o7777);
    header.set_username(attrs.owner.as_deref().unwrap_or("root"))?;
    header.set_groupname(attrs.group.as_deref().unwrap_or("root"))?;
    Ok(header)
}

#[cfg(unix)]
fn disk_mode(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn disk_mode(md: &fs::Metadata) -> u32 {
    if md.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// Extract `archive` into `dest`, which must already exist.
pub fn unpack(archive: &Path, dest: &Path) -> io::Result<()> {
    let f = File::open(archive)?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(f))?;
    let mut tar = Archive::new(decoder);
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    tar.unpack(dest)
}

/// Member paths of `archive` in stored order, without trailing slashes.
pub fn list_entries(archive: &Path) -> io::Result<Vec<String>> {
    let f = File::open(archive)?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(f))?;
    let mut tar = Archive::new(decoder);
    let mut out = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        out.push(
            path.to_string_lossy()
                .trim_end_matches('/')
                .replace('\\', "/"),
        );
    }
    Ok(out)
}

/// Read one member's contents, if present.
pub fn read_member(archive: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
    use std::io::Read;

    let f = File::open(archive)?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(f))?;
    let mut tar = Archive::new(decoder);
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_string_lossy() == name {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}
