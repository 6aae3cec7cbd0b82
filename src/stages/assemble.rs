//! ASSEMBLE: pack the staging root and metadata into the final artifact.
//!
//! Only manifested paths are packed. Each member carries the mode and
//! ownership the manifest declares, not what the install commands left on
//! disk. The artifact is written beside its final path and renamed into place.

use std::fs;
use std::io;

use log::info;

use crate::archive::tar_zst::{MemberAttrs, TarZstWriter};
use crate::artifact::digest::sha256_file;
use crate::artifact::{Artifact, ArtifactMetadata, FileRecord, METADATA_FORMAT, METADATA_MEMBER};
use crate::descriptor::{FileClass, ManifestEntry, PackageDescriptor};
use crate::error::{IoResultExt, PipelineError, Result};
use crate::pipeline::layout::BuildLayout;
use crate::stages::clean::partial_path;
use crate::stages::validate::symlinked_parent;

pub fn run(
    layout: &BuildLayout,
    descriptor: &PackageDescriptor,
    arch: &str,
    build_time: i64,
) -> Result<Artifact> {
    let mut entries: Vec<&ManifestEntry> = descriptor.files.iter().collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut files = Vec::with_capacity(entries.len());
    for entry in &entries {
        files.push(file_record(layout, entry)?);
    }

    let paths_of = |class: FileClass| -> Vec<String> {
        descriptor.files_of(class).map(|f| f.path.clone()).collect()
    };
    let metadata = ArtifactMetadata {
        format: METADATA_FORMAT,
        name: descriptor.name.clone(),
        version: descriptor.version.clone(),
        release: descriptor.release.clone(),
        arch: arch.to_string(),
        summary: descriptor.summary.clone(),
        url: descriptor.url.clone(),
        license: descriptor.license.clone(),
        requires: descriptor.requires.clone(),
        build_requires: descriptor.build_requires.clone(),
        build_time,
        files,
        license_files: paths_of(FileClass::License),
        doc_files: paths_of(FileClass::Doc),
        gpg_keys: paths_of(FileClass::GpgKey),
        changelog: descriptor.changelog.clone(),
    };

    let out = &layout.artifact_path;
    let tmp = partial_path(out);
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }

    let json = metadata.to_json().map_err(|e| PipelineError::io(out, io::Error::other(e)))?;
    let mtime = u64::try_from(build_time).unwrap_or(0);

    let mut writer = TarZstWriter::create(&tmp).at_path(&tmp)?;
    writer
        .append_bytes(
            METADATA_MEMBER,
            &json,
            &MemberAttrs {
                mode: Some(0o644),
                mtime,
                ..MemberAttrs::default()
            },
        )
        .at_path(&tmp)?;

    for entry in &entries {
        let staged = layout.staging_root.join(entry.relative_path());
        let attrs = MemberAttrs {
            mode: Some(entry.mode),
            owner: Some(entry.owner.clone()),
            group: Some(entry.group.clone()),
            mtime,
        };
        let name = entry.relative_path().to_string_lossy().into_owned();
        writer.append_path(&name, &staged, &attrs).at_path(&staged)?;
    }
    writer.finish().at_path(&tmp)?;
    fs::rename(&tmp, out).at_path(out)?;

    info!(
        "assembled {} ({} files) at {}",
        metadata.nvr(),
        metadata.files.len(),
        out.display()
    );

    Ok(Artifact {
        path: out.clone(),
        metadata,
    })
}

fn file_record(layout: &BuildLayout, entry: &ManifestEntry) -> Result<FileRecord> {
    if let Some(link) = symlinked_parent(&layout.staging_root, &entry.relative_path()) {
        return Err(PipelineError::ManifestMismatch {
            path: entry.path.clone(),
            reason: format!("staged beneath symlinked directory '{}'", link.display()),
        });
    }
    let staged = layout.staging_root.join(entry.relative_path());
    let (sha256, size) = if entry.class.is_directory() {
        (None, 0)
    } else {
        let (sha, size) = sha256_file(&staged).at_path(&staged)?;
        (Some(sha), size)
    };
    Ok(FileRecord {
        path: entry.path.clone(),
        class: entry.class,
        mode: entry.mode,
        owner: entry.owner.clone(),
        group: entry.group.clone(),
        size,
        sha256,
        config_no_replace: entry.class == FileClass::ConfigNoReplace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staged_builtin() -> (TempDir, BuildLayout, PackageDescriptor) {
        let tmp = TempDir::new().unwrap();
        let d = PackageDescriptor::builtin().unwrap();
        let layout = BuildLayout::new(tmp.path(), &d, "x86_64");
        let stage = &layout.staging_root;
        for entry in &d.files {
            let p = stage.join(entry.relative_path());
            if entry.class.is_directory() {
                fs::create_dir_all(&p).unwrap();
            } else {
                fs::create_dir_all(p.parent().unwrap()).unwrap();
                fs::write(&p, format!("contents of {}\n", entry.path)).unwrap();
            }
        }
        (tmp, layout, d)
    }

    #[test]
    fn test_assemble_builtin_layout() {
        let (_tmp, layout, d) = staged_builtin();
        let artifact = run(&layout, &d, "x86_64", 1_700_000_000).unwrap();

        assert_eq!(artifact.nvr(), "rust-dnf-0.1.0-1");
        assert!(!partial_path(&layout.artifact_path).exists());

        let payload = artifact.payload_paths().unwrap();
        assert_eq!(payload.len(), d.files.len());
        assert!(payload.contains(&"usr/bin/rust-dnf".to_string()));
        assert!(payload.contains(&"var/cache/rust-dnf".to_string()));

        let config: Vec<_> = artifact.config_files().map(|f| f.path.as_str()).collect();
        assert_eq!(config, vec!["/etc/rust-dnf/config.toml"]);

        let bin = artifact.metadata.file("/usr/bin/rust-dnf").unwrap();
        assert_eq!(bin.mode, 0o755);
        assert!(bin.sha256.is_some());
        let cache = artifact.metadata.file("/var/cache/rust-dnf").unwrap();
        assert_eq!(cache.sha256, None);

        assert_eq!(
            artifact.metadata.gpg_keys,
            vec!["/etc/pki/rpm-gpg/RPM-GPG-KEY-rust-dnf"]
        );
        assert_eq!(
            artifact.metadata.license_files,
            vec!["/usr/share/licenses/rust-dnf/LICENSE"]
        );
        assert_eq!(artifact.metadata.changelog.len(), 1);
    }

    #[test]
    fn test_metadata_roundtrips_through_open() {
        let (_tmp, layout, d) = staged_builtin();
        let built = run(&layout, &d, "x86_64", 0).unwrap();
        let reopened = Artifact::open(&built.path).unwrap();
        assert_eq!(reopened.metadata, built.metadata);
    }

    #[test]
    fn test_refuses_to_pack_through_symlinked_directory() {
        let (tmp, layout, d) = staged_builtin();
        let host = tmp.path().join("host-share");
        fs::rename(layout.staging_root.join("usr/share"), &host).unwrap();
        std::os::unix::fs::symlink(&host, layout.staging_root.join("usr/share")).unwrap();

        let err = run(&layout, &d, "x86_64", 0).unwrap_err();
        match &err {
            PipelineError::ManifestMismatch { reason, .. } => {
                assert!(reason.contains("usr/share"), "{reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!layout.artifact_path.exists());
    }

    #[test]
    fn test_unpackaged_files_are_not_shipped() {
        let (_tmp, layout, d) = staged_builtin();
        fs::write(layout.staging_root.join("usr/bin/leftover"), "x").unwrap();
        let artifact = run(&layout, &d, "x86_64", 0).unwrap();
        assert!(!artifact
            .payload_paths()
            .unwrap()
            .contains(&"usr/bin/leftover".to_string()));
    }
}
