//! Cache entries: the stored form of a task's outputs
//!
//! An entry bundles the contents of every declared output file. Its encoded
//! form is deterministic (outputs sorted by path, no timestamps), so storing
//! the outputs of the same execution twice produces byte-identical entries.

use crate::fingerprint::portable_path;
use crate::{Error, Result};
use kiln_serialize::{ChannelSerializer, Codec, CodecRegistry, Decoder, Encoder};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path};
use std::sync::{Arc, OnceLock};
use walkdir::WalkDir;

/// Wire tag of [`CacheEntryCodec`]
pub const CACHE_ENTRY_TAG: u8 = 16;

const ENTRY_MAGIC: [u8; 4] = *b"KLNE";
const ENTRY_FORMAT_VERSION: i32 = 1;

/// One output file captured in an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Path relative to the workspace root, `/`-separated
    pub path: String,
    /// File contents
    pub contents: Vec<u8>,
    /// Whether the file is executable
    pub executable: bool,
}

/// Stored outputs of one task execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    outputs: Vec<OutputFile>,
}

impl CacheEntry {
    /// Build an entry from output files.
    ///
    /// Paths must be relative and must not escape the workspace.
    pub fn new(mut outputs: Vec<OutputFile>) -> Result<Self> {
        for output in &mut outputs {
            output.path = normalize_output(&output.path)?;
        }
        outputs.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(pair) = outputs.windows(2).find(|w| w[0].path == w[1].path) {
            return Err(Error::configuration(format!(
                "output '{}' appears more than once",
                pair[0].path
            )));
        }
        if let Some((file, nested)) = find_nested(&outputs) {
            return Err(Error::configuration(format!(
                "output '{nested}' lies below output file '{file}'"
            )));
        }
        Ok(Self { outputs })
    }

    /// Read declared outputs below `root`.
    ///
    /// A declared directory contributes every file below it. Outputs that do
    /// not exist are skipped.
    pub fn collect(root: &Path, declared: &[String]) -> Result<Self> {
        let mut outputs = Vec::new();
        for output in declared {
            let rel = normalize_output(output)?;
            let path = root.join(&rel);
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(output = %rel, "Declared output missing; skipping");
                    continue;
                }
                Err(e) => return Err(Error::io(e, &path, "stat")),
            };
            if meta.is_dir() {
                for entry in WalkDir::new(&path).sort_by_file_name() {
                    let entry = entry
                        .map_err(|e| Error::io(std::io::Error::from(e), &path, "walk directory"))?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry.path().strip_prefix(root).map_err(|_| {
                        Error::configuration(format!(
                            "path {} is not under root {}",
                            entry.path().display(),
                            root.display()
                        ))
                    })?;
                    outputs.push(read_output(entry.path(), portable_path(rel))?);
                }
            } else {
                outputs.push(read_output(&path, rel)?);
            }
        }
        // Overlapping declarations (a directory and a file inside it) collect
        // the same file twice.
        outputs.sort_by(|a, b| a.path.cmp(&b.path));
        outputs.dedup_by(|a, b| a.path == b.path);
        Ok(Self { outputs })
    }

    /// Write every output below `root`, returning the number of files written
    pub fn materialize(&self, root: &Path) -> Result<usize> {
        for output in &self.outputs {
            let dest = root.join(&output.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            fs::write(&dest, &output.contents).map_err(|e| Error::io(e, &dest, "write"))?;
            set_executable(&dest, output.executable)?;
        }
        tracing::debug!(root = %root.display(), files = self.outputs.len(), "Materialized outputs");
        Ok(self.outputs.len())
    }

    /// Output files sorted by path
    #[must_use]
    pub fn outputs(&self) -> &[OutputFile] {
        &self.outputs
    }

    /// Number of output files
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether the entry holds no files
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Total size of all output contents in bytes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.outputs.iter().map(|o| o.contents.len() as u64).sum()
    }

    /// Encode the entry for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let serializer = entry_serializer()?;
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.write_raw(&ENTRY_MAGIC)?;
        enc.write_i32(ENTRY_FORMAT_VERSION)?;
        serializer.write_value(&mut enc, self)?;
        Ok(buf)
    }

    /// Decode an entry produced by [`CacheEntry::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let serializer = entry_serializer()?;
        let mut input = bytes;
        let mut dec = Decoder::new(&mut input);
        let magic: [u8; 4] = dec.read_raw()?;
        if magic != ENTRY_MAGIC {
            return Err(Error::serialization("not a cache entry: bad magic"));
        }
        let version = dec.read_i32()?;
        if version != ENTRY_FORMAT_VERSION {
            return Err(Error::serialization(format!(
                "unsupported cache entry version {version}"
            )));
        }
        let entry = serializer
            .read_value::<Self>(&mut dec)?
            .ok_or_else(|| Error::serialization("cache entry payload is absent"))?;
        if !input.is_empty() {
            return Err(Error::serialization(format!(
                "{} trailing bytes after cache entry",
                input.len()
            )));
        }
        Ok(entry)
    }
}

fn entry_serializer() -> Result<&'static ChannelSerializer> {
    static SERIALIZER: OnceLock<std::result::Result<ChannelSerializer, String>> = OnceLock::new();
    SERIALIZER
        .get_or_init(|| {
            CacheEntryCodec::registry()
                .map(ChannelSerializer::new)
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| Error::serialization(e.clone()))
}

fn read_output(path: &Path, rel: String) -> Result<OutputFile> {
    let contents = fs::read(path).map_err(|e| Error::io(e, path, "read"))?;
    let meta = fs::metadata(path).map_err(|e| Error::io(e, path, "stat"))?;
    Ok(OutputFile {
        path: rel,
        contents,
        executable: is_executable(&meta),
    })
}

/// Validate a declared output and normalize it to a `/`-separated relative path
fn normalize_output(declared: &str) -> Result<String> {
    let invalid = |why: &str| Error::configuration(format!("output '{declared}' {why}"));
    let mut parts = Vec::new();
    for component in Path::new(declared).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be relative to the workspace"));
            }
        }
    }
    if parts.is_empty() {
        return Err(invalid("does not name a file"));
    }
    Ok(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

/// Set or clear every execute bit; a restored file may replace one with a
/// different mode.
#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .map_err(|e| Error::io(e, path, "stat"))?
        .permissions();
    let mode = if executable {
        perms.mode() | 0o111
    } else {
        perms.mode() & !0o111
    };
    if mode == perms.mode() {
        return Ok(());
    }
    perms.set_mode(mode);
    fs::set_permissions(path, perms).map_err(|e| Error::io(e, path, "chmod"))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

/// First output whose path lies below another output's path.
///
/// Such an entry needs one path to be both a file and a directory and can
/// never be materialized.
fn find_nested(outputs: &[OutputFile]) -> Option<(&str, &str)> {
    let paths: HashSet<&str> = outputs.iter().map(|o| o.path.as_str()).collect();
    outputs.iter().find_map(|output| {
        output
            .path
            .match_indices('/')
            .map(|(i, _)| &output.path[..i])
            .find(|ancestor| paths.contains(ancestor))
            .map(|ancestor| (ancestor, output.path.as_str()))
    })
}

/// Channel codec for [`CacheEntry`], registered under [`CACHE_ENTRY_TAG`].
///
/// Layout: `u32` file count, then per file a path string, an executable
/// flag and the contents as a byte array. Paths must be strictly increasing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheEntryCodec;

impl CacheEntryCodec {
    /// Well-known registry extended with the entry codec
    pub fn registry() -> kiln_serialize::Result<Arc<CodecRegistry>> {
        Ok(CodecRegistry::well_known_builder()
            .register::<CacheEntry, _>(CACHE_ENTRY_TAG, Self)?
            .build())
    }
}

impl Codec<CacheEntry> for CacheEntryCodec {
    fn encode(&self, encoder: &mut Encoder<'_>, value: &CacheEntry) -> kiln_serialize::Result<()> {
        let count = u32::try_from(value.outputs.len()).map_err(|_| {
            kiln_serialize::Error::malformed("too many outputs in one cache entry")
        })?;
        encoder.write_u32(count)?;
        for output in &value.outputs {
            encoder.write_string(&output.path)?;
            encoder.write_bool(output.executable)?;
            encoder.write_bytes(&output.contents)?;
        }
        Ok(())
    }

    fn decode(&self, decoder: &mut Decoder<'_>) -> kiln_serialize::Result<CacheEntry> {
        let count = decoder.read_u32()?;
        let mut outputs: Vec<OutputFile> = Vec::new();
        for _ in 0..count {
            let path = decoder.read_string()?;
            if normalize_output(&path).ok().as_deref() != Some(path.as_str()) {
                return Err(kiln_serialize::Error::malformed(format!(
                    "invalid output path '{path}'"
                )));
            }
            if outputs.last().is_some_and(|prev| prev.path >= path) {
                return Err(kiln_serialize::Error::malformed(format!(
                    "output '{path}' is out of order"
                )));
            }
            let executable = decoder.read_bool()?;
            let contents = decoder.read_bytes()?;
            outputs.push(OutputFile {
                path,
                contents,
                executable,
            });
        }
        if let Some((file, nested)) = find_nested(&outputs) {
            return Err(kiln_serialize::Error::malformed(format!(
                "output '{nested}' lies below output file '{file}'"
            )));
        }
        Ok(CacheEntry { outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_serialize::{ChannelReader, ChannelWriter};
    use tempfile::TempDir;

    fn file(path: &str, contents: &str) -> OutputFile {
        OutputFile {
            path: path.to_string(),
            contents: contents.as_bytes().to_vec(),
            executable: false,
        }
    }

    // ==========================================================================
    // Collection and materialization
    // ==========================================================================

    #[test]
    fn test_collect_and_materialize_round_trip() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("dist/assets")).unwrap();
        fs::write(src.path().join("out.bin"), b"\x00\x01binary").unwrap();
        fs::write(src.path().join("dist/index.html"), "<html/>").unwrap();
        fs::write(src.path().join("dist/assets/app.js"), "app()").unwrap();

        let declared = vec!["out.bin".to_string(), "dist".to_string()];
        let entry = CacheEntry::collect(src.path(), &declared).unwrap();
        let paths: Vec<&str> = entry.outputs().iter().map(|o| o.path.as_str()).collect();
        assert_eq!(paths, ["dist/assets/app.js", "dist/index.html", "out.bin"]);

        let dst = TempDir::new().unwrap();
        assert_eq!(entry.materialize(dst.path()).unwrap(), 3);
        assert_eq!(fs::read(dst.path().join("out.bin")).unwrap(), b"\x00\x01binary");
        assert_eq!(
            fs::read_to_string(dst.path().join("dist/assets/app.js")).unwrap(),
            "app()"
        );
    }

    #[test]
    fn test_collect_skips_missing_outputs() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("present.txt"), "yes").unwrap();
        let declared = vec!["present.txt".to_string(), "absent.txt".to_string()];
        let entry = CacheEntry::collect(src.path(), &declared).unwrap();
        assert_eq!(entry.len(), 1);
        assert_eq!(entry.total_size(), 3);
    }

    #[test]
    fn test_collect_dedups_overlapping_declarations() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("out")).unwrap();
        fs::write(src.path().join("out/a.txt"), "a").unwrap();
        let declared = vec!["out".to_string(), "./out/a.txt".to_string()];
        let entry = CacheEntry::collect(src.path(), &declared).unwrap();
        assert_eq!(entry.len(), 1);
    }

    #[test]
    fn test_outputs_must_stay_inside_workspace() {
        let src = TempDir::new().unwrap();
        for bad in ["../escape", "/etc/passwd", "a/../../b", "."] {
            let err = CacheEntry::collect(src.path(), &[bad.to_string()]).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{bad}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_survives() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let tool = src.path().join("tool.sh");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let entry = CacheEntry::collect(src.path(), &["tool.sh".to_string()]).unwrap();
        assert!(entry.outputs()[0].executable);

        let bytes = entry.to_bytes().unwrap();
        let dst = TempDir::new().unwrap();
        CacheEntry::from_bytes(&bytes)
            .unwrap()
            .materialize(dst.path())
            .unwrap();
        let mode = fs::metadata(dst.path().join("tool.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_materialize_clears_stale_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dst = TempDir::new().unwrap();
        let target = dst.path().join("report.txt");
        fs::write(&target, "old").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).unwrap();

        CacheEntry::new(vec![file("report.txt", "new")])
            .unwrap()
            .materialize(dst.path())
            .unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    // ==========================================================================
    // Encoding
    // ==========================================================================

    #[test]
    fn test_bytes_are_deterministic() {
        let a = CacheEntry::new(vec![file("b.txt", "b"), file("a.txt", "a")]).unwrap();
        let b = CacheEntry::new(vec![file("a.txt", "a"), file("./b.txt", "b")]).unwrap();
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_bytes_round_trip() {
        let entry = CacheEntry::new(vec![file("out/log.txt", "done"), file("x", "")]).unwrap();
        let decoded = CacheEntry::from_bytes(&entry.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_empty_entry_round_trips() {
        let entry = CacheEntry::default();
        let decoded = CacheEntry::from_bytes(&entry.to_bytes().unwrap()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let err = CacheEntry::new(vec![file("a", "1"), file("./a", "2")]).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_file_with_nested_output_rejected() {
        let err = CacheEntry::new(vec![file("a", "1"), file("a/b", "2")]).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        // '-' sorts between "a" and "a/", so the clash is not adjacent
        let err = CacheEntry::new(vec![file("a/b/c", "1"), file("a-b", "2"), file("a", "3")])
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        CacheEntry::new(vec![file("ab", "1"), file("a/b", "2")]).unwrap();
    }

    #[test]
    fn test_decode_rejects_nested_output() {
        let entry = CacheEntry {
            outputs: vec![file("a", "1"), file("a-b", "2"), file("a/b", "3")],
        };
        let bytes = entry.to_bytes().unwrap();
        assert!(matches!(
            CacheEntry::from_bytes(&bytes),
            Err(Error::Serialization { .. })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(CacheEntry::from_bytes(b"").is_err());
        assert!(CacheEntry::from_bytes(b"JUNKJUNKJUNK").is_err());

        let mut bytes = CacheEntry::new(vec![file("a", "1")])
            .unwrap()
            .to_bytes()
            .unwrap();
        bytes.push(0);
        assert!(matches!(
            CacheEntry::from_bytes(&bytes),
            Err(Error::Serialization { .. })
        ));
        bytes.truncate(bytes.len() - 3);
        assert!(CacheEntry::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_escaping_path() {
        let entry = CacheEntry {
            outputs: vec![file("../evil", "x")],
        };
        let bytes = entry.to_bytes().unwrap();
        assert!(CacheEntry::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_entry_travels_over_channel() {
        let serializer = ChannelSerializer::new(CacheEntryCodec::registry().unwrap());
        let entry = CacheEntry::new(vec![file("a.txt", "a")]).unwrap();

        let mut writer = ChannelWriter::new(Vec::new(), serializer.clone());
        writer.write(&"header".to_string()).unwrap();
        writer.write(&entry).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes[4 + "header".len() + 1], CACHE_ENTRY_TAG);

        let mut reader = ChannelReader::new(bytes.as_slice(), serializer);
        reader.next_record().unwrap().unwrap();
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.downcast_ref::<CacheEntry>(), Some(&entry));
    }
}
