//! Directory-backed object store.
//!
//! # Layout
//!
//! ```text
//! <root>/<bucket>/<key>                               object bytes
//! <root>/<bucket>/.partcopy/meta/<key>.json           cached content id
//! <root>/<bucket>/.partcopy/uploads/<id>/destination  key of the session
//! <root>/<bucket>/.partcopy/uploads/<id>/part-NNNNN.<md5>
//! ```
//!
//! Every write goes to a temp file in the target directory and is renamed
//! into place, so a reader never sees a half-written part or object.

use super::{
    ByteRange, ObjectLocation, ObjectMetadata, ObjectStore, PartCopyRequest, UploadId,
    UploadedPart,
};
use crate::chunking::ChunkingPolicy;
use crate::content_id::ContentId;
use crate::error::{StoreError, StoreResult};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

const RESERVED_DIR: &str = ".partcopy";
const DESTINATION_FILE: &str = "destination";
const PART_PREFIX: &str = "part-";
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Cached content id, valid while size and mtime match the object file.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_id: ContentId,
    size: u64,
    mtime_secs: i64,
    mtime_nanos: u32,
}

/// Object store keeping buckets as directories under a root path.
///
/// Objects that were not written through a multipart upload are tagged the
/// way a multipart uploader using the store's [`ChunkingPolicy`] would tag
/// them: plain MD5 up to one part, composite above.
///
/// # Example
///
/// ```no_run
/// use partcopy::{FsObjectStore, ObjectLocation, ObjectStore};
///
/// let store = FsObjectStore::new("/data/buckets");
/// let meta = store.head_object(&ObjectLocation::new("raw", "genome.bam"))?;
/// println!("{} bytes, content id {}", meta.size, meta.content_id);
/// # Ok::<(), partcopy::StoreError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    chunking: ChunkingPolicy,
    fsync: bool,
}

impl FsObjectStore {
    /// Store rooted at `root`; each subdirectory is a bucket.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            chunking: ChunkingPolicy::default(),
            fsync: true,
        }
    }

    /// Use `chunking` when tagging objects that have no cached content id.
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingPolicy) -> Self {
        self.chunking = chunking;
        self
    }

    /// Skip fsync before renaming parts and objects into place.
    #[must_use]
    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidLocation`] for keys that would escape the
    /// bucket or collide with the store's bookkeeping directory.
    pub fn object_path(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        let bucket = self.bucket_path(location)?;
        let key = Path::new(&location.key);
        let mut components = key.components().peekable();
        if components.peek().is_none() {
            return Err(invalid(location, "empty key"));
        }
        for (i, component) in components.enumerate() {
            match component {
                Component::Normal(name) => {
                    if i == 0 && name == RESERVED_DIR {
                        return Err(invalid(location, "key uses the reserved prefix"));
                    }
                }
                _ => return Err(invalid(location, "key must be a plain relative path")),
            }
        }
        Ok(bucket.join(key))
    }

    fn bucket_path(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        let bucket = &location.bucket;
        if bucket.is_empty() || bucket == "." || bucket == ".." || bucket.contains(['/', '\\']) {
            return Err(invalid(location, "bad bucket name"));
        }
        Ok(self.root.join(bucket))
    }

    fn sidecar_path(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        // Validates the key as a side effect.
        self.object_path(location)?;
        Ok(self
            .bucket_path(location)?
            .join(RESERVED_DIR)
            .join("meta")
            .join(format!("{}.json", location.key)))
    }

    fn uploads_dir(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        Ok(self.bucket_path(location)?.join(RESERVED_DIR).join("uploads"))
    }

    /// Directory of an open session, checked against its destination.
    fn upload_dir(&self, destination: &ObjectLocation, upload_id: &UploadId) -> StoreResult<PathBuf> {
        let no_such_upload = || StoreError::NoSuchUpload {
            location: destination.clone(),
            upload_id: upload_id.clone(),
        };
        let id = upload_id.as_str();
        if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
            return Err(no_such_upload());
        }
        let dir = self.uploads_dir(destination)?.join(id);
        match fs::read_to_string(dir.join(DESTINATION_FILE)) {
            Ok(key) if key == destination.key => Ok(dir),
            Ok(_) => Err(no_such_upload()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(no_such_upload()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stat an object file, mapping a missing file to `NotFound`.
    fn stat_object(&self, location: &ObjectLocation) -> StoreResult<(PathBuf, fs::Metadata)> {
        let path = self.object_path(location)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok((path, meta)),
            Ok(_) => Err(StoreError::NotFound(location.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(location.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_sidecar(&self, location: &ObjectLocation, meta: &fs::Metadata) -> Option<ContentId> {
        let path = self.sidecar_path(location).ok()?;
        let raw = fs::read(path).ok()?;
        let sidecar: Sidecar = serde_json::from_slice(&raw).ok()?;
        let mtime = FileTime::from_last_modification_time(meta);
        (sidecar.size == meta.len()
            && sidecar.mtime_secs == mtime.unix_seconds()
            && sidecar.mtime_nanos == mtime.nanoseconds())
        .then_some(sidecar.content_id)
    }

    fn write_sidecar(&self, location: &ObjectLocation, content_id: &ContentId) -> StoreResult<()> {
        let (_, meta) = self.stat_object(location)?;
        let mtime = FileTime::from_last_modification_time(&meta);
        let sidecar = Sidecar {
            content_id: content_id.clone(),
            size: meta.len(),
            mtime_secs: mtime.unix_seconds(),
            mtime_nanos: mtime.nanoseconds(),
        };
        let raw = serde_json::to_vec(&sidecar).map_err(|e| StoreError::Service(e.to_string()))?;
        let path = self.sidecar_path(location)?;
        self.write_atomic(&path, |file| file.write_all(&raw))
    }

    /// Write a file through a temp file in the same directory, then rename.
    fn write_atomic<F>(&self, path: &Path, fill: F) -> StoreResult<()>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        fill(temp.as_file_mut())?;
        if self.fsync {
            temp.as_file().sync_all()?;
        }
        temp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Content id of an object file, chunked by the store's policy.
    fn compute_content_id(&self, path: &Path, size: u64) -> StoreResult<ContentId> {
        let part_size = self.chunking.part_size(size);
        let mut file = File::open(path)?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut digests = Vec::new();
        let mut parts = 0u64;
        let mut remaining = size;
        loop {
            let mut ctx = md5::Context::new();
            let mut left = remaining.min(part_size);
            while left > 0 {
                let want = usize::try_from(left).unwrap_or(usize::MAX).min(buf.len());
                let n = file.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(StoreError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} shrank while hashing", path.display()),
                    )));
                }
                ctx.consume(&buf[..n]);
                left -= n as u64;
            }
            let digest = ctx.compute();
            parts += 1;
            remaining = remaining.saturating_sub(part_size);
            if parts == 1 && remaining == 0 {
                return Ok(ContentId::new(format!("{digest:x}")));
            }
            digests.extend_from_slice(&digest.0);
            if remaining == 0 {
                break;
            }
        }
        Ok(ContentId::new(format!(
            "{:x}-{parts}",
            md5::compute(&digests)
        )))
    }

    fn ensure_content_id(&self, location: &ObjectLocation, expected: &ContentId) -> StoreResult<()> {
        let current = self.head_object(location)?;
        if current.content_id != *expected {
            return Err(StoreError::PreconditionFailed {
                location: location.clone(),
                expected: expected.clone(),
                actual: current.content_id,
            });
        }
        Ok(())
    }

    /// Rename a finished part into place and drop older uploads of it.
    fn persist_part(
        &self,
        dir: &Path,
        temp: NamedTempFile,
        part_number: u32,
        content_id: &ContentId,
    ) -> StoreResult<()> {
        if self.fsync {
            temp.as_file().sync_all()?;
        }
        let name = part_file_name(part_number, content_id);
        temp.persist(dir.join(&name))
            .map_err(|e| StoreError::Io(e.error))?;

        let prefix = format!("{PART_PREFIX}{part_number:05}.");
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&prefix) && file_name != name {
                // A concurrent re-upload may already have removed it.
                match fs::remove_file(entry.path()) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn invalid(location: &ObjectLocation, reason: &str) -> StoreError {
    StoreError::InvalidLocation {
        location: location.clone(),
        reason: reason.to_string(),
    }
}

fn part_file_name(part_number: u32, content_id: &ContentId) -> String {
    format!("{PART_PREFIX}{part_number:05}.{content_id}")
}

/// Parse `part-NNNNN.<md5>` back into its number and content id.
fn parse_part_file_name(name: &str) -> Option<(u32, ContentId)> {
    let rest = name.strip_prefix(PART_PREFIX)?;
    let (number, content_id) = rest.split_once('.')?;
    let part_number = number.parse().ok()?;
    if content_id.is_empty() || !content_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((part_number, ContentId::new(content_id)))
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    ctx: md5::Context,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.ctx.consume(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl ObjectStore for FsObjectStore {
    fn head_object(&self, location: &ObjectLocation) -> StoreResult<ObjectMetadata> {
        let (path, meta) = self.stat_object(location)?;
        let content_id = match self.read_sidecar(location, &meta) {
            Some(id) => id,
            None => {
                let id = self.compute_content_id(&path, meta.len())?;
                // Cache only; a failed write just means hashing again next time.
                let _ = self.write_sidecar(location, &id);
                id
            }
        };
        Ok(ObjectMetadata {
            size: meta.len(),
            content_id,
        })
    }

    fn read_range(&self, location: &ObjectLocation, range: ByteRange) -> StoreResult<Vec<u8>> {
        let (path, meta) = self.stat_object(location)?;
        if range.start > range.end || range.end >= meta.len() {
            return Err(invalid(
                location,
                &format!("range {range} outside object of {} bytes", meta.len()),
            ));
        }
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(range.start))?;
        let len = usize::try_from(range.len())
            .map_err(|_| invalid(location, "range does not fit in memory"))?;
        let mut data = vec![0u8; len];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    fn upload_part(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        part_number: u32,
        data: &[u8],
    ) -> StoreResult<ContentId> {
        if part_number == 0 {
            return Err(StoreError::InvalidPart {
                part_number,
                reason: "part numbers start at 1".into(),
            });
        }
        let dir = self.upload_dir(destination, upload_id)?;
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(data)?;
        let content_id = ContentId::of_bytes(data);
        self.persist_part(&dir, temp, part_number, &content_id)?;
        Ok(content_id)
    }

    /// Streams the range straight from the source file into the part file.
    fn upload_part_copy(&self, request: &PartCopyRequest<'_>) -> StoreResult<ContentId> {
        if request.part_number == 0 {
            return Err(StoreError::InvalidPart {
                part_number: request.part_number,
                reason: "part numbers start at 1".into(),
            });
        }
        let dir = self.upload_dir(request.destination, request.upload_id)?;
        self.ensure_content_id(request.source, request.expected)?;

        let (path, meta) = self.stat_object(request.source)?;
        let range = request.range;
        if range.start > range.end || range.end >= meta.len() {
            return Err(StoreError::InvalidPart {
                part_number: request.part_number,
                reason: format!("range {range} outside object of {} bytes", meta.len()),
            });
        }
        let mut source = File::open(path)?;
        source.seek(SeekFrom::Start(range.start))?;

        let temp = NamedTempFile::new_in(&dir)?;
        let mut writer = HashingWriter {
            inner: temp,
            ctx: md5::Context::new(),
        };
        let copied = io::copy(&mut (&mut source).take(range.len()), &mut writer)?;
        if copied != range.len() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} shrank during part copy", request.source),
            )));
        }
        writer.flush()?;
        self.ensure_content_id(request.source, request.expected)?;

        let HashingWriter { inner: temp, ctx } = writer;
        let content_id = ContentId::new(format!("{:x}", ctx.compute()));
        self.persist_part(&dir, temp, request.part_number, &content_id)?;
        Ok(content_id)
    }

    fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
        expected: &ContentId,
    ) -> StoreResult<ContentId> {
        self.ensure_content_id(source, expected)?;
        let (src_path, _) = self.stat_object(source)?;
        let dst_path = self.object_path(destination)?;
        self.write_atomic(&dst_path, |file| {
            let mut src = File::open(&src_path)?;
            io::copy(&mut src, file).map(|_| ())
        })?;
        self.ensure_content_id(source, expected)?;
        self.write_sidecar(destination, expected)?;
        Ok(expected.clone())
    }

    fn create_multipart_upload(&self, destination: &ObjectLocation) -> StoreResult<UploadId> {
        self.object_path(destination)?;
        let uploads = self.uploads_dir(destination)?;
        fs::create_dir_all(&uploads)?;
        let dir = tempfile::Builder::new()
            .prefix("mpu-")
            .rand_bytes(12)
            .tempdir_in(&uploads)?
            .keep();
        fs::write(dir.join(DESTINATION_FILE), &destination.key)?;
        let id = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::Service("upload directory has no name".into()))?;
        Ok(UploadId::new(id))
    }

    fn list_parts(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<Vec<UploadedPart>> {
        let dir = self.upload_dir(destination, upload_id)?;
        // Newest file wins if a crash left two uploads of the same part.
        let mut parts: BTreeMap<u32, (FileTime, ContentId)> = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((part_number, content_id)) = parse_part_file_name(&name.to_string_lossy())
            else {
                continue;
            };
            let mtime = match entry.metadata() {
                Ok(meta) => FileTime::from_last_modification_time(&meta),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match parts.get(&part_number) {
                Some((existing, _)) if *existing > mtime => {}
                _ => {
                    parts.insert(part_number, (mtime, content_id));
                }
            }
        }
        Ok(parts
            .into_iter()
            .map(|(part_number, (_, content_id))| UploadedPart {
                part_number,
                content_id,
            })
            .collect())
    }

    fn complete_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[UploadedPart],
    ) -> StoreResult<ContentId> {
        let dir = self.upload_dir(destination, upload_id)?;
        let mut part_paths = Vec::with_capacity(parts.len());
        for part in parts {
            let path = dir.join(part_file_name(part.part_number, &part.content_id));
            if !path.is_file() {
                return Err(StoreError::InvalidPart {
                    part_number: part.part_number,
                    reason: format!("no uploaded part with content id {}", part.content_id),
                });
            }
            part_paths.push(path);
        }
        let content_id = ContentId::composite(parts.iter().map(|p| &p.content_id))
            .map_err(|e| StoreError::Service(e.to_string()))?;

        let dst_path = self.object_path(destination)?;
        self.write_atomic(&dst_path, |file| {
            for path in &part_paths {
                let mut part = File::open(path)?;
                io::copy(&mut part, file)?;
            }
            Ok(())
        })?;
        self.write_sidecar(destination, &content_id)?;
        fs::remove_dir_all(&dir)?;
        Ok(content_id)
    }

    fn abort_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &UploadId,
    ) -> StoreResult<()> {
        let dir = self.upload_dir(destination, upload_id)?;
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}
