//! Content-addressed cache for remote feature artifacts.
//!
//! `resolve()` maps a feature reference to a local directory, downloading
//! and extracting the artifact only when the remote digest differs from
//! what the durable index recorded. When the registry is unreachable but
//! a cached copy exists, the cached copy wins over freshness and the
//! failure is downgraded to a warning.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oci_client::manifest::{OciDescriptor, OciManifest};
use oci_client::secrets::RegistryAuth;
use oci_client::Reference;
use tokio::sync::Mutex;

use crate::errors::{DenliteError, DenliteResult};
use crate::features::index::{CacheEntry, CacheIndex};

/// The one layer media type this engine can install from.
pub const FEATURE_LAYER_MEDIA_TYPE: &str = "application/vnd.devcontainers.layer.v1+tar";

/// Remote side of the cache: digest resolution and blob download.
///
/// Split out so tests can script remote behavior; the production
/// implementation is [`RegistrySource`] over `oci-client`.
#[async_trait]
pub(crate) trait ArtifactSource: Send + Sync {
    /// Resolve the reference to its current manifest and manifest digest.
    async fn resolve(&self, reference: &Reference) -> DenliteResult<(OciManifest, String)>;

    /// Download one layer blob into `dest`.
    async fn fetch_layer(
        &self,
        reference: &Reference,
        layer: &OciDescriptor,
        dest: &Path,
    ) -> DenliteResult<()>;
}

/// Registry-backed artifact source.
pub(crate) struct RegistrySource {
    client: oci_client::Client,
}

impl RegistrySource {
    fn new() -> Self {
        Self {
            client: oci_client::Client::new(Default::default()),
        }
    }
}

#[async_trait]
impl ArtifactSource for RegistrySource {
    async fn resolve(&self, reference: &Reference) -> DenliteResult<(OciManifest, String)> {
        self.client
            .pull_manifest(reference, &RegistryAuth::Anonymous)
            .await
            .map_err(|e| DenliteError::Runtime(format!("manifest pull failed: {e}")))
    }

    async fn fetch_layer(
        &self,
        reference: &Reference,
        layer: &OciDescriptor,
        dest: &Path,
    ) -> DenliteResult<()> {
        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            DenliteError::Storage(format!("failed to create {}: {}", dest.display(), e))
        })?;
        self.client
            .pull_blob(reference, layer, &mut file)
            .await
            .map_err(|e| DenliteError::Runtime(format!("layer pull failed: {e}")))?;
        verify_blob(dest, &layer.digest).await
    }
}

/// Verify a downloaded blob against its declared digest.
async fn verify_blob(path: &Path, digest: &str) -> DenliteResult<()> {
    use sha2::{Digest, Sha256};

    let data = tokio::fs::read(path).await.map_err(|e| {
        DenliteError::Storage(format!("failed to read {} for verification: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&data);
    let computed = format!("sha256:{:x}", hasher.finalize());

    if computed != digest {
        let _ = std::fs::remove_file(path);
        return Err(DenliteError::Storage(format!(
            "blob integrity check failed: expected {digest}, computed {computed}"
        )));
    }
    Ok(())
}

/// Digest-keyed on-disk cache of feature artifacts.
pub struct FeatureCache {
    source: Box<dyn ArtifactSource>,
    cache_root: PathBuf,
    tmp_dir: PathBuf,
    /// Durable index, loaded lazily on first use. One writer at a time;
    /// the cache does not support multiple processes sharing a root.
    index: Mutex<Option<CacheIndex>>,
}

impl FeatureCache {
    pub fn new(cache_root: PathBuf, tmp_dir: PathBuf) -> Self {
        Self::with_source(Box::new(RegistrySource::new()), cache_root, tmp_dir)
    }

    pub(crate) fn with_source(
        source: Box<dyn ArtifactSource>,
        cache_root: PathBuf,
        tmp_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            cache_root,
            tmp_dir,
            index: Mutex::new(None),
        }
    }

    /// Resolve a feature reference to a local directory.
    ///
    /// Cache hit requires both a digest match in the index and the cached
    /// copy still being on disk. A failed remote resolution falls back to
    /// the cached copy when one exists, with a warning, and fails with
    /// `UnresolvableReference` otherwise.
    pub async fn resolve(&self, reference: &str) -> DenliteResult<PathBuf> {
        let parsed: Reference = reference
            .parse()
            .map_err(|e| DenliteError::Config(format!("invalid feature reference '{reference}': {e}")))?;

        let key_dir = self.cache_key(&parsed);
        let cached_copy_exists = key_dir.is_dir();

        let (manifest, digest) = match self.source.resolve(&parsed).await {
            Ok(resolved) => resolved,
            Err(e) if cached_copy_exists => {
                tracing::warn!(
                    reference,
                    error = %e,
                    "remote resolution failed, using stale cached copy"
                );
                return Ok(key_dir);
            }
            Err(e) => {
                tracing::error!(reference, error = %e, "remote resolution failed");
                return Err(DenliteError::UnresolvableReference(reference.to_string()));
            }
        };

        if cached_copy_exists {
            if let Some(entry) = self.index_entry(reference).await {
                if entry.digest == digest {
                    tracing::debug!(reference, %digest, "feature cache hit");
                    return Ok(key_dir);
                }
            }
        }

        // Fetch: digest changed, index entry missing, or no cached copy.
        let image = match manifest {
            OciManifest::Image(image) => image,
            OciManifest::ImageIndex(_) => {
                return Err(DenliteError::UnsupportedMediaType(reference.to_string()));
            }
        };
        let layer = image
            .layers
            .iter()
            .find(|l| l.media_type == FEATURE_LAYER_MEDIA_TYPE)
            .ok_or_else(|| DenliteError::NoUsableLayer(reference.to_string()))?;

        tracing::info!(reference, %digest, "fetching feature artifact");
        let tarball = self.tmp_dir.join(format!("{}.tar", sanitize(&digest)));
        self.source.fetch_layer(&parsed, layer, &tarball).await?;

        let staged = self.tmp_dir.join(format!("extract-{}", sanitize(&digest)));
        extract_tarball(&tarball, &staged)?;
        let _ = std::fs::remove_file(&tarball);
        install_extracted(&staged, &key_dir)?;

        self.record_entry(reference, &digest).await;
        Ok(key_dir)
    }

    /// Deterministic cache key for a reference: registry / repository
    /// components / version, each path-sanitized.
    fn cache_key(&self, reference: &Reference) -> PathBuf {
        let mut path = self.cache_root.join(sanitize(reference.registry()));
        for part in reference.repository().split('/') {
            path = path.join(sanitize(part));
        }
        let version = match reference.digest() {
            Some(digest) => sanitize(digest),
            None => sanitize(reference.tag().unwrap_or("latest")),
        };
        path.join(version)
    }

    async fn index_entry(&self, reference: &str) -> Option<CacheEntry> {
        let mut guard = self.index.lock().await;
        let index = guard.get_or_insert_with(|| CacheIndex::load(&self.cache_root));
        index.get(reference).cloned()
    }

    async fn record_entry(&self, reference: &str, digest: &str) {
        let mut guard = self.index.lock().await;
        let index = guard.get_or_insert_with(|| CacheIndex::load(&self.cache_root));
        index.upsert(
            reference.to_string(),
            CacheEntry {
                digest: digest.to_string(),
                cached_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        // A failed save only costs a re-download next run.
        if let Err(e) = index.save(&self.cache_root) {
            tracing::warn!("failed to save cache index: {}", e);
        }
    }
}

fn sanitize(component: &str) -> String {
    component.replace([':', '@'], "-")
}

/// Extract `tarball` into a fresh `dest` directory.
///
/// Feature layers are declared as plain tar, but gzipped payloads exist
/// in the wild; sniff the magic bytes and decompress when present.
fn extract_tarball(tarball: &Path, dest: &Path) -> DenliteResult<()> {
    use std::io::Read;

    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| {
            DenliteError::Storage(format!("failed to clear {}: {}", dest.display(), e))
        })?;
    }
    std::fs::create_dir_all(dest).map_err(|e| {
        DenliteError::Storage(format!("failed to create {}: {}", dest.display(), e))
    })?;

    let mut file = std::fs::File::open(tarball).map_err(|e| {
        DenliteError::Storage(format!("failed to open {}: {}", tarball.display(), e))
    })?;
    let mut magic = [0u8; 2];
    let gzipped = match file.read(&mut magic) {
        Ok(2) => magic == [0x1f, 0x8b],
        _ => false,
    };
    use std::io::Seek;
    file.rewind()
        .map_err(|e| DenliteError::Storage(format!("failed to rewind tarball: {e}")))?;

    let reader: Box<dyn Read> = if gzipped {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    tar::Archive::new(reader).unpack(dest).map_err(|e| {
        DenliteError::Storage(format!("failed to extract into {}: {}", dest.display(), e))
    })
}

/// Atomically move a staged extraction into its final cache key path.
fn install_extracted(staged: &Path, key_dir: &Path) -> DenliteResult<()> {
    if let Some(parent) = key_dir.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DenliteError::Storage(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    if key_dir.exists() {
        std::fs::remove_dir_all(key_dir).map_err(|e| {
            DenliteError::Storage(format!("failed to clear {}: {}", key_dir.display(), e))
        })?;
    }
    std::fs::rename(staged, key_dir).map_err(|e| {
        DenliteError::Storage(format!(
            "failed to install {} to {}: {}",
            staged.display(),
            key_dir.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn image_manifest_json(layer_media_type: &str) -> serde_json::Value {
        serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.devcontainers",
                "digest": "sha256:0000000000000000000000000000000000000000000000000000000000000000",
                "size": 0
            },
            "layers": [{
                "mediaType": layer_media_type,
                "digest": "sha256:1111111111111111111111111111111111111111111111111111111111111111",
                "size": 4
            }]
        })
    }

    /// Scripted remote: serves a fixed digest (or an error), counts layer
    /// fetches, and writes a real tarball on fetch.
    struct FakeSource {
        digest: StdMutex<Option<String>>,
        manifest: serde_json::Value,
        fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(digest: &str) -> Self {
            Self::with_manifest(digest, image_manifest_json(FEATURE_LAYER_MEDIA_TYPE))
        }

        fn with_manifest(digest: &str, manifest: serde_json::Value) -> Self {
            Self {
                digest: StdMutex::new(Some(digest.to_string())),
                manifest,
                fetches: AtomicUsize::new(0),
            }
        }

        fn unreachable(&self) {
            *self.digest.lock().unwrap() = None;
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtifactSource for &'static FakeSource {
        async fn resolve(&self, _reference: &Reference) -> DenliteResult<(OciManifest, String)> {
            let digest = self
                .digest
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| DenliteError::Runtime("registry unreachable".into()))?;
            let manifest: OciManifest = serde_json::from_value(self.manifest.clone()).unwrap();
            Ok((manifest, digest))
        }

        async fn fetch_layer(
            &self,
            _reference: &Reference,
            _layer: &OciDescriptor,
            dest: &Path,
        ) -> DenliteResult<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut builder = tar::Builder::new(Vec::new());
            let payload = b"#!/bin/sh\necho install\n";
            let mut header = tar::Header::new_gnu();
            header.set_path("install.sh").unwrap();
            header.set_size(payload.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append(&header, payload.as_slice()).unwrap();
            std::fs::write(dest, builder.into_inner().unwrap()).unwrap();
            Ok(())
        }
    }

    fn cache_with(source: &'static FakeSource, root: &Path) -> FeatureCache {
        let tmp = root.join("tmp");
        std::fs::create_dir_all(&tmp).unwrap();
        FeatureCache::with_source(Box::new(source), root.join("features"), tmp)
    }

    const REFERENCE: &str = "ghcr.io/acme/features/node:1";

    #[tokio::test]
    async fn test_first_resolve_fetches_then_digest_match_skips() {
        let temp = tempfile::tempdir().unwrap();
        let source: &'static FakeSource = Box::leak(Box::new(FakeSource::new("sha256:aaa")));
        let cache = cache_with(source, temp.path());

        let first = cache.resolve(REFERENCE).await.unwrap();
        assert!(first.join("install.sh").is_file());
        assert_eq!(source.fetch_count(), 1);

        // Unchanged remote digest: no second fetch, same path.
        let second = cache.resolve(REFERENCE).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_digest_change_triggers_refetch() {
        let temp = tempfile::tempdir().unwrap();
        let source: &'static FakeSource = Box::leak(Box::new(FakeSource::new("sha256:aaa")));
        let cache = cache_with(source, temp.path());

        cache.resolve(REFERENCE).await.unwrap();
        *source.digest.lock().unwrap() = Some("sha256:bbb".to_string());
        cache.resolve(REFERENCE).await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_fallback_when_remote_unreachable() {
        let temp = tempfile::tempdir().unwrap();
        let source: &'static FakeSource = Box::leak(Box::new(FakeSource::new("sha256:aaa")));
        let cache = cache_with(source, temp.path());

        let cached = cache.resolve(REFERENCE).await.unwrap();

        source.unreachable();
        let fallback = cache.resolve(REFERENCE).await.unwrap();
        assert_eq!(cached, fallback);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_without_cache_is_unresolvable() {
        let temp = tempfile::tempdir().unwrap();
        let source: &'static FakeSource = Box::leak(Box::new(FakeSource::new("sha256:aaa")));
        source.unreachable();
        let cache = cache_with(source, temp.path());

        let err = cache.resolve(REFERENCE).await.unwrap_err();
        assert!(matches!(err, DenliteError::UnresolvableReference(_)));
    }

    #[tokio::test]
    async fn test_wrong_layer_media_type_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let source: &'static FakeSource = Box::leak(Box::new(FakeSource::with_manifest(
            "sha256:aaa",
            image_manifest_json("application/vnd.oci.image.layer.v1.tar+gzip"),
        )));
        let cache = cache_with(source, temp.path());

        let err = cache.resolve(REFERENCE).await.unwrap_err();
        assert!(matches!(err, DenliteError::NoUsableLayer(_)));
    }

    #[tokio::test]
    async fn test_image_index_manifest_is_unsupported() {
        let temp = tempfile::tempdir().unwrap();
        let source: &'static FakeSource = Box::leak(Box::new(FakeSource::with_manifest(
            "sha256:aaa",
            serde_json::json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": []
            }),
        )));
        let cache = cache_with(source, temp.path());

        let err = cache.resolve(REFERENCE).await.unwrap_err();
        assert!(matches!(err, DenliteError::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_cache_key_components() {
        let cache = FeatureCache::new(PathBuf::from("/den/features"), PathBuf::from("/den/tmp"));
        let reference: Reference = "ghcr.io/acme/features/node:1".parse().unwrap();
        assert_eq!(
            cache.cache_key(&reference),
            PathBuf::from("/den/features/ghcr.io/acme/features/node/1")
        );
    }
}
