//! # engine-auto
//!
//! Locate, download, cache and bind the flux native conversion engine, a
//! shared library exposing a small C ABI (see [`NativeEngine`]).
//!
//! ## How it works
//!
//! On a call to [`bind_engine`] or [`ensure_engine_library`]:
//!
//! 1. Uses [`EngineSource::library_path`] when it points to an existing file.
//! 2. Otherwise uses `FLUX_ENGINE_LIB_PATH` when it points to an existing file.
//! 3. Otherwise checks the per-ABI cache directory for the platform library.
//! 4. If absent and [`EngineSource::download_base_url`] is set, downloads
//!    `flux-engine-{os}-{arch}.tgz` from that base URL and extracts the
//!    library into the cache directory.
//! 5. Binds the library with `libloading` and checks its ABI version.
//!
//! Nothing is memoised here. The caller owns the bound engine and decides
//! whether a failed attempt may be retried.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_auto::{bind_engine, EngineSource};
//!
//! let source = EngineSource {
//!     library_path: Some("/opt/flux/libflux_engine.so".into()),
//!     ..EngineSource::default()
//! };
//! let engine = bind_engine(&source, None).expect("engine unavailable");
//! let out = engine.convert(b"...", "ply", "spz");
//! ```
//!
//! ## Platform support
//!
//! | OS      | Arch    | Library                 |
//! |---------|---------|-------------------------|
//! | macOS   | arm64   | `libflux_engine.dylib`  |
//! | macOS   | x86_64  | `libflux_engine.dylib`  |
//! | Linux   | x86_64  | `libflux_engine.so`     |
//! | Linux   | aarch64 | `libflux_engine.so`     |
//! | Windows | x86_64  | `flux_engine.dll`       |
//! | Windows | aarch64 | `flux_engine.dll`       |
//!
//! ## Environment variable overrides
//!
//! - `FLUX_ENGINE_LIB_PATH`: path to an existing engine library.
//! - `FLUX_ENGINE_CACHE_DIR`: override the default cache directory.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::{c_char, CStr, CString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::{Library, Symbol};
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Public constants ─────────────────────────────────────────────────────────

/// ABI revision this crate speaks. The library must report the same value
/// from `flux_engine_abi_version`.
pub const ENGINE_ABI_VERSION: u32 = 1;

/// Environment variable naming an existing engine library.
pub const LIB_PATH_ENV: &str = "FLUX_ENGINE_LIB_PATH";

/// Environment variable overriding the cache base directory.
pub const CACHE_DIR_ENV: &str = "FLUX_ENGINE_CACHE_DIR";

const SYM_ABI_VERSION: &[u8] = b"flux_engine_abi_version\0";
const SYM_CONVERT: &[u8] = b"flux_engine_convert\0";
const SYM_FREE_BYTES: &[u8] = b"flux_engine_free_bytes\0";
const SYM_FREE_ERROR: &[u8] = b"flux_engine_free_error\0";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned while acquiring or binding the engine.
#[derive(Error, Debug)]
pub enum EngineAutoError {
    /// The current OS/architecture combination is not supported.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// gzip/tar extraction failed.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// `libloading` could not open the library or resolve a symbol.
    #[error("Failed to bind engine from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },

    /// The library speaks a different ABI revision.
    #[error("Engine at '{path}' reports ABI {found}, expected {expected}")]
    AbiMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// No explicit path, no cached copy and no download URL.
    #[error("No engine library found (looked in '{searched}') and no download URL configured")]
    NoSource { searched: PathBuf },
}

/// A failed `flux_engine_convert` call.
///
/// `message` is `None` when the engine did not provide one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .message.as_deref().unwrap_or("engine reported a failure without a message"))]
pub struct ConvertFailure {
    pub message: Option<String>,
}

// ── Engine source ────────────────────────────────────────────────────────────

/// Where to look for the engine library.
#[derive(Debug, Clone, Default)]
pub struct EngineSource {
    /// Explicit library path; wins over everything else when it exists.
    pub library_path: Option<PathBuf>,
    /// Base URL hosting `flux-engine-{os}-{arch}.tgz` archives.
    pub download_base_url: Option<String>,
    /// Cache base directory; `FLUX_ENGINE_CACHE_DIR` or the platform cache
    /// directory when `None`.
    pub cache_dir: Option<PathBuf>,
}

// ── Internal: platform metadata ──────────────────────────────────────────────

struct PlatformInfo {
    /// Asset filename under the download base URL.
    archive_name: String,
    /// Relative path inside the archive, e.g. `lib/libflux_engine.so`.
    lib_path_in_archive: String,
    /// Filename on disk.
    lib_name: String,
}

/// Filename of the engine library on this platform.
pub fn engine_library_name() -> String {
    format!("{DLL_PREFIX}flux_engine{DLL_SUFFIX}")
}

fn detect_platform() -> Result<PlatformInfo, EngineAutoError> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    let (os_tag, lib_dir) = match os {
        "macos" => ("mac", "lib"),
        "linux" => ("linux", "lib"),
        "windows" => ("win", "bin"),
        _ => {
            return Err(EngineAutoError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
        }
    };
    let arch_tag = match arch {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        _ => {
            return Err(EngineAutoError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
        }
    };

    let lib_name = engine_library_name();
    Ok(PlatformInfo {
        archive_name: format!("flux-engine-{os_tag}-{arch_tag}.tgz"),
        lib_path_in_archive: format!("{lib_dir}/{lib_name}"),
        lib_name,
    })
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the per-ABI cache directory for the engine library.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/flux-convert/engine-abi{N}/`
/// - **Linux**: `~/.cache/flux-convert/engine-abi{N}/`
/// - **Windows**: `%LOCALAPPDATA%\flux-convert\engine-abi{N}\`
///
/// `override_dir` wins, then `FLUX_ENGINE_CACHE_DIR`.
pub fn engine_cache_dir(override_dir: Option<&Path>) -> PathBuf {
    cache_dir_from(override_dir, std::env::var(CACHE_DIR_ENV).ok())
}

fn cache_dir_from(override_dir: Option<&Path>, env_dir: Option<String>) -> PathBuf {
    let leaf = format!("engine-abi{ENGINE_ABI_VERSION}");

    if let Some(dir) = override_dir {
        return dir.join(leaf);
    }
    if let Some(dir) = env_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir).join(leaf);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("flux-convert").join(leaf)
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns the on-disk path to an already available engine library, or
/// `None` when acquiring it would require a download.
pub fn cached_engine_path(source: &EngineSource) -> Option<PathBuf> {
    if let Some(p) = source.library_path.as_ref().filter(|p| p.exists()) {
        return Some(p.clone());
    }
    if let Ok(p) = std::env::var(LIB_PATH_ENV) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    let info = detect_platform().ok()?;
    let p = engine_cache_dir(source.cache_dir.as_deref()).join(info.lib_name);
    p.exists().then_some(p)
}

/// Ensures the engine library is present locally and returns its path.
///
/// `on_progress` receives `(bytes_downloaded, total_size_option)` during a
/// download. Pass `None` to suppress progress callbacks.
pub fn ensure_engine_library(
    source: &EngineSource,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, EngineAutoError> {
    if let Some(ref explicit) = source.library_path {
        if explicit.exists() {
            return Ok(explicit.clone());
        }
        warn!(
            "engine library '{}' not found; trying other sources",
            explicit.display()
        );
    }

    if let Ok(env_path) = std::env::var(LIB_PATH_ENV) {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Ok(p);
        }
        warn!("{LIB_PATH_ENV} '{}' not found; trying cache", p.display());
    }

    let info = detect_platform()?;
    let cache_dir = engine_cache_dir(source.cache_dir.as_deref());
    let lib_path = cache_dir.join(&info.lib_name);

    if lib_path.exists() {
        debug!("engine library cached at {}", lib_path.display());
        return Ok(lib_path);
    }

    let Some(ref base_url) = source.download_base_url else {
        return Err(EngineAutoError::NoSource {
            searched: cache_dir,
        });
    };

    let url = format!("{}/{}", base_url.trim_end_matches('/'), info.archive_name);
    info!("downloading conversion engine from {url}");

    std::fs::create_dir_all(&cache_dir).map_err(EngineAutoError::CacheDir)?;

    let archive_bytes = download_bytes(&url, on_progress)?;
    extract_library(&archive_bytes, &info.lib_path_in_archive, &lib_path)?;

    info!("engine library installed at {}", lib_path.display());
    Ok(lib_path)
}

/// Acquires (downloading if necessary) and binds the engine.
pub fn bind_engine(
    source: &EngineSource,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<NativeEngine, EngineAutoError> {
    let lib_path = ensure_engine_library(source, on_progress)?;
    bind_engine_from_path(&lib_path)
}

/// Binds to an engine library at an explicit `path`.
///
/// Does not interact with the download / cache layer.
pub fn bind_engine_from_path(path: &Path) -> Result<NativeEngine, EngineAutoError> {
    let bind_err = |e: libloading::Error| EngineAutoError::Bind {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    // SAFETY: loading a foreign library runs its initialisers; the engine is
    // trusted by ABI contract and checked for its revision below.
    let lib = unsafe { Library::new(path) }.map_err(bind_err)?;

    // SAFETY: symbol signatures match the documented C ABI. The copied fn
    // pointers stay valid while `lib` is alive, which `NativeEngine` ensures.
    let (abi_version, convert, free_bytes, free_error) = unsafe {
        let abi: Symbol<AbiVersionFn> = lib.get(SYM_ABI_VERSION).map_err(bind_err)?;
        let convert: Symbol<ConvertFn> = lib.get(SYM_CONVERT).map_err(bind_err)?;
        let free_bytes: Symbol<FreeBytesFn> = lib.get(SYM_FREE_BYTES).map_err(bind_err)?;
        let free_error: Symbol<FreeErrorFn> = lib.get(SYM_FREE_ERROR).map_err(bind_err)?;
        (*abi, *convert, *free_bytes, *free_error)
    };

    // SAFETY: no arguments, plain integer return.
    let found = unsafe { abi_version() };
    if found != ENGINE_ABI_VERSION {
        return Err(EngineAutoError::AbiMismatch {
            path: path.to_path_buf(),
            found,
            expected: ENGINE_ABI_VERSION,
        });
    }

    debug!("bound engine {} (ABI {found})", path.display());
    Ok(NativeEngine {
        convert,
        free_bytes,
        free_error,
        path: path.to_path_buf(),
        _lib: lib,
    })
}

// ── Native engine ────────────────────────────────────────────────────────────

/// Output buffer handed back by `flux_engine_convert`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FluxEngineBytes {
    pub ptr: *mut u8,
    pub len: usize,
}

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type ConvertFn = unsafe extern "C" fn(
    input: *const u8,
    input_len: usize,
    source_format: *const c_char,
    target_format: *const c_char,
    out: *mut FluxEngineBytes,
    error_message: *mut *mut c_char,
) -> i32;
type FreeBytesFn = unsafe extern "C" fn(bytes: FluxEngineBytes);
type FreeErrorFn = unsafe extern "C" fn(error_message: *mut c_char);

/// A bound engine library.
///
/// The fn pointers point into `_lib`; owning the `Library` here keeps it
/// mapped for as long as any of them can be called.
pub struct NativeEngine {
    convert: ConvertFn,
    free_bytes: FreeBytesFn,
    free_error: FreeErrorFn,
    path: PathBuf,
    _lib: Library,
}

impl std::fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEngine")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl NativeEngine {
    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run one conversion.
    pub fn convert(
        &self,
        input: &[u8],
        source_format: &str,
        target_format: &str,
    ) -> Result<Vec<u8>, ConvertFailure> {
        let src = c_format(source_format)?;
        let tgt = c_format(target_format)?;

        let mut out = FluxEngineBytes {
            ptr: ptr::null_mut(),
            len: 0,
        };
        let mut error: *mut c_char = ptr::null_mut();

        // SAFETY: `input`, `src` and `tgt` outlive the call; `out` and
        // `error` are valid out-pointers.
        let status = unsafe {
            (self.convert)(
                input.as_ptr(),
                input.len(),
                src.as_ptr(),
                tgt.as_ptr(),
                &mut out,
                &mut error,
            )
        };

        if status != 0 {
            let message = if error.is_null() {
                None
            } else {
                // SAFETY: the engine hands back a NUL-terminated string it
                // allocated; we return it to the engine once copied.
                let text = unsafe { CStr::from_ptr(error) }
                    .to_string_lossy()
                    .into_owned();
                unsafe { (self.free_error)(error) };
                Some(text).filter(|t| !t.trim().is_empty())
            };
            return Err(ConvertFailure { message });
        }

        if out.ptr.is_null() {
            return Ok(Vec::new());
        }

        // The buffer belongs to the engine's allocator; copy it out and give
        // it back.
        // SAFETY: on success `out` describes `len` initialised bytes.
        let bytes = unsafe { std::slice::from_raw_parts(out.ptr, out.len) }.to_vec();
        unsafe { (self.free_bytes)(out) };
        Ok(bytes)
    }
}

fn c_format(tag: &str) -> Result<CString, ConvertFailure> {
    CString::new(tag).map_err(|_| ConvertFailure {
        message: Some(format!("format tag contains a NUL byte: {tag:?}")),
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Upper bound on the buffer reserved from `Content-Length` before any byte
/// arrives. Larger bodies grow the buffer as they stream in.
const MAX_UPFRONT_RESERVE: u64 = 64 * 1024 * 1024;
const DEFAULT_RESERVE: usize = 8 * 1024 * 1024;
const READ_CHUNK: usize = 64 * 1024;

/// Fetches `url` into memory, reporting progress after every chunk.
fn download_bytes(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, EngineAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("engine-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| EngineAutoError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| EngineAutoError::Download(format!("GET {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineAutoError::Download(format!("HTTP {status} for {url}")));
    }

    let total = response.content_length();
    read_body(response, total, on_progress)
        .map_err(|e| EngineAutoError::Download(format!("reading {url}: {e}")))
}

/// Drains `body`, trusting `total` only as a progress hint.
fn read_body(
    mut body: impl Read,
    total: Option<u64>,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> std::io::Result<Vec<u8>> {
    let reserve = total.map_or(DEFAULT_RESERVE, |t| t.min(MAX_UPFRONT_RESERVE) as usize);
    let mut buf = Vec::with_capacity(reserve);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match body.read(&mut chunk) {
            Ok(0) => return Ok(buf),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(cb) = on_progress {
            cb(buf.len() as u64, total);
        }
    }
}

/// Copies the `lib_path_in_archive` entry of a gzipped tarball to
/// `dest_path`.
///
/// The bytes are staged in a temp file next to `dest_path` and renamed into
/// place once complete, so a broken archive never leaves a partial library
/// that later lookups would mistake for a cached one.
fn extract_library(
    archive_bytes: &[u8],
    lib_path_in_archive: &str,
    dest_path: &Path,
) -> Result<(), EngineAutoError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let extract_err = |e: std::io::Error| EngineAutoError::Extract(e.to_string());
    let mut archive = Archive::new(GzDecoder::new(archive_bytes));

    for entry in archive.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        if entry.path().map_err(extract_err)?.to_string_lossy() != lib_path_in_archive {
            continue;
        }

        let dir = dest_path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(EngineAutoError::CacheDir)?;
        std::io::copy(&mut entry, staged.as_file_mut())
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| EngineAutoError::Extract(format!("Unpack failed: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = entry.header().mode().unwrap_or(0o755);
            staged
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(mode))
                .map_err(extract_err)?;
        }

        staged
            .persist(dest_path)
            .map_err(|e| EngineAutoError::Extract(format!("Install failed: {}", e.error)))?;
        return Ok(());
    }

    Err(EngineAutoError::Extract(format!(
        "Library '{lib_path_in_archive}' not found in archive"
    )))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tgz_with(entry: &str, payload: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o755);
        builder.append_data(&mut header, entry, payload).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn detect_platform_is_supported() {
        detect_platform().expect("current platform should be supported");
    }

    #[test]
    fn platform_info_fields_nonempty() {
        let info = detect_platform().unwrap();
        assert!(info.archive_name.starts_with("flux-engine-"));
        assert!(info.archive_name.ends_with(".tgz"));
        assert!(info.lib_path_in_archive.ends_with(&info.lib_name));
        assert!(info.lib_name.contains("flux_engine"));
    }

    #[test]
    fn cache_dir_is_deterministic() {
        let d1 = cache_dir_from(None, None);
        let d2 = cache_dir_from(None, None);
        assert_eq!(d1, d2);
        let s = d1.to_str().unwrap();
        assert!(s.contains("flux-convert"));
        assert!(s.ends_with(&format!("engine-abi{ENGINE_ABI_VERSION}")));
    }

    #[test]
    fn cache_dir_override_order() {
        let explicit = Path::new("/tmp/flux_explicit");
        let d = cache_dir_from(Some(explicit), Some("/tmp/flux_env".into()));
        assert!(d.starts_with(explicit));

        let d = cache_dir_from(None, Some("/tmp/flux_env".into()));
        assert!(d.starts_with("/tmp/flux_env"));

        // An empty env value is ignored.
        let d = cache_dir_from(None, Some(String::new()));
        assert!(d.to_str().unwrap().contains("flux-convert"));
    }

    #[test]
    fn extract_library_writes_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("libflux_engine.so");
        let archive = tgz_with("lib/libflux_engine.so", b"\x7fELF-not-really");

        extract_library(&archive, "lib/libflux_engine.so", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"\x7fELF-not-really");
    }

    #[test]
    fn extract_library_reports_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = tgz_with("lib/other.so", b"x");

        let err = extract_library(&archive, "lib/libflux_engine.so", &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, EngineAutoError::Extract(_)), "got: {err}");
        assert!(err.to_string().contains("not found in archive"));
    }

    #[test]
    fn extract_library_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_library(b"definitely not gzip", "lib/x.so", &dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, EngineAutoError::Extract(_)));
    }

    #[test]
    fn truncated_archive_leaves_no_library_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("libflux_engine.so");
        let payload: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i * 7919 % 251) as u8).collect();
        let archive = tgz_with("lib/libflux_engine.so", &payload);
        let truncated = &archive[..archive.len() / 2];

        let err = extract_library(truncated, "lib/libflux_engine.so", &dest).unwrap_err();

        assert!(matches!(err, EngineAutoError::Extract(_)), "got: {err}");
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn extract_library_replaces_stale_copy() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("libflux_engine.so");
        std::fs::write(&dest, b"stale").unwrap();

        let archive = tgz_with("lib/libflux_engine.so", b"fresh");
        extract_library(&archive, "lib/libflux_engine.so", &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"fresh");
    }

    // ── Download ────────────────────────────────────────────────────────────

    /// Serves one HTTP request with `head` followed by `body`, then hangs up.
    fn serve_once(head: String, body: Vec<u8>) -> String {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = reader.into_inner();
            stream.write_all(head.as_bytes()).unwrap();
            let _ = stream.write_all(&body);
        });
        format!("http://{addr}")
    }

    #[test]
    fn download_reports_progress_and_returns_body() {
        let body = tgz_with("lib/libflux_engine.so", b"engine");
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let url = serve_once(head, body.clone());
        let seen = std::cell::Cell::new((0, None));
        let progress = |done: u64, total: Option<u64>| seen.set((done, total));

        let bytes = download_bytes(&format!("{url}/engine.tgz"), Some(&progress)).unwrap();

        assert_eq!(bytes, body);
        assert_eq!(seen.get(), (body.len() as u64, Some(body.len() as u64)));
    }

    #[test]
    fn download_survives_absurd_content_length() {
        let head = "HTTP/1.1 200 OK\r\nContent-Length: 900000000000000\r\nConnection: close\r\n\r\n";
        let url = serve_once(head.to_string(), b"short body".to_vec());

        let err = download_bytes(&format!("{url}/engine.tgz"), None).unwrap_err();

        assert!(matches!(err, EngineAutoError::Download(_)), "got: {err}");
    }

    #[test]
    fn download_rejects_http_errors() {
        let head = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let url = serve_once(head.to_string(), Vec::new());

        let err = download_bytes(&format!("{url}/engine.tgz"), None).unwrap_err();

        assert!(err.to_string().contains("404"), "got: {err}");
    }

    #[test]
    fn read_body_caps_reservation_to_the_limit() {
        let body = read_body(&b"abc"[..], Some(u64::MAX), None).unwrap();
        assert_eq!(body, b"abc");
        assert!(body.capacity() as u64 <= MAX_UPFRONT_RESERVE);
    }

    #[test]
    fn bind_missing_library_fails() {
        let err = bind_engine_from_path(Path::new("/definitely/not/libflux_engine.so"))
            .unwrap_err();
        match err {
            EngineAutoError::Bind { path, .. } => {
                assert!(path.ends_with("libflux_engine.so"));
            }
            other => panic!("expected Bind error, got {other}"),
        }
    }

    #[test]
    fn bind_non_library_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join(engine_library_name());
        std::fs::write(&bogus, b"not a shared object").unwrap();

        assert!(matches!(
            bind_engine_from_path(&bogus),
            Err(EngineAutoError::Bind { .. })
        ));
    }

    #[test]
    fn ensure_prefers_existing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("custom_engine.so");
        std::fs::write(&lib, b"stub").unwrap();

        let source = EngineSource {
            library_path: Some(lib.clone()),
            ..EngineSource::default()
        };
        assert_eq!(ensure_engine_library(&source, None).unwrap(), lib);
        assert_eq!(cached_engine_path(&source), Some(lib));
    }

    #[test]
    fn ensure_uses_cache_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = engine_cache_dir(Some(dir.path()));
        std::fs::create_dir_all(&cache).unwrap();
        let lib = cache.join(engine_library_name());
        std::fs::write(&lib, b"stub").unwrap();

        let source = EngineSource {
            library_path: Some(dir.path().join("missing.so")),
            cache_dir: Some(dir.path().to_path_buf()),
            ..EngineSource::default()
        };
        if std::env::var(LIB_PATH_ENV).is_err() {
            assert_eq!(ensure_engine_library(&source, None).unwrap(), lib);
        }
    }

    #[test]
    fn ensure_without_any_source_fails() {
        if std::env::var(LIB_PATH_ENV).is_ok() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let source = EngineSource {
            cache_dir: Some(dir.path().to_path_buf()),
            ..EngineSource::default()
        };

        let err = ensure_engine_library(&source, None).unwrap_err();
        assert!(matches!(err, EngineAutoError::NoSource { .. }), "got: {err}");
        assert!(cached_engine_path(&source).is_none());
    }

    #[test]
    fn convert_failure_display_falls_back() {
        let f = ConvertFailure { message: None };
        assert!(f.to_string().contains("without a message"));
        let f = ConvertFailure {
            message: Some("bad header".into()),
        };
        assert_eq!(f.to_string(), "bad header");
    }
}
