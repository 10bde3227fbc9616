//! Remote extends sources.
//!
//! Sources such as `gh:org/repo/sub#ref` or `https://host/layer.tar.gz` are
//! downloaded into a cache directory named after a hash of the source
//! string, then resolved like a local directory.

use super::formats::exists;
use super::types::SourceOptions;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

/// Built-in remote prefixes.
pub const REMOTE_PREFIXES: &[&str] = &["gh:", "github:", "gitlab:", "bitbucket:", "https://", "http://"];

/// Name of the cache namespace directory.
pub const CACHE_NAMESPACE: &str = "confstack";

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W+").expect("non-word pattern is valid"));

/// Downloads a remote template into a directory.
#[async_trait]
pub trait TemplateFetcher: Send + Sync {
    /// Fetch `source` into `dir` and return the directory holding the
    /// template's files.
    async fn fetch(&self, source: &str, dir: &Path, options: &SourceOptions) -> Result<PathBuf>;
}

/// True when `source` names a remote template.
pub fn is_remote(source: &str, options: &SourceOptions) -> bool {
    REMOTE_PREFIXES.iter().any(|p| source.starts_with(p))
        || options
            .provider_names()
            .iter()
            .any(|name| source.starts_with(&format!("{name}:")))
}

/// Cache directory name: up to three words of the source plus a short hash.
pub fn clone_name(source: &str) -> String {
    let words = NON_WORD.replace_all(source, "_");
    let prefix: Vec<&str> = words.split('_').take(3).collect();
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    format!("{}_{}", prefix.join("_"), &digest[..10])
}

/// Where `source` is cached when extended from `cwd`.
///
/// Templates extended from inside the cache stay next to each other;
/// projects with a `node_modules` keep their own cache; otherwise the user
/// cache directory is used.
pub fn cache_dir(source: &str, cwd: &Path) -> PathBuf {
    let name = clone_name(source);
    if let Some(parent) = cwd.parent()
        && parent.file_name().is_some_and(|n| n == format!(".{CACHE_NAMESPACE}").as_str())
    {
        return parent.join(name);
    }
    let node_modules = cwd.join("node_modules");
    if node_modules.is_dir() {
        return node_modules.join(format!(".{CACHE_NAMESPACE}")).join(name);
    }
    let cache_home = std::env::var_os("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    cache_home.join(CACHE_NAMESPACE).join(name)
}

/// Fetch a remote source into its cache directory.
///
/// An existing cache directory is purged and fetched again, unless
/// `options.install` asks to reuse it.
pub async fn fetch_remote(
    source: &str,
    cwd: &Path,
    fetcher: &dyn TemplateFetcher,
    options: &SourceOptions,
) -> Result<PathBuf> {
    let dir = cache_dir(source, cwd);
    if exists(&dir).await {
        if options.install {
            debug!("Reusing cached template {} at {}", source, dir.display());
            return Ok(dir);
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| ConfigError::io(&dir, e))?;
    }
    info!("Fetching template {} into {}", source, dir.display());
    fetcher.fetch(source, &dir, options).await
}

/// A parsed `provider:owner/repo/subdir#ref` source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSource {
    pub provider: String,
    pub repo: String,
    pub subdir: Option<String>,
    pub git_ref: String,
}

impl RepoSource {
    pub fn parse(source: &str) -> Option<Self> {
        let (provider, rest) = source.split_once(':')?;
        let (path, git_ref) = match rest.split_once('#') {
            Some((path, r)) if !r.is_empty() => (path, r.to_string()),
            Some((path, _)) => (path, "main".to_string()),
            None => (rest, "main".to_string()),
        };
        let mut parts = path.trim_matches('/').splitn(3, '/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        let subdir = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
        let provider = match provider {
            "gh" => "github",
            other => other,
        };
        Some(Self {
            provider: provider.to_string(),
            repo: format!("{owner}/{name}"),
            subdir,
            git_ref,
        })
    }

    /// Tarball URL for this source, using `template` for custom providers.
    pub fn tarball_url(&self, template: Option<&str>) -> Option<String> {
        let url = match (self.provider.as_str(), template) {
            (_, Some(template)) => template
                .replace("{repo}", &self.repo)
                .replace("{ref}", &self.git_ref)
                .replace("{subdir}", self.subdir.as_deref().unwrap_or("")),
            ("github", None) => format!(
                "https://github.com/{}/archive/{}.tar.gz",
                self.repo, self.git_ref
            ),
            ("gitlab", None) => format!(
                "https://gitlab.com/{}/-/archive/{}.tar.gz",
                self.repo, self.git_ref
            ),
            ("bitbucket", None) => format!(
                "https://bitbucket.org/{}/get/{}.tar.gz",
                self.repo, self.git_ref
            ),
            _ => return None,
        };
        Some(url)
    }
}

/// Downloads gzipped tarballs over HTTP(S) and unpacks them.
///
/// Repository sources unpack their archive with the top-level directory
/// stripped, keeping only `subdir` when one is given.
#[derive(Debug, Clone, Default)]
pub struct TarballFetcher {
    client: reqwest::Client,
}

impl TarballFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn download(&self, url: &str, source: &str, options: &SourceOptions) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(token) = &options.auth {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ConfigError::fetch(source, e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ConfigError::fetch(source, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl TemplateFetcher for TarballFetcher {
    async fn fetch(&self, source: &str, dir: &Path, options: &SourceOptions) -> Result<PathBuf> {
        let (url, subdir) = if source.starts_with("https://") || source.starts_with("http://") {
            (source.to_string(), None)
        } else {
            let repo = RepoSource::parse(source)
                .ok_or_else(|| ConfigError::fetch(source, "expected provider:owner/repo[/subdir][#ref]"))?;
            let template = options.provider_template(&repo.provider);
            let url = repo
                .tarball_url(template)
                .ok_or_else(|| ConfigError::fetch(source, format!("unknown provider `{}`", repo.provider)))?;
            (url, repo.subdir)
        };

        debug!("Downloading {}", url);
        let archive = self.download(&url, source, options).await?;

        let target = dir.to_path_buf();
        let source_name = source.to_string();
        tokio::task::spawn_blocking(move || unpack(&archive, &target, subdir.as_deref()))
            .await
            .map_err(|e| ConfigError::fetch(&source_name, e))?
            .map_err(|e| ConfigError::fetch(&source_name, e))?;
        Ok(dir.to_path_buf())
    }
}

/// Unpack a `.tar.gz`, dropping the archive's top-level directory.
fn unpack(archive: &[u8], dir: &Path, subdir: Option<&str>) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let subdir = subdir.map(|s| PathBuf::from(s.trim_matches('/')));
    let mut tar = tar::Archive::new(GzDecoder::new(Cursor::new(archive)));
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let stripped: PathBuf = path.components().skip(1).collect();
        let relative = match &subdir {
            Some(sub) => match stripped.strip_prefix(sub) {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => continue,
            },
            None => stripped,
        };
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            continue;
        }
        let dest = dir.join(&relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_is_remote() {
        let none = SourceOptions::default();
        assert!(is_remote("gh:org/repo", &none));
        assert!(is_remote("https://example.com/x.tar.gz", &none));
        assert!(!is_remote("./local", &none));
        assert!(!is_remote("internal:org/repo", &none));

        let custom = SourceOptions::from_value(&json!({
            "giget": { "providers": { "internal": "https://git.local/{repo}.tgz" } }
        }));
        assert!(is_remote("internal:org/repo", &custom));
    }

    #[test]
    fn test_clone_name_is_deterministic() {
        let a = clone_name("gh:unjs/c12/test/fixture#main");
        let b = clone_name("gh:unjs/c12/test/fixture#main");
        assert_eq!(a, b);
        assert!(a.starts_with("gh_unjs_c12_"));
        assert_eq!(a.len(), "gh_unjs_c12_".len() + 10);
        assert_ne!(a, clone_name("gh:unjs/c12/test/fixture#dev"));
    }

    #[test]
    fn test_cache_dir_prefers_node_modules() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("node_modules")).unwrap();
        let dir = cache_dir("gh:org/repo", temp.path());
        assert!(dir.starts_with(temp.path().join("node_modules/.confstack")));
    }

    #[test]
    fn test_cache_dir_siblings_inside_cache() {
        let dir = cache_dir("gh:org/other", Path::new("/proj/node_modules/.confstack/gh_org_repo_abc"));
        assert_eq!(dir.parent(), Some(Path::new("/proj/node_modules/.confstack")));
    }

    #[test]
    fn test_repo_source_parse() {
        let src = RepoSource::parse("gh:org/repo/layers/base#v2").unwrap();
        assert_eq!(src.provider, "github");
        assert_eq!(src.repo, "org/repo");
        assert_eq!(src.subdir.as_deref(), Some("layers/base"));
        assert_eq!(src.git_ref, "v2");
        assert_eq!(
            src.tarball_url(None).as_deref(),
            Some("https://github.com/org/repo/archive/v2.tar.gz")
        );

        let plain = RepoSource::parse("gitlab:team/proj").unwrap();
        assert_eq!(plain.git_ref, "main");
        assert!(plain.subdir.is_none());
        assert!(RepoSource::parse("gh:justowner").is_none());
    }

    #[test]
    fn test_custom_provider_template() {
        let src = RepoSource::parse("internal:org/repo#abc").unwrap();
        assert_eq!(
            src.tarball_url(Some("https://git.local/{repo}/archive/{ref}.tgz")).as_deref(),
            Some("https://git.local/org/repo/archive/abc.tgz")
        );
        assert_eq!(src.tarball_url(None), None);
    }

    struct FakeFetcher;

    #[async_trait]
    impl TemplateFetcher for FakeFetcher {
        async fn fetch(&self, _source: &str, dir: &Path, _options: &SourceOptions) -> Result<PathBuf> {
            tokio::fs::create_dir_all(dir).await.unwrap();
            tokio::fs::write(dir.join("marker"), "fresh").await.unwrap();
            Ok(dir.to_path_buf())
        }
    }

    #[tokio::test]
    async fn test_fetch_remote_purges_unless_install() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("node_modules")).unwrap();
        let dir = cache_dir("gh:org/repo", temp.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stale"), "old").unwrap();

        let reuse = SourceOptions {
            install: true,
            ..SourceOptions::default()
        };
        fetch_remote("gh:org/repo", temp.path(), &FakeFetcher, &reuse).await.unwrap();
        assert!(dir.join("stale").exists());

        fetch_remote("gh:org/repo", temp.path(), &FakeFetcher, &SourceOptions::default())
            .await
            .unwrap();
        assert!(!dir.join("stale").exists());
        assert!(dir.join("marker").exists());
    }
}
