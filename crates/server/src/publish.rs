//! Publishing a compiled catalog together with the environment needed to serve it.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("valid slug regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Where clients reach the deployment: the MCP endpoint when a public origin is known,
    /// otherwise the published catalog file.
    pub url: String,
    pub location: PathBuf,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("deployment name '{0}' has no usable characters")]
    InvalidName(String),
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        artifact: &str,
        name: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<Published, PublishError>;
}

/// Lowercase; every run of characters outside `[a-z0-9-]` becomes a single `-`.
#[must_use]
pub fn slug(name: &str) -> Option<String> {
    let lowered = name.to_lowercase();
    let replaced = NON_SLUG.replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Writes `<root>/<slug>/catalog.json` and `<root>/<slug>/.env`.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    root: PathBuf,
    public_url: Option<String>,
}

impl DirectoryPublisher {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, public_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_url,
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PublishError {
    move |source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn write(path: &Path, contents: &str) -> Result<(), PublishError> {
    tokio::fs::write(path, contents).await.map_err(io_error(path))
}

/// Owner-only from creation on; an existing file is truncated and tightened to 0600.
async fn write_private(path: &Path, contents: &str) -> Result<(), PublishError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await.map_err(io_error(path))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_error(path))?;
    }
    file.write_all(contents.as_bytes())
        .await
        .map_err(io_error(path))?;
    file.flush().await.map_err(io_error(path))
}

fn env_value(raw: &str) -> String {
    let plain = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@".contains(c));
    if plain {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

fn render_env(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| format!("{k}={}\n", env_value(v)))
        .collect()
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    async fn publish(
        &self,
        artifact: &str,
        name: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<Published, PublishError> {
        let slug = slug(name).ok_or_else(|| PublishError::InvalidName(name.to_string()))?;
        let dir = self.root.join(&slug);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(io_error(&dir))?;

        let catalog_path = dir.join("catalog.json");
        write(&catalog_path, artifact).await?;

        let env_path = dir.join(".env");
        write_private(&env_path, &render_env(env)).await?;

        let url = match &self.public_url {
            Some(origin) => format!("{}/mcp", origin.trim_end_matches('/')),
            None => {
                let absolute = std::path::absolute(&catalog_path).unwrap_or(catalog_path);
                format!("file://{}", absolute.display())
            }
        };
        tracing::info!(slug = %slug, dir = %dir.display(), "published deployment");

        Ok(Published { url, location: dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert_eq!(slug("Petstore API").as_deref(), Some("petstore-api"));
        assert_eq!(slug("  My__Service v2!! ").as_deref(), Some("my-service-v2"));
        assert_eq!(slug("already-fine").as_deref(), Some("already-fine"));
        assert_eq!(slug("Ünïcode"), Some("n-code".to_string()));
        assert_eq!(slug("pet--store").as_deref(), Some("pet--store"));
        assert_eq!(slug("***"), None);
    }

    #[test]
    fn env_values_are_quoted_when_needed() {
        let env = BTreeMap::from([
            ("A".to_string(), "https://api.example.com/v1".to_string()),
            ("B".to_string(), "has space".to_string()),
            ("C".to_string(), "it's".to_string()),
        ]);
        assert_eq!(
            render_env(&env),
            "A=https://api.example.com/v1\nB='has space'\nC='it'\\''s'\n"
        );
    }

    #[tokio::test]
    async fn publishes_catalog_and_env_under_the_slug() {
        let root = tempfile::tempdir().expect("tempdir");
        let publisher =
            DirectoryPublisher::new(root.path(), Some("https://mcp.example.com/".to_string()));
        let env = BTreeMap::from([("MCP_ANYTHING_CLIENT_ID".to_string(), "abc".to_string())]);

        let published = publisher
            .publish("{\"name\":\"Pet Store\"}", "Pet Store", &env)
            .await
            .expect("publish");

        assert_eq!(published.url, "https://mcp.example.com/mcp");
        assert_eq!(published.location, root.path().join("pet-store"));
        let catalog = std::fs::read_to_string(root.path().join("pet-store/catalog.json"))
            .expect("catalog");
        assert_eq!(catalog, "{\"name\":\"Pet Store\"}");
        let dotenv = std::fs::read_to_string(root.path().join("pet-store/.env")).expect("env");
        assert_eq!(dotenv, "MCP_ANYTHING_CLIENT_ID=abc\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = std::fs::metadata(root.path().join("pet-store/.env"))
                .expect("metadata")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn republishing_tightens_an_existing_env_file() {
        use std::os::unix::fs::PermissionsExt as _;

        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("svc");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let env_path = dir.join(".env");
        std::fs::write(&env_path, "OLD=1\nSTALE=much longer old content\n").expect("seed");
        std::fs::set_permissions(&env_path, std::fs::Permissions::from_mode(0o644))
            .expect("chmod");

        let env = BTreeMap::from([("NEW".to_string(), "2".to_string())]);
        DirectoryPublisher::new(root.path(), None)
            .publish("{}", "svc", &env)
            .await
            .expect("publish");

        assert_eq!(std::fs::read_to_string(&env_path).expect("env"), "NEW=2\n");
        let mode = std::fs::metadata(&env_path)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn without_a_public_origin_the_url_is_the_catalog_file() {
        let root = tempfile::tempdir().expect("tempdir");
        let publisher = DirectoryPublisher::new(root.path(), None);
        let published = publisher
            .publish("{}", "svc", &BTreeMap::new())
            .await
            .expect("publish");
        assert!(published.url.starts_with("file://"));
        assert!(published.url.ends_with("svc/catalog.json"));
    }

    #[tokio::test]
    async fn unusable_names_are_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let err = DirectoryPublisher::new(root.path(), None)
            .publish("{}", "!!!", &BTreeMap::new())
            .await
            .expect_err("invalid name");
        assert!(matches!(err, PublishError::InvalidName(_)));
    }
}
