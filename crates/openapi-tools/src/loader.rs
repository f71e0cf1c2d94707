//! API description loading (file or URL) and base URL resolution.

use crate::error::{CompileWarning, OpenApiToolsError, Result};
use anything_http_tools::body::read_body_limited;
use anything_http_tools::safety::{OutboundHttpSafety, sanitize_reqwest_error};
use openapiv3::{OpenAPI, Operation, PathItem, ReferenceOr};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail loading if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

impl std::str::FromStr for HashPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "fail" => Ok(Self::Fail),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown hash policy '{other}' (expected warn|fail|ignore)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Expected `sha256:<hex>` of the raw document.
    pub spec_hash: Option<String>,
    pub hash_policy: HashPolicy,
    pub safety: OutboundHttpSafety,
    pub timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            spec_hash: None,
            hash_policy: HashPolicy::default(),
            safety: OutboundHttpSafety::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// A parsed description plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedDescription {
    pub location: String,
    pub document: OpenAPI,
    /// `sha256:<hex>` of the raw bytes.
    pub spec_hash: String,
    /// Operations or path items dropped while parsing.
    pub warnings: Vec<CompileWarning>,
}

impl LoadedDescription {
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        let t = self.document.info.title.trim();
        (!t.is_empty()).then_some(t)
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Load and parse an `OpenAPI` 3 description (JSON or YAML) from a file path or `http(s)` URL.
///
/// # Errors
///
/// Returns an error if the document cannot be read or fetched, fails hash verification under
/// [`HashPolicy::Fail`], or is not a valid `OpenAPI` 3 document.
pub async fn load(location: &str, options: &LoadOptions) -> Result<LoadedDescription> {
    let raw: Vec<u8> = if is_url(location) {
        tracing::info!(location = %location, "fetching OpenAPI description");
        let url = Url::parse(location).map_err(|e| {
            OpenApiToolsError::OpenApi(format!("Invalid OpenAPI spec URL '{location}': {e}"))
        })?;
        options.safety.check_url(&url).await?;

        let client = options.safety.build_client(options.timeout)?;
        let resp = client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| OpenApiToolsError::OpenApiSpecFetch {
                url: location.to_string(),
                message: sanitize_reqwest_error(&e),
            })?;

        read_body_limited(resp, options.safety.max_response_bytes)
            .await
            .map_err(|e| OpenApiToolsError::OpenApiSpecReadBody {
                url: location.to_string(),
                message: e.to_string(),
            })?
    } else {
        tracing::info!(location = %location, "loading OpenAPI description");
        tokio::fs::read(location)
            .await
            .map_err(|e| OpenApiToolsError::OpenApiSpecReadFile {
                path: location.to_string(),
                source: e,
            })?
    };

    let actual_hash = format!("sha256:{}", hex::encode(Sha256::digest(&raw)));
    if let Some(expected_hash) = &options.spec_hash
        && !expected_hash.eq_ignore_ascii_case(&actual_hash)
    {
        match options.hash_policy {
            HashPolicy::Fail => {
                return Err(OpenApiToolsError::OpenApi(format!(
                    "Spec hash mismatch. Expected: {expected_hash}, Got: {actual_hash}",
                )));
            }
            HashPolicy::Warn => {
                tracing::warn!(
                    location = %location,
                    expected = %expected_hash,
                    actual = %actual_hash,
                    "spec hash mismatch"
                );
            }
            HashPolicy::Ignore => {}
        }
    }

    let (document, warnings) = parse_document(&raw, location)?;

    Ok(LoadedDescription {
        location: location.to_string(),
        document,
        spec_hash: actual_hash,
        warnings,
    })
}

const OPERATION_KEYS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Parse a JSON or YAML description, skipping operations that do not deserialize.
///
/// A missing `responses` map is treated as empty. Any other malformed operation (or path
/// item) is removed and reported as a [`CompileWarning`]; the rest of the document must be
/// valid.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::OpenApiSpecParse`] if the document itself is not valid.
pub fn parse_document(raw: &[u8], location: &str) -> Result<(OpenAPI, Vec<CompileWarning>)> {
    let parse_error = |source| OpenApiToolsError::OpenApiSpecParse {
        location: location.to_string(),
        source,
    };

    // JSON is a valid subset of YAML, so serde_yaml alone is enough.
    let mut value: serde_yaml::Value = serde_yaml::from_slice(raw).map_err(parse_error)?;
    let mut warnings = Vec::new();
    if let Some(paths) = value.get_mut("paths").and_then(serde_yaml::Value::as_mapping_mut) {
        paths.retain(|path, item| {
            let path = path.as_str().unwrap_or_default();
            prune_path_item(path, item, &mut warnings)
        });
    }

    let document = serde_yaml::from_value(value).map_err(parse_error)?;
    Ok((document, warnings))
}

/// Returns `false` when the whole path item has to go.
fn prune_path_item(
    path: &str,
    item: &mut serde_yaml::Value,
    warnings: &mut Vec<CompileWarning>,
) -> bool {
    if let Some(item) = item.as_mapping_mut() {
        for key in OPERATION_KEYS {
            let Some(operation) = item.get_mut(key) else {
                continue;
            };
            if let Some(operation) = operation.as_mapping_mut()
                && !operation.contains_key("responses")
            {
                operation.insert(
                    "responses".into(),
                    serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
                );
            }
            if let Err(e) = serde_yaml::from_value::<Operation>(operation.clone()) {
                let operation = format!("{} {path}", key.to_ascii_uppercase());
                tracing::warn!(operation = %operation, error = %e, "skipping malformed operation");
                warnings.push(CompileWarning::new(operation, format!("skipped: {e}")));
                item.remove(key);
            }
        }
    }
    match serde_yaml::from_value::<ReferenceOr<PathItem>>(item.clone()) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "skipping malformed path item");
            warnings.push(CompileWarning::new(path, format!("skipped: {e}")));
            false
        }
    }
}

/// Resolve the API base URL: explicit override, else the first `servers[].url`.
///
/// Relative server URLs (e.g. `/api/v3`) resolve against the description URL when it was
/// fetched over HTTP. A trailing slash is removed so path templates can be appended.
///
/// # Errors
///
/// Returns an error if no absolute `http(s)` base URL can be determined.
pub fn resolve_base_url(
    document: &OpenAPI,
    location: &str,
    override_url: Option<&str>,
) -> Result<String> {
    let candidate = override_url
        .map(str::to_string)
        .or_else(|| document.servers.first().map(|s| s.url.clone()))
        .ok_or_else(|| {
            OpenApiToolsError::OpenApi(
                "description declares no servers; set a base URL explicitly".to_string(),
            )
        })?;

    let resolved = if is_url(&candidate) {
        candidate
    } else if is_url(location) {
        let mut spec_url = Url::parse(location).map_err(|e| {
            OpenApiToolsError::OpenApi(format!("Invalid OpenAPI spec URL '{location}': {e}"))
        })?;
        spec_url.set_fragment(None);
        spec_url
            .join(&candidate)
            .map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "Invalid baseUrl '{candidate}': {e} (set baseUrl explicitly)",
                ))
            })?
            .to_string()
    } else {
        return Err(OpenApiToolsError::OpenApi(format!(
            "Invalid baseUrl '{candidate}': must be an absolute http(s) URL (set baseUrl explicitly)",
        )));
    };

    Ok(resolved.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const MINIMAL: &str = r#"
openapi: 3.0.3
info: {title: Minimal, version: "1"}
servers:
  - url: /api/v3
paths: {}
"#;

    fn write_spec(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(content.as_bytes()).expect("write");
        f
    }

    #[tokio::test]
    async fn loads_yaml_from_file_and_records_hash() {
        let f = write_spec(MINIMAL);
        let path = f.path().to_string_lossy().to_string();
        let loaded = load(&path, &LoadOptions::default()).await.expect("load");
        assert_eq!(loaded.title(), Some("Minimal"));
        assert!(loaded.spec_hash.starts_with("sha256:"));
        assert_eq!(loaded.spec_hash.len(), "sha256:".len() + 64);
    }

    #[tokio::test]
    async fn hash_mismatch_respects_policy() {
        let f = write_spec(MINIMAL);
        let path = f.path().to_string_lossy().to_string();
        let mut options = LoadOptions {
            spec_hash: Some("sha256:deadbeef".to_string()),
            hash_policy: HashPolicy::Fail,
            ..LoadOptions::default()
        };
        assert!(load(&path, &options).await.is_err());

        options.hash_policy = HashPolicy::Warn;
        assert!(load(&path, &options).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_document_is_a_parse_error() {
        let f = write_spec("not: [an, openapi");
        let path = f.path().to_string_lossy().to_string();
        let err = load(&path, &LoadOptions::default()).await.unwrap_err();
        assert!(matches!(err, OpenApiToolsError::OpenApiSpecParse { .. }), "{err}");
    }

    #[tokio::test]
    async fn loads_from_url() {
        use axum::{Router, routing::get};
        let app = Router::new().route("/openapi.yaml", get(|| async { MINIMAL }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move { axum::serve(listener, app).await });

        let location = format!("http://{addr}/openapi.yaml");
        let loaded = load(&location, &LoadOptions::default()).await.expect("load");
        assert_eq!(
            resolve_base_url(&loaded.document, &loaded.location, None).expect("base"),
            format!("http://{addr}/api/v3")
        );
    }

    #[test]
    fn malformed_operations_are_skipped_with_a_warning() {
        let (doc, warnings) = parse_document(
            br#"
openapi: 3.0.3
info: {title: Mixed, version: "1"}
paths:
  /pets:
    get:
      operationId: listPets
      responses:
        "200": {description: ok}
    post:
      operationId: createPet
  /pets/{petId}:
    get:
      operationId: getPet
      parameters: not-a-list
    delete:
      operationId: deletePet
"#,
            "mixed.yaml",
        )
        .expect("document");

        let pets = doc.paths.paths["/pets"].as_item().expect("item");
        assert_eq!(
            pets.get.as_ref().and_then(|op| op.operation_id.as_deref()),
            Some("listPets")
        );
        assert_eq!(
            pets.post.as_ref().and_then(|op| op.operation_id.as_deref()),
            Some("createPet")
        );
        let pet = doc.paths.paths["/pets/{petId}"].as_item().expect("item");
        assert!(pet.get.is_none());
        assert!(pet.delete.is_some());

        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert_eq!(warnings[0].operation, "GET /pets/{petId}");
    }

    #[test]
    fn a_broken_document_root_is_still_an_error() {
        let err = parse_document(b"openapi: 3.0.3\npaths: {}\n", "x.yaml").unwrap_err();
        assert!(matches!(err, OpenApiToolsError::OpenApiSpecParse { .. }), "{err}");
    }

    #[test]
    fn base_url_resolution() {
        let (doc, _) = parse_document(MINIMAL.as_bytes(), "minimal.yaml").expect("doc");
        assert_eq!(
            resolve_base_url(&doc, "https://example.com/specs/openapi.json", None).expect("base"),
            "https://example.com/api/v3"
        );
        assert_eq!(
            resolve_base_url(&doc, "./openapi.yaml", Some("https://override.example/v1/"))
                .expect("base"),
            "https://override.example/v1"
        );
        assert!(resolve_base_url(&doc, "./openapi.yaml", None).is_err());
    }
}
