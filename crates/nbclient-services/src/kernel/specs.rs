//! Kernel specs

use crate::error::{ServerError, ServerResult};
use crate::settings::ServerSettings;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// One installable kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecModel {
    /// Spec name
    pub name: String,
    /// Human-readable name
    pub display_name: String,
    /// Language the kernel runs
    #[serde(default)]
    pub language: String,
    /// Launch command
    #[serde(default)]
    pub argv: Vec<String>,
    /// Extra environment
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Resource name to URL
    #[serde(default)]
    pub resources: HashMap<String, String>,
}

/// Every kernel spec the server offers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecs {
    /// Name of the default spec; always a key of `kernelspecs`
    pub default: String,
    /// Specs by name
    pub kernelspecs: BTreeMap<String, KernelSpecModel>,
}

impl KernelSpecs {
    /// Spec by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KernelSpecModel> {
        self.kernelspecs.get(name)
    }

    /// Default spec
    #[must_use]
    pub fn default_spec(&self) -> Option<&KernelSpecModel> {
        self.kernelspecs.get(&self.default)
    }
}

#[derive(Deserialize)]
struct RawSpec {
    name: String,
    spec: RawSpecBody,
    #[serde(default)]
    resources: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawSpecBody {
    display_name: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    argv: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Validate a `/api/kernelspecs` body
///
/// Invalid individual specs are skipped; a default that is missing or
/// invalid falls back to the first valid spec.
///
/// # Errors
/// `ServerError::Validation` when the body has no usable spec at all.
pub fn parse_specs(body: &Value) -> ServerResult<KernelSpecs> {
    let raw = body
        .get("kernelspecs")
        .and_then(Value::as_object)
        .ok_or_else(|| ServerError::validation("kernel specs", "missing 'kernelspecs'"))?;

    let mut kernelspecs = BTreeMap::new();
    for (key, value) in raw {
        match serde_json::from_value::<RawSpec>(value.clone()) {
            Ok(spec) => {
                kernelspecs.insert(
                    key.clone(),
                    KernelSpecModel {
                        name: spec.name,
                        display_name: spec.spec.display_name,
                        language: spec.spec.language,
                        argv: spec.spec.argv,
                        env: spec.spec.env,
                        resources: spec.resources,
                    },
                );
            }
            Err(e) => tracing::warn!("skipping invalid kernel spec '{}': {}", key, e),
        }
    }

    let first = kernelspecs
        .keys()
        .next()
        .cloned()
        .ok_or_else(|| ServerError::validation("kernel specs", "no valid kernel specs"))?;
    let default = body
        .get("default")
        .and_then(Value::as_str)
        .filter(|name| kernelspecs.contains_key(*name))
        .map_or(first, str::to_string);

    Ok(KernelSpecs {
        default,
        kernelspecs,
    })
}

/// Fetch kernel specs from the server
///
/// # Errors
/// Any server error, or `ServerError::Validation` for an unusable body.
pub async fn get_specs(settings: &ServerSettings) -> ServerResult<KernelSpecs> {
    let url = settings.url(&["api", "kernelspecs"], "")?;
    let resp = settings.request(Method::GET, url, None, &[200]).await?;
    let body: Value = resp.decode("kernel specs")?;
    parse_specs(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str) -> Value {
        json!({
            "name": name,
            "spec": { "display_name": name.to_uppercase(), "language": "python", "argv": ["python"] },
            "resources": { "logo-64x64": format!("/kernelspecs/{name}/logo-64x64.png") }
        })
    }

    #[test]
    fn parses_valid_specs() {
        let specs = parse_specs(&json!({
            "default": "python3",
            "kernelspecs": { "python3": spec("python3"), "ir": spec("ir") }
        }))
        .unwrap();
        assert_eq!(specs.default, "python3");
        assert_eq!(specs.kernelspecs.len(), 2);
        assert_eq!(specs.default_spec().unwrap().display_name, "PYTHON3");
    }

    #[test]
    fn skips_invalid_and_falls_back_to_first() {
        let specs = parse_specs(&json!({
            "default": "broken",
            "kernelspecs": { "broken": { "name": "broken" }, "julia": spec("julia"), "ir": spec("ir") }
        }))
        .unwrap();
        assert_eq!(specs.default, "ir");
        assert!(specs.get("broken").is_none());
    }

    #[test]
    fn no_valid_specs_is_an_error() {
        let err = parse_specs(&json!({ "default": "x", "kernelspecs": { "x": 1 } })).unwrap_err();
        assert!(matches!(err, ServerError::Validation { .. }));
        assert!(parse_specs(&json!({})).is_err());
    }
}
