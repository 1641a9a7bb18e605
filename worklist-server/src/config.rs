use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration loaded from YAML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub fhir: FhirSettings,
    pub table: TableSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub api_keys: Vec<ApiKey>,
    pub jwt: Option<JwtSettings>,
    /// Cookie carrying a session JWT when no Authorization header is sent
    pub session_cookie: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// HS256 shared secret
    pub secret: Option<String>,
    /// JWKS endpoint, e.g. "https://api.stytch.com/v1/sessions/jwks/<project-id>"
    pub jwk_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    pub panels_db: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FhirSettings {
    /// Base URL of the upstream FHIR server, e.g. "https://api.medplum.com/fhir/R4"
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub cache_ttl_secs: u64,
    pub page_size: u32,
    pub max_pages: u32,
    pub timeout_secs: u64,
    /// Local searchset bundle used instead of a remote server
    pub fixture_bundle: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSettings {
    /// First day of the week for week presets, e.g. "monday" or "sunday"
    pub week_start: String,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            data_dir: PathBuf::from("data"),
            panels_db: "panels.sqlite".to_string(),
        }
    }
}

impl Default for FhirSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            cache_ttl_secs: 60,
            page_size: 100,
            max_pages: 10,
            timeout_secs: 30,
            fixture_bundle: None,
        }
    }
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            week_start: "monday".to_string(),
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override settings from `WORKLIST_*` variables looked up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("WORKLIST_PORT")
            && let Ok(port_num) = port.parse()
        {
            self.server.port = port_num;
        }

        if let Some(host) = var("WORKLIST_HOST") {
            self.server.host = host;
        }

        if let Some(data_dir) = var("WORKLIST_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(url) = var("WORKLIST_FHIR_URL") {
            self.fhir.base_url = Some(url);
        }

        if let Some(token) = var("WORKLIST_FHIR_TOKEN") {
            self.fhir.access_token = Some(token);
        }
    }

    /// Get the full path to the panels database
    pub fn panels_db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.panels_db)
    }
}
