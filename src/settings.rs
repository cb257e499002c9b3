use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::directory::candidates::{default_magic_link_candidates, default_token_candidates};
use crate::directory::EndpointCandidate;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeSettings {
    pub application: ApplicationSettings,
    pub idp: IdpSettings,
    pub directory: DirectorySettings,
    pub session: SessionSettings,
    pub cookies: CookieSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Origin that post-login paths are appended to
    pub app_base_url: String,
    pub cors_origins: String,
    /// Destination used when `returnTo` is missing or not allowlisted
    pub post_login_path: String,
    pub allowed_return_paths: Vec<String>,
    pub assets_folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpSettings {
    pub discovery_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
    /// Host part of the accepted issuer, `https://<host>/<tenant>/v2.0`
    pub issuer_host: String,
    pub max_token_age_seconds: u64,
    pub clock_skew_seconds: u64,
    pub jwks_cache_seconds: u64,
    pub discovery_cache_seconds: u64,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    pub api_base: String,
    pub secret_key: String,
    pub api_key_header: String,
    /// Public application key handed to the browser-side client script
    pub public_key: String,
    pub script_url: String,
    /// Plan attached to newly created members, if any
    pub default_plan_id: Option<String>,
    pub request_timeout_seconds: u64,
    pub first_name_field: String,
    pub last_name_field: String,
    pub enable_session_token: bool,
    pub enable_magic_link: bool,
    pub session_token_candidates: Vec<EndpointCandidate>,
    pub magic_link_candidates: Vec<EndpointCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub cookie_secret: String,
    pub transaction_cookie_name: String,
    pub transaction_ttl_seconds: u64,
    pub session_cookie_name: String,
    pub session_duration_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            app_base_url: "http://localhost:3000".to_string(),
            cors_origins: "http://localhost:3000".to_string(),
            post_login_path: "/membership/home".to_string(),
            allowed_return_paths: vec![
                "/".to_string(),
                "/dashboard".to_string(),
                "/membership/home".to_string(),
                "/app".to_string(),
            ],
            assets_folder: "static".to_string(),
        }
    }
}

impl Default for IdpSettings {
    fn default() -> Self {
        Self {
            discovery_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            scope: "openid profile email".to_string(),
            issuer_host: "login.microsoftonline.com".to_string(),
            max_token_age_seconds: 300,
            clock_skew_seconds: 30,
            jwks_cache_seconds: 3600,
            discovery_cache_seconds: 300,
            http_timeout_seconds: 10,
        }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            api_base: "https://admin.memberstack.com".to_string(),
            secret_key: String::new(),
            api_key_header: "X-API-KEY".to_string(),
            public_key: String::new(),
            script_url: "https://static.memberstack.com/scripts/v1/memberstack.js".to_string(),
            default_plan_id: None,
            request_timeout_seconds: 10,
            first_name_field: "first-name".to_string(),
            last_name_field: "last-name".to_string(),
            enable_session_token: true,
            enable_magic_link: true,
            session_token_candidates: default_token_candidates(),
            magic_link_candidates: default_magic_link_candidates(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_secret: String::new(), // Will be generated if empty
            transaction_cookie_name: "oidc_tmp".to_string(),
            transaction_ttl_seconds: 300,
            session_cookie_name: "app_session".to_string(),
            session_duration_days: 7,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self { secure: true }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BridgeSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Logger initialization fails
    /// - Settings file cannot be read or parsed
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::initialize_environment()?;

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        Ok(settings)
    }

    /// Initialize environment and logging
    ///
    /// # Errors
    ///
    /// Returns an error if logger initialization fails
    fn initialize_environment() -> Result<(), Box<dyn std::error::Error>> {
        Self::load_env_file();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init()?;
        Ok(())
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `MEMBERBRIDGE_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_toml_file(&default_config_path)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("MEMBERBRIDGE_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_toml_file(&secrets_path)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ MEMBERBRIDGE_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse a settings file; sections and fields left out keep their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let toml_content = fs::read_to_string(path)?;
        Ok(basic_toml::from_str(&toml_content)?)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_idp_env_overrides(&mut settings.idp);
        Self::apply_directory_env_overrides(&mut settings.directory);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        Self::apply_string_env_override("HOST", &mut app_settings.host);
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        Self::apply_string_env_override("APP_BASE_URL", &mut app_settings.app_base_url);
        Self::apply_string_env_override("CORS_ORIGINS", &mut app_settings.cors_origins);
        Self::apply_string_env_override("POST_LOGIN_PATH", &mut app_settings.post_login_path);
        Self::apply_string_env_override("STATIC_FOLDER_PATH", &mut app_settings.assets_folder);
    }

    fn apply_idp_env_overrides(idp_settings: &mut IdpSettings) {
        Self::apply_string_env_override("IDP_DISCOVERY_URL", &mut idp_settings.discovery_url);
        Self::apply_string_env_override("IDP_CLIENT_ID", &mut idp_settings.client_id);
        Self::apply_string_env_override("IDP_CLIENT_SECRET", &mut idp_settings.client_secret);
        Self::apply_string_env_override("IDP_REDIRECT_URI", &mut idp_settings.redirect_uri);
        Self::apply_string_env_override("IDP_SCOPE", &mut idp_settings.scope);
        Self::apply_string_env_override("IDP_ISSUER_HOST", &mut idp_settings.issuer_host);
        Self::apply_numeric_env_override(
            "IDP_MAX_TOKEN_AGE_SECONDS",
            &mut idp_settings.max_token_age_seconds,
        );
    }

    fn apply_directory_env_overrides(directory_settings: &mut DirectorySettings) {
        Self::apply_string_env_override("DIRECTORY_API_BASE", &mut directory_settings.api_base);
        Self::apply_string_env_override("DIRECTORY_SECRET_KEY", &mut directory_settings.secret_key);
        Self::apply_string_env_override("DIRECTORY_PUBLIC_KEY", &mut directory_settings.public_key);
        if let Ok(plan) = std::env::var("DIRECTORY_DEFAULT_PLAN") {
            directory_settings.default_plan_id = (!plan.is_empty()).then_some(plan);
        }
        Self::apply_numeric_env_override(
            "DIRECTORY_TIMEOUT_SECONDS",
            &mut directory_settings.request_timeout_seconds,
        );
    }

    /// Apply environment overrides for session settings
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) {
        Self::apply_string_env_override(
            "SESSION_COOKIE_NAME",
            &mut session_settings.session_cookie_name,
        );
        Self::apply_numeric_env_override(
            "SESSION_DURATION_DAYS",
            &mut session_settings.session_duration_days,
        );

        Self::handle_cookie_secret_override(session_settings);
    }

    fn apply_string_env_override(env_var: &str, target: &mut String) {
        if let Ok(value) = std::env::var(env_var) {
            if !value.is_empty() {
                *target = value;
            }
        }
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    fn handle_cookie_secret_override(session_settings: &mut SessionSettings) {
        Self::apply_string_env_override("COOKIE_SECRET", &mut session_settings.cookie_secret);

        if session_settings.cookie_secret.is_empty() {
            session_settings.cookie_secret = Self::generate_random_cookie_secret();
            Self::warn_about_generated_secret();
        }
    }

    /// Generate 32 bytes (256 bits) of cookie secret material
    fn generate_random_cookie_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated cookie secret");
        eprintln!("🔒 For production use, set the COOKIE_SECRET environment variable");
        eprintln!("   or configure session.cookie_secret in Settings.toml");
        eprintln!("💡 In-flight logins and sessions are invalidated on each restart");
    }

    fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                cookie_settings.secure = cookie_secure;
            }
        }
    }

    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Check that the identity provider is configured well enough to start a login
    ///
    /// # Errors
    ///
    /// Returns a message naming every missing setting
    pub fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        if self.idp.discovery_url.is_empty() {
            missing.push("IDP_DISCOVERY_URL");
        }
        if self.idp.client_id.is_empty() {
            missing.push("IDP_CLIENT_ID");
        }
        if self.idp.redirect_uri.is_empty() {
            missing.push("IDP_REDIRECT_URI");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("Missing required settings: {}", missing.join(", ")))
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get CORS origins as a vector of strings
    #[must_use]
    pub fn get_cors_origins(&self) -> Vec<String> {
        self.application
            .cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
