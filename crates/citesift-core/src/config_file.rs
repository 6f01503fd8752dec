use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::input::ColumnMap;
use crate::normalize::MetadataElement;
use crate::service::ServiceMode;
use crate::Config;

/// TOML configuration as read from disk. Every field is optional; unset
/// fields fall through to the next file in the cascade, then to [`Config`]'s defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub service: Option<ServiceConfig>,
    pub session: Option<SessionConfig>,
    pub search: Option<SearchConfig>,
    /// Replaces the default column layout as a whole.
    pub columns: Option<ColumnMap>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// `full` or `lite`.
    pub mode: Option<String>,
    pub auth_url: Option<String>,
    pub search_url: Option<String>,
    pub search_lite_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub call_limit: Option<u64>,
    pub call_delay_ms: Option<u64>,
    pub throttle_cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub page_size: Option<u32>,
    pub database_id: Option<String>,
    pub query_language: Option<String>,
    pub time_begin: Option<String>,
    pub time_end: Option<String>,
    /// Relative window (`4week`, `1year`); takes precedence over the dates.
    pub symbolic_time_span: Option<String>,
    /// Metadata element keys, in output order.
    pub elements: Option<Vec<String>>,
}

/// Platform config directory path: `<config_dir>/citesift/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("citesift").join("config.toml"))
}

/// Load config by cascading CWD `.citesift.toml` over platform config, and
/// an explicitly given file over both.
pub fn load_config(explicit: Option<&Path>) -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".citesift.toml"));
    let explicit = explicit.and_then(load_from_path);

    [platform, cwd, explicit]
        .into_iter()
        .flatten()
        .fold(ConfigFile::default(), merge)
}

/// Read one config file. Missing or unparsable files yield `None`.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
            None
        }
    }
}

/// `overlay`'s value for a field if set, else `base`'s.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Field-wise merge; set fields in `overlay` win.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bs, os) = (&base.service, &overlay.service);
    let (bn, on) = (&base.session, &overlay.session);
    let (bq, oq) = (&base.search, &overlay.search);
    ConfigFile {
        service: Some(ServiceConfig {
            mode: pick(os, bs, |s| s.mode.clone()),
            auth_url: pick(os, bs, |s| s.auth_url.clone()),
            search_url: pick(os, bs, |s| s.search_url.clone()),
            search_lite_url: pick(os, bs, |s| s.search_lite_url.clone()),
            username: pick(os, bs, |s| s.username.clone()),
            password: pick(os, bs, |s| s.password.clone()),
            request_timeout_secs: pick(os, bs, |s| s.request_timeout_secs),
        }),
        session: Some(SessionConfig {
            call_limit: pick(on, bn, |s| s.call_limit),
            call_delay_ms: pick(on, bn, |s| s.call_delay_ms),
            throttle_cooldown_secs: pick(on, bn, |s| s.throttle_cooldown_secs),
        }),
        search: Some(SearchConfig {
            page_size: pick(oq, bq, |s| s.page_size),
            database_id: pick(oq, bq, |s| s.database_id.clone()),
            query_language: pick(oq, bq, |s| s.query_language.clone()),
            time_begin: pick(oq, bq, |s| s.time_begin.clone()),
            time_end: pick(oq, bq, |s| s.time_end.clone()),
            symbolic_time_span: pick(oq, bq, |s| s.symbolic_time_span.clone()),
            elements: pick(oq, bq, |s| s.elements.clone()),
        }),
        columns: overlay.columns.or(base.columns),
    }
}

/// Apply file values over `config`. Unset fields keep their current value.
pub fn apply(file: &ConfigFile, mut config: Config) -> Result<Config, String> {
    if let Some(service) = &file.service {
        if let Some(mode) = &service.mode {
            config.mode = mode.parse::<ServiceMode>()?;
        }
        if let Some(v) = &service.auth_url {
            config.auth_url = v.clone();
        }
        if let Some(v) = &service.search_url {
            config.search_url = v.clone();
        }
        if let Some(v) = &service.search_lite_url {
            config.search_lite_url = v.clone();
        }
        if service.username.is_some() {
            config.username = service.username.clone();
        }
        if service.password.is_some() {
            config.password = service.password.clone();
        }
        if let Some(v) = service.request_timeout_secs {
            config.request_timeout_secs = v;
        }
    }
    if let Some(session) = &file.session {
        if let Some(v) = session.call_limit {
            config.session_call_limit = v;
        }
        if let Some(v) = session.call_delay_ms {
            config.call_delay = Duration::from_millis(v);
        }
        if let Some(v) = session.throttle_cooldown_secs {
            config.throttle_cooldown = Duration::from_secs(v);
        }
    }
    if let Some(search) = &file.search {
        if let Some(v) = search.page_size {
            if v == 0 || v > 100 {
                return Err(format!("page_size must be between 1 and 100, got {}", v));
            }
            config.page_size = v;
        }
        if let Some(v) = &search.database_id {
            config.database_id = v.clone();
        }
        if let Some(v) = &search.query_language {
            config.query_language = v.clone();
        }
        if let Some(v) = &search.time_begin {
            config.time_begin = v.clone();
        }
        if search.time_end.is_some() {
            config.time_end = search.time_end.clone();
        }
        if let Some(v) = search.symbolic_time_span.as_deref().map(str::trim)
            && !v.is_empty()
        {
            config.symbolic_time_span = Some(v.to_string());
        }
        if let Some(keys) = &search.elements {
            config.elements = keys
                .iter()
                .map(|k| k.parse::<MetadataElement>())
                .collect::<Result<_, _>>()?;
        }
    }
    if let Some(columns) = &file.columns {
        config.columns = columns.clone();
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TimeSpan;

    #[test]
    fn partial_file_parses() {
        let toml_str = "[session]\ncall_limit = 500\n\n[columns]\nauthor = 0\nyear = 1\nhas_header = true\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.session.unwrap().call_limit, Some(500));
        let columns = parsed.columns.unwrap();
        assert_eq!(columns.author, 0);
        assert_eq!(columns.year, 1);
        // unspecified columns keep their defaults
        assert_eq!(columns.source, 2);
        assert!(columns.has_header);
        assert!(parsed.service.is_none());
    }

    #[test]
    fn merge_overlay_wins_and_base_preserved() {
        let base = ConfigFile {
            service: Some(ServiceConfig {
                username: Some("base-user".to_string()),
                mode: Some("lite".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            service: Some(ServiceConfig {
                mode: Some("full".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let service = merged.service.unwrap();
        assert_eq!(service.mode.as_deref(), Some("full"));
        assert_eq!(service.username.as_deref(), Some("base-user"));
    }

    #[test]
    fn apply_overrides_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [service]
            mode = "lite"

            [session]
            call_delay_ms = 250
            throttle_cooldown_secs = 30

            [search]
            page_size = 50
            time_end = "2015-12-31"
            elements = ["accession_number", "title", "doi"]
            "#,
        )
        .unwrap();
        let config = apply(&file, Config::default()).unwrap();
        assert_eq!(config.mode, ServiceMode::Lite);
        assert_eq!(config.call_delay, Duration::from_millis(250));
        assert_eq!(config.throttle_cooldown, Duration::from_secs(30));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.time_end.as_deref(), Some("2015-12-31"));
        assert_eq!(
            config.elements,
            vec![
                MetadataElement::AccessionNumber,
                MetadataElement::Title,
                MetadataElement::Doi
            ]
        );
        // untouched
        assert_eq!(config.session_call_limit, 2000);
        assert_eq!(config.database_id, "WOS");
    }

    #[test]
    fn symbolic_time_span_replaces_date_range() {
        let file: ConfigFile = toml::from_str(
            r#"
            [search]
            time_begin = "2001-01-01"
            symbolic_time_span = "4week"
            "#,
        )
        .unwrap();
        let config = apply(&file, Config::default()).unwrap();
        assert_eq!(config.symbolic_time_span.as_deref(), Some("4week"));
        let query = config.query_builder().literal("TS=(rice)");
        assert_eq!(query.time_span, TimeSpan::Symbolic("4week".into()));

        let dated = apply(&ConfigFile::default(), Config::default()).unwrap();
        assert!(matches!(
            dated.query_builder().literal("TS=(rice)").time_span,
            TimeSpan::Range { .. }
        ));
    }

    #[test]
    fn apply_rejects_bad_values() {
        let bad_mode: ConfigFile = toml::from_str("[service]\nmode = \"premium\"\n").unwrap();
        assert!(apply(&bad_mode, Config::default()).is_err());
        let bad_element: ConfigFile = toml::from_str("[search]\nelements = [\"colour\"]\n").unwrap();
        assert!(apply(&bad_element, Config::default()).is_err());
        let bad_page: ConfigFile = toml::from_str("[search]\npage_size = 500\n").unwrap();
        assert!(apply(&bad_page, Config::default()).is_err());
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[search]\ndatabase_id = \"WOK\"\n").unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded.search.unwrap().database_id.as_deref(), Some("WOK"));
        assert!(load_from_path(&dir.path().join("missing.toml")).is_none());
    }
}
