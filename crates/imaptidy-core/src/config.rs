use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::MailboxRules;

pub const DEFAULT_ROOT: &str = "mail";
pub const TLS_PORT: u16 = 993;
pub const PLAIN_PORT: u16 = 143;
pub const OPTIONS_FILE_NAME: &str = "imaptidy.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Host name not set")]
    MissingHost,
    #[error("Password not set")]
    MissingPassword,
    #[error("Username not set")]
    MissingUsername,
    #[error("no [[{0}]] mailboxes configured")]
    MissingRules(&'static str),
    #[error("mailbox prefix {0:?} is not configured")]
    UnknownBox(String),
    #[error("{} is group/other readable or writable, refusing to use it", .0.display())]
    InsecureOptionsFile(PathBuf),
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid options file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk options, every field optional so the command line can fill gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ssl: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: Option<String>,
    pub root: Option<String>,
    pub noop: Option<bool>,
    pub verbose: Option<bool>,
    pub cleanse: Vec<CleanseRule>,
    pub flag: Vec<FlagRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CleanseRule {
    pub prefix: String,
    /// Messages older than this many days are removed.
    pub age: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlagRule {
    pub prefix: String,
    pub addresses: Vec<String>,
}

/// Values given on the command line; they win over the options file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ssl: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: Option<String>,
    pub root: Option<String>,
    pub noop: Option<bool>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: String,
    pub password: String,
    pub auth: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub root: String,
    pub cleanse: Vec<CleanseRule>,
    pub flag: Vec<FlagRule>,
    pub verbose: bool,
    pub noop: bool,
}

impl Config {
    /// Merges command line, options file and defaults, then checks that a
    /// connection can be attempted.
    pub fn resolve(
        file: OptionsFile,
        overrides: Overrides,
        env_user: Option<String>,
    ) -> Result<Self, ConfigError> {
        let tls = overrides.ssl.or(file.ssl).unwrap_or(true);
        let port = overrides
            .port
            .or(file.port)
            .unwrap_or(if tls { TLS_PORT } else { PLAIN_PORT });
        let host = overrides
            .host
            .or(file.host)
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingHost)?;
        let password = overrides
            .password
            .or(file.password)
            .ok_or(ConfigError::MissingPassword)?;
        let username = overrides
            .username
            .or(file.username)
            .or(env_user)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingUsername)?;
        let auth = overrides
            .auth
            .or(file.auth)
            .filter(|a| !a.trim().is_empty());
        Ok(Self {
            connection: ConnectionConfig {
                host,
                port,
                tls,
                username,
                password,
                auth,
            },
            root: overrides
                .root
                .or(file.root)
                .unwrap_or_else(|| DEFAULT_ROOT.to_string()),
            cleanse: file.cleanse,
            flag: file.flag,
            verbose: overrides.verbose.or(file.verbose).unwrap_or(false),
            noop: overrides.noop.or(file.noop).unwrap_or(false),
        })
    }

    pub fn cleanse_rules(&self) -> Result<MailboxRules<u32>, ConfigError> {
        if self.cleanse.is_empty() {
            return Err(ConfigError::MissingRules("cleanse"));
        }
        let entries = self
            .cleanse
            .iter()
            .map(|rule| (rule.prefix.clone(), rule.age))
            .collect();
        Ok(MailboxRules::new(&self.root, entries))
    }

    pub fn flag_rules(&self) -> Result<MailboxRules<Vec<String>>, ConfigError> {
        if self.flag.is_empty() {
            return Err(ConfigError::MissingRules("flag"));
        }
        let entries = self
            .flag
            .iter()
            .map(|rule| (rule.prefix.clone(), rule.addresses.clone()))
            .collect();
        Ok(MailboxRules::new(&self.root, entries))
    }
}

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub fn options_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from(OPTIONS_FILE_NAME),
        xdg_config_dir().join("imaptidy").join(OPTIONS_FILE_NAME),
    ]
}

/// Loads the options file. An explicit path must exist; otherwise the first
/// existing default candidate is used, and none at all yields the defaults.
pub fn load_options_file(explicit: Option<&Path>) -> Result<OptionsFile, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match options_path_candidates().into_iter().find(|p| p.is_file()) {
            Some(path) => path,
            None => return Ok(OptionsFile::default()),
        },
    };
    check_private(&path)?;
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    parse_options(&content).map_err(|source| ConfigError::Parse { path, source })
}

pub fn parse_options(content: &str) -> Result<OptionsFile, toml::de::Error> {
    toml::from_str(content)
}

#[cfg(unix)]
fn check_private(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if meta.permissions().mode() & 0o077 != 0 {
        return Err(ConfigError::InsecureOptionsFile(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_private(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{
        CleanseRule, Config, ConfigError, FlagRule, OptionsFile, Overrides, load_options_file,
        parse_options,
    };

    fn temp_options_path() -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!(
            "imaptidy-options-{}-{}.toml",
            std::process::id(),
            ts
        ))
    }

    fn minimal_file() -> OptionsFile {
        OptionsFile {
            host: Some("mail.example.com".to_string()),
            password: Some("secret".to_string()),
            ..OptionsFile::default()
        }
    }

    #[test]
    fn parses_rule_tables_in_declaration_order() {
        let file = parse_options(
            r#"
host = "mail.example.com"
password = "secret"
root = ""

[[cleanse]]
prefix = "Lists"
age = 30

[[cleanse]]
prefix = "INBOX"
age = 90

[[flag]]
prefix = "INBOX"
addresses = ["me@example.com", "me@work.example.com"]
"#,
        )
        .unwrap();
        assert_eq!(
            file.cleanse,
            vec![
                CleanseRule {
                    prefix: "Lists".to_string(),
                    age: 30
                },
                CleanseRule {
                    prefix: "INBOX".to_string(),
                    age: 90
                },
            ]
        );
        assert_eq!(
            file.flag,
            vec![FlagRule {
                prefix: "INBOX".to_string(),
                addresses: vec!["me@example.com".to_string(), "me@work.example.com".to_string()],
            }]
        );
        assert_eq!(file.root.as_deref(), Some(""));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_options("hots = \"typo\"").is_err());
    }

    #[test]
    fn defaults_follow_tls_flag() {
        let config = Config::resolve(minimal_file(), Overrides::default(), Some("me".into())).unwrap();
        assert!(config.connection.tls);
        assert_eq!(config.connection.port, 993);
        assert_eq!(config.connection.username, "me");
        assert_eq!(config.root, "mail");
        assert!(!config.noop);
        assert!(!config.verbose);

        let plain = Config::resolve(
            minimal_file(),
            Overrides {
                ssl: Some(false),
                ..Overrides::default()
            },
            Some("me".into()),
        )
        .unwrap();
        assert_eq!(plain.connection.port, 143);
    }

    #[test]
    fn command_line_wins_over_file() {
        let mut file = minimal_file();
        file.port = Some(1993);
        file.username = Some("file-user".to_string());
        file.verbose = Some(true);
        let config = Config::resolve(
            file,
            Overrides {
                host: Some("other.example.com".to_string()),
                username: Some("cli-user".to_string()),
                verbose: Some(false),
                ..Overrides::default()
            },
            Some("env-user".into()),
        )
        .unwrap();
        assert_eq!(config.connection.host, "other.example.com");
        assert_eq!(config.connection.port, 1993);
        assert_eq!(config.connection.username, "cli-user");
        assert!(!config.verbose);
    }

    #[test]
    fn missing_host_or_password_is_rejected() {
        let err = Config::resolve(OptionsFile::default(), Overrides::default(), Some("me".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingHost));

        let mut file = minimal_file();
        file.password = None;
        let err = Config::resolve(file, Overrides::default(), Some("me".into())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPassword));
    }

    #[test]
    fn username_falls_back_to_environment_then_fails() {
        let config = Config::resolve(minimal_file(), Overrides::default(), Some("me".into()))
            .unwrap();
        assert_eq!(config.connection.username, "me");

        let err = Config::resolve(minimal_file(), Overrides::default(), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingUsername));
        let err =
            Config::resolve(minimal_file(), Overrides::default(), Some(String::new())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingUsername));
    }

    #[test]
    fn blank_auth_means_autodetect() {
        let mut file = minimal_file();
        file.auth = Some(" ".to_string());
        let config = Config::resolve(file, Overrides::default(), Some("me".into())).unwrap();
        assert_eq!(config.connection.auth, None);
    }

    #[test]
    fn rules_require_entries_for_mode() {
        let config = Config::resolve(minimal_file(), Overrides::default(), Some("me".into())).unwrap();
        assert!(matches!(
            config.cleanse_rules().unwrap_err(),
            ConfigError::MissingRules("cleanse")
        ));
        assert!(matches!(
            config.flag_rules().unwrap_err(),
            ConfigError::MissingRules("flag")
        ));
    }

    #[test]
    fn rules_carry_root() {
        let mut file = minimal_file();
        file.cleanse.push(CleanseRule {
            prefix: "One".to_string(),
            age: 30,
        });
        let config = Config::resolve(file, Overrides::default(), Some("me".into())).unwrap();
        let rules = config.cleanse_rules().unwrap();
        assert_eq!(rules.root(), "mail/");
        assert_eq!(rules.resolve("mail/One"), Some(("One", &30)));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_options_file_is_refused() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_options_path();
        std::fs::write(&path, "host = \"mail.example.com\"\n").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = load_options_file(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureOptionsFile(_)));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let file = load_options_file(Some(&path)).unwrap();
        assert_eq!(file.host.as_deref(), Some("mail.example.com"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let path = temp_options_path();
        let err = load_options_file(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
