use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    /// Load defaults, then `path` (if present), then the environment overlay.
    pub fn load_from(path: &Path) -> Self {
        let mut map = default_map();

        if path.exists() {
            if let Ok(file) = fs::File::open(path) {
                let reader = BufReader::new(file);
                for line in reader.lines().map_while(Result::ok) {
                    if let Some((k, v)) = parse_line(&line) {
                        map.insert(k, v);
                    }
                }
            }
        }

        // Environment takes precedence over the rc file
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path: path.to_path_buf() }
    }

    /// Build a config from explicit pairs on top of the defaults, ignoring the environment.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut map = default_map();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        Self { inner: map, config_path: PathBuf::new() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_millis(&self, key: &str) -> Option<Duration> {
        self.get_u64(key).map(Duration::from_millis)
    }

    pub fn python_bin(&self) -> String {
        self.get("PYQUEST_PYTHON").unwrap_or_else(|| "python3".into())
    }

    pub fn data_path(&self) -> PathBuf {
        self.get("PYQUEST_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("pyquest").join("progress"))
    }

    pub fn content_path(&self) -> Option<PathBuf> {
        self.get("PYQUEST_CONTENT_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn log_filter(&self) -> String {
        self.get("PYQUEST_LOG").unwrap_or_else(|| "warn".into())
    }
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (k, v) = line.split_once('=')?;
    Some((k.trim().to_string(), v.trim().to_string()))
}

fn is_config_key(k: &str) -> bool {
    k.starts_with("PYQUEST_")
}

fn config_dir() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("pyquest")
}

fn default_config_path() -> PathBuf {
    config_dir().join(".pyquestrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    let data = BaseDirs::new()
        .map(|b| b.data_dir().join("pyquest"))
        .unwrap_or_else(|| env::temp_dir().join("pyquest"));

    // Paths
    m.insert(
        "PYQUEST_DATA_PATH".into(),
        data.join("progress").to_string_lossy().into_owned(),
    );
    m.insert("PYQUEST_PYTHON".into(), "python3".into());

    // Numbers
    m.insert("PYQUEST_EXEC_TIMEOUT_MS".into(), "5000".into());
    m.insert("PYQUEST_GRACE_MS".into(), "2000".into());
    m.insert("PYQUEST_STEP_LIMIT".into(), "1000000".into());
    m.insert("PYQUEST_READY_TIMEOUT_MS".into(), "10000".into());

    // Bools as strings
    m.insert("PYQUEST_RECYCLE_ON_TIMEOUT".into(), "true".into());

    m.insert("PYQUEST_LOG".into(), "warn".into());

    m
}
